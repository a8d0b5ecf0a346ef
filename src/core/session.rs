//! Per-connection session: handshake, forwarding entry point and cleanup
//!
//! A session is built from a freshly accepted connection by
//! [`Session::handshake`], forwarded with [`Session::exchange`], and torn down
//! with [`Session::clean`]. Buffers come from [`BufferPools`] and go back to
//! the pool they were taken from exactly once.

use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use super::deadline::{deadline_after, drain_until_error, with_deadline};
use super::exchange;
use super::pool::{BufferPools, PooledBuf};
use super::protocol::{
    clock_skew, transport_for_timestamp, Address, Transport, HEADER_LEN, MAX_REQUEST_LEN,
    MIN_REQUEST_LEN, REPLAY_WINDOW_SECS, SECRET_LEN,
};
use crate::error::{Result, SimpleStreamError};

/// An authenticated simple stream session
pub struct Session<S> {
    client: S,
    timeout: u64,
    read_buf: PooledBuf,
    write_buf: PooledBuf,
    transport: Transport,
    src: String,
    dst: Address,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Authenticate `client` and decode its request
    ///
    /// `timeout` (seconds, 0 = none) bounds the whole handshake and becomes the
    /// idle timeout of a stream session; datagram sessions use `udp_timeout`
    /// instead. On a wrong secret or a stale timestamp the connection is
    /// drained rather than answered.
    pub async fn handshake(
        secret: &[u8; SECRET_LEN],
        src: impl Into<String>,
        mut client: S,
        timeout: u64,
        udp_timeout: u64,
        pools: &BufferPools,
    ) -> Result<Self> {
        let deadline = deadline_after(timeout);
        let mut buf = pools.small.acquire();

        with_deadline(deadline, client.read_exact(&mut buf[..HEADER_LEN])).await?;

        if buf[..SECRET_LEN] != secret[..] {
            buf.release();
            drain_until_error(&mut client, deadline).await;
            return Err(SimpleStreamError::Authentication(
                "secret mismatch".to_string(),
            ));
        }

        let len = u16::from_be_bytes([buf[SECRET_LEN], buf[SECRET_LEN + 1]]) as usize;
        if len > MAX_REQUEST_LEN {
            return Err(SimpleStreamError::RequestTooLong(len));
        }
        if len < MIN_REQUEST_LEN {
            return Err(SimpleStreamError::ProtocolParse(format!(
                "request body of {} bytes is too short",
                len
            )));
        }

        with_deadline(deadline, client.read_exact(&mut buf[..len])).await?;

        let timestamp = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let skew = clock_skew(timestamp, unix_now());
        if skew > REPLAY_WINDOW_SECS {
            buf.release();
            drain_until_error(&mut client, deadline).await;
            return Err(SimpleStreamError::Expired(skew));
        }

        let transport = transport_for_timestamp(timestamp);
        let dst = Address::from_parts(buf[4], &buf[5..len - 2], &buf[len - 2..len])?;

        let (read_buf, write_buf, timeout) = match transport {
            // The handshake buffer already holds the request; hand it over.
            Transport::Stream => (buf, pools.small.acquire(), timeout),
            Transport::Datagram => {
                let mut large = pools.large.acquire();
                large[..len].copy_from_slice(&buf[..len]);
                buf.release();
                (large, pools.large.acquire(), udp_timeout)
            }
        };

        Ok(Self {
            client,
            timeout,
            read_buf,
            write_buf,
            transport,
            src: src.into(),
            dst,
        })
    }

    /// Forward between the client and `remote` until the client side ends
    ///
    /// Only an oversized datagram from the client surfaces as an error; every
    /// other stop is a normal end of the exchange. The caller closes both
    /// connections afterwards.
    pub async fn exchange<R>(&mut self, remote: R) -> Result<()>
    where
        R: AsyncRead + AsyncWrite + Unpin,
    {
        exchange::relay(
            &mut self.client,
            remote,
            &mut self.read_buf,
            &mut self.write_buf,
            self.transport,
            self.timeout,
        )
        .await
    }
}

impl<S> Session<S> {
    /// Return both buffers to their pool and close the client connection
    pub fn clean(self) {
        let Session {
            client,
            read_buf,
            write_buf,
            ..
        } = self;
        read_buf.release();
        write_buf.release();
        drop(client);
    }

    /// Payload type of this session
    pub fn transport(&self) -> Transport {
        self.transport
    }

    /// Peer address as given at construction
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Destination as `host:port`
    pub fn dst(&self) -> String {
        self.dst.to_string()
    }

    /// Decoded destination
    pub fn dst_addr(&self) -> &Address {
        &self.dst
    }

    /// Idle timeout in seconds applied during the exchange
    pub fn timeout(&self) -> u64 {
        self.timeout
    }
}

impl<S> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.transport)
            .field("src", &self.src)
            .field("dst", &self.dst)
            .field("timeout", &self.timeout)
            .finish()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
