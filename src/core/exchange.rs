//! Duplex exchange between a session's client and its destination
//!
//! Stream sessions copy raw bytes both ways. Datagram sessions read
//! `length + payload` frames from the client and write bare payloads to the
//! destination; replies go the other way with the length prefix added back.
//! Both directions are polled on the caller's task and the call returns as
//! soon as the client-to-destination direction stops. The session's pooled
//! buffers are borrowed for the whole exchange, so neither direction can be
//! moved onto a spawned task.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use super::deadline::with_deadline;
use super::protocol::Transport;
use crate::error::{Result, SimpleStreamError};

/// Outcome of one forwarding step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Run both directions until the client-to-destination one stops
pub(crate) async fn relay<C, R>(
    client: &mut C,
    remote: R,
    read_buf: &mut [u8],
    write_buf: &mut [u8],
    transport: Transport,
    timeout: u64,
) -> Result<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
    R: AsyncRead + AsyncWrite + Unpin,
{
    let idle = (timeout != 0).then(|| Duration::from_secs(timeout));
    let (mut client_r, mut client_w) = tokio::io::split(client);
    let (mut remote_r, mut remote_w) = tokio::io::split(remote);

    let upstream = client_to_remote(&mut client_r, &mut remote_w, read_buf, transport, idle);
    let downstream = remote_to_client(&mut remote_r, &mut client_w, write_buf, transport, idle);
    tokio::pin!(upstream, downstream);

    let mut downstream_done = false;
    loop {
        tokio::select! {
            result = &mut upstream => return result,
            _ = &mut downstream, if !downstream_done => downstream_done = true,
        }
    }
}

async fn client_to_remote<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    transport: Transport,
    idle: Option<Duration>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if transport == Transport::Stream && idle.is_none() {
        let _ = tokio::io::copy(reader, writer).await;
        return Ok(());
    }
    loop {
        let deadline = idle.map(|d| Instant::now() + d);
        let flow = match transport {
            Transport::Stream => forward_stream(reader, writer, buf, deadline).await,
            Transport::Datagram => unframe_datagram(reader, writer, buf, deadline).await?,
        };
        if flow == Flow::Stop {
            return Ok(());
        }
    }
}

async fn remote_to_client<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    transport: Transport,
    idle: Option<Duration>,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if transport == Transport::Stream && idle.is_none() {
        let _ = tokio::io::copy(reader, writer).await;
    } else {
        loop {
            let deadline = idle.map(|d| Instant::now() + d);
            let flow = match transport {
                Transport::Stream => forward_stream(reader, writer, buf, deadline).await,
                Transport::Datagram => frame_datagram(reader, writer, buf, deadline).await,
            };
            if flow == Flow::Stop {
                break;
            }
        }
    }
    // Nothing more will reach the client; let it see EOF.
    if transport == Transport::Stream {
        let _ = writer.shutdown().await;
    }
}

/// Copy one read's worth of bytes
async fn forward_stream<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Flow
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let n = match with_deadline(deadline, reader.read(buf)).await {
        Ok(0) | Err(_) => return Flow::Stop,
        Ok(n) => n,
    };
    match with_deadline(deadline, writer.write_all(&buf[..n])).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}

/// Read one `length + payload` frame from the client and send the payload on
async fn unframe_datagram<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Result<Flow>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if with_deadline(deadline, reader.read_exact(&mut buf[..2])).await.is_err() {
        return Ok(Flow::Stop);
    }
    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len > buf.len() - 2 {
        return Err(SimpleStreamError::PacketTooLong(len));
    }
    let payload = &mut buf[2..2 + len];
    if with_deadline(deadline, reader.read_exact(payload)).await.is_err() {
        return Ok(Flow::Stop);
    }
    // One write per frame; an empty payload must still go out as a datagram.
    match with_deadline(deadline, writer.write(&buf[2..2 + len])).await {
        Ok(_) => Ok(Flow::Continue),
        Err(_) => Ok(Flow::Stop),
    }
}

/// Read one reply datagram and send it to the client behind its length
async fn frame_datagram<R, W>(
    reader: &mut R,
    writer: &mut W,
    buf: &mut [u8],
    deadline: Option<Instant>,
) -> Flow
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    // A 0-byte read is an empty datagram, framed as `00 00`.
    let n = match with_deadline(deadline, reader.read(&mut buf[2..])).await {
        Ok(n) => n,
        Err(_) => return Flow::Stop,
    };
    buf[..2].copy_from_slice(&(n as u16).to_be_bytes());
    match with_deadline(deadline, writer.write_all(&buf[..2 + n])).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Stop,
    }
}
