//! Connection handling logic
//!
//! One accepted connection goes through handshake, gate, destination dial,
//! exchange and cleanup here.

use crate::core::{Server, Session, Transport};
use crate::error::SimpleStreamError;
use crate::logger::log;
use crate::transport::{AsyncStream, ConnectionMeta, UdpStream};

use anyhow::{anyhow, Result};
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Process a single connection
pub async fn process_connection<S>(server: &Server, stream: S, meta: ConnectionMeta) -> Result<()>
where
    S: AsyncStream,
{
    let peer_addr = meta.peer_addr.to_string();
    let conn_config = &server.conn_config;
    log::trace!(peer = %peer_addr, local = %meta.local_addr, "Handshake started");

    let mut session = match Session::handshake(
        &server.secret,
        peer_addr.as_str(),
        stream,
        conn_config.tcp_timeout_secs(),
        conn_config.udp_timeout_secs(),
        &server.pools,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            if e.is_probe_sensitive() {
                log::authentication(&peer_addr, false);
            } else if !matches!(e, SimpleStreamError::Io(_)) {
                log::protocol("handshake", Some(&e.to_string()));
            }
            log::debug!(peer = %peer_addr, error = %e, "Handshake failed");
            return Err(e.into());
        }
    };
    log::authentication(&peer_addr, true);

    let dst = session.dst();
    let transport = session.transport();

    let resolved = match server
        .gate
        .check(session.src(), session.dst_addr(), transport)
        .await
    {
        Ok(resolved) => resolved,
        Err(e) => {
            let dst_addr = session.dst_addr();
            log::debug!(
                peer = %peer_addr,
                host = %dst_addr.host(),
                port = dst_addr.port(),
                transport = %transport,
                error = %e,
                "Session rejected by gate"
            );
            session.clean();
            return Ok(());
        }
    };

    log::session(&peer_addr, &dst, transport.network(), "open");
    let result = forward(server, &mut session, resolved).await;
    session.clean();
    log::session(&peer_addr, &dst, transport.network(), "closed");

    result
}

/// Dial the destination and run the exchange
async fn forward<S>(
    server: &Server,
    session: &mut Session<S>,
    resolved: Option<SocketAddr>,
) -> Result<()>
where
    S: AsyncStream,
{
    let remote_addr = match resolved {
        Some(addr) => addr,
        None => session.dst_addr().to_socket_addr().await?,
    };

    let result = match session.transport() {
        Transport::Stream => {
            let remote = connect_tcp(server, remote_addr, session.src()).await?;
            session.exchange(remote).await
        }
        Transport::Datagram => {
            let remote = UdpStream::connect(remote_addr).await?;
            log::trace!(
                peer = %session.src(),
                remote = %remote_addr,
                local = ?remote.local_addr().ok(),
                "UDP socket connected"
            );
            session.exchange(remote).await
        }
    };

    if let Err(e) = &result {
        log::debug!(peer = %session.src(), dst = %session.dst(), error = %e, "Exchange ended with error");
    }
    Ok(result?)
}

/// Connect to a TCP destination with timeout
async fn connect_tcp(server: &Server, remote_addr: SocketAddr, peer_addr: &str) -> Result<TcpStream> {
    match tokio::time::timeout(
        server.conn_config.connect_timeout,
        TcpStream::connect(remote_addr),
    )
    .await
    {
        Ok(Ok(stream)) => {
            if server.conn_config.tcp_nodelay {
                let _ = stream.set_nodelay(true);
            }
            log::debug!(peer = %peer_addr, remote = %remote_addr, "Connected to remote");
            Ok(stream)
        }
        Ok(Err(e)) => {
            log::debug!(peer = %peer_addr, remote = %remote_addr, error = %e, "TCP connect failed");
            Err(e.into())
        }
        Err(_) => {
            log::debug!(peer = %peer_addr, remote = %remote_addr, "TCP connect timeout");
            Err(anyhow!("TCP connect timeout"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{encode_datagram, encode_handshake};
    use crate::core::{Address, PrivateAddressGate, SECRET_LEN};
    use std::sync::Arc;
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, UdpSocket};

    const SECRET: [u8; SECRET_LEN] = [9u8; SECRET_LEN];

    fn now_with_parity(odd: bool) -> u32 {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32;
        (now & !1) | odd as u32
    }

    fn meta() -> ConnectionMeta {
        ConnectionMeta {
            peer_addr: "127.0.0.1:50000".parse().unwrap(),
            local_addr: "127.0.0.1:9999".parse().unwrap(),
        }
    }

    fn ip_address(addr: SocketAddr) -> Address {
        match addr {
            SocketAddr::V4(v4) => Address::IPv4(v4.ip().octets(), v4.port()),
            SocketAddr::V6(v6) => Address::IPv6(v6.ip().octets(), v6.port()),
        }
    }

    #[tokio::test]
    async fn test_process_connection_stream_echo() {
        let server = Server::builder().secret(SECRET).build();
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = s.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let (server_side, mut client) = tokio::io::duplex(8192);
        let client_task = async move {
            let hs = encode_handshake(&SECRET, now_with_parity(false), &ip_address(echo_addr));
            client.write_all(&hs).await.unwrap();
            client.write_all(b"hello through the tunnel").await.unwrap();
            let mut got = [0u8; 24];
            client.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"hello through the tunnel");
            client.shutdown().await.unwrap();
        };

        let (result, ()) = tokio::join!(process_connection(&server, server_side, meta()), client_task);
        assert!(result.is_ok());
        assert_eq!(server.pools.in_use(), 0);
    }

    #[tokio::test]
    async fn test_process_connection_datagram_echo() {
        let server = Server::builder().secret(SECRET).build();
        let echo = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            let (n, from) = echo.recv_from(&mut buf).await.unwrap();
            echo.send_to(&buf[..n], from).await.unwrap();
        });

        let (server_side, mut client) = tokio::io::duplex(8192);
        let client_task = async move {
            let hs = encode_handshake(&SECRET, now_with_parity(true), &ip_address(echo_addr));
            client.write_all(&hs).await.unwrap();
            client.write_all(&encode_datagram(b"dns query")).await.unwrap();
            let mut got = [0u8; 11];
            client.read_exact(&mut got).await.unwrap();
            assert_eq!(&got[..], &encode_datagram(b"dns query")[..]);
            client.shutdown().await.unwrap();
        };

        let (result, ()) = tokio::join!(process_connection(&server, server_side, meta()), client_task);
        assert!(result.is_ok());
        assert_eq!(server.pools.in_use(), 0);
    }

    #[tokio::test]
    async fn test_process_connection_gate_rejects() {
        let server = Server::builder()
            .secret(SECRET)
            .gate(Arc::new(PrivateAddressGate))
            .build();

        let (server_side, mut client) = tokio::io::duplex(8192);
        let hs = encode_handshake(&SECRET, now_with_parity(false), &Address::IPv4([127, 0, 0, 1], 80));
        client.write_all(&hs).await.unwrap();

        let result = process_connection(&server, server_side, meta()).await;
        assert!(result.is_ok());
        assert_eq!(server.pools.in_use(), 0);

        // Rejected sessions are closed without a reply
        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_process_connection_bad_secret() {
        let server = Server::builder().secret(SECRET).build();

        let (server_side, mut client) = tokio::io::duplex(8192);
        let hs = encode_handshake(&[0u8; SECRET_LEN], now_with_parity(false), &Address::IPv4([127, 0, 0, 1], 80));
        client.write_all(&hs).await.unwrap();
        client.shutdown().await.unwrap();

        let result = process_connection(&server, server_side, meta()).await;
        assert!(result.is_err());
        assert_eq!(server.pools.in_use(), 0);

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_process_connection_unreachable_destination_cleans_up() {
        let server = Server::builder().secret(SECRET).build();
        // Grab a free port and close it again
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_addr = closed.local_addr().unwrap();
        drop(closed);

        let (server_side, mut client) = tokio::io::duplex(8192);
        let hs = encode_handshake(&SECRET, now_with_parity(false), &ip_address(closed_addr));
        client.write_all(&hs).await.unwrap();

        let result = process_connection(&server, server_side, meta()).await;
        assert!(result.is_err());
        assert_eq!(server.pools.in_use(), 0);
    }
}
