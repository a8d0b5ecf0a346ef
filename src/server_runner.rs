//! Server startup and accept loop
//!
//! This module binds the listener and runs the connection accept loop.

use crate::core::Server;
use crate::handler::process_connection;
use crate::logger::log;
use crate::transport::ConnectionMeta;

use anyhow::Result;
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// TCP keepalive interval for accepted client connections.
/// Dead peers are detected in ~45s (3 probes x 15s).
const TCP_KEEPALIVE_SECS: u64 = 15;

/// Bind a TCP listener with SO_REUSEADDR and the given backlog
pub fn bind_listener(addr: SocketAddr, backlog: i32) -> Result<TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;
    // Allow immediate rebind after restart (skip TIME_WAIT)
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Build the optional connection limiter, 0 = unlimited
fn build_conn_limiter(max_connections: usize) -> Option<Arc<Semaphore>> {
    if max_connections > 0 {
        Some(Arc::new(Semaphore::new(max_connections)))
    } else {
        None
    }
}

/// Apply per-connection socket options to an accepted client
fn configure_client_socket(stream: &TcpStream, nodelay: bool) {
    if nodelay {
        let _ = stream.set_nodelay(true);
    }

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(TCP_KEEPALIVE_SECS))
        .with_interval(Duration::from_secs(TCP_KEEPALIVE_SECS));
    let _ = SockRef::from(stream).set_tcp_keepalive(&keepalive);
}

/// Run the accept loop until `shutdown` is cancelled
///
/// Each accepted connection is handled on its own task. Connections already
/// in flight keep running after the loop returns.
pub async fn run_server(
    server: Arc<Server>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> Result<()> {
    let local_addr = listener.local_addr()?;
    let conn_limiter = build_conn_limiter(server.conn_config.max_connections);

    log::info!(
        address = %local_addr,
        max_connections = server.conn_config.max_connections,
        tcp_timeout = ?server.conn_config.tcp_timeout,
        udp_timeout = ?server.conn_config.udp_timeout,
        "Server started"
    );

    loop {
        // Acquire connection permit first (backpressure when at limit)
        let permit = match conn_limiter {
            Some(ref limiter) => tokio::select! {
                _ = shutdown.cancelled() => break,
                permit = limiter.clone().acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => break,
                },
            },
            None => None,
        };

        let accepted = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer_addr)) => {
                log::trace!(peer = %peer_addr, "Connection accepted");
                let server = Arc::clone(&server);

                tokio::spawn(async move {
                    // Hold permit for the lifetime of this connection
                    let _permit = permit;
                    let _active = server.track_connection();

                    configure_client_socket(&stream, server.conn_config.tcp_nodelay);
                    let meta = ConnectionMeta {
                        peer_addr,
                        local_addr: stream.local_addr().unwrap_or(local_addr),
                    };

                    if let Err(e) = process_connection(&server, stream, meta).await {
                        log::debug!(peer = %peer_addr, error = %e, "Connection error");
                    }
                });
            }
            Err(e) => {
                // Transient accept errors (EMFILE, ECONNABORTED) must not kill the loop
                log::error!(error = %e, "Failed to accept connection");
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    log::info!(address = %local_addr, "Server stopped accepting connections");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::encode_handshake;
    use crate::core::{Address, SECRET_LEN};
    use std::time::{SystemTime, UNIX_EPOCH};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const SECRET: [u8; SECRET_LEN] = [3u8; SECRET_LEN];

    #[tokio::test]
    async fn test_conn_limiter_backpressure() {
        let limiter = build_conn_limiter(2).unwrap();

        let permit1 = limiter.clone().acquire_owned().await.unwrap();
        let permit2 = limiter.clone().acquire_owned().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);
        assert!(limiter.try_acquire().is_err());

        // Connection closes -> slot freed
        drop(permit1);
        assert_eq!(limiter.available_permits(), 1);

        let permit3 = limiter.clone().acquire_owned().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        drop(permit2);
        drop(permit3);
        assert_eq!(limiter.available_permits(), 2);
    }

    #[test]
    fn test_conn_limiter_unlimited_when_zero() {
        assert!(build_conn_limiter(0).is_none());
    }

    #[tokio::test]
    async fn test_bind_listener_ephemeral_port() {
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn test_configure_client_socket_sets_nodelay() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let _client = client.unwrap();
        let (stream, _) = accepted.unwrap();

        configure_client_socket(&stream, true);
        assert!(stream.nodelay().unwrap());
        assert!(SockRef::from(&stream).keepalive().unwrap());
    }

    #[tokio::test]
    async fn test_run_server_relays_and_stops_on_shutdown() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut s, _) = echo.accept().await.unwrap();
            let (mut r, mut w) = s.split();
            let _ = tokio::io::copy(&mut r, &mut w).await;
        });

        let server = Arc::new(Server::builder().secret(SECRET).build());
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), 128).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_server(Arc::clone(&server), listener, shutdown.clone()));

        let ts = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as u32 & !1;
        let dst = match echo_addr {
            SocketAddr::V4(v4) => Address::IPv4(v4.ip().octets(), v4.port()),
            SocketAddr::V6(v6) => Address::IPv6(v6.ip().octets(), v6.port()),
        };

        let mut client = TcpStream::connect(addr).await.unwrap();
        client.write_all(&encode_handshake(&SECRET, ts, &dst)).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut got = [0u8; 4];
        client.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");
        assert_eq!(server.active_connections(), 1);

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }
}
