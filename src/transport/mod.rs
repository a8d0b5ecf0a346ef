//! Transport layer abstraction
//!
//! Client connections are plain TCP. Destinations are TCP streams for stream
//! sessions and connected UDP sockets for datagram sessions; both are driven
//! through the same `AsyncRead + AsyncWrite` interface by the exchange.

mod udp;

pub use udp::UdpStream;

use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

/// Unified transport stream trait combining AsyncRead + AsyncWrite + Send + Unpin
pub trait AsyncStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AsyncStream for T {}

/// Connection metadata
#[derive(Debug, Clone)]
pub struct ConnectionMeta {
    /// Client peer address
    pub peer_addr: SocketAddr,
    /// Local address the connection was accepted on
    pub local_addr: SocketAddr,
}
