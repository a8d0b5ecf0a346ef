//! Simple stream protocol wire format
//!
//! Handshake, sent once by the client:
//! - 32-byte secret
//! - body length (u16, big-endian)
//! - body: timestamp (u32, big-endian) + ATYP + address + port (u16, big-endian)
//!
//! The timestamp doubles as the transport flag: even for a TCP stream, odd for
//! UDP datagrams. After the handshake a stream session carries raw bytes, a
//! datagram session carries `length (u16, big-endian) + payload` frames in both
//! directions.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::lookup_host;

use crate::error::{Result, SimpleStreamError};

/// Length of the shared secret
pub const SECRET_LEN: usize = 32;

/// Secret plus body length prefix
pub const HEADER_LEN: usize = SECRET_LEN + 2;

/// Largest accepted request body
pub const MAX_REQUEST_LEN: usize = 2048;

/// Timestamp (4) + ATYP (1) + port (2)
pub const MIN_REQUEST_LEN: usize = 7;

/// Tolerated distance between request timestamp and server clock
pub const REPLAY_WINDOW_SECS: u64 = 60;

/// Largest datagram payload behind a 2-byte length prefix
pub const MAX_DATAGRAM_LEN: usize = crate::core::pool::LARGE_BUFFER_SIZE - 2;

const DNS_RESOLVE_TIMEOUT_SECS: u64 = 10;

/// Address type constants
const ATYP_IPV4: u8 = 1;
const ATYP_DOMAIN: u8 = 3;
const ATYP_IPV6: u8 = 4;

/// Payload type carried by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// Unframed TCP byte stream
    Stream,
    /// Length-prefixed UDP datagrams
    Datagram,
}

impl Transport {
    /// Network name of the destination socket
    pub fn network(&self) -> &'static str {
        match self {
            Transport::Stream => "tcp",
            Transport::Datagram => "udp",
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.network())
    }
}

/// Transport selected by the request timestamp parity
pub fn transport_for_timestamp(timestamp: u32) -> Transport {
    if timestamp % 2 == 0 {
        Transport::Stream
    } else {
        Transport::Datagram
    }
}

/// Seconds between the request timestamp and `now`, in either direction
pub fn clock_skew(timestamp: u32, now: u64) -> u64 {
    now.abs_diff(u64::from(timestamp))
}

/// Destination address (SOCKS5 encoding)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address
    IPv4([u8; 4], u16),
    /// IPv6 address
    IPv6([u8; 16], u16),
    /// Domain name
    Domain(String, u16),
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::IPv4(ip, port) => write!(f, "{}:{}", Ipv4Addr::from(*ip), port),
            Address::IPv6(ip, port) => write!(f, "[{}]:{}", Ipv6Addr::from(*ip), port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

impl Address {
    /// Decode from the type byte, the raw address bytes and the 2-byte port
    ///
    /// Domain address bytes start with their one-byte length.
    pub fn from_parts(atyp: u8, addr: &[u8], port: &[u8]) -> Result<Self> {
        let port = match port {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => return Err(parse_error("port must be 2 bytes")),
        };
        match atyp {
            ATYP_IPV4 => {
                let ip: [u8; 4] = addr
                    .try_into()
                    .map_err(|_| parse_error("IPv4 address must be 4 bytes"))?;
                Ok(Address::IPv4(ip, port))
            }
            ATYP_IPV6 => {
                let ip: [u8; 16] = addr
                    .try_into()
                    .map_err(|_| parse_error("IPv6 address must be 16 bytes"))?;
                Ok(Address::IPv6(ip, port))
            }
            ATYP_DOMAIN => {
                let (&len, rest) = addr
                    .split_first()
                    .ok_or_else(|| parse_error("missing domain length"))?;
                let len = len as usize;
                if len == 0 || rest.len() < len {
                    return Err(parse_error("truncated domain"));
                }
                let domain = std::str::from_utf8(&rest[..len])
                    .map_err(|_| parse_error("invalid domain encoding"))?;
                Ok(Address::Domain(domain.to_string(), port))
            }
            _ => Err(parse_error("invalid address type")),
        }
    }

    /// Encode address to buffer
    /// Returns the number of bytes written
    pub fn encode(&self, buf: &mut Vec<u8>) -> usize {
        let start_len = buf.len();
        match self {
            Address::IPv4(ip, port) => {
                buf.push(ATYP_IPV4);
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::IPv6(ip, port) => {
                buf.push(ATYP_IPV6);
                buf.extend_from_slice(ip);
                buf.extend_from_slice(&port.to_be_bytes());
            }
            Address::Domain(domain, port) => {
                buf.push(ATYP_DOMAIN);
                buf.push(domain.len() as u8);
                buf.extend_from_slice(domain.as_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
            }
        }
        buf.len() - start_len
    }

    /// Get the port number
    pub fn port(&self) -> u16 {
        match self {
            Address::IPv4(_, port) => *port,
            Address::IPv6(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }

    /// Get the host string (IP or domain)
    pub fn host(&self) -> String {
        match self {
            Address::IPv4(ip, _) => Ipv4Addr::from(*ip).to_string(),
            Address::IPv6(ip, _) => Ipv6Addr::from(*ip).to_string(),
            Address::Domain(domain, _) => domain.clone(),
        }
    }

    /// Resolve to socket address
    pub async fn to_socket_addr(&self) -> std::io::Result<SocketAddr> {
        match self {
            Address::IPv4(ip, port) => Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::from(*ip)), *port)),
            Address::IPv6(ip, port) => Ok(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(*ip)), *port)),
            Address::Domain(domain, port) => {
                let mut addrs = tokio::time::timeout(
                    Duration::from_secs(DNS_RESOLVE_TIMEOUT_SECS),
                    lookup_host((domain.as_str(), *port)),
                )
                .await
                .map_err(|_| {
                    std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("DNS resolution of {} timed out", domain),
                    )
                })??;
                addrs.next().ok_or_else(|| {
                    std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no addresses found for {}", domain),
                    )
                })
            }
        }
    }
}

fn parse_error(msg: &str) -> SimpleStreamError {
    SimpleStreamError::ProtocolParse(msg.to_string())
}

/// Build a complete client handshake
pub fn encode_handshake(secret: &[u8; SECRET_LEN], timestamp: u32, addr: &Address) -> Vec<u8> {
    let mut body = Vec::with_capacity(4 + 1 + 256 + 2);
    body.extend_from_slice(&timestamp.to_be_bytes());
    addr.encode(&mut body);

    let mut buf = Vec::with_capacity(HEADER_LEN + body.len());
    buf.extend_from_slice(secret);
    buf.extend_from_slice(&(body.len() as u16).to_be_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Frame one datagram payload with its length prefix
pub fn encode_datagram(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 + payload.len());
    buf.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}
