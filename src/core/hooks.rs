//! Hook traits for extensibility
//!
//! The gate sees every successfully authenticated session before any
//! destination is dialed and may refuse it.

use async_trait::async_trait;
use std::net::SocketAddr;

use super::ip_filter::is_private_ip;
use super::protocol::{Address, Transport};
use crate::error::{Result, SimpleStreamError};

/// Gate consulted between handshake and forwarding
///
/// Returns a pre-resolved destination when the gate already had to resolve a
/// domain, so the dialer can skip a second lookup.
#[async_trait]
pub trait Gate: Send + Sync {
    async fn check(
        &self,
        src: &str,
        dst: &Address,
        transport: Transport,
    ) -> Result<Option<SocketAddr>>;
}

/// Admits every session unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThroughGate;

#[async_trait]
impl Gate for PassThroughGate {
    async fn check(&self, _src: &str, _dst: &Address, _transport: Transport) -> Result<Option<SocketAddr>> {
        Ok(None)
    }
}

/// Refuses destinations inside private, loopback or link-local ranges
#[derive(Debug, Default, Clone, Copy)]
pub struct PrivateAddressGate;

#[async_trait]
impl Gate for PrivateAddressGate {
    async fn check(&self, _src: &str, dst: &Address, _transport: Transport) -> Result<Option<SocketAddr>> {
        let (is_private, resolved) = check_private_and_resolve(dst).await?;
        if is_private {
            return Err(SimpleStreamError::Rejected(format!(
                "private destination {}",
                dst
            )));
        }
        Ok(resolved)
    }
}

/// Check if an address is private/loopback/link-local.
/// For domain addresses, also returns the first resolved SocketAddr so
/// callers can reuse it without a second DNS lookup.
async fn check_private_and_resolve(addr: &Address) -> Result<(bool, Option<SocketAddr>)> {
    match addr {
        Address::IPv4(_, _) | Address::IPv6(_, _) => {
            let socket_addr = addr.to_socket_addr().await?;
            Ok((is_private_ip(&socket_addr.ip()), None))
        }
        Address::Domain(domain, port) => {
            let resolved: Vec<SocketAddr> = tokio::net::lookup_host((domain.as_str(), *port))
                .await?
                .collect();
            if resolved.iter().any(|a| is_private_ip(&a.ip())) {
                return Ok((true, None));
            }
            Ok((false, resolved.into_iter().next()))
        }
    }
}
