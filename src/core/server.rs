//! Core tunnel server state
//!
//! The Server struct holds everything shared by all connections.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::hooks::{Gate, PassThroughGate};
use super::pool::BufferPools;
use super::protocol::SECRET_LEN;
use crate::config::ConnConfig;

/// Core tunnel server
pub struct Server {
    /// Handshake secret
    pub secret: [u8; SECRET_LEN],
    /// Gate consulted after the handshake
    pub gate: Arc<dyn Gate>,
    /// Buffer pools shared by all sessions
    pub pools: BufferPools,
    /// Connection performance configuration
    pub conn_config: ConnConfig,
    active: AtomicUsize,
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Number of connections currently being handled
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Count a connection as active until the returned guard is dropped
    pub fn track_connection(&self) -> scopeguard::ScopeGuard<&AtomicUsize, fn(&AtomicUsize)> {
        let release: fn(&AtomicUsize) = |active| {
            active.fetch_sub(1, Ordering::Relaxed);
        };
        self.active.fetch_add(1, Ordering::Relaxed);
        scopeguard::guard(&self.active, release)
    }
}

/// Builder for constructing a Server
pub struct ServerBuilder {
    secret: Option<[u8; SECRET_LEN]>,
    gate: Option<Arc<dyn Gate>>,
    pools: Option<BufferPools>,
    conn_config: Option<ConnConfig>,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    /// Create a new server builder with default settings
    pub fn new() -> Self {
        Self {
            secret: None,
            gate: None,
            pools: None,
            conn_config: None,
        }
    }

    /// Set handshake secret
    pub fn secret(mut self, secret: [u8; SECRET_LEN]) -> Self {
        self.secret = Some(secret);
        self
    }

    /// Set gate
    pub fn gate(mut self, gate: Arc<dyn Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Share existing buffer pools
    pub fn pools(mut self, pools: BufferPools) -> Self {
        self.pools = Some(pools);
        self
    }

    /// Set connection configuration
    pub fn conn_config(mut self, config: ConnConfig) -> Self {
        self.conn_config = Some(config);
        self
    }

    /// Build the server
    ///
    /// Panics if the secret is not set
    pub fn build(self) -> Server {
        Server {
            secret: self.secret.expect("secret is required"),
            gate: self.gate.unwrap_or_else(|| Arc::new(PassThroughGate)),
            pools: self.pools.unwrap_or_default(),
            conn_config: self.conn_config.unwrap_or_default(),
            active: AtomicUsize::new(0),
        }
    }
}
