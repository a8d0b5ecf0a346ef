//! Simple stream tunnel server
//!
//! Architecture:
//! - `core/`: Protocol engine (handshake, exchange, buffer pools, gate hooks)
//! - `transport/`: Destination adapters (connected UDP as a byte stream)
//! - `handler`: Connection processing logic
//! - `server_runner`: Listener setup and accept loop

pub mod config;
pub mod core;
pub mod error;
pub mod handler;
pub mod logger;
pub mod server_runner;
pub mod transport;
pub mod utils;
