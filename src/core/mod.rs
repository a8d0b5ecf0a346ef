//! Core tunnel module
//!
//! This module contains the simple stream protocol engine:
//! - Wire format and address decoding
//! - Buffer pools
//! - Session handshake, exchange and cleanup
//! - Gate hooks for extensibility

mod deadline;
mod exchange;
pub mod hooks;
pub mod ip_filter;
pub mod pool;
pub mod protocol;
mod server;
mod session;

pub use deadline::{deadline_after, drain_until_error, with_deadline};
pub use hooks::{Gate, PassThroughGate, PrivateAddressGate};
pub use pool::{BufferPool, BufferPools, PooledBuf, LARGE_BUFFER_SIZE, SMALL_BUFFER_SIZE};
pub use protocol::{transport_for_timestamp, Address, Transport, SECRET_LEN};
pub use server::{Server, ServerBuilder};
pub use session::Session;
