//! Fixed-capacity buffer pools
//!
//! Every session draws its buffers from one of two capacity classes: small
//! buffers for the handshake and stream sessions, large buffers for datagram
//! sessions. A lease hands its buffer back to the pool it came from when it is
//! released or dropped, so a buffer can never be returned twice.

use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Capacity of the small class (handshake and stream sessions)
pub const SMALL_BUFFER_SIZE: usize = 2048;

/// Capacity of the large class: maximum UDP payload
pub const LARGE_BUFFER_SIZE: usize = 65507;

/// Idle buffers kept per pool before extra ones are freed
const DEFAULT_RETAIN: usize = 1024;

/// Lock-free pool of equally sized byte buffers
pub struct BufferPool {
    size: usize,
    free: ArrayQueue<Box<[u8]>>,
    in_use: AtomicUsize,
}

impl BufferPool {
    /// Create a pool handing out `size`-byte buffers, keeping at most
    /// `retain` idle ones around
    pub fn new(size: usize, retain: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            free: ArrayQueue::new(retain.max(1)),
            in_use: AtomicUsize::new(0),
        })
    }

    /// Number of leases currently outstanding
    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Acquire)
    }

    /// Number of idle buffers ready for reuse
    pub fn idle(&self) -> usize {
        self.free.len()
    }

    /// Take a buffer, reusing an idle one when available
    pub fn acquire(self: &Arc<Self>) -> PooledBuf {
        let buf = self
            .free
            .pop()
            .unwrap_or_else(|| vec![0u8; self.size].into_boxed_slice());
        self.in_use.fetch_add(1, Ordering::AcqRel);
        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    fn put(&self, buf: Box<[u8]>) {
        self.in_use.fetch_sub(1, Ordering::AcqRel);
        // Pool full: let the allocator have it
        let _ = self.free.push(buf);
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("size", &self.size)
            .field("in_use", &self.in_use())
            .field("idle", &self.idle())
            .finish()
    }
}

/// A buffer leased from a [`BufferPool`]
///
/// Dereferences to the full fixed-capacity slice.
pub struct PooledBuf {
    buf: Box<[u8]>,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    /// Give the buffer back to its pool
    pub fn release(self) {
        drop(self)
    }

    /// Pool this buffer returns to
    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.put(buf);
    }
}

impl fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.buf.len())
            .finish()
    }
}

/// The two pools shared by every session of a server
#[derive(Debug, Clone)]
pub struct BufferPools {
    /// 2048-byte buffers
    pub small: Arc<BufferPool>,
    /// 65507-byte buffers
    pub large: Arc<BufferPool>,
}

impl BufferPools {
    pub fn new() -> Self {
        Self::with_retain(DEFAULT_RETAIN)
    }

    /// Pools that keep at most `retain` idle buffers per class
    pub fn with_retain(retain: usize) -> Self {
        Self {
            small: BufferPool::new(SMALL_BUFFER_SIZE, retain),
            large: BufferPool::new(LARGE_BUFFER_SIZE, retain),
        }
    }

    /// Total leases outstanding across both classes
    pub fn in_use(&self) -> usize {
        self.small.in_use() + self.large.in_use()
    }
}

impl Default for BufferPools {
    fn default() -> Self {
        Self::new()
    }
}
