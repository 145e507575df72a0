//! Reusable payload buffers for RPC bodies.
//!
//! Request and response payloads are composed into pre-sized buffers drawn
//! from a lock-free pool, so the hot path allocates nothing once warm. A
//! buffer is single-writer for the duration of one call and goes back to
//! the pool exactly once — [`PooledBuf`] returns itself on drop, so every
//! exit path (success, operation error, cancellation, panic unwind)
//! reclaims it.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock-free pool of reusable `BytesMut` buffers.
pub struct BytesPool {
    queue: ArrayQueue<BytesMut>,
    /// Capacity newly allocated buffers start with.
    buffer_capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BytesPool {
    /// A pool holding at most `slots` parked buffers of `buffer_capacity`
    /// bytes each. Nothing is pre-allocated; buffers enter the pool as they
    /// are first used and dropped.
    pub fn new(slots: usize, buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: ArrayQueue::new(slots),
            buffer_capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Get a buffer of exactly `size` readable bytes, zero-filled.
    ///
    /// Pops a parked buffer when one is available, allocates otherwise.
    pub fn acquire(self: &Arc<Self>, size: usize) -> PooledBuf {
        let mut buf = match self.queue.pop() {
            Some(b) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                b
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                BytesMut::with_capacity(self.buffer_capacity.max(size))
            }
        };
        buf.resize(size, 0);
        PooledBuf {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// (hits, misses) counters, for observability.
    pub fn stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    fn park(&self, mut buf: BytesMut) {
        buf.clear();
        // If the pool is already full the buffer is simply freed.
        let _ = self.queue.push(buf);
    }
}

/// A buffer checked out of a [`BytesPool`]. Derefs to its byte contents and
/// returns to the pool when dropped.
pub struct PooledBuf {
    buf: BytesMut,
    pool: Arc<BytesPool>,
}

impl Deref for PooledBuf {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    #[inline]
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        self.pool.park(std::mem::take(&mut self.buf));
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PooledBuf({} bytes)", self.buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_is_exactly_sized_and_zeroed() {
        let pool = BytesPool::new(4, 1024);
        let buf = pool.acquire(10);
        assert_eq!(buf.len(), 10);
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_dropped_buffer_is_reused() {
        let pool = BytesPool::new(4, 1024);
        {
            let mut buf = pool.acquire(8);
            buf[0] = 0xAB;
        }
        let buf = pool.acquire(8);
        let (hits, misses) = pool.stats();
        assert_eq!((hits, misses), (1, 1));
        // Reused buffers come back zeroed, never with stale bytes.
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_full_pool_drops_excess_buffers() {
        let pool = BytesPool::new(1, 64);
        let a = pool.acquire(4);
        let b = pool.acquire(4);
        drop(a);
        drop(b); // pool slot already taken, freed instead
        assert_eq!(pool.queue.len(), 1);
    }

    #[test]
    fn test_oversized_request_still_served() {
        let pool = BytesPool::new(2, 16);
        let buf = pool.acquire(1000);
        assert_eq!(buf.len(), 1000);
    }
}
