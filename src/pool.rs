//! Reusable read buffers.
//!
//! The read pump borrows a buffer once the socket is readable and returns it
//! as soon as the codec has consumed every byte. Only a connection holding a
//! partial message keeps its buffer between reads. Steady-state reads
//! therefore do not allocate, and idle connections hold no buffer.
//!
//! # Lifecycle
//!
//! ```text
//! get() ──► read into buffer ──► decode ──► put(buffer)
//!                                              │
//!                                  cleared, kept if pool has room
//! ```
//!
//! A buffer must not be used after it is handed to [`BufferPool::put`];
//! `put` takes it by value so the compiler enforces that.

// ============================================================================
// Imports
// ============================================================================

use std::sync::{Arc, OnceLock};

use bytes::BytesMut;
use parking_lot::Mutex;

// ============================================================================
// Constants
// ============================================================================

/// Default capacity of freshly allocated buffers; matches the default max
/// frame size so default connections never grow a pooled buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default number of idle buffers retained by a pool.
pub const DEFAULT_POOL_CAPACITY: usize = 64;

/// Buffers larger than this multiple of the buffer size are discarded on return.
const OVERSIZE_FACTOR: usize = 4;

/// Process-wide pool returned by [`BufferPool::shared`].
static SHARED: OnceLock<BufferPool> = OnceLock::new();

// ============================================================================
// BufferPool
// ============================================================================

struct PoolInner {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_size: usize,
    capacity: usize,
}

/// Thread-safe pool of byte buffers.
///
/// Cloning is cheap; clones share the same set of idle buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool with default buffer size and capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_BUFFER_SIZE, DEFAULT_POOL_CAPACITY)
    }

    /// Creates a pool with a custom buffer size and idle capacity.
    #[must_use]
    pub fn with_config(buffer_size: usize, capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(Vec::with_capacity(capacity)),
                buffer_size,
                capacity,
            }),
        }
    }

    /// Returns the process-wide pool shared by all connections that do not
    /// configure their own.
    #[must_use]
    pub fn shared() -> Self {
        SHARED.get_or_init(Self::new).clone()
    }

    /// Borrows an empty buffer, allocating one if the pool is drained.
    #[must_use]
    pub fn get(&self) -> BytesMut {
        let buffer = self.inner.buffers.lock().pop();
        buffer.unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_size))
    }

    /// Returns a buffer to the pool.
    ///
    /// The buffer's length is reset to zero first. Oversized buffers and
    /// buffers beyond the pool's capacity are dropped.
    pub fn put(&self, mut buffer: BytesMut) {
        if buffer.capacity() > self.inner.buffer_size.saturating_mul(OVERSIZE_FACTOR) {
            return;
        }

        buffer.clear();

        let mut buffers = self.inner.buffers.lock();
        if buffers.len() < self.inner.capacity {
            buffers.push(buffer);
        }
    }

    /// Returns the number of idle buffers.
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.buffers.lock().len()
    }

    /// Returns the capacity of freshly allocated buffers.
    #[inline]
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_get_from_empty_pool_allocates() {
        let pool = BufferPool::with_config(128, 4);
        assert_eq!(pool.available(), 0);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 128);
    }

    #[test]
    fn test_put_then_get_reuses_buffer() {
        let pool = BufferPool::with_config(128, 4);

        let mut buf = pool.get();
        buf.extend_from_slice(b"stale bytes");
        pool.put(buf);
        assert_eq!(pool.available(), 1);

        let buf = pool.get();
        assert!(buf.is_empty());
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_capacity_is_bounded() {
        let pool = BufferPool::with_config(64, 2);
        for _ in 0..5 {
            pool.put(BytesMut::with_capacity(64));
        }
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_oversized_buffers_are_dropped() {
        let pool = BufferPool::with_config(64, 2);
        pool.put(BytesMut::with_capacity(64 * 8));
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_clones_share_buffers() {
        let pool = BufferPool::with_config(64, 4);
        let clone = pool.clone();
        clone.put(BytesMut::with_capacity(64));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_shared_pool_is_process_wide() {
        let a = BufferPool::shared();
        let b = BufferPool::shared();
        assert!(Arc::ptr_eq(&a.inner, &b.inner));
    }

    #[test]
    fn test_concurrent_borrow_and_return() {
        let pool = BufferPool::with_config(64, 16);

        let handles: Vec<_> = (0..8u8)
            .map(|n| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..500 {
                        let mut buf = pool.get();
                        assert!(buf.is_empty(), "borrowed buffer carried stale data");
                        buf.extend_from_slice(&[n; 32]);
                        assert!(buf.iter().all(|&b| b == n));
                        pool.put(buf);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker panicked");
        }

        assert!(pool.available() <= 16);
    }

    proptest! {
        #[test]
        fn prop_returned_buffers_are_empty(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let pool = BufferPool::with_config(256, 1);
            let mut buf = pool.get();
            buf.extend_from_slice(&data);
            pool.put(buf);

            let buf = pool.get();
            prop_assert!(buf.is_empty());
        }
    }
}
