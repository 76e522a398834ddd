//! Copy buffer pool for the stdio demultiplexer.
//!
//! Every [`std_copy`](super::std_copy) call needs one fixed-size scratch
//! buffer. Buffers are kept in a small process-wide free list so that
//! long-lived attach sessions and repeated log reads do not allocate a fresh
//! 32 KiB block each time.
//!
//! A buffer is zeroed before it goes back to the pool, so payload bytes from
//! one container never leak into the next copy.

use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, OnceLock};

/// Size of each pooled copy buffer (32 KiB).
pub const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Maximum number of idle buffers kept in the pool.
pub const COPY_BUFFER_POOL_SIZE: usize = 16;

fn pool() -> &'static Mutex<Vec<Box<[u8]>>> {
    static POOL: OnceLock<Mutex<Vec<Box<[u8]>>>> = OnceLock::new();
    POOL.get_or_init(|| Mutex::new(Vec::with_capacity(COPY_BUFFER_POOL_SIZE)))
}

/// A copy buffer borrowed from the pool.
///
/// Returned (zeroed) to the pool on drop.
pub struct PooledBuffer {
    buf: Option<Box<[u8]>>,
}

impl PooledBuffer {
    /// Take a buffer from the pool, allocating if the pool is empty.
    pub fn acquire() -> Self {
        let recycled = pool().lock().ok().and_then(|mut idle| idle.pop());
        let buf = recycled.unwrap_or_else(|| vec![0u8; COPY_BUFFER_SIZE].into_boxed_slice());
        Self { buf: Some(buf) }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(mut buf) = self.buf.take() else {
            return;
        };
        buf.fill(0);
        if let Ok(mut idle) = pool().lock() {
            if idle.len() < COPY_BUFFER_POOL_SIZE {
                idle.push(buf);
            }
        }
    }
}

/// Number of idle buffers currently pooled.
#[cfg(test)]
pub(crate) fn idle_count() -> usize {
    pool().lock().map(|idle| idle.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_has_fixed_size() {
        let buf = PooledBuffer::acquire();
        assert_eq!(buf.len(), COPY_BUFFER_SIZE);
    }

    #[test]
    fn test_returned_buffer_is_zeroed() {
        // Hold several buffers so a concurrently running test cannot hand
        // us one it is still writing to.
        let mut held: Vec<PooledBuffer> = (0..4).map(|_| PooledBuffer::acquire()).collect();
        for buf in held.iter_mut() {
            buf[..5].copy_from_slice(b"hello");
            buf[COPY_BUFFER_SIZE - 1] = 0xFF;
        }
        drop(held);

        let buf = PooledBuffer::acquire();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pool_is_bounded() {
        let held: Vec<PooledBuffer> = (0..COPY_BUFFER_POOL_SIZE + 4)
            .map(|_| PooledBuffer::acquire())
            .collect();
        drop(held);
        assert!(idle_count() <= COPY_BUFFER_POOL_SIZE);
    }
}
