//! Caller-owned pool of scratch buffers for frame encoding and decoding.
//!
//! No global state: whoever needs pooling creates a pool and hands out
//! guards. A guard clears its buffer and returns it on drop, on every exit
//! path.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;

/// Enough for the largest frame: 2-byte prefix + 65535-byte payload.
pub const DEFAULT_BUFFER_SIZE: usize = 2 + u16::MAX as usize;

/// Buffers kept around between uses.
pub const DEFAULT_MAX_IDLE: usize = 16;

#[derive(Debug)]
pub struct ScratchPool {
    idle: Mutex<Vec<Vec<u8>>>,
    buffer_size: usize,
    max_idle: usize,
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_IDLE, DEFAULT_BUFFER_SIZE)
    }

    /// * `max_idle` - Buffers retained once released
    /// * `buffer_size` - Initial capacity of freshly allocated buffers
    pub fn with_capacity(max_idle: usize, buffer_size: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_idle)),
            buffer_size,
            max_idle,
        }
    }

    /// Take an empty buffer, allocating only when the pool is dry.
    pub fn acquire(&self) -> ScratchBuf<'_> {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.buffer_size));

        ScratchBuf { buf, pool: self }
    }

    /// Buffers currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// Pooled buffer; goes back to its pool when dropped.
#[derive(Debug)]
pub struct ScratchBuf<'a> {
    buf: Vec<u8>,
    pool: &'a ScratchPool,
}

impl Deref for ScratchBuf<'_> {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for ScratchBuf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for ScratchBuf<'_> {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_returns_cleared() {
        let pool = ScratchPool::with_capacity(2, 32);
        {
            let mut buf = pool.acquire();
            buf.extend_from_slice(b"scratch");
            assert_eq!(pool.idle(), 0);
        }
        assert_eq!(pool.idle(), 1);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert!(buf.capacity() >= 7);
    }

    #[test]
    fn test_idle_is_capped() {
        let pool = ScratchPool::with_capacity(1, 8);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }
}
