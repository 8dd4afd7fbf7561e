//! Relay configuration
//!
//! Capacities often come from outside the program, so everything here is
//! validated and reported as `InvalidConfig` instead of panicking.

use crate::buffer::{PipeBuffer, QueueBuffer, StreamBuffer};
use crate::core::RingBuffer;
use crate::error::{RelayError, Result};

/// Bytes moved per source read and per buffer read.
pub const DEFAULT_CHUNK_SIZE: usize = 64;

/// Capacity of the ring used by [`relay_ring`](crate::relay_ring).
pub const DEFAULT_RING_CAPACITY: usize = 64;

/// Which intermediate buffer a relay runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferKind {
    /// Synchronous hand-off, unbounded.
    #[default]
    Pipe,
    /// Bounded queue of whole chunks.
    Queue { slots: usize },
    /// Lock-free byte ring on the heap.
    Ring { capacity: usize },
    /// Lock-free byte ring on an anonymous memory map.
    MmapRing { capacity: usize },
}

impl BufferKind {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Self::Pipe => Ok(()),
            Self::Queue { slots: 0 } => Err(RelayError::InvalidConfig(
                "queue buffer needs at least one slot".into(),
            )),
            Self::Queue { .. } => Ok(()),
            Self::Ring { capacity } | Self::MmapRing { capacity } => {
                if capacity > 0 && capacity.is_power_of_two() {
                    Ok(())
                } else {
                    Err(RelayError::InvalidConfig(format!(
                        "ring capacity must be a positive power of 2, got {capacity}"
                    )))
                }
            }
        }
    }

    /// Allocate a fresh buffer of this kind.
    pub fn build(&self) -> Result<Box<dyn StreamBuffer>> {
        self.validate()?;
        Ok(match *self {
            Self::Pipe => Box::new(PipeBuffer::new()),
            Self::Queue { slots } => Box::new(QueueBuffer::new(slots)),
            Self::Ring { capacity } => Box::new(RingBuffer::try_new(capacity)?),
            Self::MmapRing { capacity } => Box::new(RingBuffer::with_mmap(capacity)?),
        })
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Self::Pipe => "pipe",
            Self::Queue { .. } => "queue",
            Self::Ring { .. } => "ring",
            Self::MmapRing { .. } => "mmap-ring",
        }
    }
}

/// Relay configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub chunk_size: usize,
    pub buffer: BufferKind,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            buffer: BufferKind::Pipe,
        }
    }
}

impl RelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_buffer(mut self, buffer: BufferKind) -> Self {
        self.buffer = buffer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RelayError::InvalidConfig(
                "chunk size must be positive".into(),
            ));
        }
        self.buffer.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.chunk_size, 64);
        assert_eq!(config.buffer, BufferKind::Pipe);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_configs_rejected() {
        let bad = [
            RelayConfig::new().with_chunk_size(0),
            RelayConfig::new().with_buffer(BufferKind::Queue { slots: 0 }),
            RelayConfig::new().with_buffer(BufferKind::Ring { capacity: 6 }),
            RelayConfig::new().with_buffer(BufferKind::MmapRing { capacity: 0 }),
        ];
        for config in bad {
            assert!(
                matches!(config.validate(), Err(RelayError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_build_every_kind() {
        let kinds = [
            BufferKind::Pipe,
            BufferKind::Queue { slots: 4 },
            BufferKind::Ring { capacity: 16 },
            BufferKind::MmapRing { capacity: 4096 },
        ];
        for kind in kinds {
            let buffer = kind.build().unwrap();
            buffer.close().unwrap();
            assert!(buffer.read(&mut [0u8; 4]).unwrap_err().is_eof(), "{}", kind.name());
        }
    }
}
