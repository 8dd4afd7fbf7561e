//! Core module: Lock-Free Byte Ring Buffer
//!
//! Prinsip desain:
//! - Lock-Free: Producer, sequencer dan consumer hanya memakai atomic operations
//! - No-Allocation: Storage di-alokasi sekali saat init (heap atau anonymous mmap)
//! - Continuous: Bytes mengalir ke consumer begitu di-commit

mod ring_buffer;
mod storage;

pub use ring_buffer::RingBuffer;
pub use storage::Backing;
