//! Streamring - Continuous Byte Relay
//!
//! Arsitektur:
//! - Continuous: bytes sampai ke destination selagi source masih produce
//! - Two-Pump: satu thread source → buffer, satu thread buffer → destination
//! - Interchangeable Buffer: pipe, bounded queue, atau lock-free byte ring
//! - Framing: 2-byte length-prefixed messages di atas byte channel apa pun
//!
//! ```
//! let mut dst = Vec::new();
//! let n = streamring::relay(&mut dst, &mut &b"hello, world!"[..]).unwrap();
//! assert_eq!(n, 13);
//! assert_eq!(dst, b"hello, world!");
//! ```

pub mod buffer;
pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod sync;

pub use crate::buffer::{stream_buffer, BufferIo, PipeBuffer, QueueBuffer, StreamBuffer};
pub use crate::config::{BufferKind, RelayConfig};
pub use crate::core::{Backing, RingBuffer};
pub use crate::error::{RelayError, RelayFailure, Result};
pub use crate::protocol::{
    read_frame, read_frame_string, write_frame, write_frame_string, ByteOrder, FrameCodec,
};
pub use crate::relay::{relay, relay_buffered, relay_ring, relay_with_config};
