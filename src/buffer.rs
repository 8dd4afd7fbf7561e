//! Intermediate buffers between the two halves of a relay
//!
//! Every variant satisfies the same contract so the relay does not care which
//! one it is given:
//! - `read`/`write` block until they can make progress;
//! - `close` is idempotent and makes every blocked or future call return
//!   promptly (end-of-data for readers once nothing is left, for writers at once).
//!
//! Variants:
//! - [`PipeBuffer`]: synchronous hand-off; a write returns once a reader took all of it.
//! - [`QueueBuffer`]: a fixed number of whole-chunk slots.
//! - [`RingBuffer`](crate::RingBuffer): fixed byte capacity, lock-free.

use std::collections::VecDeque;
use std::io;

use parking_lot::{Condvar, Mutex};

use crate::error::{RelayError, Result};

/// Capability set shared by all intermediate buffers.
///
/// `Err(RelayError::Eof)` means no more data will flow through the buffer.
pub trait StreamBuffer: Send + Sync {
    fn write(&self, buf: &[u8]) -> Result<usize>;

    fn read(&self, buf: &mut [u8]) -> Result<usize>;

    fn close(&self) -> Result<()>;
}

impl<B: StreamBuffer + ?Sized> StreamBuffer for Box<B> {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        (**self).write(buf)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        (**self).read(buf)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }
}

/// `slots == 0` gives a [`PipeBuffer`], anything else a [`QueueBuffer`].
pub fn stream_buffer(slots: usize) -> Box<dyn StreamBuffer> {
    if slots == 0 {
        Box::new(PipeBuffer::new())
    } else {
        Box::new(QueueBuffer::new(slots))
    }
}

#[derive(Debug, Default)]
struct PipeState {
    // Bytes of the in-flight write not yet taken by a reader.
    data: Vec<u8>,
    taken: usize,
    closed: bool,
}

/// Unbounded synchronous hand-off.
///
/// A write of any size parks the writer until readers have taken every byte.
#[derive(Debug, Default)]
pub struct PipeBuffer {
    state: Mutex<PipeState>,
    readable: Condvar,
    drained: Condvar,
}

impl PipeBuffer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamBuffer for PipeBuffer {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();

        // One write in flight at a time.
        while !state.closed && state.taken < state.data.len() {
            self.drained.wait(&mut state);
        }
        if state.closed {
            return Err(RelayError::Eof);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        state.data.clear();
        state.data.extend_from_slice(buf);
        state.taken = 0;
        self.readable.notify_one();

        while !state.closed && state.taken < state.data.len() {
            self.drained.wait(&mut state);
        }

        match state.taken {
            0 => Err(RelayError::Eof),
            taken => Ok(taken),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        while state.taken == state.data.len() {
            if state.closed {
                return Err(RelayError::Eof);
            }
            self.readable.wait(&mut state);
        }

        let start = state.taken;
        let n = buf.len().min(state.data.len() - start);
        buf[..n].copy_from_slice(&state.data[start..start + n]);
        state.taken += n;

        if state.taken == state.data.len() {
            self.drained.notify_all();
        }
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.readable.notify_all();
        self.drained.notify_all();
        Ok(())
    }
}

#[derive(Debug, Default)]
struct QueueState {
    chunks: VecDeque<Vec<u8>>,
    // Read offset into the front chunk.
    offset: usize,
    closed: bool,
}

/// Bounded queue of whole chunks.
///
/// Each write occupies one slot; writers block while every slot is taken.
/// A chunk larger than the reader's buffer is handed out over several reads.
#[derive(Debug)]
pub struct QueueBuffer {
    slots: usize,
    state: Mutex<QueueState>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl QueueBuffer {
    /// # Panics
    /// Panic jika `slots == 0`; gunakan [`PipeBuffer`] untuk hand-off tanpa slot.
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "queue buffer needs at least one slot");
        Self {
            slots,
            state: Mutex::new(QueueState {
                chunks: VecDeque::with_capacity(slots),
                ..QueueState::default()
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn slots(&self) -> usize {
        self.slots
    }

    /// Chunks currently queued.
    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StreamBuffer for QueueBuffer {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        while !state.closed && state.chunks.len() >= self.slots {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(RelayError::Eof);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        state.chunks.push_back(buf.to_vec());
        self.not_empty.notify_one();
        Ok(buf.len())
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        while state.chunks.is_empty() {
            if state.closed {
                return Err(RelayError::Eof);
            }
            self.not_empty.wait(&mut state);
        }

        let offset = state.offset;
        let front = &state.chunks[0];
        let n = buf.len().min(front.len() - offset);
        buf[..n].copy_from_slice(&front[offset..offset + n]);

        if offset + n == front.len() {
            state.chunks.pop_front();
            state.offset = 0;
            self.not_full.notify_one();
        } else {
            state.offset += n;
        }
        Ok(n)
    }

    fn close(&self) -> Result<()> {
        self.state.lock().closed = true;
        self.not_empty.notify_all();
        self.not_full.notify_all();
        Ok(())
    }
}

/// Adapts any [`StreamBuffer`] to `std::io::Read` and `std::io::Write`.
///
/// End-of-data reads as `Ok(0)`; writing to a closed buffer is `BrokenPipe`.
#[derive(Debug)]
pub struct BufferIo<'a, B: ?Sized>(pub &'a B);

impl<B: StreamBuffer + ?Sized> io::Read for BufferIo<'_, B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.0.read(buf) {
            Ok(n) => Ok(n),
            Err(RelayError::Eof) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }
}

impl<B: StreamBuffer + ?Sized> io::Write for BufferIo<'_, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.0.write(buf) {
            Ok(n) => Ok(n),
            Err(RelayError::Eof) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write to closed buffer",
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
