//! Relay Engine: continuous copy from a reader to a writer
//!
//! Unlike `std::io::copy`, bytes reach the destination while the source is
//! still producing. Each relay runs exactly two threads around one
//! intermediate buffer:
//!
//! ```text
//! src ──[pump-in]──▶ StreamBuffer ──[pump-out]──▶ dst
//! ```
//!
//! Whichever pump exits first closes the buffer, which unblocks the other
//! (RUNNING → DRAINING). The relay returns once both have exited (DONE).
//! End-of-data is the normal way to stop and never counts as a failure.

use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use tracing::{debug, trace, warn};

use crate::buffer::{PipeBuffer, StreamBuffer};
use crate::config::{RelayConfig, DEFAULT_CHUNK_SIZE, DEFAULT_RING_CAPACITY};
use crate::core::RingBuffer;
use crate::error::{RelayError, RelayFailure, Result};
use crate::sync::{Counter, StickyError, WriteOnce};

/// Lifecycle of one relay invocation. Never goes back to `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RelayState {
    Running,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    PumpIn,
    PumpOut,
}

/// Relay `src` into `dst` through a synchronous [`PipeBuffer`].
///
/// Returns the number of bytes written to `dst`. On failure the partial
/// count travels with the error.
pub fn relay<W, R>(dst: &mut W, src: &mut R) -> std::result::Result<u64, RelayFailure>
where
    W: Write + Send + ?Sized,
    R: Read + Send + ?Sized,
{
    relay_buffered(dst, src, &PipeBuffer::new())
}

/// Relay through a fresh 64-byte [`RingBuffer`].
pub fn relay_ring<W, R>(dst: &mut W, src: &mut R) -> std::result::Result<u64, RelayFailure>
where
    W: Write + Send + ?Sized,
    R: Read + Send + ?Sized,
{
    let ring = RingBuffer::new(DEFAULT_RING_CAPACITY);
    relay_buffered(dst, src, &ring)
}

/// Relay through a caller-supplied buffer.
///
/// The buffer is closed by the time this returns; a [`RingBuffer`] can be
/// [`reset`](RingBuffer::reset) and passed again.
pub fn relay_buffered<W, R, B>(
    dst: &mut W,
    src: &mut R,
    buffer: &B,
) -> std::result::Result<u64, RelayFailure>
where
    W: Write + Send + ?Sized,
    R: Read + Send + ?Sized,
    B: StreamBuffer + ?Sized,
{
    Session::new(buffer, DEFAULT_CHUNK_SIZE, "custom").run(dst, src)
}

/// Relay with an explicit [`RelayConfig`]; the buffer is built per call.
pub fn relay_with_config<W, R>(
    dst: &mut W,
    src: &mut R,
    config: &RelayConfig,
) -> std::result::Result<u64, RelayFailure>
where
    W: Write + Send + ?Sized,
    R: Read + Send + ?Sized,
{
    let buffer = config
        .validate()
        .and_then(|()| config.buffer.build())
        .map_err(|error| RelayFailure { written: 0, error })?;

    Session::new(&*buffer, config.chunk_size, config.buffer.name()).run(dst, src)
}

/// State of one relay invocation, shared by both pumps.
struct Session<'b, B: ?Sized> {
    buffer: &'b B,
    chunk_size: usize,
    kind: &'static str,
    // Pumps still running: 2 = RUNNING, 1 = DRAINING, 0 = DONE.
    active: Counter,
    first_exit: WriteOnce<Side>,
    failure: StickyError,
    written: AtomicU64,
}

impl<'b, B: StreamBuffer + ?Sized> Session<'b, B> {
    fn new(buffer: &'b B, chunk_size: usize, kind: &'static str) -> Self {
        Self {
            buffer,
            chunk_size,
            kind,
            active: Counter::new(2),
            first_exit: WriteOnce::new(),
            failure: StickyError::new(),
            written: AtomicU64::new(0),
        }
    }

    fn state(&self) -> RelayState {
        match self.active.get() {
            2 => RelayState::Running,
            1 => RelayState::Draining,
            _ => RelayState::Done,
        }
    }

    fn run<W, R>(self, dst: &mut W, src: &mut R) -> std::result::Result<u64, RelayFailure>
    where
        W: Write + Send + ?Sized,
        R: Read + Send + ?Sized,
    {
        debug!(buffer = self.kind, chunk_size = self.chunk_size, "relay started");

        // Pump threads log under the caller's span.
        let span = tracing::Span::current();

        thread::scope(|s| {
            let pump_in = s.spawn(|| {
                span.in_scope(|| {
                    let result = self.pump_in(src);
                    self.finish(Side::PumpIn, result);
                })
            });
            let pump_out = s.spawn(|| {
                span.in_scope(|| {
                    let result = self.pump_out(dst);
                    self.finish(Side::PumpOut, result);
                })
            });

            for pump in [pump_in, pump_out] {
                if let Err(panic) = pump.join() {
                    std::panic::resume_unwind(panic);
                }
            }
        });

        let written = self.written.load(Ordering::Acquire);
        debug_assert_eq!(self.state(), RelayState::Done);

        match self.failure.get() {
            Some(error) => {
                debug!(written, first_exit = ?self.first_exit.try_get(), %error, "relay failed");
                Err(RelayFailure {
                    written,
                    error: error.clone(),
                })
            }
            None => {
                debug!(written, first_exit = ?self.first_exit.try_get(), "relay finished");
                Ok(written)
            }
        }
    }

    /// src → buffer
    fn pump_in<R: Read + ?Sized>(&self, src: &mut R) -> Result<()> {
        let _close = CloseOnExit(self.buffer);
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            let n = match src.read(&mut chunk) {
                Ok(0) => return Ok(()),
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };

            let mut sent = 0;
            while sent < n {
                match self.buffer.write(&chunk[sent..n])? {
                    0 => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    k => sent += k,
                }
            }
        }
    }

    /// buffer → dst
    fn pump_out<W: Write + ?Sized>(&self, dst: &mut W) -> Result<()> {
        let _close = CloseOnExit(self.buffer);
        let mut chunk = vec![0u8; self.chunk_size];

        loop {
            let n = match self.buffer.read(&mut chunk) {
                Ok(n) => n,
                Err(RelayError::Eof) => {
                    dst.flush()?;
                    return Ok(());
                }
                Err(err) => return Err(err),
            };

            let mut rest = &chunk[..n];
            while !rest.is_empty() {
                match dst.write(rest) {
                    Ok(0) => return Err(io::Error::from(io::ErrorKind::WriteZero).into()),
                    Ok(k) => {
                        self.written.fetch_add(k as u64, Ordering::AcqRel);
                        rest = &rest[k..];
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err.into()),
                }
            }
            trace!(n, "forwarded chunk");
        }
    }

    fn finish(&self, side: Side, result: Result<()>) {
        match result {
            Err(err) if !err.is_eof() => {
                warn!(?side, error = %err, "relay pump failed");
                self.failure.set(err);
            }
            _ => trace!(?side, "relay pump finished"),
        }

        if self.active.decr() == 1 {
            self.first_exit.set(side);
            debug!(?side, state = ?self.state(), "first pump exited, buffer closed");
        }
    }
}

// Closing on every exit path, unwinding included, is what unblocks the
// other pump.
struct CloseOnExit<'a, B: StreamBuffer + ?Sized>(&'a B);

impl<B: StreamBuffer + ?Sized> Drop for CloseOnExit<'_, B> {
    fn drop(&mut self) {
        let _ = self.0.close();
    }
}
