//! Lock-Free Single-Producer Single-Consumer (SPSC) Byte Ring Buffer
//!
//! Bytes stream through the ring continuously instead of piling up until the
//! writer closes. Three parties cooperate without a mutex:
//!
//! - the producer reserves a contiguous run of sequence numbers, stores the
//!   bytes at `seq & mask` and commits the run with a release store;
//! - a sequencer thread turns committed runs into readable windows by calling
//!   `consume(lower, upper)`;
//! - the consumer drains the current window and hands it back.
//!
//! The window handshake is a tri-state flag: `IDLE -> LOCKED -> PENDING -> IDLE`.
//! `LOCKED` exists so the consumer can never observe a half-published window.
//!
//! At most one thread may call `write` and at most one thread may call `read`
//! at any time. This is not checked at runtime.

use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{trace, warn};

use super::storage::{Backing, RingStorage};
use crate::buffer::StreamBuffer;
use crate::error::{RelayError, Result};
use crate::sync::{Backoff, Flag, StickyError};

const IDLE: i32 = 0;
const LOCKED: i32 = -1;
const PENDING: i32 = 1;

/// Nap length for an idle sequencer; writers unpark it early.
const SEQUENCER_PARK: Duration = Duration::from_millis(1);

/// Outcome of one sequencer pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Published,
    Idle,
    // Closed, but a commit that preceded the close is still unclaimed.
    Retry,
    Finished,
}

/// Padding untuk cache line isolation (64 bytes pada x86-64)
#[repr(C, align(64))]
struct CacheLinePadded<T> {
    value: T,
}

impl<T> CacheLinePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

/// State shared between the ring handle and its sequencer thread.
struct Shared {
    // Producer side: last committed sequence. Sequences start at 1.
    write_seq: CacheLinePadded<AtomicU64>,
    // Consumer side: last sequence copied out of the ring.
    released: CacheLinePadded<AtomicU64>,
    // Window handshake
    pending: CacheLinePadded<AtomicI32>,
    lower: AtomicU64,
    upper: AtomicU64,
    // Last sequence handed out in a window.
    claimed: AtomicU64,

    storage: RingStorage,
    error: StickyError,
    halted: Flag,
    sequencer_done: Flag,
}

impl Shared {
    fn new(storage: RingStorage) -> Self {
        Self {
            write_seq: CacheLinePadded::new(AtomicU64::new(0)),
            released: CacheLinePadded::new(AtomicU64::new(0)),
            pending: CacheLinePadded::new(AtomicI32::new(IDLE)),
            lower: AtomicU64::new(0),
            upper: AtomicU64::new(0),
            claimed: AtomicU64::new(0),
            storage,
            error: StickyError::new(),
            halted: Flag::new(),
            sequencer_done: Flag::new(),
        }
    }

    /// Publish `lower..=upper` as the next readable window.
    ///
    /// Waits until the previous window has been drained. Returns `false`
    /// without publishing if the ring is halted or has failed meanwhile.
    fn consume(&self, lower: u64, upper: u64) -> bool {
        let mut backoff = Backoff::new();
        while self
            .pending
            .value
            .compare_exchange_weak(IDLE, LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            if self.halted.is_set() || self.error.is_failure() {
                return false;
            }
            backoff.snooze();
        }

        self.lower.store(lower, Ordering::Relaxed);
        self.upper.store(upper, Ordering::Relaxed);
        self.claimed.store(upper, Ordering::Release);

        if self
            .pending
            .value
            .compare_exchange(LOCKED, PENDING, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            unreachable!("pending window changed state while locked");
        }
        true
    }

    fn run_sequencer(&self) {
        trace!(capacity = self.storage.capacity(), "sequencer started");

        let mut claimed = self.claimed.load(Ordering::Acquire);
        while !self.halted.is_set() {
            let committed = self.write_seq.value.load(Ordering::Acquire);
            match self.step(&mut claimed, committed) {
                Step::Published | Step::Retry => {}
                Step::Idle => thread::park_timeout(SEQUENCER_PARK),
                Step::Finished => break,
            }
        }

        self.sequencer_done.set();
        trace!(claimed, "sequencer stopped");
    }

    /// One sequencer decision, given the `committed` cursor it loaded.
    fn step(&self, claimed: &mut u64, committed: u64) -> Step {
        if committed > *claimed {
            if !self.consume(*claimed + 1, committed) {
                return Step::Finished;
            }
            *claimed = committed;
            return Step::Published;
        }
        if !self.error.is_set() {
            return Step::Idle;
        }

        // The producer commits before it closes, so `committed` may be stale
        // by the time the close is visible. Acquire on the sticky cell makes
        // this reload see every commit that preceded the close.
        if self.write_seq.value.load(Ordering::Acquire) != *claimed {
            return Step::Retry;
        }
        Step::Finished
    }

    /// Closed ring with nothing left for the consumer. Only meaningful right
    /// after the caller saw a state other than `PENDING`.
    fn drained(&self) -> bool {
        let claimed = self.claimed.load(Ordering::Acquire);
        let committed = self.write_seq.value.load(Ordering::Acquire);
        let exhausted = claimed == committed || self.sequencer_done.is_set();

        // Only the consumer moves PENDING back to IDLE, so seeing IDLE here
        // means no window was published since the caller's check.
        exhausted && self.pending.value.load(Ordering::Acquire) == IDLE
    }
}

/// Fixed-capacity byte ring for one producer and one consumer.
///
/// ```
/// use streamring::RingBuffer;
///
/// let ring = RingBuffer::new(64);
/// ring.write(b"hello").unwrap();
///
/// let mut buf = [0u8; 5];
/// let mut n = 0;
/// while n < buf.len() {
///     n += ring.read(&mut buf[n..]).unwrap();
/// }
/// assert_eq!(&buf, b"hello");
/// ```
pub struct RingBuffer {
    shared: Arc<Shared>,
    sequencer: Option<JoinHandle<()>>,
    backing: Backing,
}

impl RingBuffer {
    /// Membuat ring buffer baru dengan storage di heap.
    ///
    /// # Panics
    /// Panic jika `capacity` bukan power of 2 atau `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity.is_power_of_two(),
            "capacity must be power of 2, got {capacity}"
        );

        Self::build(capacity, Backing::Heap)
            .unwrap_or_else(|err| panic!("failed to start ring sequencer: {err}"))
    }

    /// Like [`RingBuffer::new`], but reports a bad capacity as an error.
    pub fn try_new(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        Ok(Self::build(capacity, Backing::Heap)?)
    }

    /// Ring backed by an anonymous memory map instead of the heap.
    pub fn with_mmap(capacity: usize) -> Result<Self> {
        validate_capacity(capacity)?;
        Ok(Self::build(capacity, Backing::Mmap)?)
    }

    fn build(capacity: usize, backing: Backing) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::new(RingStorage::allocate(capacity, backing)?));

        let sequencer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("streamring-sequencer".into())
                .spawn(move || shared.run_sequencer())?
        };

        Ok(Self {
            shared,
            sequencer: Some(sequencer),
            backing,
        })
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.shared.storage.capacity()
    }

    #[inline(always)]
    pub fn backing(&self) -> Backing {
        self.backing
    }

    /// Append `buf` to the ring (producer side).
    ///
    /// Blocks while the ring is full. Returns the sticky error if one is set
    /// before anything was written; if it shows up midway, the bytes written
    /// so far are reported and the error surfaces on the next call.
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        let shared = &*self.shared;
        if buf.is_empty() {
            shared.error.check()?;
            return Ok(0);
        }

        let capacity = self.capacity() as u64;
        let mut written = 0;
        let mut backoff = Backoff::new();

        while written < buf.len() {
            if let Err(err) = shared.error.check() {
                return if written > 0 { Ok(written) } else { Err(err) };
            }

            let last = shared.write_seq.value.load(Ordering::Relaxed);
            let released = shared.released.value.load(Ordering::Acquire);

            // Cek apakah buffer penuh
            let free = capacity - (last - released);
            if free == 0 {
                backoff.snooze();
                continue;
            }
            backoff.reset();

            let run = (free as usize).min(buf.len() - written);

            // SAFETY: positions last+1 ..= last+run lie outside the consumer's
            // unreleased range because run <= free.
            unsafe {
                shared.storage.store(last + 1, &buf[written..written + run]);
            }

            // Release: bytes di atas harus visible sebelum sequence di-commit
            shared
                .write_seq
                .value
                .store(last + run as u64, Ordering::Release);

            written += run;
            self.wake_sequencer();
        }

        Ok(written)
    }

    /// Drain up to `buf.len()` bytes of the current window (consumer side).
    ///
    /// Spins with backoff until a window is published. A failure recorded by
    /// [`RingBuffer::fail`] is returned at once; end-of-data is returned only
    /// after every byte committed before [`RingBuffer::close`] was read.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let shared = &*self.shared;
        if buf.is_empty() {
            return match shared.error.get() {
                Some(err) if !err.is_eof() => Err(err.clone()),
                Some(_) if shared.drained() => Err(RelayError::Eof),
                _ => Ok(0),
            };
        }

        let mut backoff = Backoff::new();
        loop {
            if let Some(err) = shared.error.get() {
                if !err.is_eof() {
                    return Err(err.clone());
                }
            }

            let state = shared.pending.value.load(Ordering::Acquire);
            if state == PENDING {
                break;
            }
            if shared.error.is_set() && shared.drained() {
                return Err(RelayError::Eof);
            }
            backoff.snooze();
        }

        let lower = shared.lower.load(Ordering::Relaxed);
        let upper = shared.upper.load(Ordering::Relaxed);
        let n = ((upper - lower + 1) as usize).min(buf.len());

        // SAFETY: the published window belongs to the consumer until released.
        unsafe {
            shared.storage.load(lower, &mut buf[..n]);
        }

        let last = lower + n as u64 - 1;
        shared.released.value.store(last, Ordering::Release);

        if last == upper {
            shared.pending.value.store(IDLE, Ordering::Release);
        } else {
            shared.lower.store(last + 1, Ordering::Relaxed);
        }

        Ok(n)
    }

    /// Install the end-of-data sentinel unless an error is already recorded.
    /// Always succeeds.
    pub fn close(&self) -> Result<()> {
        if self.shared.error.set(RelayError::Eof) {
            trace!("ring closed");
        }
        self.wake_sequencer();
        Ok(())
    }

    /// Record `err` as the terminal error. Blocked and future calls on both
    /// sides return it; nothing still in the ring is delivered.
    pub fn fail(&self, err: RelayError) {
        if self.shared.error.set(err) {
            trace!("ring failed");
        }
        self.wake_sequencer();
    }

    /// Terminal error, if any.
    pub fn error(&self) -> Option<RelayError> {
        self.shared.error.get().cloned()
    }

    /// Close, reallocate storage, clear the error and restart the sequencer.
    ///
    /// Requires `&mut self`: no reader or writer may be active.
    pub fn reset(&mut self) -> Result<()> {
        let _ = self.close();
        self.halt();

        *self = Self::build(self.capacity(), self.backing)?;
        Ok(())
    }

    #[inline(always)]
    fn wake_sequencer(&self) {
        if let Some(sequencer) = &self.sequencer {
            sequencer.thread().unpark();
        }
    }

    fn halt(&mut self) {
        self.shared.halted.set();
        if let Some(sequencer) = self.sequencer.take() {
            sequencer.thread().unpark();
            if sequencer.join().is_err() {
                warn!("ring sequencer panicked");
            }
        }
    }

    #[cfg(test)]
    fn storage_snapshot(&self) -> Vec<u8> {
        self.shared.storage.snapshot()
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        self.halt();
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity())
            .field("backing", &self.backing)
            .field("error", &self.shared.error.get())
            .finish()
    }
}

impl StreamBuffer for RingBuffer {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        RingBuffer::write(self, buf)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize> {
        RingBuffer::read(self, buf)
    }

    fn close(&self) -> Result<()> {
        RingBuffer::close(self)
    }
}

fn validate_capacity(capacity: usize) -> Result<()> {
    if capacity == 0 || !capacity.is_power_of_two() {
        return Err(RelayError::InvalidConfig(format!(
            "ring capacity must be a positive power of 2, got {capacity}"
        )));
    }
    Ok(())
}
