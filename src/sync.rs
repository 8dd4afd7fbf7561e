//! Synchronization primitives shared by the ring buffer and the relay.
//!
//! Counter, Flag and StickyError are lock-free. WriteOnce and FuncGroup
//! park waiters on a condition variable and are only used off the hot path.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::RelayError;

/// Lock-free counter. Wraps on overflow in both directions.
#[derive(Debug, Default)]
pub struct Counter(AtomicU32);

impl Counter {
    pub const fn new(value: u32) -> Self {
        Self(AtomicU32::new(value))
    }

    /// Increments and returns the new value.
    #[inline]
    pub fn incr(&self) -> u32 {
        self.0.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }

    /// Decrements and returns the new value. Zero wraps to `u32::MAX`.
    #[inline]
    pub fn decr(&self) -> u32 {
        self.0.fetch_sub(1, Ordering::AcqRel).wrapping_sub(1)
    }

    #[inline]
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Acquire)
    }
}

/// Lock-free boolean flag.
#[derive(Debug, Default)]
pub struct Flag(AtomicU32);

impl Flag {
    pub const fn new() -> Self {
        Self(AtomicU32::new(0))
    }

    /// No-op if already set.
    #[inline]
    pub fn set(&self) {
        let _ = self
            .0
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Relaxed);
    }

    /// No-op if already unset.
    #[inline]
    pub fn unset(&self) {
        let _ = self
            .0
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire) != 0
    }
}

/// Write-once-wins error cell. The first recorded error is the only one
/// any observer will ever see.
#[derive(Debug, Default)]
pub struct StickyError {
    cell: OnceLock<RelayError>,
}

impl StickyError {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// Records `err` unless an error is already present. Returns `true` if
    /// this call won.
    pub fn set(&self, err: RelayError) -> bool {
        self.cell.set(err).is_ok()
    }

    #[inline]
    pub fn get(&self) -> Option<&RelayError> {
        self.cell.get()
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.cell.get().is_some()
    }

    /// `Err` with a clone of the recorded error, if any.
    #[inline]
    pub fn check(&self) -> Result<(), RelayError> {
        match self.cell.get() {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// True when a failure other than end-of-data was recorded.
    #[inline]
    pub fn is_failure(&self) -> bool {
        self.cell.get().map_or(false, |err| !err.is_eof())
    }
}

/// A value that may be set exactly once and read by any number of waiters.
///
/// # Panics
/// A second `set` panics: it means two parties believe they own the value.
#[derive(Debug)]
pub struct WriteOnce<T> {
    slot: Mutex<Option<T>>,
    ready: Condvar,
}

impl<T> Default for WriteOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WriteOnce<T> {
    pub const fn new() -> Self {
        Self {
            slot: parking_lot::const_mutex(None),
            ready: Condvar::new(),
        }
    }

    pub fn set(&self, value: T) {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            drop(slot);
            panic!("WriteOnce::set called twice");
        }
        *slot = Some(value);
        drop(slot);
        self.ready.notify_all();
    }

    /// Readiness signal; never blocks.
    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Clone> WriteOnce<T> {
    /// Blocks until the value is set.
    pub fn get(&self) -> T {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    pub fn try_get(&self) -> Option<T> {
        self.slot.lock().clone()
    }

    /// Waits at most `timeout` for the value, so callers can interleave it
    /// with other conditions.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            let _ = self.ready.wait_for(&mut slot, timeout);
        }
        slot.clone()
    }
}

/// Join barrier over function calls: `wait` returns once every `go` that
/// was running has returned.
#[derive(Debug, Default)]
pub struct FuncGroup {
    running: Mutex<usize>,
    idle: Condvar,
}

impl FuncGroup {
    pub const fn new() -> Self {
        Self {
            running: parking_lot::const_mutex(0),
            idle: Condvar::new(),
        }
    }

    /// Runs `f` on the calling thread while accounted for by the group.
    pub fn go<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        *self.running.lock() += 1;
        let _done = Done(self);
        f()
    }

    pub fn wait(&self) {
        let mut running = self.running.lock();
        while *running > 0 {
            self.idle.wait(&mut running);
        }
    }
}

// Decrements on unwind too, so a panicking `go` cannot wedge `wait`.
struct Done<'a>(&'a FuncGroup);

impl Drop for Done<'_> {
    fn drop(&mut self) {
        let mut running = self.0.running.lock();
        *running -= 1;
        if *running == 0 {
            self.0.idle.notify_all();
        }
    }
}

const SPIN_LIMIT: u32 = 6;
const YIELD_LIMIT: u32 = 10;
const PARK: Duration = Duration::from_micros(50);

/// Spin, then yield, then nap. Used by every wait loop in the ring buffer.
#[derive(Debug, Default)]
pub struct Backoff {
    step: u32,
}

impl Backoff {
    pub const fn new() -> Self {
        Self { step: 0 }
    }

    pub fn reset(&mut self) {
        self.step = 0;
    }

    #[inline]
    pub fn snooze(&mut self) {
        if self.step <= SPIN_LIMIT {
            for _ in 0..1u32 << self.step {
                std::hint::spin_loop();
            }
        } else if self.step <= YIELD_LIMIT {
            thread::yield_now();
        } else {
            thread::park_timeout(PARK);
        }
        if self.step <= YIELD_LIMIT {
            self.step += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counter_wraps_below_zero() {
        let ctr = Counter::default();
        assert_eq!(ctr.incr(), 1);
        assert_eq!(ctr.decr(), 0);
        assert_eq!(ctr.decr(), u32::MAX);
        assert_eq!(ctr.get(), u32::MAX);
    }

    #[test]
    fn test_counter_concurrent() {
        let ctr = Arc::new(Counter::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let ctr = Arc::clone(&ctr);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        ctr.incr();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(ctr.get(), 4000);
    }

    #[test]
    fn test_flag_is_idempotent() {
        let flag = Flag::new();
        assert!(!flag.is_set());
        flag.set();
        flag.set();
        assert!(flag.is_set());
        flag.unset();
        flag.unset();
        assert!(!flag.is_set());
    }

    #[test]
    fn test_sticky_error_first_wins() {
        let sticky = StickyError::new();
        assert!(sticky.check().is_ok());
        assert!(sticky.set(RelayError::Eof));
        assert!(!sticky.set(RelayError::InvalidConfig("late".into())));
        for _ in 0..3 {
            assert!(sticky.check().unwrap_err().is_eof());
        }
        assert!(!sticky.is_failure());
    }

    #[test]
    fn test_write_once_concurrent_readers() {
        let v = Arc::new(WriteOnce::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let v = Arc::clone(&v);
                thread::spawn(move || v.get())
            })
            .collect();

        assert!(!v.is_set());
        v.set(1);
        for r in readers {
            assert_eq!(r.join().unwrap(), 1);
        }
        assert_eq!(v.try_get(), Some(1));
    }

    #[test]
    #[should_panic(expected = "set called twice")]
    fn test_write_once_rejects_second_set() {
        let v = WriteOnce::new();
        v.set(1);
        v.set(9001);
    }

    #[test]
    fn test_write_once_wait_timeout() {
        let v: WriteOnce<u8> = WriteOnce::new();
        assert_eq!(v.wait_timeout(Duration::from_millis(5)), None);
        v.set(3);
        assert_eq!(v.wait_timeout(Duration::from_millis(5)), Some(3));
    }

    #[test]
    fn test_func_group_waits_for_all() {
        let group = Arc::new(FuncGroup::new());
        let done = Arc::new(Counter::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let group = Arc::clone(&group);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    group.go(|| {
                        thread::sleep(Duration::from_millis(10));
                        done.incr();
                    })
                })
            })
            .collect();

        // Give the threads a chance to enter `go` before waiting.
        thread::sleep(Duration::from_millis(2));
        group.wait();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(done.get(), 3);
        group.wait();
    }
}
