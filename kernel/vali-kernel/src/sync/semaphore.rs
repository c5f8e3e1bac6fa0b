//! Counting semaphore built on the futex subsystem (C6).
//!
//! CAS-loop `try_acquire` mirrors the teacher's async `Semaphore`
//! (`hadron-core::sync::semaphore`), adapted from a `Future`-returning
//! acquire to a blocking one: where the teacher parks a `Waker` in a
//! `HeapWaitQueue`, this parks the calling [`ThreadId`] in the shared
//! [`FutexTable`] instead.

use core::sync::atomic::{AtomicU32, Ordering};

use vali_core::addr::VirtAddr;
use vali_core::id::ThreadId;

use crate::error::FutexError;
use crate::futex::FutexTable;

/// A counting semaphore bounded by `max_value` permits.
pub struct Semaphore {
    count: AtomicU32,
    max_value: u32,
}

impl Semaphore {
    /// Creates a semaphore with `initial` permits available, never letting
    /// the count rise above `max_value`. `initial` is clamped to
    /// `max_value` rather than rejected, matching `signal`'s clamping.
    pub const fn new(initial: u32, max_value: u32) -> Self {
        let initial = if initial > max_value { max_value } else { initial };
        Self {
            count: AtomicU32::new(initial),
            max_value,
        }
    }

    fn addr(&self) -> VirtAddr {
        VirtAddr::new(core::ptr::addr_of!(self.count) as u64)
    }

    /// The upper bound permits can never be signalled past.
    pub fn max_value(&self) -> u32 {
        self.max_value
    }

    /// Attempts to take one permit without blocking.
    pub fn try_acquire(&self) -> bool {
        let mut current = self.count.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }
            match self.count.compare_exchange_weak(current, current - 1, Ordering::Acquire, Ordering::Relaxed) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    /// Parks `thread` until a permit becomes available, re-validating
    /// under the bucket lock that the count is still zero.
    pub fn park(&self, futex: &FutexTable, thread: ThreadId) -> Result<(), FutexError> {
        futex.wait_if(self.addr(), thread, || self.count.load(Ordering::Acquire) == 0)
    }

    /// Adds up to `n` permits, clamping so the count never exceeds
    /// `max_value`, and wakes up to `n` parked waiters. Returns the number
    /// of permits actually added, which may be less than `n` if the
    /// semaphore was already near `max_value`.
    pub fn signal(&self, futex: &FutexTable, n: u32) -> u32 {
        let mut current = self.count.load(Ordering::Relaxed);
        let added = loop {
            let added = n.min(self.max_value.saturating_sub(current));
            match self
                .count
                .compare_exchange_weak(current, current + added, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => break added,
                Err(actual) => current = actual,
            }
        };
        futex.wake(self.addr(), n);
        added
    }

    /// Returns one permit and wakes one parked waiter, if any. Equivalent
    /// to `signal(futex, 1)`.
    pub fn release(&self, futex: &FutexTable) {
        self.signal(futex, 1);
    }

    /// Current available permit count.
    pub fn available(&self) -> u32 {
        self.count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_drains_then_fails() {
        let sem = Semaphore::new(2, 2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
    }

    #[test]
    fn release_wakes_parked_waiter() {
        let sem = Semaphore::new(0, 4);
        let futex = FutexTable::new();
        sem.park(&futex, ThreadId::new(1)).unwrap();
        sem.release(&futex);
        assert_eq!(sem.available(), 1);
    }

    #[test]
    fn park_fails_fast_if_permit_already_available() {
        let sem = Semaphore::new(1, 1);
        let futex = FutexTable::new();
        assert_eq!(sem.park(&futex, ThreadId::new(1)), Err(FutexError::WouldBlock));
    }

    #[test]
    fn new_clamps_initial_to_max_value() {
        let sem = Semaphore::new(10, 3);
        assert_eq!(sem.available(), 3);
        assert_eq!(sem.max_value(), 3);
    }

    #[test]
    fn signal_clamps_count_at_max_value_and_reports_actual_added() {
        let sem = Semaphore::new(1, 3);
        let futex = FutexTable::new();
        assert_eq!(sem.signal(&futex, 5), 2);
        assert_eq!(sem.available(), 3);
        assert_eq!(sem.signal(&futex, 1), 0);
        assert_eq!(sem.available(), 3);
    }

    #[test]
    fn signal_wakes_up_to_n_parked_waiters() {
        let sem = Semaphore::new(0, 10);
        let futex = FutexTable::new();
        sem.park(&futex, ThreadId::new(1)).unwrap();
        sem.park(&futex, ThreadId::new(2)).unwrap();
        sem.park(&futex, ThreadId::new(3)).unwrap();
        assert_eq!(sem.signal(&futex, 2), 2);
        assert_eq!(futex.wake(sem.addr(), 1), 1);
    }
}
