//! Condition variable built on the futex subsystem (C6).
//!
//! Classic generation-counter design: a waiter samples the counter while
//! still holding the associated mutex, releases it, then parks on the
//! counter's futex address conditioned on it not having changed since the
//! sample — closing the standard condvar lost-wakeup race without this
//! type needing to know anything about the mutex it is paired with.

use core::sync::atomic::{AtomicU32, Ordering};

use vali_core::addr::VirtAddr;
use vali_core::id::ThreadId;

use crate::error::FutexError;
use crate::futex::FutexTable;

/// A condition variable.
pub struct CondVar {
    generation: AtomicU32,
}

impl CondVar {
    /// Creates a condition variable at generation zero.
    pub const fn new() -> Self {
        Self {
            generation: AtomicU32::new(0),
        }
    }

    fn addr(&self) -> VirtAddr {
        VirtAddr::new(core::ptr::addr_of!(self.generation) as u64)
    }

    /// Reads the current generation. Call this (with the associated
    /// mutex held) before releasing it and calling [`Self::park`].
    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Acquire)
    }

    /// Parks `thread`, re-validating that the generation still matches
    /// `seen` — if a [`Self::notify_one`]/[`Self::notify_all`] already ran
    /// since [`Self::generation`] was sampled, this returns
    /// `Err(WouldBlock)` immediately instead of missing the wakeup.
    pub fn park(&self, futex: &FutexTable, thread: ThreadId, seen: u32) -> Result<(), FutexError> {
        futex.wait_if(self.addr(), thread, || self.generation.load(Ordering::Acquire) == seen)
    }

    /// Advances the generation and wakes one parked waiter.
    pub fn notify_one(&self, futex: &FutexTable) {
        self.generation.fetch_add(1, Ordering::Release);
        futex.wake(self.addr(), 1);
    }

    /// Advances the generation and wakes every parked waiter.
    pub fn notify_all(&self, futex: &FutexTable) {
        self.generation.fetch_add(1, Ordering::Release);
        futex.wake(self.addr(), u32::MAX);
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn park_fails_fast_if_generation_already_advanced() {
        let cv = CondVar::new();
        let futex = FutexTable::new();
        let seen = cv.generation();
        cv.notify_one(&futex);
        assert_eq!(cv.park(&futex, ThreadId::new(1), seen), Err(FutexError::WouldBlock));
    }

    #[test]
    fn notify_all_wakes_every_waiter() {
        let cv = CondVar::new();
        let futex = FutexTable::new();
        let seen = cv.generation();
        for i in 0..3 {
            cv.park(&futex, ThreadId::new(i), seen).unwrap();
        }
        cv.notify_all(&futex);
        assert_eq!(futex.wake(cv.addr(), 1), 0);
    }
}
