//! Futex-based mutex with priority inheritance (C6).
//!
//! State word follows the classic three-state futex mutex: `UNLOCKED`,
//! `LOCKED` (no one waiting), `CONTENDED` (at least one waiter, so the
//! releaser must perform a wake). Priority inheritance itself — boosting
//! the holder to the blocked waiter's priority so a low-priority holder
//! can't have the CPU taken away from it by a medium-priority thread
//! while a high-priority thread waits on the lock it holds — is the
//! caller's responsibility (it owns the [`crate::sched::Scheduler`] this
//! type does not); [`Mutex::lock_slow_path`] reports the current holder
//! so the caller can boost it before parking.

use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use vali_core::addr::VirtAddr;
use vali_core::id::ThreadId;

use crate::config::MUTEX_SPIN_LIMIT;
use crate::error::FutexError;
use crate::futex::FutexTable;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// A mutual-exclusion lock built on [`FutexTable`].
pub struct Mutex {
    state: AtomicU32,
    holder: AtomicU64,
}

impl Mutex {
    /// Creates an unlocked mutex.
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            holder: AtomicU64::new(0),
        }
    }

    fn addr(&self) -> VirtAddr {
        VirtAddr::new(core::ptr::addr_of!(self.state) as u64)
    }

    /// The thread currently holding the lock, if any.
    pub fn holder(&self) -> Option<ThreadId> {
        match self.holder.load(Ordering::Acquire) {
            0 => None,
            raw => Some(ThreadId::new(raw)),
        }
    }

    /// Attempts to acquire the lock without blocking.
    pub fn try_lock(&self, owner: ThreadId) -> bool {
        if self.state.compare_exchange(UNLOCKED, LOCKED, Ordering::Acquire, Ordering::Relaxed).is_ok() {
            self.holder.store(owner.as_u64(), Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Spins up to [`MUTEX_SPIN_LIMIT`] iterations, then marks the lock
    /// `CONTENDED` and reports the current holder for the caller to boost
    /// (priority inheritance) before parking `owner` via [`Self::park`].
    /// Returns `Ok(())` if the spin loop itself acquired the lock.
    pub fn lock_slow_path(&self, owner: ThreadId) -> Result<(), Option<ThreadId>> {
        for _ in 0..MUTEX_SPIN_LIMIT {
            if self.try_lock(owner) {
                return Ok(());
            }
            core::hint::spin_loop();
        }
        self.state.store(CONTENDED, Ordering::Release);
        Err(self.holder())
    }

    /// Parks `owner` on this mutex's futex address, re-validating the
    /// lock is still `CONTENDED` under the bucket lock to avoid a lost
    /// wakeup against a concurrent [`Self::unlock`].
    pub fn park(&self, futex: &FutexTable, owner: ThreadId) -> Result<(), FutexError> {
        futex.wait_if(self.addr(), owner, || self.state.load(Ordering::Acquire) == CONTENDED)
    }

    /// Releases the lock. Returns `true` if a waiter must be woken
    /// (`state` was `CONTENDED`).
    pub fn unlock(&self, futex: &FutexTable) -> bool {
        self.holder.store(0, Ordering::Release);
        let prev = self.state.swap(UNLOCKED, Ordering::AcqRel);
        if prev == CONTENDED {
            futex.wake(self.addr(), 1);
            true
        } else {
            false
        }
    }

    /// Returns `true` if the lock is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != UNLOCKED
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_lock_then_unlock_round_trips() {
        let m = Mutex::new();
        assert!(m.try_lock(ThreadId::new(1)));
        assert_eq!(m.holder(), Some(ThreadId::new(1)));
        assert!(!m.try_lock(ThreadId::new(2)));
        let futex = FutexTable::new();
        assert!(!m.unlock(&futex));
        assert!(!m.is_locked());
    }

    #[test]
    fn contended_unlock_wakes_parked_waiter() {
        let m = Mutex::new();
        let futex = FutexTable::new();
        assert!(m.try_lock(ThreadId::new(1)));
        let err = m.lock_slow_path(ThreadId::new(2)).unwrap_err();
        assert_eq!(err, Some(ThreadId::new(1)));
        m.park(&futex, ThreadId::new(2)).unwrap();
        assert!(m.unlock(&futex));
    }

    #[test]
    fn lock_slow_path_succeeds_if_released_during_spin() {
        let m = Mutex::new();
        assert!(m.try_lock(ThreadId::new(1)));
        let futex = FutexTable::new();
        m.unlock(&futex);
        assert_eq!(m.lock_slow_path(ThreadId::new(2)), Ok(()));
    }
}
