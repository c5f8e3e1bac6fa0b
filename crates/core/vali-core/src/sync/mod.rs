//! Locking and wait primitives shared by every kernel crate.
//!
//! Layered the way the teacher corpus layers its `sync` module:
//! [`SpinLock`] and [`IrqSpinLock`] are the non-blocking base (the latter
//! additionally safe to take from interrupt context); [`RwLock`] is a
//! reader-biased spin lock for data read far more often than written;
//! [`WaitQueue`] is the building block every *blocking* primitive
//! (futex, mutex, semaphore, condvar — all in `vali-kernel`, since they
//! need the scheduler to actually park a thread) is built on top of.

mod irq_spinlock;
mod rwlock;
mod spinlock;
mod waitqueue;

pub use irq_spinlock::{IrqSpinLock, IrqSpinLockGuard};
pub use rwlock::{RwLock, RwLockReadGuard, RwLockWriteGuard};
pub use spinlock::{SpinLock, SpinLockGuard};
pub use waitqueue::WaitQueue;
