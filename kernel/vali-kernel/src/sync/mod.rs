//! Higher-level synchronization primitives built on the futex subsystem
//! (C6): [`Mutex`] with priority inheritance, [`Semaphore`], and
//! [`CondVar`]. Each follows the pattern `crate::futex` documents: the
//! primitive owns a plain kernel-memory word, hashes its own address into
//! the shared [`crate::futex::FutexTable`], and re-validates its wait
//! condition under the table's bucket lock before parking.

pub mod condvar;
pub mod mutex;
pub mod semaphore;

pub use condvar::CondVar;
pub use mutex::Mutex;
pub use semaphore::Semaphore;
