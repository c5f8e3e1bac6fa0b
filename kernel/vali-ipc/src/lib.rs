//! The IPC substrate: shared-memory descriptors (C9), the SPSC stream-buffer
//! packet ring (C10), gracht RPC framing (C11), and the handle-set event
//! queue (C12).
//!
//! Sits between `vali-core` (shared vocabulary: addresses, ids, locks,
//! `ActivityBits`) and `vali-kernel` (owns the concrete `HandleTable` and
//! `Scheduler` this crate's blocking operations ultimately need). Nothing
//! in here parks or resumes a thread directly — every operation that would
//! block either returns a `WouldBlock`-shaped error for the caller to retry
//! after waiting on a futex address this crate exposes, or (for the
//! handle-set) hands back a `ThreadId` popped off an internal wait queue
//! for the caller to hand to its scheduler. That keeps the dependency
//! graph acyclic: `vali-kernel` depends on `vali-ipc`, never the reverse.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

extern crate alloc;

pub mod gracht;
pub mod handleset;
pub mod shm;
pub mod streambuffer;

pub use gracht::{GrachtArg, GrachtHeader, IpcAddress, IpcContext, IpcError};
pub use handleset::{
    EventMask, HandleSet, HandleSetError, HandleSetId, HandleSetOp, ReadyEvent, Subscription,
};
pub use shm::{ShmCreateInfo, ShmError, ShmFlags, SgEntry};
pub use streambuffer::{
    ReadCursor, StreamBuffer, StreamBufferError, StreamBufferOptions, WriteCursor,
};
