//! Shared vocabulary for the handle table (owned by `vali-kernel`) and the
//! handle-set event queue (owned by `vali-ipc`).
//!
//! Kept in `vali-core` rather than either crate because both need to agree
//! on what a handle *is* (its [`ObjectType`]) and what can happen to it
//! (its [`ActivityBits`]) without the lower crate (`vali-ipc`) depending on
//! the higher one (`vali-kernel`, which owns the concrete handle table).

use bitflags::bitflags;
use core::fmt;

/// The kind of kernel object a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectType {
    /// No specific semantics; a bare refcounted object.
    Generic,
    /// An [`crate::id::AddressSpaceId`]-backed address space.
    MemorySpace,
    /// A shared-memory buffer (`vali-ipc::shm`).
    MemoryBuffer,
    /// A schedulable thread.
    Thread,
    /// An IPC context (`vali-ipc::gracht`).
    IpcContext,
    /// A handle-set / event queue (`vali-ipc::handleset`).
    HandleSet,
    /// A network socket.
    Socket,
    /// A file.
    File,
    /// An anonymous pipe.
    Pipe,
}

bitflags! {
    /// Pending-activity bits carried by every handle object.
    ///
    /// `mark_activity` ORs bits into this word; a handle-set subscription
    /// whose interest mask intersects the result becomes ready (§4.4/§4.12).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ActivityBits: u32 {
        /// Data is available to read / the object is otherwise ready.
        const READABLE = 1 << 0;
        /// The object can accept a write without blocking.
        const WRITABLE = 1 << 1;
        /// An error condition occurred.
        const ERROR = 1 << 2;
        /// The peer end hung up / the object was closed remotely.
        const HANGUP = 1 << 3;
        /// The object (or a wait on it) was cancelled.
        const CANCELLED = 1 << 4;
        /// First of four subsystem-defined custom bits.
        const CUSTOM0 = 1 << 5;
        /// Second custom bit.
        const CUSTOM1 = 1 << 6;
        /// Third custom bit.
        const CUSTOM2 = 1 << 7;
        /// Fourth custom bit.
        const CUSTOM3 = 1 << 8;
    }
}

/// Errors reported by the handle table and anything built on top of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleError {
    /// No handle with that ID exists in this process's table.
    NotFound,
    /// The requested path is already bound to a handle.
    AlreadyExists,
    /// An argument was malformed.
    InvalidParameters,
    /// The caller lacks the capability to perform this operation.
    PermissionDenied,
}

impl fmt::Display for HandleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "handle not found",
            Self::AlreadyExists => "path already bound",
            Self::InvalidParameters => "invalid parameters",
            Self::PermissionDenied => "permission denied",
        };
        f.write_str(s)
    }
}

impl From<HandleError> for crate::error::SysError {
    fn from(e: HandleError) -> Self {
        match e {
            HandleError::NotFound => Self::NotFound,
            HandleError::AlreadyExists => Self::AlreadyExists,
            HandleError::InvalidParameters => Self::InvalidParameters,
            HandleError::PermissionDenied => Self::PermissionDenied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activity_bits_combine() {
        let bits = ActivityBits::READABLE | ActivityBits::HANGUP;
        assert!(bits.contains(ActivityBits::READABLE));
        assert!(!bits.contains(ActivityBits::WRITABLE));
    }

    #[test]
    fn handle_error_maps_to_sys_error() {
        let e: crate::error::SysError = HandleError::NotFound.into();
        assert_eq!(e, crate::error::SysError::NotFound);
    }
}
