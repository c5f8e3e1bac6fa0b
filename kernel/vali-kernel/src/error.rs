//! Subsystem-local error enums for every module this crate owns.
//!
//! Each converts into [`vali_core::error::SysError`] via `From`, the same
//! pattern `vali-core::handle::HandleError` and `vali-driver-api::DriverError`
//! already establish, so `syscall_impl` can propagate with `?` everywhere.

use core::fmt;

use vali_core::error::SysError;

/// Errors from the physical frame allocator (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmmError {
    /// No run of frames satisfying the request (count + mask) is free.
    OutOfMemory,
    /// `count == 0`, or the mask cannot be satisfied by any configured region.
    InvalidParameters,
    /// A capability this allocator does not implement (e.g. NUMA affinity).
    Unsupported,
}

impl fmt::Display for PmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfMemory => "out of physical memory",
            Self::InvalidParameters => "invalid parameters",
            Self::Unsupported => "not supported",
        };
        f.write_str(s)
    }
}

impl From<PmmError> for SysError {
    fn from(e: PmmError) -> Self {
        match e {
            PmmError::OutOfMemory => Self::OutOfMemory,
            PmmError::InvalidParameters => Self::InvalidParameters,
            PmmError::Unsupported => Self::NotSupported,
        }
    }
}

/// Errors from the virtual address-space manager (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmmError {
    /// A request address or length was not page-aligned.
    Unaligned,
    /// The requested range overlaps an existing mapping.
    Overlap,
    /// No region of the requested kind has room for this mapping.
    OutOfRange,
    /// Backing physical memory could not be allocated.
    OutOfMemory,
    /// The address is not currently mapped.
    NotMapped,
    /// An argument was malformed.
    InvalidParameters,
}

impl fmt::Display for VmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unaligned => "address or length not page-aligned",
            Self::Overlap => "range overlaps an existing mapping",
            Self::OutOfRange => "no room in the requested region kind",
            Self::OutOfMemory => "out of memory",
            Self::NotMapped => "address not mapped",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<VmmError> for SysError {
    fn from(e: VmmError) -> Self {
        match e {
            VmmError::Unaligned | VmmError::InvalidParameters => Self::InvalidParameters,
            VmmError::Overlap => Self::AlreadyExists,
            VmmError::OutOfRange | VmmError::OutOfMemory => Self::OutOfMemory,
            VmmError::NotMapped => Self::NotFound,
        }
    }
}

/// Errors from the kernel heap (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeapError {
    /// The allocator (buddy pool or slab cache) could not satisfy the request.
    OutOfMemory,
    /// A zero-size request, or a size/align combination the cache rejects.
    InvalidParameters,
}

impl fmt::Display for HeapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfMemory => "heap exhausted",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<HeapError> for SysError {
    fn from(e: HeapError) -> Self {
        match e {
            HeapError::OutOfMemory => Self::OutOfMemory,
            HeapError::InvalidParameters => Self::InvalidParameters,
        }
    }
}

/// Errors from the thread scheduler (C5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// No thread with that id exists.
    NotFound,
    /// The thread is not in a state `join`/`detach`/`signal` accepts.
    InvalidState,
    /// An argument was malformed (e.g. an out-of-range `CpuId`).
    InvalidParameters,
}

impl fmt::Display for SchedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "no such thread",
            Self::InvalidState => "thread not in a valid state for this operation",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<SchedError> for SysError {
    fn from(e: SchedError) -> Self {
        match e {
            SchedError::NotFound => Self::NotFound,
            SchedError::InvalidState => Self::InvalidParameters,
            SchedError::InvalidParameters => Self::InvalidParameters,
        }
    }
}

/// Errors from the futex subsystem and its higher primitives (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutexError {
    /// The calling thread would otherwise block (non-blocking mode only).
    WouldBlock,
    /// The deadline elapsed before the wait condition was satisfied.
    Timeout,
    /// An argument was malformed.
    InvalidParameters,
}

impl fmt::Display for FutexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::WouldBlock => "would block",
            Self::Timeout => "timeout",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<FutexError> for SysError {
    fn from(e: FutexError) -> Self {
        match e {
            FutexError::WouldBlock => Self::WouldBlock,
            FutexError::Timeout => Self::Timeout,
            FutexError::InvalidParameters => Self::InvalidParameters,
        }
    }
}

/// Errors from interrupt registration and dispatch (C7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptError {
    /// No vector satisfying the descriptor's constraints was free.
    NoVector,
    /// The line is exclusive (`NOT_SHARABLE`) and already claimed.
    Busy,
    /// No such registered interrupt handle.
    NotFound,
    /// An argument was malformed.
    InvalidParameters,
}

impl fmt::Display for InterruptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoVector => "no free interrupt vector",
            Self::Busy => "interrupt line busy",
            Self::NotFound => "no such interrupt registration",
            Self::InvalidParameters => "invalid parameters",
        };
        f.write_str(s)
    }
}

impl From<InterruptError> for SysError {
    fn from(e: InterruptError) -> Self {
        match e {
            InterruptError::NoVector => Self::OutOfMemory,
            InterruptError::Busy => Self::Busy,
            InterruptError::NotFound => Self::NotFound,
            InterruptError::InvalidParameters => Self::InvalidParameters,
        }
    }
}

/// Errors from the time base (C8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeError {
    /// No registered clock source satisfies the requested capability.
    NotAvailable,
}

impl fmt::Display for TimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("no clock source available")
    }
}

impl From<TimeError> for SysError {
    fn from(_: TimeError) -> Self {
        Self::NotFound
    }
}

impl From<vali_driver_api::TimeError> for TimeError {
    fn from(_: vali_driver_api::TimeError) -> Self {
        Self::NotAvailable
    }
}

/// Errors from the PE module loader glue (C13).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderError {
    /// The image failed to parse as a well-formed PE/COFF binary.
    Malformed,
    /// An operation was attempted from a state that doesn't allow it.
    InvalidState,
    /// A named import could not be resolved against any loaded module.
    UnresolvedImport,
    /// Backing memory could not be mapped for the image.
    OutOfMemory,
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Malformed => "malformed module image",
            Self::InvalidState => "invalid module state transition",
            Self::UnresolvedImport => "unresolved import",
            Self::OutOfMemory => "out of memory",
        };
        f.write_str(s)
    }
}

impl From<LoaderError> for SysError {
    fn from(e: LoaderError) -> Self {
        match e {
            LoaderError::Malformed => Self::InvalidParameters,
            LoaderError::InvalidState => Self::InvalidParameters,
            LoaderError::UnresolvedImport => Self::NotFound,
            LoaderError::OutOfMemory => Self::OutOfMemory,
        }
    }
}

/// `vali-ipc` keeps its own error enums acyclic from this crate, so their
/// `SysError` bridges live here rather than beside `vali_core::handle::HandleError`'s.
impl From<vali_ipc::shm::ShmError> for SysError {
    fn from(e: vali_ipc::shm::ShmError) -> Self {
        match e {
            vali_ipc::shm::ShmError::OutOfMemory => Self::OutOfMemory,
            vali_ipc::shm::ShmError::InvalidParameters => Self::InvalidParameters,
            vali_ipc::shm::ShmError::PermissionDenied => Self::PermissionDenied,
            vali_ipc::shm::ShmError::NotFound => Self::NotFound,
        }
    }
}

impl From<vali_ipc::gracht::IpcError> for SysError {
    fn from(e: vali_ipc::gracht::IpcError) -> Self {
        match e {
            vali_ipc::gracht::IpcError::NotFound => Self::NotFound,
            vali_ipc::gracht::IpcError::NotConnected => Self::NotConnected,
            vali_ipc::gracht::IpcError::Timeout => Self::Timeout,
            vali_ipc::gracht::IpcError::Cancelled => Self::Cancelled,
            vali_ipc::gracht::IpcError::InvalidProtocol => Self::InvalidProtocol,
        }
    }
}

impl From<vali_ipc::streambuffer::StreamBufferError> for SysError {
    fn from(e: vali_ipc::streambuffer::StreamBufferError) -> Self {
        match e {
            vali_ipc::streambuffer::StreamBufferError::WouldBlock => Self::WouldBlock,
            vali_ipc::streambuffer::StreamBufferError::Timeout => Self::Timeout,
            vali_ipc::streambuffer::StreamBufferError::Cancelled => Self::Cancelled,
            vali_ipc::streambuffer::StreamBufferError::InvalidParameters => Self::InvalidParameters,
        }
    }
}

impl From<vali_ipc::handleset::HandleSetError> for SysError {
    fn from(e: vali_ipc::handleset::HandleSetError) -> Self {
        match e {
            vali_ipc::handleset::HandleSetError::NotFound => Self::NotFound,
            vali_ipc::handleset::HandleSetError::AlreadyExists => Self::AlreadyExists,
            vali_ipc::handleset::HandleSetError::InvalidParameters => Self::InvalidParameters,
        }
    }
}
