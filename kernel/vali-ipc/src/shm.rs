//! Shared-memory buffer descriptors (C9).
//!
//! This crate only models the handle-level bookkeeping: flags, the
//! scatter-gather table shape, and the invariant that a contiguity
//! requirement yields exactly one `SgEntry`. Allocating the backing
//! frames, mapping them into an `AddressSpace`, and wiring refcount-zero
//! back to the frame allocator are `vali-kernel`'s job (it owns C1/C2 and
//! the handle table these operations key into).

use core::fmt;

use bitflags::bitflags;
use vali_core::addr::{DmaMask, PhysAddr};

bitflags! {
    /// Access/contiguity flags for a shared-memory buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShmFlags: u32 {
        /// Backing frames must be physically contiguous and DMA-able.
        const DEVICE = 1 << 0;
        /// Mapping permits reads.
        const READ = 1 << 1;
        /// Mapping permits writes.
        const WRITE = 1 << 2;
        /// Mapping permits execution.
        const EXECUTE = 1 << 3;
    }
}

/// Parameters for creating a new shared-memory buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShmCreateInfo {
    /// Size of the buffer in bytes.
    pub size: u64,
    /// Access/contiguity flags.
    pub flags: ShmFlags,
    /// DMA reachability constraint on the backing frames.
    pub mask: DmaMask,
}

impl ShmCreateInfo {
    /// A contiguity requirement is implied by [`ShmFlags::DEVICE`] paired
    /// with a mask narrower than [`DmaMask::Any`] (§4.9 invariant).
    pub const fn requires_contiguous(&self) -> bool {
        self.flags.contains(ShmFlags::DEVICE) && !matches!(self.mask, DmaMask::Any)
    }
}

/// One physically-contiguous fragment of a shared-memory buffer's backing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SgEntry {
    /// Physical address of the fragment's first byte.
    pub phys: PhysAddr,
    /// Length of the fragment in bytes.
    pub len: u64,
}

/// Errors reported by shared-memory operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmError {
    /// The frame allocator could not satisfy the request.
    OutOfMemory,
    /// An argument was malformed or out of range.
    InvalidParameters,
    /// The caller lacks the required access.
    PermissionDenied,
    /// The handle does not name a shared-memory buffer.
    NotFound,
}

impl fmt::Display for ShmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OutOfMemory => "out of memory",
            Self::InvalidParameters => "invalid parameters",
            Self::PermissionDenied => "permission denied",
            Self::NotFound => "not found",
        };
        f.write_str(s)
    }
}

/// Locates the fragment covering `byte_offset` within a scatter-gather
/// table, and the offset within that fragment.
///
/// Grounded on the same linear-scan-over-small-table approach as
/// `vali-pe`'s export resolution: scatter-gather tables for a single
/// buffer are expected to hold at most a handful of entries (one, for any
/// `DEVICE`-contiguous buffer), so a linear scan costs nothing a binary
/// search would meaningfully improve on.
pub fn sg_table_offset(table: &[SgEntry], byte_offset: u64) -> Result<(usize, u64), ShmError> {
    let mut remaining = byte_offset;
    for (index, entry) in table.iter().enumerate() {
        if remaining < entry.len {
            return Ok((index, remaining));
        }
        remaining -= entry.len;
    }
    Err(ShmError::InvalidParameters)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_with_narrow_mask_requires_contiguous() {
        let info = ShmCreateInfo {
            size: 4096,
            flags: ShmFlags::DEVICE | ShmFlags::READ,
            mask: DmaMask::Below16MiB,
        };
        assert!(info.requires_contiguous());
    }

    #[test]
    fn device_with_any_mask_does_not_require_contiguous() {
        let info = ShmCreateInfo {
            size: 4096,
            flags: ShmFlags::DEVICE,
            mask: DmaMask::Any,
        };
        assert!(!info.requires_contiguous());
    }

    #[test]
    fn sg_table_offset_finds_fragment_and_residual() {
        let table = [
            SgEntry { phys: PhysAddr::new(0x1000), len: 4096 },
            SgEntry { phys: PhysAddr::new(0x5000), len: 8192 },
        ];
        assert_eq!(sg_table_offset(&table, 0), Ok((0, 0)));
        assert_eq!(sg_table_offset(&table, 4096), Ok((1, 0)));
        assert_eq!(sg_table_offset(&table, 4097 + 4096), Ok((1, 4097)));
    }

    #[test]
    fn sg_table_offset_past_end_errors() {
        let table = [SgEntry { phys: PhysAddr::new(0x1000), len: 4096 }];
        assert_eq!(sg_table_offset(&table, 4096), Err(ShmError::InvalidParameters));
    }
}
