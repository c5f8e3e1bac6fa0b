//! Memory management: physical frames (C1), address spaces (C2), and the
//! kernel heap (C3).
//!
//! Mirrors the teacher's `mm/mod.rs` re-export shape, minus the split
//! against a separate host-testable crate — here `pmm`/`vmm`/`heap` are
//! already host-testable on their own, so there is no `hadron-mm` layer to
//! re-export from.

pub mod heap;
pub mod pmm;
pub mod vmm;

pub use heap::{BuddyPool, GlobalHeap, KernelHeap, SlabCache, SlabFlags};
pub use pmm::{PhysFrameRun, PhysMemoryRegion, PhysicalAllocator};
pub use vmm::{
    AddressSpace, AddressSpaceKind, FaultAccess, FaultOutcome, MapFlags, MapRequest,
    NullMapper, PageTableMapper, Placement, SignalReason,
};
