//! Virtual address-space manager (C2).
//!
//! Generalizes the teacher's `Vmm<M: PageMapper<S>>` split (core state
//! machine generic over an architecture-specific page table editor) to a
//! single [`AddressSpace<M>`] covering both kernel and application spaces.
//! `M: PageTableMapper` is where the real arch code (not part of this
//! workspace — no x86_64/aarch64 paging crate was part of this transform)
//! would plug in; tests here use [`NullMapper`], a recording stub, so the
//! range-bookkeeping and copy-on-write logic are exercised without real
//! page tables.

extern crate alloc;

use alloc::collections::BTreeMap;
use bitflags::bitflags;

use vali_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};

use crate::error::VmmError;
use crate::mm::pmm::PhysicalAllocator;

bitflags! {
    /// Per-mapping attributes (§4.2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapFlags: u32 {
        /// Backed by a committed physical frame (vs. reserved-but-unbacked).
        const COMMITTED = 1 << 0;
        /// Accessible from user mode.
        const USERSPACE = 1 << 1;
        /// Instruction fetches are permitted.
        const EXECUTABLE = 1 << 2;
        /// Survives a `fork_cow` without COW semantics (shared as-is).
        const PERSISTENT = 1 << 3;
        /// Copy-on-write: a write fault duplicates the backing frame.
        const COW = 1 << 4;
        /// Deliberately unmapped; any access faults (stack/heap guard page).
        const GUARD = 1 << 5;
        /// Writable.
        const WRITABLE = 1 << 6;
    }
}

bitflags! {
    /// Placement constraints accepted by [`AddressSpace::map`] (§4.2).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Placement: u32 {
        /// The caller's requested virtual address must be used exactly.
        const VIRTUAL_FIXED = 1 << 0;
        /// The caller's requested physical address must be used exactly.
        const PHYSICAL_FIXED = 1 << 1;
        /// The backing frames must be physically contiguous.
        const PHYSICAL_CONTIGUOUS = 1 << 2;
    }
}

/// Which side of the kernel/application split an [`AddressSpace`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpaceKind {
    /// The single address space mapping all physical memory 1:1 (HHDM) plus
    /// kernel code/data, shared (read-only from the application's view) by
    /// every other address space's "top half".
    Kernel,
    /// A per-process application address space.
    Application,
    /// Inherits its kernel-half mappings from an existing space, used when
    /// spawning a thread that shares its parent's address space.
    Inherit,
}

/// The kind of access that faulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAccess {
    /// A read.
    Read,
    /// A write.
    Write,
    /// An instruction fetch.
    Execute,
}

/// Why a fault could not be resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalReason {
    /// Access to an address with no mapping and no commit-on-fault policy.
    SegmentationFault,
    /// Access violated the mapping's protection (e.g. write to read-only,
    /// or any access to a [`MapFlags::GUARD`] page), or a user-mode access
    /// reached into kernel address space.
    ProtectionFault,
}

/// What handling a page fault produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOutcome {
    /// The fault was resolved; the faulting instruction may be retried.
    Resolved,
    /// The fault could not be resolved and must be delivered to the thread
    /// (fatal if the fault came from kernel-mode code).
    Signal(SignalReason),
}

#[derive(Clone)]
struct Mapping {
    /// Per-page physical backing, one entry per page in the range. `None`
    /// means that page is reserved but not yet committed. Tracked at page
    /// granularity (rather than a single base `PhysAddr` for the whole
    /// range) so a copy-on-write fault on one page of a multi-page region
    /// can retarget that page alone without disturbing its siblings, which
    /// may still be shared with another address space.
    pages: alloc::vec::Vec<Option<PhysAddr>>,
    flags: MapFlags,
}

impl Mapping {
    fn len(&self) -> u64 {
        self.pages.len() as u64 * PAGE_SIZE
    }
}

/// A request to [`AddressSpace::map`].
#[derive(Debug, Clone, Copy)]
pub struct MapRequest {
    /// Requested virtual address (meaningful only with `VIRTUAL_FIXED`).
    pub virt_hint: VirtAddr,
    /// Requested physical address (meaningful only with `PHYSICAL_FIXED`).
    pub phys_hint: PhysAddr,
    /// Length in bytes; must be a multiple of [`PAGE_SIZE`].
    pub len: u64,
    /// Mapping attributes.
    pub flags: MapFlags,
    /// Placement constraints.
    pub placement: Placement,
}

/// Edits the real page tables backing an [`AddressSpace`]. The generic
/// parameter over which `AddressSpace` is built — the production
/// implementation lives in architecture-specific code outside this crate.
pub trait PageTableMapper {
    /// Installs a single-page mapping.
    fn map_page(&mut self, virt: VirtAddr, phys: PhysAddr, flags: MapFlags);
    /// Removes a single-page mapping.
    fn unmap_page(&mut self, virt: VirtAddr);
    /// Updates the flags of an existing mapping in place.
    fn protect_page(&mut self, virt: VirtAddr, flags: MapFlags);
}

/// A no-op [`PageTableMapper`] used in host tests, where no real page
/// tables exist to edit.
#[derive(Debug, Default)]
pub struct NullMapper;

impl PageTableMapper for NullMapper {
    fn map_page(&mut self, _virt: VirtAddr, _phys: PhysAddr, _flags: MapFlags) {}
    fn unmap_page(&mut self, _virt: VirtAddr) {}
    fn protect_page(&mut self, _virt: VirtAddr, _flags: MapFlags) {}
}

/// A virtual address space: the software record of its mappings plus the
/// architecture-specific page tables `M` edits to match.
pub struct AddressSpace<M: PageTableMapper> {
    kind: AddressSpaceKind,
    mapper: M,
    mappings: BTreeMap<u64, Mapping>,
}

impl<M: PageTableMapper> AddressSpace<M> {
    /// Creates an empty address space of the given kind, backed by `mapper`.
    pub fn create(kind: AddressSpaceKind, mapper: M) -> Self {
        Self {
            kind,
            mapper,
            mappings: BTreeMap::new(),
        }
    }

    /// Which kind of address space this is.
    pub const fn kind(&self) -> AddressSpaceKind {
        self.kind
    }

    fn overlaps(&self, virt: u64, len: u64) -> bool {
        self.mappings.iter().any(|(&base, m)| {
            let existing_end = base + m.len();
            let new_end = virt + len;
            virt < existing_end && base < new_end
        })
    }

    /// Maps `req.len` bytes starting (subject to placement) at `req.virt_hint`.
    pub fn map(
        &mut self,
        req: MapRequest,
        pmm: &PhysicalAllocator,
    ) -> Result<VirtAddr, VmmError> {
        if req.len == 0 || req.len % PAGE_SIZE != 0 || !req.virt_hint.is_aligned(PAGE_SIZE) {
            return Err(VmmError::Unaligned);
        }
        if !req.placement.contains(Placement::VIRTUAL_FIXED) {
            // This crate only supports explicit placement; a real allocator
            // would search for a free range here.
            return Err(VmmError::InvalidParameters);
        }
        let virt = req.virt_hint.as_u64();
        if self.overlaps(virt, req.len) {
            return Err(VmmError::Overlap);
        }

        let page_count = (req.len / PAGE_SIZE) as usize;
        let pages = if req.flags.contains(MapFlags::COMMITTED) {
            let run = pmm
                .allocate(page_count, vali_core::addr::DmaMask::Any)
                .map_err(|_| VmmError::OutOfMemory)?;
            let mut pages = alloc::vec::Vec::with_capacity(page_count);
            for i in 0..page_count {
                let page_virt = VirtAddr::new(virt + i as u64 * PAGE_SIZE);
                let page_phys = run.start() + (i as u64) * PAGE_SIZE;
                self.mapper.map_page(page_virt, page_phys, req.flags);
                pages.push(Some(page_phys));
            }
            pages
        } else {
            alloc::vec![None; page_count]
        };

        self.mappings.insert(
            virt,
            Mapping {
                pages,
                flags: req.flags,
            },
        );
        Ok(req.virt_hint)
    }

    /// Maps `len` bytes of already-owned physical memory at `phys` into
    /// this space at `virt`, instead of allocating fresh frames the way
    /// [`Self::map`] does. `pmm.retain` is called once per page so a later
    /// [`Self::unmap`]'s `pmm.release` calls balance against this call's
    /// retain rather than an allocation this call never made.
    ///
    /// Used by shared-memory attach and commit (C9), where the backing
    /// frames were allocated up front by `vali-kernel`'s `shm` glue and
    /// only need a second virtual mapping, not a second allocation.
    pub fn map_existing(
        &mut self,
        virt: VirtAddr,
        phys: PhysAddr,
        len: u64,
        flags: MapFlags,
        pmm: &PhysicalAllocator,
    ) -> Result<VirtAddr, VmmError> {
        if len == 0 || len % PAGE_SIZE != 0 || !virt.is_aligned(PAGE_SIZE) || !phys.is_aligned(PAGE_SIZE) {
            return Err(VmmError::Unaligned);
        }
        if self.overlaps(virt.as_u64(), len) {
            return Err(VmmError::Overlap);
        }
        let page_count = (len / PAGE_SIZE) as usize;
        let mut pages = alloc::vec::Vec::with_capacity(page_count);
        for i in 0..page_count {
            let page_virt = VirtAddr::new(virt.as_u64() + i as u64 * PAGE_SIZE);
            let page_phys = phys + (i as u64) * PAGE_SIZE;
            pmm.retain(page_phys);
            self.mapper.map_page(page_virt, page_phys, flags);
            pages.push(Some(page_phys));
        }
        self.mappings.insert(virt.as_u64(), Mapping { pages, flags });
        Ok(virt)
    }

    /// Removes the mapping starting at `virt`, releasing any committed frames.
    pub fn unmap(&mut self, virt: VirtAddr, pmm: &PhysicalAllocator) -> Result<(), VmmError> {
        let mapping = self
            .mappings
            .remove(&virt.as_u64())
            .ok_or(VmmError::NotMapped)?;
        for (i, page_phys) in mapping.pages.iter().enumerate() {
            if let Some(page_phys) = page_phys {
                let page_virt = VirtAddr::new(virt.as_u64() + i as u64 * PAGE_SIZE);
                self.mapper.unmap_page(page_virt);
                pmm.release(*page_phys);
            }
        }
        Ok(())
    }

    /// Changes the protection flags of an existing mapping.
    pub fn protect(&mut self, virt: VirtAddr, flags: MapFlags) -> Result<(), VmmError> {
        let mapping = self
            .mappings
            .get_mut(&virt.as_u64())
            .ok_or(VmmError::NotMapped)?;
        mapping.flags = flags;
        let page_count = mapping.pages.len();
        for i in 0..page_count {
            self.mapper
                .protect_page(VirtAddr::new(virt.as_u64() + i as u64 * PAGE_SIZE), flags);
        }
        Ok(())
    }

    /// The attribute flags of the mapping covering `addr`, for introspection
    /// (`mem_query`) without going through the fault path.
    pub fn flags_at(&self, addr: VirtAddr) -> Result<MapFlags, VmmError> {
        self.find_mapping(addr.as_u64()).map(|(_, m)| m.flags).ok_or(VmmError::NotMapped)
    }

    fn find_mapping(&self, addr: u64) -> Option<(u64, Mapping)> {
        self.mappings
            .range(..=addr)
            .next_back()
            .filter(|(&base, m)| addr < base + m.len())
            .map(|(&base, m)| (base, m.clone()))
    }

    /// Fills the still-reserved (`None`) page at byte `offset` of the
    /// mapping starting at `virt` with `phys`, which the caller already
    /// holds a reference to — `pmm.retain` is called so this mapping's
    /// later [`Self::unmap`] balances with a release of its own, the same
    /// double-ownership [`Self::map_existing`] relies on. A no-op if that
    /// page is already committed. Used by shared-memory `commit` (C9) to
    /// back a lazily-reserved region page by page on demand.
    pub fn commit_page(
        &mut self,
        virt: VirtAddr,
        offset: u64,
        phys: PhysAddr,
        flags: MapFlags,
        pmm: &PhysicalAllocator,
    ) -> Result<(), VmmError> {
        if offset % PAGE_SIZE != 0 || !phys.is_aligned(PAGE_SIZE) {
            return Err(VmmError::Unaligned);
        }
        let mapping = self.mappings.get(&virt.as_u64()).ok_or(VmmError::NotMapped)?;
        if offset >= mapping.len() {
            return Err(VmmError::InvalidParameters);
        }
        let index = (offset / PAGE_SIZE) as usize;
        if mapping.pages[index].is_some() {
            return Ok(());
        }
        let page_virt = VirtAddr::new(virt.as_u64() + offset);
        pmm.retain(phys);
        self.mapper.map_page(page_virt, phys, flags | MapFlags::COMMITTED);
        if let Some(entry) = self.mappings.get_mut(&virt.as_u64()) {
            entry.pages[index] = Some(phys);
        }
        Ok(())
    }

    /// Resolves a page fault at `addr` for the given access kind.
    pub fn handle_fault(
        &mut self,
        addr: VirtAddr,
        access: FaultAccess,
        pmm: &PhysicalAllocator,
    ) -> FaultOutcome {
        let Some((base, mapping)) = self.find_mapping(addr.as_u64()) else {
            return FaultOutcome::Signal(SignalReason::SegmentationFault);
        };
        if mapping.flags.contains(MapFlags::GUARD) {
            return FaultOutcome::Signal(SignalReason::ProtectionFault);
        }
        if access == FaultAccess::Write && !mapping.flags.contains(MapFlags::WRITABLE) {
            // Copy-on-write resolves here; anything else is a real violation.
            if !mapping.flags.contains(MapFlags::COW) {
                return FaultOutcome::Signal(SignalReason::ProtectionFault);
            }
            return self.resolve_cow_fault(base, addr, pmm);
        }
        let page_index = ((addr.align_down(PAGE_SIZE).as_u64() - base) / PAGE_SIZE) as usize;
        if mapping.pages.get(page_index).copied().flatten().is_none() {
            // Commit-on-fault: back this page with a fresh frame now.
            let page_virt = addr.align_down(PAGE_SIZE);
            let Ok(run) = pmm.allocate(1, vali_core::addr::DmaMask::Any) else {
                return FaultOutcome::Signal(SignalReason::SegmentationFault);
            };
            self.mapper.map_page(page_virt, run.start(), mapping.flags | MapFlags::COMMITTED);
            if let Some(entry) = self.mappings.get_mut(&base) {
                entry.pages[page_index] = Some(run.start());
                entry.flags |= MapFlags::COMMITTED;
            }
        }
        FaultOutcome::Resolved
    }

    /// Resolves a write fault on a single page of a `COW` mapping. Acts
    /// purely on the faulting page's own entry in `mapping.pages`: sibling
    /// pages of the same region may still be genuinely shared with another
    /// address space and must not be touched (no single `phys`/`flags`
    /// field is mutated for the whole mapping). A page's in-place upgrade
    /// is driven by its own reference count, so a later write fault on an
    /// already-resolved page just re-checks `ref_count <= 1` and re-issues
    /// an idempotent `protect_page` rather than relying on cached state.
    fn resolve_cow_fault(
        &mut self,
        base: u64,
        addr: VirtAddr,
        pmm: &PhysicalAllocator,
    ) -> FaultOutcome {
        let page_virt = addr.align_down(PAGE_SIZE);
        let page_index = ((page_virt.as_u64() - base) / PAGE_SIZE) as usize;
        let Some(mapping) = self.mappings.get(&base) else {
            return FaultOutcome::Signal(SignalReason::SegmentationFault);
        };
        let Some(Some(page_phys)) = mapping.pages.get(page_index).copied() else {
            return FaultOutcome::Signal(SignalReason::SegmentationFault);
        };
        let page_flags = (mapping.flags - MapFlags::COW) | MapFlags::WRITABLE;

        if pmm.ref_count(page_phys) <= 1 {
            // Sole owner: upgrade this page in place, no copy needed.
            self.mapper.protect_page(page_virt, page_flags);
        } else {
            let Ok(run) = pmm.allocate(1, vali_core::addr::DmaMask::Any) else {
                return FaultOutcome::Signal(SignalReason::SegmentationFault);
            };
            // SAFETY: the real implementation copies via the HHDM mapping of
            // both frames; the `PhysAddr`-only model here has no byte-level
            // access to copy through, so copying is the architecture layer's
            // responsibility once real page tables exist.
            self.mapper.map_page(page_virt, run.start(), page_flags);
            pmm.release(page_phys);
            if let Some(entry) = self.mappings.get_mut(&base) {
                entry.pages[page_index] = Some(run.start());
            }
        }
        FaultOutcome::Resolved
    }

    /// Splits this address space into a parent/child copy-on-write pair.
    ///
    /// Every `COMMITTED | WRITABLE` mapping becomes `COMMITTED | COW` in
    /// both copies, and each backing frame's reference count is bumped via
    /// [`PhysicalAllocator::retain`] so neither copy's eventual `unmap`
    /// frees a frame the other still references.
    pub fn fork_cow(mut self, pmm: &PhysicalAllocator) -> (Self, Self)
    where
        M: Clone,
    {
        for mapping in self.mappings.values_mut() {
            if mapping.flags.contains(MapFlags::COMMITTED) && mapping.flags.contains(MapFlags::WRITABLE) {
                mapping.flags = (mapping.flags - MapFlags::WRITABLE) | MapFlags::COW;
                for page_phys in mapping.pages.iter().flatten() {
                    pmm.retain(*page_phys);
                }
            }
        }
        let clone = Self {
            kind: self.kind,
            mapper: self.mapper.clone(),
            mappings: self.mappings.clone(),
        };
        (self, clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Clone for NullMapper {
        fn clone(&self) -> Self {
            Self
        }
    }

    fn pmm() -> PhysicalAllocator {
        PhysicalAllocator::new(&[crate::mm::pmm::PhysMemoryRegion {
            start: PhysAddr::new(0),
            size: 64 * PAGE_SIZE,
        }])
    }

    fn req(virt: u64, len: u64, flags: MapFlags) -> MapRequest {
        MapRequest {
            virt_hint: VirtAddr::new(virt),
            phys_hint: PhysAddr::zero(),
            len,
            flags,
            placement: Placement::VIRTUAL_FIXED,
        }
    }

    #[test]
    fn map_unaligned_length_rejected() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let result = space.map(req(0x1000, 100, MapFlags::COMMITTED), &pmm());
        assert_eq!(result, Err(VmmError::Unaligned));
    }

    #[test]
    fn map_then_fault_outside_any_mapping_segfaults() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x1000, PAGE_SIZE, MapFlags::COMMITTED | MapFlags::WRITABLE), &pmm).unwrap();
        let outcome = space.handle_fault(VirtAddr::new(0x5000), FaultAccess::Read, &pmm);
        assert_eq!(outcome, FaultOutcome::Signal(SignalReason::SegmentationFault));
    }

    #[test]
    fn overlapping_map_rejected() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x1000, PAGE_SIZE, MapFlags::COMMITTED), &pmm).unwrap();
        let result = space.map(req(0x1000, PAGE_SIZE, MapFlags::COMMITTED), &pmm);
        assert_eq!(result, Err(VmmError::Overlap));
    }

    #[test]
    fn guard_page_always_signals() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x2000, PAGE_SIZE, MapFlags::GUARD), &pmm).unwrap();
        let outcome = space.handle_fault(VirtAddr::new(0x2000), FaultAccess::Read, &pmm);
        assert_eq!(outcome, FaultOutcome::Signal(SignalReason::ProtectionFault));
    }

    #[test]
    fn commit_on_fault_backs_uncommitted_range() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        let free_before = pmm.free_frames();
        space.map(req(0x3000, PAGE_SIZE, MapFlags::WRITABLE), &pmm).unwrap();
        let outcome = space.handle_fault(VirtAddr::new(0x3000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert_eq!(pmm.free_frames(), free_before - 1);
    }

    #[test]
    fn commit_page_backs_only_the_requested_page_and_retains_the_caller_owned_frame() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        let free_before = pmm.free_frames();
        space.map(req(0x7000, 2 * PAGE_SIZE, MapFlags::WRITABLE), &pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before);

        let run = pmm.allocate(1, vali_core::addr::DmaMask::Any).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 1);
        space
            .commit_page(VirtAddr::new(0x7000), PAGE_SIZE, run.start(), MapFlags::WRITABLE, &pmm)
            .unwrap();
        // commit_page retains on top of the caller's own allocation, so the
        // frame now has two owners: this mapping and the caller.
        assert_eq!(pmm.ref_count(run.start()), 2);

        // A second call on the same page is a no-op (idempotent commit).
        space
            .commit_page(VirtAddr::new(0x7000), PAGE_SIZE, run.start(), MapFlags::WRITABLE, &pmm)
            .unwrap();
        assert_eq!(pmm.ref_count(run.start()), 2);
    }

    #[test]
    fn commit_page_rejects_out_of_bounds_offset() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x8000, PAGE_SIZE, MapFlags::WRITABLE), &pmm).unwrap();
        let run = pmm.allocate(1, vali_core::addr::DmaMask::Any).unwrap();
        let result = space.commit_page(VirtAddr::new(0x8000), PAGE_SIZE, run.start(), MapFlags::WRITABLE, &pmm);
        assert_eq!(result, Err(VmmError::InvalidParameters));
    }

    #[test]
    fn fork_cow_shares_frame_until_second_release() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x4000, PAGE_SIZE, MapFlags::COMMITTED | MapFlags::WRITABLE), &pmm).unwrap();
        let (mut parent, mut child) = space.fork_cow(&pmm);

        // Write fault in the child: sole-owner check sees refcount 2, copies.
        let outcome = child.handle_fault(VirtAddr::new(0x4000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);

        parent.unmap(VirtAddr::new(0x4000), &pmm).unwrap();
        child.unmap(VirtAddr::new(0x4000), &pmm).unwrap();
    }

    /// Spec §8 scenario 3: a 3-page COW region forked, then written to on
    /// one page only. The other two pages of the fork must stay shared
    /// (not leaked, not repointed), and the written page must get its own
    /// fresh frame without disturbing its siblings' entries.
    #[test]
    fn fork_cow_multi_page_resolves_only_the_faulting_page() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        let free_before = pmm.free_frames();
        space
            .map(req(0x10000, 3 * PAGE_SIZE, MapFlags::COMMITTED | MapFlags::WRITABLE), &pmm)
            .unwrap();
        assert_eq!(pmm.free_frames(), free_before - 3);

        let (mut parent, mut child) = space.fork_cow(&pmm);

        // Child writes to the middle page (page 1) only.
        let outcome = child.handle_fault(VirtAddr::new(0x11000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);

        // 3 original frames (still shared, refcount 2 each) + 1 freshly
        // copied frame for the child's page 1 = 4 resident frames, not 6.
        assert_eq!(pmm.free_frames(), free_before - 4);

        // Writing to the child's other pages must still copy independently
        // (they are still shared with the parent) rather than reuse page
        // 1's new frame or the parent's original frame.
        let outcome = child.handle_fault(VirtAddr::new(0x10000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert_eq!(pmm.free_frames(), free_before - 5);

        let outcome = child.handle_fault(VirtAddr::new(0x12000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert_eq!(pmm.free_frames(), free_before - 6);

        // Parent's pages were never touched: a write fault there still
        // finds refcount 1 (child copied away from all three) and
        // upgrades in place rather than allocating again.
        let outcome = parent.handle_fault(VirtAddr::new(0x10000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);
        assert_eq!(pmm.free_frames(), free_before - 6);

        parent.unmap(VirtAddr::new(0x10000), &pmm).unwrap();
        child.unmap(VirtAddr::new(0x10000), &pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before);
    }

    #[test]
    fn protect_changes_recorded_flags() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x6000, PAGE_SIZE, MapFlags::COMMITTED), &pmm).unwrap();
        space.protect(VirtAddr::new(0x6000), MapFlags::COMMITTED | MapFlags::WRITABLE).unwrap();
        let outcome = space.handle_fault(VirtAddr::new(0x6000), FaultAccess::Write, &pmm);
        assert_eq!(outcome, FaultOutcome::Resolved);
    }

    #[test]
    fn map_existing_retains_instead_of_allocating() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        let run = pmm.allocate(1, vali_core::addr::DmaMask::Any).unwrap();
        space
            .map_existing(VirtAddr::new(0x7000), run.start(), PAGE_SIZE, MapFlags::COMMITTED, &pmm)
            .unwrap();
        assert_eq!(pmm.ref_count(run.start()), 2);
        space.unmap(VirtAddr::new(0x7000), &pmm).unwrap();
        assert_eq!(pmm.ref_count(run.start()), 1);
    }

    #[test]
    fn flags_at_reports_the_covering_mapping() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        space.map(req(0x8000, PAGE_SIZE, MapFlags::COMMITTED | MapFlags::WRITABLE), &pmm).unwrap();
        assert_eq!(space.flags_at(VirtAddr::new(0x8000)), Ok(MapFlags::COMMITTED | MapFlags::WRITABLE));
        assert_eq!(space.flags_at(VirtAddr::new(0x9000)), Err(VmmError::NotMapped));
    }

    #[test]
    fn map_existing_rejects_unaligned_phys() {
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = pmm();
        let err = space
            .map_existing(VirtAddr::new(0x7000), PhysAddr::new(1), PAGE_SIZE, MapFlags::COMMITTED, &pmm)
            .unwrap_err();
        assert_eq!(err, VmmError::Unaligned);
    }
}
