//! Shared memory buffer registry (C9).
//!
//! Wraps `vali_ipc::shm`'s wire/descriptor types with the pieces that
//! actually touch physical and virtual memory: frame allocation from
//! [`PhysicalAllocator`], mapping into an [`AddressSpace`], and handle-table
//! registration with a frame-release destructor. `vali_ipc::shm` itself stays
//! below `vali-kernel` in the dependency graph and so cannot see either.

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use vali_core::addr::{DmaMask, PhysAddr, VirtAddr, PAGE_SIZE};
use vali_core::error::SysError;
use vali_core::handle::ObjectType;
use vali_core::id::HandleId;
use vali_core::sync::IrqSpinLock;
use vali_ipc::shm::{ShmCreateInfo, ShmFlags};

use crate::handle::HandleTable;
use crate::mm::vmm::{AddressSpace, MapFlags, MapRequest, PageTableMapper, Placement};
use crate::mm::PhysicalAllocator;

/// A registered shared memory buffer: its create-time descriptor, its
/// per-page backing, and where (if anywhere) it is currently mapped.
///
/// `pages[i]` is `None` until that page has a frame behind it. Buffers
/// requiring physical contiguity (`ShmFlags::DEVICE` with a narrow mask)
/// are committed in full at create time, since contiguity can only be
/// established by one allocation up front; all other buffers start fully
/// reserved and are committed page-by-page on demand by [`ShmRegistry::commit`].
/// Wrapped in an `Arc` so the handle-table destructor can release
/// whatever frames are live at destroy time without a second lookup back
/// into the registry.
struct ShmBuffer {
    info: ShmCreateInfo,
    pages: Arc<IrqSpinLock<Vec<Option<PhysAddr>>>>,
    mapped_at: Option<VirtAddr>,
}

impl ShmBuffer {
    fn total_len(&self) -> u64 {
        self.info.size
    }
}

/// Registry of every live shared memory buffer, keyed by the low 32 bits of
/// its backing handle's [`vali_core::id::ObjectId`] — the same value handed
/// out as the export token, so `shm_attach` can find the buffer a token names
/// without a second lookup table.
pub struct ShmRegistry {
    buffers: IrqSpinLock<BTreeMap<u32, ShmBuffer>>,
}

impl ShmRegistry {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self { buffers: IrqSpinLock::new(BTreeMap::new()) }
    }

    /// Registers a handle for `info` and records the buffer under that
    /// handle's object-id key.
    ///
    /// A physically-contiguous buffer (`info.requires_contiguous()`) is
    /// allocated and committed in full right away, since contiguity can
    /// only be established by one allocation up front. Any other buffer
    /// starts fully reserved with no frames allocated at all — `commit`
    /// backs it page by page on demand.
    pub fn create(
        &self,
        info: ShmCreateInfo,
        handles: &HandleTable,
        pmm: &'static PhysicalAllocator,
    ) -> Result<HandleId, SysError> {
        if info.size == 0 {
            return Err(SysError::InvalidParameters);
        }
        let page_count = info.size.div_ceil(PAGE_SIZE) as usize;

        let pages: Vec<Option<PhysAddr>> = if info.requires_contiguous() {
            let mask = if info.flags.contains(ShmFlags::DEVICE) {
                DmaMask::Below4GiB
            } else {
                DmaMask::Any
            };
            let run = pmm.allocate(page_count, mask)?;
            (0..page_count).map(|i| Some(run.start() + (i as u64) * PAGE_SIZE)).collect()
        } else {
            alloc::vec![None; page_count]
        };
        let pages = Arc::new(IrqSpinLock::new(pages));

        let handle = handles.create(ObjectType::MemoryBuffer);
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        let pages_for_destructor = pages.clone();
        handles.set_destructor(
            handle,
            alloc::boxed::Box::new(move || {
                for page in pages_for_destructor.lock().iter() {
                    if let Some(phys) = page {
                        pmm.release(*phys);
                    }
                }
            }),
        )?;

        self.buffers.lock().insert(key, ShmBuffer { info, pages, mapped_at: None });
        Ok(handle)
    }

    /// Exports `handle` as an opaque token another holder of the same handle
    /// table can redeem via [`Self::attach`].
    ///
    /// Since this kernel has a single shared [`HandleTable`] (no separate
    /// per-process tables to alias across), the token is simply the handle's
    /// backing [`vali_core::id::ObjectId`]: `attach` decodes it back to a
    /// `HandleId` and retains the same table entry rather than constructing a
    /// second one.
    pub fn export(&self, handle: HandleId, handles: &HandleTable) -> Result<u64, SysError> {
        let kind = handles.kind_of(handle)?;
        if kind != ObjectType::MemoryBuffer {
            return Err(SysError::InvalidParameters);
        }
        Ok(handles.object_id_of(handle)?.as_u64())
    }

    /// Redeems a token from [`Self::export`], returning a `HandleId` for the
    /// same buffer with its retain count bumped.
    pub fn attach(&self, token: u64, handles: &HandleTable) -> Result<HandleId, SysError> {
        let key = token as u32;
        if !self.buffers.lock().contains_key(&key) {
            return Err(SysError::NotFound);
        }
        let handle = HandleId::new(key);
        handles.retain(handle)?;
        Ok(handle)
    }

    /// Maps a buffer into `space` at `addr_hint`, recording the chosen
    /// address. A fully-committed buffer (the eager/contiguous path) is
    /// mapped onto its existing frames directly; a fully-reserved buffer
    /// gets an uncommitted reservation that [`Self::commit`] later backs
    /// page by page.
    pub fn map<M: PageTableMapper>(
        &self,
        handle: HandleId,
        addr_hint: VirtAddr,
        space: &mut AddressSpace<M>,
        handles: &HandleTable,
        pmm: &PhysicalAllocator,
    ) -> Result<VirtAddr, SysError> {
        handles.kind_of(handle)?;
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        let mut buffers = self.buffers.lock();
        let buf = buffers.get_mut(&key).ok_or(SysError::NotFound)?;

        let mut flags = MapFlags::USERSPACE;
        if buf.info.flags.contains(ShmFlags::WRITE) {
            flags |= MapFlags::WRITABLE;
        }
        if buf.info.flags.contains(ShmFlags::EXECUTE) {
            flags |= MapFlags::EXECUTABLE;
        }

        let pages = buf.pages.lock();
        let first = pages.first().copied().flatten();
        let all_committed = pages.iter().all(|p| p.is_some());
        let all_reserved = pages.iter().all(|p| p.is_none());
        drop(pages);

        let virt = if all_committed {
            let first = first.ok_or(SysError::InvalidParameters)?;
            space.map_existing(addr_hint, first, buf.total_len(), flags | MapFlags::COMMITTED, pmm)?
        } else if all_reserved {
            space.map(
                MapRequest {
                    virt_hint: addr_hint,
                    phys_hint: PhysAddr::zero(),
                    len: buf.total_len(),
                    flags,
                    placement: Placement::VIRTUAL_FIXED,
                },
                pmm,
            )?
        } else {
            // A partially-committed buffer can't be (re)mapped through
            // either path: `map_existing` needs one contiguous phys base
            // for the whole range, and a fresh reservation would orphan
            // the frames already committed. This registry always maps a
            // buffer before the first `commit`, so this only arises from
            // unmapping a partially-committed buffer and remapping it,
            // which isn't supported.
            return Err(SysError::NotSupported);
        };
        buf.mapped_at = Some(virt);
        Ok(virt)
    }

    /// Backs `[offset, offset+len)` of a mapped buffer with real frames,
    /// allocating one per still-reserved page and filling in its PTE.
    /// Already-committed pages in the range are left untouched, so calling
    /// this more than once over overlapping ranges is safe. The buffer
    /// must already be mapped (via [`Self::map`]) — there is no virtual
    /// address to fill PTEs at otherwise.
    pub fn commit<M: PageTableMapper>(
        &self,
        handle: HandleId,
        offset: u64,
        len: u64,
        space: &mut AddressSpace<M>,
        handles: &HandleTable,
        pmm: &PhysicalAllocator,
    ) -> Result<(), SysError> {
        if len == 0 || offset % PAGE_SIZE != 0 || len % PAGE_SIZE != 0 {
            return Err(SysError::InvalidParameters);
        }
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        let buffers = self.buffers.lock();
        let buf = buffers.get(&key).ok_or(SysError::NotFound)?;
        if offset + len > buf.total_len() {
            return Err(SysError::InvalidParameters);
        }
        let virt = buf.mapped_at.ok_or(SysError::InvalidParameters)?;

        let mut flags = MapFlags::USERSPACE;
        if buf.info.flags.contains(ShmFlags::WRITE) {
            flags |= MapFlags::WRITABLE;
        }
        if buf.info.flags.contains(ShmFlags::EXECUTE) {
            flags |= MapFlags::EXECUTABLE;
        }
        let mask = if buf.info.flags.contains(ShmFlags::DEVICE) {
            DmaMask::Below4GiB
        } else {
            DmaMask::Any
        };

        let mut pages = buf.pages.lock();
        let first_page = (offset / PAGE_SIZE) as usize;
        let page_count = (len / PAGE_SIZE) as usize;
        for i in first_page..first_page + page_count {
            if pages[i].is_some() {
                continue;
            }
            let run = pmm.allocate(1, mask)?;
            space.commit_page(virt, i as u64 * PAGE_SIZE, run.start(), flags, pmm)?;
            pages[i] = Some(run.start());
        }
        Ok(())
    }

    /// Unmaps a buffer's address-space mapping without releasing its frames.
    pub fn unmap<M: PageTableMapper>(
        &self,
        handle: HandleId,
        space: &mut AddressSpace<M>,
        handles: &HandleTable,
        pmm: &PhysicalAllocator,
    ) -> Result<(), SysError> {
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        let mut buffers = self.buffers.lock();
        let buf = buffers.get_mut(&key).ok_or(SysError::NotFound)?;
        if let Some(virt) = buf.mapped_at.take() {
            space.unmap(virt, pmm)?;
        }
        Ok(())
    }

    /// Drops the caller's reference to a buffer, freeing its frames once the
    /// handle table's retain count reaches zero.
    pub fn detach(&self, handle: HandleId, handles: &HandleTable) -> Result<(), SysError> {
        handles.destroy(handle)?;
        Ok(())
    }

    /// Returns a fresh, read-only view handle over `handle`'s scatter-gather
    /// table.
    ///
    /// This glue has no byte-level window onto backing frames (the same
    /// `PhysAddr`-only limitation documented in [`crate::mm::vmm`]'s
    /// copy-on-write fault path), so the returned handle is a marker: it
    /// shares the same object-id key and so resolves through the same
    /// registry entry, but callers get no independent lifetime over it.
    /// Actually walking the table byte-for-byte is the caller's/arch layer's
    /// job.
    pub fn sg_table_handle(&self, handle: HandleId, handles: &HandleTable) -> Result<HandleId, SysError> {
        let key = handles.object_id_of(handle)?.as_u64() as u32;
        if !self.buffers.lock().contains_key(&key) {
            return Err(SysError::NotFound);
        }
        handles.retain(handle)?;
        Ok(handle)
    }
}

impl Default for ShmRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::vmm::{AddressSpaceKind, NullMapper};

    fn pmm() -> &'static PhysicalAllocator {
        use crate::mm::PhysMemoryRegion;
        alloc::boxed::Box::leak(alloc::boxed::Box::new(PhysicalAllocator::new(&[PhysMemoryRegion {
            start: PhysAddr::new(0),
            size: 64 * PAGE_SIZE,
        }])))
    }

    #[test]
    fn create_registers_a_destructible_handle() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let info = ShmCreateInfo { size: 3 * PAGE_SIZE, flags: ShmFlags::READ | ShmFlags::WRITE, mask: DmaMask::Any };
        let handle = registry.create(info, &handles, pmm()).unwrap();
        assert_eq!(handles.kind_of(handle).unwrap(), ObjectType::MemoryBuffer);
    }

    #[test]
    fn export_then_attach_retains_same_buffer() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let info = ShmCreateInfo { size: PAGE_SIZE, flags: ShmFlags::READ, mask: DmaMask::Any };
        let handle = registry.create(info, &handles, pmm()).unwrap();
        let token = registry.export(handle, &handles).unwrap();
        let attached = registry.attach(token, &handles).unwrap();
        assert_eq!(attached, handle);
    }

    #[test]
    fn create_zero_size_is_invalid() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let info = ShmCreateInfo { size: 0, flags: ShmFlags::READ, mask: DmaMask::Any };
        assert_eq!(registry.create(info, &handles, pmm()), Err(SysError::InvalidParameters));
    }

    #[test]
    fn create_is_lazy_for_non_contiguous_buffers() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let free_before = pmm.free_frames();
        let info = ShmCreateInfo { size: 2 * PAGE_SIZE, flags: ShmFlags::READ | ShmFlags::WRITE, mask: DmaMask::Any };
        registry.create(info, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before);
    }

    #[test]
    fn create_is_eager_for_contiguous_device_buffers() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let free_before = pmm.free_frames();
        let info = ShmCreateInfo {
            size: 2 * PAGE_SIZE,
            flags: ShmFlags::READ | ShmFlags::WRITE | ShmFlags::DEVICE,
            mask: DmaMask::Below4GiB,
        };
        registry.create(info, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 2);
    }

    #[test]
    fn commit_backs_only_the_requested_range_and_is_idempotent() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let free_before = pmm.free_frames();
        let info = ShmCreateInfo { size: 2 * PAGE_SIZE, flags: ShmFlags::READ | ShmFlags::WRITE, mask: DmaMask::Any };
        let handle = registry.create(info, &handles, pmm).unwrap();

        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        registry.map(handle, VirtAddr::new(0x40000), &mut space, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before);

        registry.commit(handle, 0, PAGE_SIZE, &mut space, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 1);

        // Re-committing the same range allocates nothing new.
        registry.commit(handle, 0, PAGE_SIZE, &mut space, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 1);

        registry.commit(handle, 0, 2 * PAGE_SIZE, &mut space, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 2);
    }

    #[test]
    fn commit_rejects_out_of_bounds_and_unaligned_range() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let info = ShmCreateInfo { size: PAGE_SIZE, flags: ShmFlags::READ, mask: DmaMask::Any };
        let handle = registry.create(info, &handles, pmm).unwrap();
        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        registry.map(handle, VirtAddr::new(0x40000), &mut space, &handles, pmm).unwrap();

        assert_eq!(
            registry.commit(handle, 0, 2 * PAGE_SIZE, &mut space, &handles, pmm),
            Err(SysError::InvalidParameters)
        );
        assert_eq!(
            registry.commit(handle, 1, PAGE_SIZE, &mut space, &handles, pmm),
            Err(SysError::InvalidParameters)
        );
    }

    #[test]
    fn create_map_commit_unmap_detach_returns_all_frames() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let free_before = pmm.free_frames();
        let info = ShmCreateInfo { size: 2 * PAGE_SIZE, flags: ShmFlags::READ | ShmFlags::WRITE, mask: DmaMask::Any };
        let handle = registry.create(info, &handles, pmm).unwrap();

        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        registry.map(handle, VirtAddr::new(0x40000), &mut space, &handles, pmm).unwrap();
        registry.commit(handle, 0, 2 * PAGE_SIZE, &mut space, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 2);

        registry.unmap(handle, &mut space, &handles, pmm).unwrap();
        registry.detach(handle, &handles).unwrap();
        assert_eq!(pmm.free_frames(), free_before);
    }

    #[test]
    fn contiguous_device_buffer_maps_onto_its_existing_frames() {
        let handles = HandleTable::new();
        let registry = ShmRegistry::new();
        let pmm = pmm();
        let free_before = pmm.free_frames();
        let info = ShmCreateInfo {
            size: 2 * PAGE_SIZE,
            flags: ShmFlags::READ | ShmFlags::WRITE | ShmFlags::DEVICE,
            mask: DmaMask::Below4GiB,
        };
        let handle = registry.create(info, &handles, pmm).unwrap();
        assert_eq!(pmm.free_frames(), free_before - 2);

        let mut space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        registry.map(handle, VirtAddr::new(0x50000), &mut space, &handles, pmm).unwrap();
        // Mapping onto already-committed frames retains them a second time.
        assert_eq!(pmm.free_frames(), free_before - 2);

        registry.unmap(handle, &mut space, &handles, pmm).unwrap();
        registry.detach(handle, &handles).unwrap();
        assert_eq!(pmm.free_frames(), free_before);
    }
}
