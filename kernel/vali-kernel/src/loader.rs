//! PE/COFF module loader glue (C13).
//!
//! `vali-pe` only understands the file format; this module drives a
//! [`LoadedModule`] through its lifecycle against this crate's own
//! [`AddressSpace`]/[`PhysicalAllocator`], the same split
//! `vali_pe::module`'s header comment describes. Mapping the whole image
//! as a single region (rather than per-section) follows directly from
//! [`LoadedModule::rva_to_offset`]'s own documented assumption that RVA
//! equals file offset for every image this loader accepts.
//!
//! Import resolution here works at module-dependency granularity: cycle
//! detection and "is this provider loaded" both operate on
//! [`ImportDescriptor::name`], the one piece of an unbound import the
//! public `vali-pe` surface exposes outside the crate. Binding an
//! individual symbol's address into the IAT is, like a real page-table
//! write, arch-specific and happens after [`ModuleTable::link`] returns.

extern crate alloc;

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::String;
use core::sync::atomic::{AtomicU64, Ordering};

use vali_core::addr::{PhysAddr, VirtAddr, PAGE_SIZE};
use vali_core::id::ObjectId;
use vali_core::sync::IrqSpinLock;
use vali_pe::header::{DIR_EXPORT, DIR_IMPORT, DIR_TLS};
use vali_pe::module::{ExportDirectory, ImportDescriptorIter, LoadedModule, ModuleHandle, ModuleState};
use vali_pe::tls::TlsDirectory;

use crate::error::LoaderError;
use crate::mm::pmm::PhysicalAllocator;
use crate::mm::vmm::{AddressSpace, MapFlags, MapRequest, PageTableMapper, Placement};

struct ModuleRecord<'a> {
    module: LoadedModule<'a>,
    name: String,
}

/// Every module currently loaded into the kernel, keyed by the
/// [`ModuleHandle`] handed back from [`ModuleTable::load`].
///
/// Backing image bytes (`'a`) are expected to outlive the table — the
/// boot-module cache they come from is kept for the kernel's lifetime,
/// the same assumption [`LoadedModule`] itself makes of its `data` slice.
pub struct ModuleTable<'a> {
    modules: IrqSpinLock<BTreeMap<u64, ModuleRecord<'a>>>,
    next_index: AtomicU64,
}

impl<'a> ModuleTable<'a> {
    /// Creates an empty module table.
    pub const fn new() -> Self {
        Self {
            modules: IrqSpinLock::new(BTreeMap::new()),
            next_index: AtomicU64::new(1),
        }
    }

    /// Parses `data`, maps it as a single committed region at its
    /// preferred `image_base`, and registers it in [`ModuleState::Loaded`].
    pub fn load<M: PageTableMapper>(
        &self,
        name: String,
        data: &'a [u8],
        space: &mut AddressSpace<M>,
        pmm: &PhysicalAllocator,
    ) -> Result<ModuleHandle, LoaderError> {
        let mut module = LoadedModule::parse(data).map_err(|_| LoaderError::Malformed)?;

        let len = VirtAddr::new(u64::from(module.headers().optional.size_of_image)).align_up(PAGE_SIZE).as_u64();
        let virt = VirtAddr::new(module.headers().optional.image_base);
        space
            .map(
                MapRequest {
                    virt_hint: virt,
                    phys_hint: PhysAddr::zero(),
                    len,
                    flags: MapFlags::COMMITTED | MapFlags::EXECUTABLE | MapFlags::WRITABLE | MapFlags::USERSPACE,
                    placement: Placement::VIRTUAL_FIXED,
                },
                pmm,
            )
            .map_err(|_| LoaderError::OutOfMemory)?;

        module.advance(ModuleState::Loaded).map_err(|_| LoaderError::InvalidState)?;

        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        self.modules.lock().insert(index, ModuleRecord { module, name });
        Ok(ModuleHandle::new(ObjectId::from_parts(index, 0)))
    }

    /// Resolves `handle`'s import directory against already-loaded
    /// modules, named by [`ImportDescriptor::name`], and advances it to
    /// [`ModuleState::Linked`]. Detects import cycles with a visited set;
    /// a provider not found in the table, or not yet past `Loaded`, fails
    /// with [`LoaderError::UnresolvedImport`].
    pub fn link(&self, handle: ModuleHandle) -> Result<(), LoaderError> {
        let mut visited = BTreeSet::new();
        self.link_inner(handle.object_id().index(), &mut visited)
    }

    fn link_inner(&self, index: u64, visited: &mut BTreeSet<u64>) -> Result<(), LoaderError> {
        if !visited.insert(index) {
            return Err(LoaderError::UnresolvedImport);
        }

        let (import_dir, data) = {
            let modules = self.modules.lock();
            let record = modules.get(&index).ok_or(LoaderError::InvalidState)?;
            let dir = record.module.headers().optional.directory(DIR_IMPORT);
            (dir, record.module.data())
        };

        if !import_dir.is_empty() {
            for desc in ImportDescriptorIter::new(data, import_dir.virtual_address) {
                let provider_name = desc.name(data).ok_or(LoaderError::UnresolvedImport)?;
                let provider_index = self.find_by_name(provider_name).ok_or(LoaderError::UnresolvedImport)?;
                self.link_inner(provider_index, visited)?;
            }
        }

        let mut modules = self.modules.lock();
        let record = modules.get_mut(&index).ok_or(LoaderError::InvalidState)?;
        record.module.advance(ModuleState::Linked).map_err(|_| LoaderError::InvalidState)
    }

    fn find_by_name(&self, name: &str) -> Option<u64> {
        self.modules.lock().iter().find(|(_, r)| r.name == name).map(|(&idx, _)| idx)
    }

    /// Looks up `name` in `provider`'s export directory.
    pub fn resolve_export(&self, provider: ModuleHandle, name: &str) -> Result<u32, LoaderError> {
        let modules = self.modules.lock();
        let record = modules.get(&provider.object_id().index()).ok_or(LoaderError::InvalidState)?;
        let dir = record.module.headers().optional.directory(DIR_EXPORT);
        if dir.is_empty() {
            return Err(LoaderError::UnresolvedImport);
        }
        let export = ExportDirectory::parse(record.module.data(), dir.virtual_address).map_err(|_| LoaderError::Malformed)?;
        export.resolve(name).ok_or(LoaderError::UnresolvedImport)
    }

    /// Runs module constructors (a no-op here; constructor invocation
    /// enters user/kernel code outside this crate the way a context
    /// switch does) and advances to [`ModuleState::Initialized`].
    pub fn initialize(&self, handle: ModuleHandle) -> Result<(), LoaderError> {
        let mut modules = self.modules.lock();
        let record = modules.get_mut(&handle.object_id().index()).ok_or(LoaderError::InvalidState)?;
        record.module.advance(ModuleState::Initialized).map_err(|_| LoaderError::InvalidState)
    }

    /// Parses `handle`'s TLS directory, if it carries one. The caller
    /// (thread creation) copies [`TlsDirectory::raw_data_len`] bytes plus
    /// [`TlsDirectory::total_len`] of zero fill into a fresh thread's TLS
    /// block, a raw-memory operation that belongs with the rest of this
    /// crate's arch boundary.
    pub fn tls_template(&self, handle: ModuleHandle) -> Result<Option<TlsDirectory>, LoaderError> {
        let modules = self.modules.lock();
        let record = modules.get(&handle.object_id().index()).ok_or(LoaderError::InvalidState)?;
        let dir = record.module.headers().optional.directory(DIR_TLS);
        if dir.is_empty() {
            return Ok(None);
        }
        TlsDirectory::parse(record.module.data(), dir.virtual_address as usize)
            .map(Some)
            .map_err(|_| LoaderError::Malformed)
    }

    /// Tears down `handle`'s mapping and removes it from the table.
    pub fn unload<M: PageTableMapper>(
        &self,
        handle: ModuleHandle,
        space: &mut AddressSpace<M>,
        pmm: &PhysicalAllocator,
    ) -> Result<(), LoaderError> {
        let index = handle.object_id().index();
        let virt = {
            let mut modules = self.modules.lock();
            let record = modules.get_mut(&index).ok_or(LoaderError::InvalidState)?;
            record.module.advance(ModuleState::Unloading).map_err(|_| LoaderError::InvalidState)?;
            VirtAddr::new(record.module.headers().optional.image_base)
        };
        space.unmap(virt, pmm).map_err(|_| LoaderError::InvalidState)?;
        self.modules.lock().remove(&index);
        Ok(())
    }

    /// Number of modules currently tracked, for diagnostics/tests.
    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    /// Returns `true` if no module is currently tracked.
    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }
}

impl Default for ModuleTable<'_> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::vmm::{AddressSpaceKind, NullMapper};
    use crate::mm::pmm::PhysMemoryRegion;

    fn minimal_pe_image() -> alloc::vec::Vec<u8> {
        // Hand-built minimal DOS+COFF+PE32+ header with a zero-size image
        // and no import/export/TLS directories, just enough for
        // `PeHeaders::parse` to succeed.
        let mut data = alloc::vec![0u8; 256];
        data[0] = b'M';
        data[1] = b'Z';
        let nt_offset: u32 = 0x80;
        data[0x3C..0x40].copy_from_slice(&nt_offset.to_le_bytes());
        data[0x80..0x84].copy_from_slice(&0x0000_4550u32.to_le_bytes());
        // COFF header at nt_offset + 4
        let coff = 0x84;
        data[coff..coff + 2].copy_from_slice(&0x8664u16.to_le_bytes()); // machine
        data[coff + 2..coff + 4].copy_from_slice(&0u16.to_le_bytes()); // sections
        data[coff + 16..coff + 18].copy_from_slice(&112u16.to_le_bytes()); // optional header size
        // Optional header at coff + 20
        let opt = coff + 20;
        data[opt..opt + 2].copy_from_slice(&0x020Bu16.to_le_bytes()); // PE32+ magic
        data[opt + 16..opt + 20].copy_from_slice(&0u32.to_le_bytes()); // entry point
        data[opt + 24..opt + 32].copy_from_slice(&0x1000_0000u64.to_le_bytes()); // image base
        data[opt + 32..opt + 36].copy_from_slice(&PAGE_SIZE_U32.to_le_bytes());
        data[opt + 36..opt + 40].copy_from_slice(&PAGE_SIZE_U32.to_le_bytes());
        data[opt + 56..opt + 60].copy_from_slice(&PAGE_SIZE_U32.to_le_bytes()); // size_of_image
        data[opt + 60..opt + 64].copy_from_slice(&0u32.to_le_bytes());
        data[opt + 108..opt + 112].copy_from_slice(&16u32.to_le_bytes()); // dir count
        data
    }

    const PAGE_SIZE_U32: u32 = PAGE_SIZE as u32;

    fn fresh_space() -> (AddressSpace<NullMapper>, PhysicalAllocator) {
        let space = AddressSpace::create(AddressSpaceKind::Application, NullMapper);
        let pmm = PhysicalAllocator::new(&[PhysMemoryRegion { start: PhysAddr::new(0), size: PAGE_SIZE * 16 }]);
        (space, pmm)
    }

    #[test]
    fn load_then_link_then_initialize_advances_states() {
        let table = ModuleTable::new();
        let image = minimal_pe_image();
        let (mut space, pmm) = fresh_space();
        let handle = table.load(String::from("a.dll"), &image, &mut space, &pmm).unwrap();
        table.link(handle).unwrap();
        table.initialize(handle).unwrap();
        assert_eq!(table.tls_template(handle), Ok(None));
    }

    #[test]
    fn unload_removes_the_module() {
        let table = ModuleTable::new();
        let image = minimal_pe_image();
        let (mut space, pmm) = fresh_space();
        let handle = table.load(String::from("b.dll"), &image, &mut space, &pmm).unwrap();
        table.unload(handle, &mut space, &pmm).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_image_is_rejected() {
        let table = ModuleTable::new();
        let bad = alloc::vec![0u8; 4];
        let (mut space, pmm) = fresh_space();
        assert_eq!(table.load(String::from("x"), &bad, &mut space, &pmm), Err(LoaderError::Malformed));
    }
}
