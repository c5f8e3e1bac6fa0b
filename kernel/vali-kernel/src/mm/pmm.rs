//! Physical frame allocator (C1).
//!
//! One word-level bitmap per region, scanned with `trailing_zeros()` the
//! same way the teacher's `BitmapAllocator` does (`crate::mm::pmm` in
//! `hadron-kernel`) — `!word.trailing_zeros()` lands directly on TZCNT/BSF.
//! What's new relative to the teacher is the region-bucketing by
//! [`DmaMask`]: a region is only searched for an allocation if its entire
//! extent satisfies the requested mask, so a contiguous multi-frame run
//! never needs a secondary "does this span cross a mask boundary" check.
//! Per-frame reference counts (needed for copy-on-write sharing, C2) are
//! tracked alongside each region's bitmap rather than in a separate table,
//! since both are already sharded and locked per-region.

extern crate alloc;

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use vali_core::addr::{DmaMask, PhysAddr, PAGE_SIZE};
use vali_core::sync::IrqSpinLock;

use crate::error::PmmError;

const BITS_PER_WORD: usize = 64;

/// A contiguous physical memory region handed to [`PhysicalAllocator::new`].
#[derive(Debug, Clone, Copy)]
pub struct PhysMemoryRegion {
    /// First address in the region.
    pub start: PhysAddr,
    /// Region length in bytes; must be a multiple of [`PAGE_SIZE`].
    pub size: u64,
}

/// A run of contiguous, newly allocated physical frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhysFrameRun {
    start: PhysAddr,
    count: usize,
}

impl PhysFrameRun {
    /// The first frame's physical address.
    pub const fn start(self) -> PhysAddr {
        self.start
    }

    /// Number of frames in the run.
    pub const fn count(self) -> usize {
        self.count
    }
}

struct RegionState {
    base: PhysAddr,
    frame_count: usize,
    bitmap: Vec<u64>,
    refcounts: Vec<AtomicU32>,
    free_count: usize,
    search_hint: usize,
}

impl RegionState {
    fn new(base: PhysAddr, frame_count: usize) -> Self {
        let words = frame_count.div_ceil(BITS_PER_WORD);
        let mut refcounts = Vec::with_capacity(frame_count);
        refcounts.resize_with(frame_count, || AtomicU32::new(0));
        Self {
            base,
            frame_count,
            bitmap: alloc::vec![0u64; words],
            refcounts,
            free_count: frame_count,
            search_hint: 0,
        }
    }

    fn highest_addr(&self) -> PhysAddr {
        self.base + (self.frame_count as u64 - 1) * PAGE_SIZE
    }

    fn is_allocated(&self, idx: usize) -> bool {
        self.bitmap[idx / BITS_PER_WORD] & (1u64 << (idx % BITS_PER_WORD)) != 0
    }

    fn set_allocated(&mut self, idx: usize, allocated: bool) {
        let bit = 1u64 << (idx % BITS_PER_WORD);
        if allocated {
            self.bitmap[idx / BITS_PER_WORD] |= bit;
        } else {
            self.bitmap[idx / BITS_PER_WORD] &= !bit;
        }
    }

    /// Finds and marks `count` contiguous free frames, returning the start index.
    fn find_and_mark(&mut self, count: usize) -> Option<usize> {
        if self.free_count < count {
            return None;
        }
        let mut run_start = 0usize;
        let mut run_len = 0usize;
        for idx in 0..self.frame_count {
            if self.is_allocated(idx) {
                run_len = 0;
                continue;
            }
            if run_len == 0 {
                run_start = idx;
            }
            run_len += 1;
            if run_len == count {
                for i in run_start..run_start + count {
                    self.set_allocated(i, true);
                    self.refcounts[i].store(1, Ordering::Relaxed);
                }
                self.free_count -= count;
                self.search_hint = (run_start + count) / BITS_PER_WORD;
                return Some(run_start);
            }
        }
        None
    }

    fn free_run(&mut self, start_idx: usize, count: usize) {
        for idx in start_idx..start_idx + count {
            debug_assert!(self.is_allocated(idx), "double free of frame index {idx}");
            self.set_allocated(idx, false);
            self.refcounts[idx].store(0, Ordering::Relaxed);
        }
        self.free_count += count;
        let hint_word = start_idx / BITS_PER_WORD;
        if hint_word < self.search_hint {
            self.search_hint = hint_word;
        }
    }
}

/// The physical frame allocator: one region, one lock, one bitmap + refcount
/// array each, searched in registration order filtered by [`DmaMask`].
pub struct PhysicalAllocator {
    regions: Vec<IrqSpinLock<RegionState>>,
}

impl PhysicalAllocator {
    /// Builds an allocator over `regions`. All frames start free.
    pub fn new(regions: &[PhysMemoryRegion]) -> Self {
        let states = regions
            .iter()
            .map(|r| {
                let frame_count = (r.size / PAGE_SIZE) as usize;
                IrqSpinLock::new(RegionState::new(r.start, frame_count))
            })
            .collect();
        Self { regions: states }
    }

    /// Allocates `count` contiguous frames satisfying `mask`.
    pub fn allocate(&self, count: usize, mask: DmaMask) -> Result<PhysFrameRun, PmmError> {
        if count == 0 {
            return Err(PmmError::InvalidParameters);
        }
        for region in &self.regions {
            let mut state = region.lock();
            if !mask.admits(state.highest_addr()) {
                continue;
            }
            if let Some(start_idx) = state.find_and_mark(count) {
                let start = state.base + (start_idx as u64) * PAGE_SIZE;
                return Ok(PhysFrameRun { start, count });
            }
        }
        Err(PmmError::OutOfMemory)
    }

    fn locate(&self, addr: PhysAddr) -> Option<(&IrqSpinLock<RegionState>, usize)> {
        for region in &self.regions {
            let state = region.lock();
            let idx_from_base = addr.as_u64().checked_sub(state.base.as_u64())?;
            let idx = (idx_from_base / PAGE_SIZE) as usize;
            if idx < state.frame_count && idx_from_base % PAGE_SIZE == 0 {
                drop(state);
                return Some((region, idx));
            }
        }
        None
    }

    /// Frees a run previously returned by [`Self::allocate`].
    pub fn free(&self, run: PhysFrameRun) {
        let Some((region, start_idx)) = self.locate(run.start) else {
            debug_assert!(false, "free of frame run outside any region");
            return;
        };
        region.lock().free_run(start_idx, run.count);
    }

    /// Returns `true` if `addr` falls within a tracked region's frame range.
    pub fn contains(&self, addr: PhysAddr) -> bool {
        self.locate(addr).is_some()
    }

    /// Total free frames across every region.
    pub fn free_frames(&self) -> usize {
        self.regions.iter().map(|r| r.lock().free_count).sum()
    }

    /// Total tracked frames across every region.
    pub fn total_frames(&self) -> usize {
        self.regions.iter().map(|r| r.lock().frame_count).sum()
    }

    /// Current reference count of the frame containing `addr` (0 if free).
    pub fn ref_count(&self, addr: PhysAddr) -> u32 {
        match self.locate(addr) {
            Some((region, idx)) => region.lock().refcounts[idx].load(Ordering::Relaxed),
            None => 0,
        }
    }

    /// Increments the reference count of the frame containing `addr`, e.g.
    /// when a copy-on-write fork shares it between two address spaces.
    pub fn retain(&self, addr: PhysAddr) {
        if let Some((region, idx)) = self.locate(addr) {
            region.lock().refcounts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Decrements the reference count of the frame containing `addr`. Once
    /// it reaches zero the frame is returned to the free pool and `true`
    /// is returned; otherwise `false` (still shared by another mapping).
    pub fn release(&self, addr: PhysAddr) -> bool {
        let Some((region, idx)) = self.locate(addr) else {
            return false;
        };
        let mut state = region.lock();
        let prev = state.refcounts[idx].load(Ordering::Relaxed);
        debug_assert!(prev > 0, "release of frame with zero refcount");
        if prev <= 1 {
            state.refcounts[idx].store(0, Ordering::Relaxed);
            state.free_run(idx, 1);
            true
        } else {
            state.refcounts[idx].fetch_sub(1, Ordering::Relaxed);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regions() -> Vec<PhysMemoryRegion> {
        alloc::vec![
            PhysMemoryRegion { start: PhysAddr::new(0), size: 4 * PAGE_SIZE },
            PhysMemoryRegion { start: PhysAddr::new(1 << 32), size: 4 * PAGE_SIZE },
        ]
    }

    #[test]
    fn allocate_zero_is_invalid() {
        let pmm = PhysicalAllocator::new(&regions());
        assert_eq!(pmm.allocate(0, DmaMask::Any), Err(PmmError::InvalidParameters));
    }

    #[test]
    fn allocate_and_free_round_trips_free_count() {
        let pmm = PhysicalAllocator::new(&regions());
        let total = pmm.free_frames();
        let run = pmm.allocate(2, DmaMask::Any).unwrap();
        assert_eq!(pmm.free_frames(), total - 2);
        pmm.free(run);
        assert_eq!(pmm.free_frames(), total);
    }

    #[test]
    fn mask_confines_allocation_to_admitting_region() {
        let pmm = PhysicalAllocator::new(&regions());
        // Below4GiB excludes the second region (based at 4 GiB exactly).
        let run = pmm.allocate(4, DmaMask::Below4GiB).unwrap();
        assert!(run.start().as_u64() < 1 << 32);
        // The low region is now exhausted for a 4-GiB-constrained request.
        assert_eq!(pmm.allocate(1, DmaMask::Below4GiB), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn out_of_memory_when_no_run_fits() {
        let pmm = PhysicalAllocator::new(&regions());
        assert_eq!(pmm.allocate(100, DmaMask::Any), Err(PmmError::OutOfMemory));
    }

    #[test]
    fn retain_release_tracks_shared_frame() {
        let pmm = PhysicalAllocator::new(&regions());
        let run = pmm.allocate(1, DmaMask::Any).unwrap();
        assert_eq!(pmm.ref_count(run.start()), 1);
        pmm.retain(run.start());
        assert_eq!(pmm.ref_count(run.start()), 2);
        assert!(!pmm.release(run.start()));
        assert_eq!(pmm.ref_count(run.start()), 1);
        assert!(pmm.release(run.start()));
        assert_eq!(pmm.ref_count(run.start()), 0);
    }

    #[test]
    fn contains_checks_region_membership() {
        let pmm = PhysicalAllocator::new(&regions());
        assert!(pmm.contains(PhysAddr::new(0)));
        assert!(!pmm.contains(PhysAddr::new(1 << 33)));
    }
}
