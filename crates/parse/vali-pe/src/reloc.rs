//! PE base relocation blocks (`.reloc`), applied when an image cannot load
//! at its preferred `image_base`.
//!
//! Mirrors the zero-copy iterator shape of `vali-pe`'s ELF sibling crate's
//! `RelaIter`: relocations are read directly out of the file bytes, one
//! "block" (a page's worth of fixups) at a time.

use crate::header::PeError;
use crate::{le_u16, le_u32};

/// The handful of PE relocation types this loader understands. Anything
/// else is rejected with [`PeError::RelocationFailed`] rather than
/// silently skipped, since a skipped fixup is a correctness bug waiting
/// to happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocType {
    /// Padding entry; no fixup applied.
    Absolute,
    /// 64-bit fixup: add the relocation delta to the 8 bytes at the RVA.
    Dir64,
}

impl RelocType {
    fn from_raw(raw: u16) -> Option<Self> {
        match raw {
            0 => Some(Self::Absolute),
            10 => Some(Self::Dir64),
            _ => None,
        }
    }
}

/// A single fixup: apply `type_` at `page_rva + offset_in_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BaseReloc {
    /// RVA of the 8 (or 0, for `Absolute`) bytes to fix up.
    pub rva: u32,
    /// The relocation's type.
    pub type_: RelocType,
}

/// Iterates every fixup across every block in the `.reloc` directory.
pub struct BaseRelocIter<'a> {
    data: &'a [u8],
    dir_start: usize,
    dir_end: usize,
    block_offset: usize,
    block_page_rva: u32,
    entry_offset: usize,
    block_end: usize,
    failed: bool,
}

impl<'a> BaseRelocIter<'a> {
    /// Builds an iterator over the base relocation directory at
    /// `[dir_start, dir_start + dir_size)` within `data`.
    pub fn new(data: &'a [u8], dir_start: usize, dir_size: usize) -> Self {
        Self {
            data,
            dir_start,
            dir_end: dir_start + dir_size,
            block_offset: dir_start,
            block_page_rva: 0,
            entry_offset: 0,
            block_end: 0,
            failed: false,
        }
    }

    fn advance_block(&mut self) -> Option<Result<(), PeError>> {
        if self.block_offset >= self.dir_end {
            return None;
        }
        if self.block_offset + 8 > self.data.len() {
            return Some(Err(PeError::RelocationFailed));
        }
        let page_rva = le_u32(self.data, self.block_offset);
        let block_size = le_u32(self.data, self.block_offset + 4) as usize;
        if block_size < 8 || self.block_offset + block_size > self.data.len() {
            return Some(Err(PeError::RelocationFailed));
        }
        self.block_page_rva = page_rva;
        self.entry_offset = self.block_offset + 8;
        self.block_end = self.block_offset + block_size;
        self.block_offset = self.block_end;
        Some(Ok(()))
    }
}

impl Iterator for BaseRelocIter<'_> {
    type Item = Result<BaseReloc, PeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.entry_offset >= self.block_end {
                match self.advance_block() {
                    None => return None,
                    Some(Err(e)) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                    Some(Ok(())) => continue,
                }
            }
            let raw = le_u16(self.data, self.entry_offset);
            self.entry_offset += 2;
            let type_raw = raw >> 12;
            let offset_in_page = u32::from(raw & 0x0FFF);
            let Some(type_) = RelocType::from_raw(type_raw) else {
                self.failed = true;
                return Some(Err(PeError::RelocationFailed));
            };
            if type_ == RelocType::Absolute {
                continue;
            }
            return Some(Ok(BaseReloc {
                rva: self.block_page_rva + offset_in_page,
                type_,
            }));
        }
    }
}

/// Computes the fixed-up 64-bit value for a `Dir64` relocation.
///
/// `original` is the 8 bytes currently stored at the relocation's RVA;
/// `delta` is `actual_base - preferred_base` (wrapping, may be negative
/// as a two's-complement `u64`).
pub const fn apply_dir64(original: u64, delta: u64) -> u64 {
    original.wrapping_add(delta)
}
