// SPDX-License-Identifier: MPL-2.0

//! Page-table management: the 4/5-level walker, huge-page mapping and
//! splitting, and per-leaf-table locking.
//!
//! A [`PageTable`] is a handle to a top-level table. Intermediate tables
//! are allocated on demand, zeroed, and linked `present|writable|user` so
//! that the leaf entry alone governs access. Mutating a leaf takes the
//! split page-table lock of the table that holds it, which lives in the
//! backing frame's descriptor; the global page-table lock of the owning
//! address space only serializes structural growth.

mod entry;

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use log::warn;
use spin::Once;

pub use self::entry::{PtEntry, PtFlags};
use super::frame::{allocator, meta, paddr_to_pfn};
use crate::{
    arch,
    config::{PAGE_SHIFT, PAGE_SIZE},
    mm::{paddr_to_vaddr, Paddr, Vaddr},
    prelude::*,
};

/// The number of entries in one page-table node.
pub const NR_ENTRIES: usize = 512;

/// Entries `[NR_KERNEL_BASE..NR_ENTRIES)` of a root table cover the
/// kernel half of the address space and are shared across all roots.
const NR_KERNEL_BASE: usize = NR_ENTRIES / 2;

static NR_LEVELS: AtomicUsize = AtomicUsize::new(4);

/// The number of paging levels, 4 or 5 depending on the CR4 state the
/// boot path discovered.
pub fn nr_levels() -> usize {
    NR_LEVELS.load(Relaxed)
}

/// Called by the boot path when the CPU runs with 5-level paging.
pub fn enable_five_level_paging() {
    NR_LEVELS.store(5, Relaxed);
}

/// The granularity a leaf entry can map.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PageSize {
    Size4K,
    Size2M,
    Size1G,
}

impl PageSize {
    /// The paging level whose entries map this size.
    pub const fn level(self) -> usize {
        match self {
            PageSize::Size4K => 1,
            PageSize::Size2M => 2,
            PageSize::Size1G => 3,
        }
    }

    pub const fn bytes(self) -> usize {
        page_size_at(self.level())
    }
}

/// The bytes one entry at `level` maps.
pub const fn page_size_at(level: usize) -> usize {
    1 << (PAGE_SHIFT + 9 * (level - 1))
}

/// The index of a virtual address's entry at `level`.
pub const fn pte_index(va: Vaddr, level: usize) -> usize {
    (va >> (PAGE_SHIFT + 9 * (level - 1))) & (NR_ENTRIES - 1)
}

fn entry_ptr(table: Paddr, index: usize) -> *mut u64 {
    debug_assert!(index < NR_ENTRIES);
    (paddr_to_vaddr(table) as *mut u64).wrapping_add(index)
}

fn read_entry(table: Paddr, index: usize) -> PtEntry {
    // SAFETY: `table` addresses a live page-table node in the linear map.
    PtEntry::from_bits(unsafe { entry_ptr(table, index).read_volatile() })
}

fn write_entry(table: Paddr, index: usize, entry: PtEntry) {
    // SAFETY: `table` addresses a live page-table node in the linear map.
    unsafe { entry_ptr(table, index).write_volatile(entry.bits()) }
}

static KERNEL_ROOT: Once<Paddr> = Once::new();

pub(crate) fn init() {
    KERNEL_ROOT.call_once(|| {
        allocator::alloc_pages(0).expect("cannot allocate the kernel page-table root")
    });
}

/// The canonical kernel root. The kernel halves of all user roots mirror
/// its upper entries.
pub fn kernel_root_paddr() -> Paddr {
    *KERNEL_ROOT.get().expect("page tables are not initialized")
}

/// A handle to one top-level page table and everything below it.
#[derive(Debug)]
pub struct PageTable {
    root: Paddr,
}

impl PageTable {
    /// Creates an empty user page table whose kernel half mirrors the
    /// canonical kernel root.
    pub fn new_user() -> Result<Self> {
        let root = allocator::alloc_pages(0).ok_or(crate::Error::NoMemory)?;
        let kernel_root = kernel_root_paddr();
        for i in NR_KERNEL_BASE..NR_ENTRIES {
            write_entry(root, i, read_entry(kernel_root, i));
        }
        Ok(Self { root })
    }

    /// Wraps the canonical kernel root. The returned handle must never be
    /// dropped; use it for boot-time kernel mappings only.
    pub fn kernel() -> core::mem::ManuallyDrop<Self> {
        core::mem::ManuallyDrop::new(Self {
            root: kernel_root_paddr(),
        })
    }

    /// The physical address of the top-level table, as loaded into the
    /// page-table-root register.
    pub fn root_paddr(&self) -> Paddr {
        self.root
    }

    /// Maps one base page. Replaces any previous 4 KiB mapping at `vaddr`;
    /// splits a covering huge mapping first.
    pub fn map(&self, vaddr: Vaddr, paddr: Paddr, flags: PtFlags) -> Result<()> {
        debug_assert_eq!(vaddr % PAGE_SIZE, 0);
        debug_assert_eq!(paddr % PAGE_SIZE, 0);
        let table = self.walk_to_level(vaddr, 1, true)?.unwrap();
        let index = pte_index(vaddr, 1);
        let _ptl = meta::slot(paddr_to_pfn(table)).lock_pt();
        let old = read_entry(table, index);
        if !old.is_present() {
            meta::slot(paddr_to_pfn(table)).inc_pt_children();
        }
        write_entry(table, index, PtEntry::new_leaf(paddr, flags, PageSize::Size4K));
        Ok(())
    }

    /// Maps one leaf of the given size. `vaddr` and `paddr` must be
    /// aligned to that size.
    pub fn map_huge(
        &self,
        vaddr: Vaddr,
        paddr: Paddr,
        flags: PtFlags,
        size: PageSize,
    ) -> Result<()> {
        let level = size.level();
        debug_assert_eq!(vaddr % page_size_at(level), 0);
        debug_assert_eq!(paddr % page_size_at(level), 0);
        let table = self.walk_to_level(vaddr, level, true)?.unwrap();
        let index = pte_index(vaddr, level);
        let _ptl = meta::slot(paddr_to_pfn(table)).lock_pt();
        let old = read_entry(table, index);
        if old.is_present() && !old.is_leaf_at(level) {
            // A child table already covers the range at a finer grain;
            // installing the huge leaf would leak it.
            warn!(
                "refusing to overwrite a page-table node with a huge leaf at {:#x}",
                vaddr
            );
            return Err(crate::Error::InvalidArgs);
        }
        if !old.is_present() {
            meta::slot(paddr_to_pfn(table)).inc_pt_children();
        }
        write_entry(table, index, PtEntry::new_leaf(paddr, flags, size));
        Ok(())
    }

    /// Unmaps the base page at `vaddr`, returning the physical address it
    /// mapped. A covering huge mapping is split first. Unmapping an
    /// unmapped address is a silent no-op.
    pub fn unmap(&self, vaddr: Vaddr) -> Option<Paddr> {
        let table = self.walk_to_level(vaddr, 1, false).ok()??;
        let index = pte_index(vaddr, 1);
        let _ptl = meta::slot(paddr_to_pfn(table)).lock_pt();
        let entry = read_entry(table, index);
        if !entry.is_present() {
            return None;
        }
        write_entry(table, index, PtEntry::absent());
        meta::slot(paddr_to_pfn(table)).dec_pt_children();
        arch::mm::tlb_flush_addr(vaddr);
        Some(entry.paddr())
    }

    /// Translates a virtual address, returning the mapped physical
    /// address, the leaf flags, and the leaf size.
    pub fn query(&self, vaddr: Vaddr) -> Option<(Paddr, PtFlags, PageSize)> {
        let mut table = self.root;
        let mut level = nr_levels();
        loop {
            let entry = read_entry(table, pte_index(vaddr, level));
            if !entry.is_present() {
                return None;
            }
            if entry.is_leaf_at(level) {
                let size = match level {
                    1 => PageSize::Size4K,
                    2 => PageSize::Size2M,
                    3 => PageSize::Size1G,
                    _ => return None,
                };
                let offset = vaddr & (page_size_at(level) - 1);
                return Some((entry.paddr() + offset, entry.flags_at(level), size));
            }
            table = entry.paddr();
            level -= 1;
        }
    }

    /// Translates a virtual address to the physical address it maps, or
    /// `None` when unmapped.
    pub fn virt_to_phys(&self, vaddr: Vaddr) -> Option<Paddr> {
        self.query(vaddr).map(|(paddr, _, _)| paddr)
    }

    /// Edits the flags of the base-page leaf at `vaddr`. A covering huge
    /// mapping is split first. Returns whether a present leaf was edited.
    pub fn protect(&self, vaddr: Vaddr, op: impl FnOnce(PtFlags) -> PtFlags) -> bool {
        let Ok(Some(table)) = self.walk_to_level(vaddr, 1, false) else {
            return false;
        };
        let index = pte_index(vaddr, 1);
        let _ptl = meta::slot(paddr_to_pfn(table)).lock_pt();
        let entry = read_entry(table, index);
        if !entry.is_present() {
            return false;
        }
        let new_flags = op(entry.flags_at(1));
        write_entry(
            table,
            index,
            PtEntry::new_leaf(entry.paddr(), new_flags, PageSize::Size4K),
        );
        arch::mm::tlb_flush_addr(vaddr);
        true
    }

    pub fn is_dirty(&self, vaddr: Vaddr) -> bool {
        self.query(vaddr)
            .is_some_and(|(_, flags, _)| flags.contains(PtFlags::DIRTY))
    }

    pub fn clear_dirty(&self, vaddr: Vaddr) {
        self.protect(vaddr, |flags| flags - PtFlags::DIRTY);
    }

    pub fn is_accessed(&self, vaddr: Vaddr) -> bool {
        self.query(vaddr)
            .is_some_and(|(_, flags, _)| flags.contains(PtFlags::ACCESSED))
    }

    pub fn clear_accessed(&self, vaddr: Vaddr) {
        self.protect(vaddr, |flags| flags - PtFlags::ACCESSED);
    }

    /// Descends to the table whose entries are at `target_level`,
    /// allocating missing intermediate tables when `alloc` is set and
    /// splitting any huge leaf standing in the way.
    ///
    /// Returns `Ok(None)` when the path is absent and `alloc` is unset.
    fn walk_to_level(
        &self,
        vaddr: Vaddr,
        target_level: usize,
        alloc: bool,
    ) -> Result<Option<Paddr>> {
        let mut table = self.root;
        let mut level = nr_levels();
        while level > target_level {
            let index = pte_index(vaddr, level);
            let entry = {
                let _ptl = meta::slot(paddr_to_pfn(table)).lock_pt();
                let entry = read_entry(table, index);
                if !entry.is_present() {
                    if !alloc {
                        return Ok(None);
                    }
                    let child = allocator::alloc_pages(0).ok_or(crate::Error::NoMemory)?;
                    // Intermediate entries carry the superset of
                    // permissions; the leaf governs access.
                    let entry = PtEntry::new_table(child);
                    write_entry(table, index, entry);
                    meta::slot(paddr_to_pfn(table)).inc_pt_children();
                    entry
                } else if entry.is_leaf_at(level) {
                    self.split_huge_leaf(table, index, level)?
                } else {
                    entry
                }
            };
            table = entry.paddr();
            level -= 1;
        }
        Ok(Some(table))
    }

    /// Splits the huge leaf at `(table, index)` on `level` into a child
    /// table of 512 entries covering the same physical range, one level
    /// below. Called with the parent's split PTL held.
    fn split_huge_leaf(&self, table: Paddr, index: usize, level: usize) -> Result<PtEntry> {
        let old = read_entry(table, index);
        debug_assert!(old.is_leaf_at(level) && level > 1);

        let child = allocator::alloc_pages(0).ok_or(crate::Error::NoMemory)?;
        let child_size = match level {
            2 => PageSize::Size4K,
            3 => PageSize::Size2M,
            _ => return Err(crate::Error::InvalidArgs),
        };
        let flags = old.flags_at(level);
        let step = page_size_at(level - 1);
        for i in 0..NR_ENTRIES {
            write_entry(
                child,
                i,
                PtEntry::new_leaf(old.paddr() + i * step, flags, child_size),
            );
        }
        meta::slot(paddr_to_pfn(child)).set_pt_children(NR_ENTRIES as u16);

        let entry = PtEntry::new_table(child);
        write_entry(table, index, entry);
        arch::mm::tlb_flush_all();
        Ok(entry)
    }

    /// Recursively frees the page-table nodes of the user half. Mapped
    /// frames themselves belong to the page objects and are not touched.
    fn free_user_tables(table: Paddr, level: usize, is_root: bool) {
        let end = if is_root { NR_KERNEL_BASE } else { NR_ENTRIES };
        for i in 0..end {
            let entry = read_entry(table, i);
            if entry.is_present() && !entry.is_leaf_at(level) && level > 1 {
                Self::free_user_tables(entry.paddr(), level - 1, false);
                allocator::free_pages(entry.paddr(), 0);
            }
        }
    }
}

impl Drop for PageTable {
    fn drop(&mut self) {
        Self::free_user_tables(self.root, nr_levels(), true);
        allocator::free_pages(self.root, 0);
    }
}

#[cfg(test)]
mod test;
