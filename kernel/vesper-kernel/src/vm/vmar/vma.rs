// SPDX-License-Identifier: MPL-2.0

use core::ops::Range;

use crate::{prelude::*, vm::perms::VmFlags, vm::vmo::Vmo};

/// The polymorphic operations of a VMA. Device and file mappings attach
/// an implementation; plain anonymous areas leave it empty.
pub trait VmaOps: Send + Sync {
    /// Invoked when a VMA adopting these ops is created, including for
    /// both halves of a split.
    fn open(&self, _vma: &Vma) {}

    /// Invoked right before the VMA is destroyed.
    fn close(&self, _vma: &Vma) {}
}

/// A virtual memory area: a half-open, page-aligned range with uniform
/// attributes inside one address space.
#[derive(Clone)]
pub struct Vma {
    pub start: Vaddr,
    pub end: Vaddr,
    pub flags: VmFlags,
    /// The backing page object and the page offset of `start` within it.
    pub vmo: Option<MappedVmo>,
    /// The private copies of a non-shared file mapping, keyed like
    /// `vmo`. Anonymous areas keep their pages in `vmo` directly.
    pub private_pages: Option<Arc<Vmo>>,
    pub ops: Option<Arc<dyn VmaOps>>,
}

/// A reference into a page object held by one VMA.
#[derive(Clone)]
pub struct MappedVmo {
    pub vmo: Arc<Vmo>,
    /// The object page index that backs `vma.start`.
    pub pgoff: usize,
}

impl Vma {
    pub fn new_anon(range: Range<Vaddr>, flags: VmFlags) -> Self {
        debug_assert!(range.start < range.end);
        debug_assert_eq!(range.start % PAGE_SIZE, 0);
        debug_assert_eq!(range.end % PAGE_SIZE, 0);
        Self {
            start: range.start,
            end: range.end,
            flags: flags | VmFlags::ANON,
            vmo: None,
            private_pages: None,
            ops: None,
        }
    }

    pub fn new_backed(range: Range<Vaddr>, flags: VmFlags, vmo: Arc<Vmo>, pgoff: usize) -> Self {
        debug_assert!(range.start < range.end);
        Self {
            start: range.start,
            end: range.end,
            flags,
            vmo: Some(MappedVmo { vmo, pgoff }),
            private_pages: None,
            ops: None,
        }
    }

    /// A zero-sized stand-in used when moving areas out of containers.
    pub(super) fn placeholder() -> Self {
        Self {
            start: 0,
            end: 0,
            flags: VmFlags::empty(),
            vmo: None,
            private_pages: None,
            ops: None,
        }
    }

    pub fn range(&self) -> Range<Vaddr> {
        self.start..self.end
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn nr_pages(&self) -> usize {
        self.len() / PAGE_SIZE
    }

    pub fn contains(&self, addr: Vaddr) -> bool {
        self.start <= addr && addr < self.end
    }

    /// The backing-object page index of the page holding `addr`.
    pub fn pgoff_of(&self, addr: Vaddr) -> usize {
        debug_assert!(self.contains(addr));
        let base = self.vmo.as_ref().map_or(0, |m| m.pgoff);
        base + (addr - self.start) / PAGE_SIZE
    }

    /// Whether `other`, immediately following `self`, can coalesce with
    /// it: equal flags, equal ops, and continuous object offsets.
    pub fn can_merge_with(&self, other: &Vma) -> bool {
        if self.end != other.start || self.flags != other.flags {
            return false;
        }
        let ops_match = match (&self.ops, &other.ops) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        if !ops_match {
            return false;
        }
        if self.private_pages.is_some() || other.private_pages.is_some() {
            return false;
        }
        match (&self.vmo, &other.vmo) {
            (None, None) => true,
            (Some(a), Some(b)) => {
                Arc::ptr_eq(&a.vmo, &b.vmo) && a.pgoff + self.nr_pages() == b.pgoff
            }
            _ => false,
        }
    }

    /// Splits at `addr`, strictly inside the range; `self` becomes the
    /// head and the returned VMA is the tail with its object offset
    /// advanced.
    pub(super) fn split_at(&mut self, addr: Vaddr) -> Vma {
        debug_assert!(self.start < addr && addr < self.end);
        debug_assert_eq!(addr % PAGE_SIZE, 0);
        let mut tail = self.clone();
        tail.start = addr;
        if let Some(mapped) = &mut tail.vmo {
            mapped.pgoff += (addr - self.start) / PAGE_SIZE;
        }
        self.end = addr;
        tail
    }
}

impl Debug for Vma {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Vma")
            .field("range", &(self.start..self.end))
            .field("flags", &self.flags)
            .finish()
    }
}
