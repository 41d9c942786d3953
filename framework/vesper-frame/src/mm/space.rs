// SPDX-License-Identifier: MPL-2.0

//! VM address spaces: a page-table root plus the set of CPUs it is
//! active on, which bounds TLB shootdowns.

use crate::{
    cpu::AtomicCpuSet,
    mm::{
        page_table::{PageSize, PageTable, PtFlags},
        tlb::{self, FlushOp},
        Paddr, Vaddr,
    },
    prelude::*,
    sync::SpinLock,
};

/// A VM address space.
///
/// The page-table structure is guarded by a spin lock serializing
/// mutation; individual leaf edits additionally take the split PTL of the
/// table page they touch. The structural lock of the region layer above
/// (`mmap`-level state) is not this lock.
pub struct VmSpace {
    pt: PageTable,
    /// Serializes page-table mutation within this space.
    pt_lock: SpinLock<()>,
    /// The CPUs currently running with this space active.
    cpus: AtomicCpuSet,
}

impl VmSpace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pt: PageTable::new_user()?,
            pt_lock: SpinLock::new(()),
            cpus: AtomicCpuSet::new_empty(),
        })
    }

    /// The physical address of the root table.
    pub fn root_paddr(&self) -> Paddr {
        self.pt.root_paddr()
    }

    /// Loads this space on the executing CPU.
    pub fn activate(&self) {
        self.cpus.add(crate::cpu::this_cpu());
        // SAFETY: The root maps the shared kernel half, so the kernel
        // keeps running after the switch.
        unsafe { crate::arch::mm::activate_page_table(self.pt.root_paddr()) };
    }

    /// Marks this space inactive on the executing CPU. Called by the
    /// dispatcher after switching to a different space.
    pub fn deactivate(&self) {
        self.cpus.remove(crate::cpu::this_cpu());
    }

    /// The snapshot of CPUs a shootdown for this space must target.
    pub fn cpu_mask(&self) -> u64 {
        self.cpus.load()
    }

    /// Installs a base-page mapping. No TLB maintenance is needed for a
    /// previously absent entry.
    pub fn map(&self, vaddr: Vaddr, paddr: Paddr, flags: PtFlags) -> Result<()> {
        let _guard = self.pt_lock.lock();
        self.pt.map(vaddr, paddr, flags)
    }

    /// Installs a huge leaf.
    pub fn map_huge(
        &self,
        vaddr: Vaddr,
        paddr: Paddr,
        flags: PtFlags,
        size: PageSize,
    ) -> Result<()> {
        let _guard = self.pt_lock.lock();
        self.pt.map_huge(vaddr, paddr, flags, size)
    }

    /// Removes the base-page mapping at `vaddr` and shoots down the TLBs
    /// of all CPUs carrying this space. Returns the unmapped frame.
    pub fn unmap(&self, vaddr: Vaddr) -> Option<Paddr> {
        let paddr = {
            let _guard = self.pt_lock.lock();
            self.pt.unmap(vaddr)
        }?;
        tlb::shootdown(self.cpu_mask(), FlushOp::Addr(vaddr));
        Some(paddr)
    }

    /// Removes the mapping at `vaddr` without flushing remote TLBs; the
    /// caller batches the shootdown through a [`tlb::TlbGather`].
    pub fn unmap_gathered(&self, vaddr: Vaddr) -> Option<Paddr> {
        let _guard = self.pt_lock.lock();
        self.pt.unmap(vaddr)
    }

    /// Edits the leaf flags at `vaddr` and shoots down the TLBs of the
    /// carrying CPUs. Returns whether a present leaf was edited.
    pub fn protect(&self, vaddr: Vaddr, op: impl FnOnce(PtFlags) -> PtFlags) -> bool {
        let changed = {
            let _guard = self.pt_lock.lock();
            self.pt.protect(vaddr, op)
        };
        if changed {
            tlb::shootdown(self.cpu_mask(), FlushOp::Addr(vaddr));
        }
        changed
    }

    /// Translates `vaddr` through this space.
    pub fn query(&self, vaddr: Vaddr) -> Option<(Paddr, PtFlags, PageSize)> {
        self.pt.query(vaddr)
    }

    /// The underlying page table, for walkers that hold their own locks.
    pub fn page_table(&self) -> &PageTable {
        &self.pt
    }
}
