// SPDX-License-Identifier: MPL-2.0

//! Translation-cache and page-table-root control.

use x86_64::{
    instructions::tlb,
    registers::control::{Cr3, Cr3Flags},
    structures::paging::PhysFrame,
    PhysAddr, VirtAddr,
};

use crate::mm::{Paddr, Vaddr};

/// Invalidates the translation for one page on the executing CPU.
pub fn tlb_flush_addr(vaddr: Vaddr) {
    tlb::flush(VirtAddr::new(vaddr as u64));
}

/// Invalidates all non-global translations on the executing CPU.
pub fn tlb_flush_all() {
    tlb::flush_all();
}

/// Loads a new top-level page table.
///
/// # Safety
///
/// Changing the page-table root rewires all address translation; the new
/// root must map the kernel image and the executing stack.
pub unsafe fn activate_page_table(root_paddr: Paddr) {
    let frame = PhysFrame::from_start_address(PhysAddr::new(root_paddr as u64)).unwrap();
    if Cr3::read().0 != frame {
        Cr3::write(frame, Cr3Flags::empty());
    }
}

pub fn current_page_table_paddr() -> Paddr {
    Cr3::read().0.start_address().as_u64() as Paddr
}
