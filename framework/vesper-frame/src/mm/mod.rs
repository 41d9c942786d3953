// SPDX-License-Identifier: MPL-2.0

//! Physical and virtual memory management.

pub mod frame;
#[cfg(target_os = "none")]
pub mod heap_allocator;
pub mod page_table;
#[cfg(not(target_os = "none"))]
pub mod sim;
pub mod space;
pub mod tlb;

use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

use log::info;

pub use crate::config::{PAGE_SHIFT, PAGE_SIZE};

/// A physical address.
pub type Paddr = usize;

/// A virtual address.
pub type Vaddr = usize;

/// The exclusive upper bound of user-space virtual addresses (the lower
/// half of the canonical 48-bit space).
pub const MAX_USERSPACE_VADDR: Vaddr = 1 << 47;

pub const fn is_user_vaddr(vaddr: Vaddr) -> bool {
    vaddr < MAX_USERSPACE_VADDR
}

static LINEAR_MAPPING_BASE: AtomicUsize = AtomicUsize::new(0);
static MAX_PADDR: AtomicUsize = AtomicUsize::new(0);

/// Converts a physical address to its virtual address in the linear
/// mapping (the higher-half direct map of all physical RAM).
pub fn paddr_to_vaddr(paddr: Paddr) -> Vaddr {
    LINEAR_MAPPING_BASE.load(Relaxed) + paddr
}

/// The highest physical address backed by RAM, exclusive.
pub fn max_paddr() -> Paddr {
    MAX_PADDR.load(Relaxed)
}

/// Establishes the linear mapping base. Called by [`init`], and by the
/// host-side simulation harness.
pub(crate) fn set_linear_mapping(base: Vaddr, max_paddr: Paddr) {
    LINEAR_MAPPING_BASE.store(base, Relaxed);
    MAX_PADDR.store(max_paddr, Relaxed);
}

pub(crate) fn init() {
    let boot_info = crate::boot::boot_info();
    let max = boot_info
        .memory_regions
        .iter()
        .map(|r| r.base() + r.len())
        .max()
        .unwrap_or(0);
    set_linear_mapping(boot_info.linear_mapping_base, max);
    frame::init(&boot_info.memory_regions);
    page_table::init();
    info!(
        "physical memory initialized, {} KiB total, {} KiB free",
        frame::allocator::total_bytes() / 1024,
        frame::allocator::free_bytes() / 1024,
    );
}
