// SPDX-License-Identifier: MPL-2.0

//! Simulated physical memory for host-side builds.
//!
//! A leaked, page-aligned allocation stands in for RAM: its base address
//! becomes the linear-mapping base, so physical addresses are offsets into
//! the buffer and every paging and allocator path runs unmodified. Unit
//! tests across the workspace call [`init`] first; it is idempotent.

use alloc::{string::String, vec};
use core::alloc::Layout;

use spin::Once;

use crate::{
    boot::{
        memory_region::{MemoryRegion, MemoryRegionType},
        BootInfo,
    },
    config::PAGE_SIZE,
};

/// The size of the simulated RAM.
pub const SIM_RAM_BYTES: usize = 72 << 20;

/// The reserved window past the usable RAM. It is backed by the buffer
/// but never seeded into the allocator, giving tests a quiet range of
/// frames to stage allocator scenarios in.
pub const SIM_USABLE_BYTES: usize = 64 << 20;

/// The number of simulated CPUs.
pub const SIM_CPUS: u32 = 4;

/// The first PFN of the reserved window.
pub fn reserved_base_pfn() -> usize {
    SIM_USABLE_BYTES / PAGE_SIZE
}

static SETUP: Once<()> = Once::new();

/// Boots the frame against simulated physical memory.
pub fn init() {
    SETUP.call_once(|| {
        let layout = Layout::from_size_align(SIM_RAM_BYTES, PAGE_SIZE).unwrap();
        // SAFETY: The layout is non-zero-sized; the buffer is leaked and
        // lives for the rest of the process.
        let base = unsafe { alloc::alloc::alloc_zeroed(layout) };
        assert!(!base.is_null(), "cannot reserve simulated RAM");

        crate::arch::cpu::set_num_cpus(SIM_CPUS);
        crate::boot::init(BootInfo {
            memory_regions: vec![
                MemoryRegion::new(0, SIM_USABLE_BYTES, MemoryRegionType::Usable),
                MemoryRegion::new(
                    SIM_USABLE_BYTES,
                    SIM_RAM_BYTES - SIM_USABLE_BYTES,
                    MemoryRegionType::Reserved,
                ),
            ],
            linear_mapping_base: base as usize,
            framebuffer: None,
            rsdp: None,
            cmdline: String::from("loglevel=warn"),
            boot_page_table_root: 0,
            nr_cpus: Some(SIM_CPUS),
        });
        crate::init();
    });
}

/// Switches the simulated current CPU.
pub fn switch_cpu(cpu: u32) {
    assert!(cpu < SIM_CPUS);
    crate::arch::cpu::set_this_cpu(cpu);
}
