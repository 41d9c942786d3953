// SPDX-License-Identifier: MPL-2.0

//! The handoff from the boot loader.
//!
//! The loader-specific entry code gathers everything the kernel needs into
//! a [`BootInfo`] and records it with [`init`] before handing control to
//! the portable initialization path. The frame never talks to a boot
//! protocol directly.

pub mod memory_region;

use alloc::{string::String, vec::Vec};

use spin::Once;

use self::memory_region::MemoryRegion;
use crate::mm::Paddr;

/// A linear framebuffer handed over by the boot loader, if any.
#[derive(Clone, Copy, Debug)]
pub struct FramebufferInfo {
    pub base: Paddr,
    pub width: u32,
    pub height: u32,
    pub stride: u32,
    pub bytes_per_pixel: u32,
}

/// Everything the kernel receives from the boot loader.
#[derive(Debug)]
pub struct BootInfo {
    /// The typed physical memory map.
    pub memory_regions: Vec<MemoryRegion>,
    /// The virtual base of the higher-half direct map of all physical RAM.
    pub linear_mapping_base: usize,
    /// The framebuffer, if the loader set one up.
    pub framebuffer: Option<FramebufferInfo>,
    /// The physical address of the ACPI RSDP, if present. Carried opaquely
    /// for the firmware layer.
    pub rsdp: Option<Paddr>,
    /// The kernel command line.
    pub cmdline: String,
    /// The physical address of the page-table root the loader booted with.
    pub boot_page_table_root: Paddr,
    /// The number of usable CPUs discovered by the loader, if it knows.
    pub nr_cpus: Option<u32>,
}

static BOOT_INFO: Once<BootInfo> = Once::new();

/// Records the boot information. Must be called exactly once, before
/// [`crate::init`].
pub fn init(info: BootInfo) {
    BOOT_INFO.call_once(|| info);
}

/// The recorded boot information.
///
/// # Panics
///
/// Panics if called before [`init`].
pub fn boot_info() -> &'static BootInfo {
    BOOT_INFO.get().expect("boot information was not recorded")
}

/// The physical memory map.
pub fn memory_regions() -> &'static [MemoryRegion] {
    &boot_info().memory_regions
}
