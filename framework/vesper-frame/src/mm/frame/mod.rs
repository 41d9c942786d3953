// SPDX-License-Identifier: MPL-2.0

//! Physical page frames: the descriptor table, the buddy free lists, and
//! the per-CPU allocation front end.

pub mod allocator;
pub(crate) mod buddy;
pub mod meta;

use log::info;

use crate::{
    boot::memory_region::{MemoryRegion, MemoryRegionType},
    config::PAGE_SIZE,
    mm::Paddr,
};

/// A page-frame number: the index of a frame in the descriptor table.
pub type Pfn = usize;

pub const fn pfn_to_paddr(pfn: Pfn) -> Paddr {
    pfn * PAGE_SIZE
}

pub const fn paddr_to_pfn(paddr: Paddr) -> Pfn {
    paddr / PAGE_SIZE
}

pub(crate) fn init(regions: &[MemoryRegion]) {
    let nr_frames = crate::mm::max_paddr() / PAGE_SIZE;
    meta::init(nr_frames);

    let mut usable = 0usize;
    for region in regions {
        if region.typ() != MemoryRegionType::Usable {
            continue;
        }
        let region = region.page_aligned();
        if region.is_empty() {
            continue;
        }
        let start = paddr_to_pfn(region.base());
        let end = paddr_to_pfn(region.base() + region.len());
        // Page 0 stays permanently reserved.
        let start = start.max(1);
        if start >= end {
            continue;
        }
        buddy::add_free_range(start, end);
        usable += end - start;
    }

    // Everything the map does not hand to the allocator is off limits;
    // on overlap the usable seeding wins.
    for region in regions {
        if region.typ() == MemoryRegionType::Usable {
            continue;
        }
        let region = region.page_aligned();
        let start = paddr_to_pfn(region.base());
        let end = paddr_to_pfn(region.base() + region.len()).min(nr_frames);
        for pfn in start..end {
            let slot = meta::slot(pfn);
            if slot.state() == meta::FrameState::Unused {
                slot.set_state(meta::FrameState::Reserved);
            }
        }
    }
    if nr_frames > 0 && meta::slot(0).state() == meta::FrameState::Unused {
        meta::slot(0).set_state(meta::FrameState::Reserved);
    }

    info!("seeded the frame allocator with {} usable frames", usable);
}
