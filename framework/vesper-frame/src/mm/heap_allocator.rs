// SPDX-License-Identifier: MPL-2.0

//! The kernel heap.
//!
//! A fixed bootstrap arena carries the heap through early boot so that
//! boot information and the frame descriptor table can be built before
//! the frame allocator runs; afterwards [`extend`] grows the heap from
//! the buddy system.

use buddy_system_allocator::LockedHeap;
use log::info;

use crate::{
    config::PAGE_SIZE,
    mm::{frame::allocator, paddr_to_vaddr},
};

const BOOTSTRAP_HEAP_BYTES: usize = 4 << 20;

#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::new();

static mut BOOTSTRAP_ARENA: [u8; BOOTSTRAP_HEAP_BYTES] = [0; BOOTSTRAP_HEAP_BYTES];

/// Brings up the bootstrap heap. The entry code calls this before
/// anything allocates.
pub fn init() {
    // SAFETY: The arena is exclusively handed to the heap, once.
    unsafe {
        let base = core::ptr::addr_of!(BOOTSTRAP_ARENA) as usize;
        HEAP_ALLOCATOR.lock().init(base, BOOTSTRAP_HEAP_BYTES);
    }
}

/// Grows the heap by `nr_pages` pages taken from the frame allocator.
pub fn extend(nr_pages: usize) -> bool {
    let order = nr_pages.next_power_of_two().trailing_zeros() as usize;
    let Some(paddr) = allocator::alloc_pages(order) else {
        return false;
    };
    let vaddr = paddr_to_vaddr(paddr);
    // SAFETY: The freshly allocated block is unused and linearly mapped.
    unsafe {
        HEAP_ALLOCATOR.lock().add_to_heap(vaddr, vaddr + (PAGE_SIZE << order));
    }
    info!("kernel heap extended by {} pages", 1 << order);
    true
}
