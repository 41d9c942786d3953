// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::mm::{frame::allocator, sim};

const USER_FLAGS: PtFlags = PtFlags::from_bits_truncate(
    PtFlags::WRITABLE.bits() | PtFlags::USER.bits(),
);

#[test]
fn map_query_unmap_roundtrip() {
    sim::init();
    let pt = PageTable::new_user().unwrap();
    let frame = allocator::alloc_page().unwrap();
    let va = 0x7000_0000;

    pt.map(va, frame, USER_FLAGS).unwrap();
    assert_eq!(pt.virt_to_phys(va), Some(frame));
    assert_eq!(pt.virt_to_phys(va + 0x123), Some(frame + 0x123));
    let (_, flags, size) = pt.query(va).unwrap();
    assert!(flags.contains(PtFlags::WRITABLE));
    assert_eq!(size, PageSize::Size4K);

    assert_eq!(pt.unmap(va), Some(frame));
    assert_eq!(pt.virt_to_phys(va), None);
    // Unmapping an unmapped address is a silent no-op.
    assert_eq!(pt.unmap(va), None);

    allocator::free_page(frame);
}

#[test]
fn huge_mapping_and_split_preserve_tail_frames() {
    sim::init();
    let pt = PageTable::new_user().unwrap();
    let big = allocator::alloc_pages(9).unwrap(); // naturally 2 MiB aligned
    let va = 0x4000_0000;

    pt.map_huge(va, big, USER_FLAGS, PageSize::Size2M).unwrap();
    let (paddr, _, size) = pt.query(va + 5 * PAGE_SIZE).unwrap();
    assert_eq!(paddr, big + 5 * PAGE_SIZE);
    assert_eq!(size, PageSize::Size2M);

    // Remapping page 0 at 4 KiB granularity splits the huge leaf; pages
    // 1..511 must keep pointing at their original frames.
    let new_frame = allocator::alloc_page().unwrap();
    pt.map(va, new_frame, USER_FLAGS).unwrap();

    assert_eq!(pt.virt_to_phys(va), Some(new_frame));
    for i in 1..NR_ENTRIES {
        let (paddr, _, size) = pt.query(va + i * PAGE_SIZE).unwrap();
        assert_eq!(paddr, big + i * PAGE_SIZE, "page {} moved", i);
        assert_eq!(size, PageSize::Size4K);
    }

    drop(pt);
    allocator::free_pages(big, 9);
    allocator::free_page(new_frame);
}

#[test]
fn protect_edits_leaf_flags() {
    sim::init();
    let pt = PageTable::new_user().unwrap();
    let frame = allocator::alloc_page().unwrap();
    let va = 0x1234_5000;

    pt.map(va, frame, USER_FLAGS).unwrap();
    assert!(pt.protect(va, |f| f - PtFlags::WRITABLE));
    let (_, flags, _) = pt.query(va).unwrap();
    assert!(!flags.contains(PtFlags::WRITABLE));

    assert!(!pt.is_dirty(va));
    assert!(pt.protect(va, |f| f | PtFlags::DIRTY));
    assert!(pt.is_dirty(va));
    pt.clear_dirty(va);
    assert!(!pt.is_dirty(va));

    assert!(pt.protect(va, |f| f | PtFlags::ACCESSED));
    assert!(pt.is_accessed(va));
    pt.clear_accessed(va);
    assert!(!pt.is_accessed(va));

    // Protecting an unmapped address edits nothing.
    assert!(!pt.protect(va + PAGE_SIZE, |f| f));

    pt.unmap(va);
    allocator::free_page(frame);
}

#[test]
fn pat_bit_relocates_across_split() {
    sim::init();
    let pt = PageTable::new_user().unwrap();
    let big = allocator::alloc_pages(9).unwrap();
    let va = 0x8000_0000;

    pt.map_huge(va, big, USER_FLAGS | PtFlags::PAT, PageSize::Size2M)
        .unwrap();
    let (_, flags, _) = pt.query(va).unwrap();
    assert!(flags.contains(PtFlags::PAT));

    // After splitting, the PAT attribute must survive in the base-page
    // position of every child leaf.
    let new_frame = allocator::alloc_page().unwrap();
    pt.map(va, new_frame, USER_FLAGS).unwrap();
    let (_, flags, _) = pt.query(va + PAGE_SIZE).unwrap();
    assert!(flags.contains(PtFlags::PAT));

    drop(pt);
    allocator::free_pages(big, 9);
    allocator::free_page(new_frame);
}
