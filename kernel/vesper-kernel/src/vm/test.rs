// SPDX-License-Identifier: MPL-2.0

use vesper_frame::mm::{page_table::PageSize, sim};

use super::{
    page_fault::PageFaultInfo,
    perms::VmFlags,
    vmar::{vma::Vma, VmaCache, Vmar},
};
use crate::prelude::*;

fn rw_user() -> VmFlags {
    VmFlags::READ | VmFlags::WRITE | VmFlags::USER
}

fn r_user() -> VmFlags {
    VmFlags::READ | VmFlags::USER
}

#[test]
fn map_split_protect_unmap_scenario() {
    sim::init();
    let vmar = Vmar::new().unwrap();

    vmar.insert(Vma::new_anon(0x1000..0x3000, r_user())).unwrap();
    vmar.insert(Vma::new_anon(0x5000..0x7000, rw_user())).unwrap();
    assert_eq!(vmar.nr_vmas(), 2);

    // With one-page guards around the existing areas, the first fitting
    // address lies past 0x7000 plus its guard.
    let x = vmar.find_free_region(0x1000, PAGE_SIZE, 0, 0x10000).unwrap();
    assert!(x >= 0x8000, "found {:#x}", x);

    vmar.split_at(0x6000).unwrap();
    assert_eq!(vmar.nr_vmas(), 3);

    vmar.protect(0x1000..0x2000, rw_user()).unwrap();
    assert_eq!(vmar.nr_vmas(), 4);

    vmar.unmap_range(0x2000..0x6000).unwrap();
    let dump = vmar.dump();
    assert_eq!(dump.len(), 2);
    assert_eq!(dump[0].0, 0x1000..0x2000);
    assert!(dump[0].1.contains(VmFlags::WRITE));
    assert_eq!(dump[1].0, 0x6000..0x7000);
    assert!(dump[1].1.contains(VmFlags::WRITE));
}

#[test]
fn overlapping_mappings_are_rejected() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    vmar.insert(Vma::new_anon(0x10000..0x14000, rw_user())).unwrap();
    assert!(vmar.insert(Vma::new_anon(0x12000..0x16000, rw_user())).is_err());
    assert!(vmar
        .map_range(Some(0x13000), 0x1000, PAGE_SIZE, rw_user(), None)
        .is_err());

    // `find` honors the half-open bounds.
    assert!(vmar.find(0xffff).is_none());
    assert!(vmar.find(0x10000).is_some());
    assert!(vmar.find(0x13fff).is_some());
    assert!(vmar.find(0x14000).is_none());
}

#[test]
fn adjacent_equal_mappings_merge() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    vmar.map_range(Some(0x20000), 0x2000, PAGE_SIZE, rw_user(), None)
        .unwrap();
    vmar.map_range(Some(0x22000), 0x2000, PAGE_SIZE, rw_user(), None)
        .unwrap();
    // Freshly created anonymous neighbors with equal flags coalesce.
    assert_eq!(vmar.nr_vmas(), 1);
    assert_eq!(vmar.find(0x21000).unwrap().range(), 0x20000..0x24000);
}

#[test]
fn write_faults_in_pages_on_demand() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    vmar.map_range(Some(0x30000), 0x3000, PAGE_SIZE, rw_user(), None)
        .unwrap();

    vmar.write_val(0x30010, &0xdead_beefu32).unwrap();
    assert_eq!(vmar.read_val::<u32>(0x30010).unwrap(), 0xdead_beef);
    // Untouched pages read back zero-filled.
    assert_eq!(vmar.read_val::<u64>(0x31000).unwrap(), 0);
    // Access outside any area fails rather than mapping anything.
    assert!(vmar.write_val(0x50000, &0u8).is_err());
}

#[test]
fn cow_fork_diverges_parent_and_child() {
    sim::init();
    let parent = Vmar::new().unwrap();
    parent
        .map_range(Some(0xc0000), 0x1000, PAGE_SIZE, rw_user(), None)
        .unwrap();
    parent.write_val(0xc0000, &0x1234u64).unwrap();

    let child = parent.fork().unwrap();
    assert_eq!(child.read_val::<u64>(0xc0000).unwrap(), 0x1234);

    // The child's write breaks the share; the parent keeps its value.
    child.write_val(0xc0000, &0x5678u64).unwrap();
    assert_eq!(parent.read_val::<u64>(0xc0000).unwrap(), 0x1234);
    assert_eq!(child.read_val::<u64>(0xc0000).unwrap(), 0x5678);

    // The parent's own next write re-arms or copies as needed and stays
    // invisible to the child.
    parent.write_val(0xc0000, &0x9abcu64).unwrap();
    assert_eq!(parent.read_val::<u64>(0xc0000).unwrap(), 0x9abc);
    assert_eq!(child.read_val::<u64>(0xc0000).unwrap(), 0x5678);
}

#[test]
fn fork_then_parent_writes_first() {
    sim::init();
    let parent = Vmar::new().unwrap();
    parent
        .map_range(Some(0xd0000), 0x2000, PAGE_SIZE, rw_user(), None)
        .unwrap();
    parent.write_val(0xd0000, &111u64).unwrap();
    let child = parent.fork().unwrap();

    parent.write_val(0xd0000, &222u64).unwrap();
    assert_eq!(child.read_val::<u64>(0xd0000).unwrap(), 111);
    assert_eq!(parent.read_val::<u64>(0xd0000).unwrap(), 222);
}

#[test]
fn huge_hint_installs_a_2m_leaf() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    let flags = rw_user() | VmFlags::HUGEPAGE;
    vmar.map_range(Some(0x4000_0000), 4 << 20, 0x20_0000, flags, None)
        .unwrap();

    vmar.write_val(0x4000_0000usize, &7u64).unwrap();
    let (_, _, size) = vmar.vm_space().query(0x4000_0000).unwrap();
    assert_eq!(size, PageSize::Size2M);

    // The far end of the leaf is populated too.
    assert_eq!(vmar.read_val::<u64>(0x401f_f000).unwrap(), 0);
    assert_eq!(vmar.read_val::<u64>(0x4000_0000).unwrap(), 7);
}

#[test]
fn vma_cache_invalidates_on_structural_change() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    vmar.map_range(Some(0x60000), 0x2000, PAGE_SIZE, rw_user(), None)
        .unwrap();

    let mut cache = VmaCache::new();
    let hit = cache.find(&vmar, 0x60000).unwrap();
    assert_eq!(hit.range(), 0x60000..0x62000);
    // Cached entry answers again.
    assert!(cache.find(&vmar, 0x61fff).is_some());

    vmar.unmap_range(0x60000..0x62000).unwrap();
    // The sequence number moved; the stale entry must not resurface.
    assert!(cache.find(&vmar, 0x60000).is_none());
}

#[test]
fn stack_area_grows_downward_on_fault() {
    sim::init();
    let vmar = Vmar::new().unwrap();
    let flags = rw_user() | VmFlags::GROWSDOWN;
    vmar.map_range(Some(0x7f0000), 0x4000, PAGE_SIZE, flags, None)
        .unwrap();

    // A fault a few pages below the stack extends it.
    let info = PageFaultInfo {
        addr: 0x7ee008,
        write: true,
        present: false,
        user: false,
        instruction: false,
    };
    super::handle_vmar_fault(&vmar, &info).unwrap();
    let vma = vmar.find(0x7ee000).unwrap();
    assert!(vma.flags.contains(VmFlags::GROWSDOWN));
    vmar.write_val(0x7ee008, &1u32).unwrap();
}
