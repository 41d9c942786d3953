// SPDX-License-Identifier: MPL-2.0

//! Virtual memory address regions: the per-process address space.
//!
//! A `Vmar` owns a `VmSpace` (the page tables plus the set of CPUs they
//! are active on) and the ordered, gap-indexed collection of VMAs laid
//! over it. Structural changes take the internal reader-writer semaphore
//! in write mode; lookups and the fault path take it in read mode.
//! Page-table mutation is serialized one level below, inside the
//! `VmSpace`.

mod gap_tree;
pub mod vma;

use core::ops::Range;
use core::sync::atomic::{AtomicU64, Ordering};

use align_ext::AlignExt;
use vesper_frame::{
    arch,
    mm::{space::VmSpace, tlb::TlbGather, MAX_USERSPACE_VADDR},
};

use self::{
    gap_tree::VmaTree,
    vma::{MappedVmo, Vma},
};
use crate::{
    prelude::*,
    vm::{
        perms::VmFlags,
        vmo::{self, Vmo},
    },
};

/// The lowest address a mapping may occupy.
pub const LOWEST_MAP_ADDR: Vaddr = 0x1_0000;

/// The free space kept around an automatically placed mapping.
const GUARD_SIZE: usize = PAGE_SIZE;

/// Sides reported by [`Vmar::merge_around`].
pub const MERGED_BACKWARD: u8 = 1;
pub const MERGED_FORWARD: u8 = 2;

/// An address space.
pub struct Vmar {
    vm_space: Arc<VmSpace>,
    inner: RwMutex<VmarInner>,
    /// Advanced on every structural change; per-task VMA caches compare
    /// it to validate their entries.
    seq: AtomicU64,
}

struct VmarInner {
    tree: VmaTree,
    /// Program segment bookkeeping.
    brk_base: Vaddr,
    brk: Vaddr,
}

impl Vmar {
    pub fn new() -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            vm_space: Arc::new(VmSpace::new()?),
            inner: RwMutex::new(VmarInner {
                tree: VmaTree::new(),
                brk_base: 0,
                brk: 0,
            }),
            seq: AtomicU64::new(1),
        }))
    }

    pub fn vm_space(&self) -> &Arc<VmSpace> {
        &self.vm_space
    }

    /// The structural sequence number; bumped on every change that could
    /// invalidate cached lookups.
    pub fn seq(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }

    fn bump_seq(&self) {
        self.seq.fetch_add(1, Ordering::Release);
    }

    /// The number of areas currently mapped.
    pub fn nr_vmas(&self) -> usize {
        self.inner.read().tree.len()
    }

    /// Finds the area containing `addr`.
    pub fn find(&self, addr: Vaddr) -> Option<Vma> {
        let inner = self.inner.read();
        inner.tree.find(addr).map(|idx| inner.tree.vma(idx).clone())
    }

    /// Snapshots all areas in address order; diagnostics and tests.
    pub fn dump(&self) -> Vec<(Range<Vaddr>, VmFlags)> {
        let inner = self.inner.read();
        inner
            .tree
            .iter()
            .map(|vma| (vma.range(), vma.flags))
            .collect()
    }

    /// Inserts a fully-formed area. Fails on overlap.
    pub fn insert(&self, vma: Vma) -> Result<()> {
        check_user_range(&vma.range())?;
        let mut inner = self.inner.write();
        self.insert_locked(&mut inner, vma)?;
        Ok(())
    }

    fn insert_locked(&self, inner: &mut VmarInner, vma: Vma) -> Result<u32> {
        let idx = inner.tree.insert(vma).map_err(|_| {
            Error::with_message(Errno::EEXIST, "mapping overlaps an existing area")
        })?;
        let inserted = inner.tree.vma(idx).clone();
        if let Some(mapped) = &inserted.vmo {
            mapped.vmo.register_mapper(
                &self.vm_space,
                inserted.start,
                mapped.pgoff,
                inserted.nr_pages(),
            );
        }
        if let Some(ops) = &inserted.ops {
            ops.open(&inserted);
        }
        self.bump_seq();
        Ok(idx)
    }

    /// Maps `size` bytes with the given attributes. With `addr_hint`
    /// absent, an aligned free range with guard space is chosen,
    /// randomized when the platform has an entropy source.
    pub fn map_range(
        &self,
        addr_hint: Option<Vaddr>,
        size: usize,
        align: usize,
        flags: VmFlags,
        backing: Option<(Arc<Vmo>, usize)>,
    ) -> Result<Vaddr> {
        if size == 0 || size % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "bad mapping size");
        }
        let mut inner = self.inner.write();
        let start = match addr_hint {
            Some(addr) => {
                if addr % PAGE_SIZE != 0 {
                    return_errno_with_message!(Errno::EINVAL, "unaligned mapping address");
                }
                addr
            }
            None => {
                Self::find_free_locked(&inner, size, align, LOWEST_MAP_ADDR, MAX_USERSPACE_VADDR)?
            }
        };
        let range = start..start
            .checked_add(size)
            .ok_or(Error::with_message(Errno::EINVAL, "mapping wraps around"))?;
        check_user_range(&range)?;

        let vma = match backing {
            Some((vmo, pgoff)) => Vma::new_backed(range, flags, vmo, pgoff),
            None => Vma::new_anon(range, flags),
        };
        let idx = self.insert_locked(&mut inner, vma)?;
        self.merge_locked(&mut inner, idx);
        Ok(start)
    }

    /// Picks an aligned free range of `size` bytes in `[lo, hi)` with a
    /// page of guard space on both sides, randomizing the placement when
    /// hardware entropy is available and falling back to the plain
    /// first-fit on failure.
    pub fn find_free_region(
        &self,
        size: usize,
        align: usize,
        lo: Vaddr,
        hi: Vaddr,
    ) -> Result<Vaddr> {
        let inner = self.inner.read();
        Self::find_free_locked(&inner, size, align, lo, hi)
    }

    fn find_free_locked(
        inner: &VmarInner,
        size: usize,
        align: usize,
        lo: Vaddr,
        hi: Vaddr,
    ) -> Result<Vaddr> {
        if !align.is_power_of_two() || align < PAGE_SIZE {
            return_errno_with_message!(Errno::EINVAL, "bad alignment");
        }
        if let Some(entropy) = arch::rng::read_random() {
            // Shift the search window by a random, aligned amount; the
            // deterministic search below remains the fallback.
            let slack = (hi - lo) / 16;
            let offset = ((entropy as usize % slack.max(1)) / align) * align;
            if let Some(found) =
                inner
                    .tree
                    .find_free(size, align, lo + offset, hi, GUARD_SIZE)
            {
                return Ok(found);
            }
        }
        inner
            .tree
            .find_free(size, align, lo, hi, GUARD_SIZE)
            .ok_or(Error::with_message(
                Errno::ENOMEM,
                "no free range of the requested size",
            ))
    }

    /// Splits the area containing `addr` at `addr`. Both halves share
    /// the backing object, the tail with its page offset advanced, and
    /// both see the ops' `open`.
    pub fn split_at(&self, addr: Vaddr) -> Result<()> {
        if addr % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "unaligned split address");
        }
        let mut inner = self.inner.write();
        self.split_locked(&mut inner, addr)
    }

    fn split_locked(&self, inner: &mut VmarInner, addr: Vaddr) -> Result<()> {
        let Some(idx) = inner.tree.find(addr) else {
            return_errno_with_message!(Errno::ENOENT, "no area at the split address");
        };
        if inner.tree.vma(idx).start == addr {
            // Already a boundary.
            return Ok(());
        }
        let tail = inner.tree.vma_mut(idx).split_at(addr);
        inner.tree.range_updated(idx);

        // Refresh the reverse-mapping records to the new extents.
        let head = inner.tree.vma(idx).clone();
        if let Some(mapped) = &head.vmo {
            mapped.vmo.unregister_mapper(&self.vm_space, head.start);
            mapped
                .vmo
                .register_mapper(&self.vm_space, head.start, mapped.pgoff, head.nr_pages());
        }
        if let Some(ops) = &head.ops {
            ops.open(&head);
        }
        self.insert_locked(inner, tail)?;
        self.bump_seq();
        Ok(())
    }

    /// Attempts to coalesce the area containing `addr` with both
    /// neighbors. Returns the sides that merged.
    pub fn merge_around(&self, addr: Vaddr) -> u8 {
        let mut inner = self.inner.write();
        let Some(idx) = inner.tree.find(addr) else {
            return 0;
        };
        self.merge_locked(&mut inner, idx)
    }

    fn merge_locked(&self, inner: &mut VmarInner, mut idx: u32) -> u8 {
        let mut mask = 0;
        if let Some(prev) = inner.tree.prev_idx(idx) {
            if inner.tree.vma(prev).can_merge_with(inner.tree.vma(idx)) {
                let absorbed = inner.tree.remove(idx);
                self.drop_mapper(&absorbed);
                inner.tree.vma_mut(prev).end = absorbed.end;
                inner.tree.range_updated(prev);
                self.refresh_mapper(inner.tree.vma(prev));
                idx = prev;
                mask |= MERGED_BACKWARD;
            }
        }
        if let Some(next) = inner.tree.next_idx(idx) {
            if inner.tree.vma(idx).can_merge_with(inner.tree.vma(next)) {
                let absorbed = inner.tree.remove(next);
                self.drop_mapper(&absorbed);
                inner.tree.vma_mut(idx).end = absorbed.end;
                inner.tree.range_updated(idx);
                self.refresh_mapper(inner.tree.vma(idx));
                mask |= MERGED_FORWARD;
            }
        }
        if mask != 0 {
            self.bump_seq();
        }
        mask
    }

    fn drop_mapper(&self, vma: &Vma) {
        if let Some(mapped) = &vma.vmo {
            mapped.vmo.unregister_mapper(&self.vm_space, vma.start);
        }
    }

    /// Re-records a reverse-mapping entry after the area's extent
    /// changed in place.
    fn refresh_mapper(&self, vma: &Vma) {
        if let Some(mapped) = &vma.vmo {
            mapped.vmo.unregister_mapper(&self.vm_space, vma.start);
            mapped
                .vmo
                .register_mapper(&self.vm_space, vma.start, mapped.pgoff, vma.nr_pages());
        }
    }

    /// Grows the area containing `addr` to `new_end`, failing if the
    /// gap to the next area cannot take it.
    pub fn expand(&self, addr: Vaddr, new_end: Vaddr) -> Result<()> {
        if new_end % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "unaligned end");
        }
        let mut inner = self.inner.write();
        let Some(idx) = inner.tree.find(addr) else {
            return_errno_with_message!(Errno::ENOENT, "no area at the address");
        };
        if new_end <= inner.tree.vma(idx).end {
            return_errno_with_message!(Errno::EINVAL, "expand would shrink");
        }
        if let Some(next) = inner.tree.next_idx(idx) {
            if new_end > inner.tree.vma(next).start {
                return_errno_with_message!(Errno::ENOMEM, "next area is in the way");
            }
        }
        check_user_range(&(inner.tree.vma(idx).start..new_end))?;
        inner.tree.vma_mut(idx).end = new_end;
        inner.tree.range_updated(idx);
        self.bump_seq();
        Ok(())
    }

    /// Shrinks the area containing `addr` to `new_end`, unmapping the
    /// abandoned tail.
    pub fn shrink(&self, addr: Vaddr, new_end: Vaddr) -> Result<()> {
        let (old_end, start) = {
            let inner = self.inner.read();
            let Some(idx) = inner.tree.find(addr) else {
                return_errno_with_message!(Errno::ENOENT, "no area at the address");
            };
            (inner.tree.vma(idx).end, inner.tree.vma(idx).start)
        };
        if new_end % PAGE_SIZE != 0 || new_end <= start || new_end > old_end {
            return_errno_with_message!(Errno::EINVAL, "bad shrink end");
        }
        if new_end == old_end {
            return Ok(());
        }
        self.unmap_range(new_end..old_end)
    }

    /// Changes the attributes of `[range)`. Areas straddling a boundary
    /// are split first; installed translations are tightened in place,
    /// while write permission is granted lazily so that the fault path
    /// keeps copy-on-write intact.
    pub fn protect(&self, range: Range<Vaddr>, new_flags: VmFlags) -> Result<()> {
        check_edit_range(&range)?;
        let mut inner = self.inner.write();
        self.split_locked(&mut inner, range.start).ok();
        self.split_locked(&mut inner, range.end).ok();

        let mut next_addr = range.start;
        while next_addr < range.end {
            let Some(idx) = inner.tree.find_intersecting(next_addr, range.end) else {
                break;
            };
            let vma = inner.tree.vma(idx).clone();
            if vma.start >= range.end {
                break;
            }
            debug_assert!(range.start <= vma.start && vma.end <= range.end);

            let merged_flags =
                (vma.flags - (VmFlags::READ | VmFlags::WRITE | VmFlags::EXEC)) | new_flags;
            inner.tree.vma_mut(idx).flags = merged_flags;

            let shared = merged_flags.contains(VmFlags::SHARED);
            let mut target = merged_flags.pt_flags();
            if !shared {
                // Private writable translations stay read-only until the
                // first write faults them through the COW policy.
                target -= vesper_frame::mm::page_table::PtFlags::WRITABLE;
            }
            let mut va = vma.start;
            while va < vma.end {
                self.vm_space.protect(va, |old| {
                    use vesper_frame::mm::page_table::PtFlags;
                    let keep = old & (PtFlags::ACCESSED | PtFlags::DIRTY | PtFlags::PAT);
                    let keep_write = if shared {
                        PtFlags::empty()
                    } else {
                        // A page that already went through COW keeps its
                        // write permission only if still allowed.
                        old & PtFlags::WRITABLE
                    };
                    let mut new = target | keep;
                    if merged_flags.contains(VmFlags::WRITE) {
                        new |= keep_write;
                    }
                    new
                });
                va += PAGE_SIZE;
            }
            next_addr = vma.end;
        }

        // Coalesce across the edited window now that the attributes have
        // settled.
        let mut probe = range.start;
        while probe < range.end {
            let Some(idx) = inner.tree.find_intersecting(probe, range.end) else {
                break;
            };
            let end = inner.tree.vma(idx).end;
            self.merge_locked(&mut inner, idx);
            if end <= probe {
                break;
            }
            probe = end;
        }
        self.bump_seq();
        Ok(())
    }

    /// Unmaps everything inside `range`, splitting boundary areas and
    /// batching the TLB shootdown and frame release.
    pub fn unmap_range(&self, range: Range<Vaddr>) -> Result<()> {
        check_edit_range(&range)?;
        let mut inner = self.inner.write();
        self.split_locked(&mut inner, range.start).ok();
        self.split_locked(&mut inner, range.end).ok();

        let mut gather = TlbGather::new();
        while let Some(idx) = inner.tree.find_intersecting(range.start, range.end) {
            let vma = inner.tree.vma(idx).clone();
            if vma.start >= range.end {
                break;
            }
            debug_assert!(range.start <= vma.start && vma.end <= range.end);
            self.teardown_vma_locked(&vma, &mut gather);
            inner.tree.remove(idx);
        }
        gather.finish_with(self.vm_space.cpu_mask(), vmo::release_mapping_claim);
        self.bump_seq();
        Ok(())
    }

    /// Removes the translations of one area and queues its frames on the
    /// gather. Invokes the ops' `close` and drops the rmap record.
    fn teardown_vma_locked(&self, vma: &Vma, gather: &mut TlbGather) {
        if let Some(ops) = &vma.ops {
            ops.close(vma);
        }
        self.drop_mapper(vma);
        let mut va = vma.start;
        while va < vma.end {
            if let Some(paddr) = self.vm_space.unmap_gathered(va) {
                gather.add(Some(paddr));
            }
            va += PAGE_SIZE;
        }
    }

    /// Tears the whole space down; used by `execve` and process exit.
    pub fn clear(&self) {
        let mut inner = self.inner.write();
        let mut gather = TlbGather::new();
        while let Some(idx) = inner.tree.first_idx() {
            let vma = inner.tree.remove(idx);
            self.teardown_vma_locked(&vma, &mut gather);
        }
        gather.finish_with(self.vm_space.cpu_mask(), vmo::release_mapping_claim);
        inner.brk_base = 0;
        inner.brk = 0;
        self.bump_seq();
    }

    /// Establishes the program-break area; called by the loader.
    pub fn init_brk(&self, base: Vaddr) -> Result<()> {
        let base = base.align_up(PAGE_SIZE);
        let mut inner = self.inner.write();
        inner.brk_base = base;
        inner.brk = base;
        Ok(())
    }

    /// The `brk` operation: queries or moves the program break.
    pub fn brk(&self, new_brk: Option<Vaddr>) -> Result<Vaddr> {
        let (brk_base, old_brk) = {
            let inner = self.inner.read();
            (inner.brk_base, inner.brk)
        };
        let Some(new_brk) = new_brk else {
            return Ok(old_brk);
        };
        if new_brk < brk_base {
            return_errno_with_message!(Errno::EINVAL, "break below its base");
        }
        let old_end = old_brk.align_up(PAGE_SIZE);
        let new_end = new_brk.align_up(PAGE_SIZE);
        if new_end > old_end {
            let flags = VmFlags::READ | VmFlags::WRITE | VmFlags::USER;
            if old_brk == brk_base || self.expand(old_end - PAGE_SIZE, new_end).is_err() {
                self.map_range(Some(old_end), new_end - old_end, PAGE_SIZE, flags, None)?;
            }
        } else if new_end < old_end {
            self.unmap_range(new_end..old_end)?;
        }
        self.inner.write().brk = new_brk;
        Ok(new_brk)
    }

    /// `mremap`: resizes the mapping at `old_addr`, moving it when
    /// allowed and necessary. Returns the mapping's (possibly new)
    /// address.
    pub fn remap(
        &self,
        old_addr: Vaddr,
        old_size: usize,
        new_size: usize,
        may_move: bool,
    ) -> Result<Vaddr> {
        if old_addr % PAGE_SIZE != 0
            || old_size == 0
            || new_size == 0
            || old_size % PAGE_SIZE != 0
            || new_size % PAGE_SIZE != 0
        {
            return_errno_with_message!(Errno::EINVAL, "bad remap geometry");
        }
        let old_end = old_addr + old_size;

        if new_size < old_size {
            self.unmap_range(old_addr + new_size..old_end)?;
            return Ok(old_addr);
        }
        if new_size == old_size {
            return Ok(old_addr);
        }

        let mut inner = self.inner.write();
        // Isolate [old_addr, old_end) as one area.
        self.split_locked(&mut inner, old_addr).ok();
        self.split_locked(&mut inner, old_end).ok();
        let Some(idx) = inner.tree.find(old_addr) else {
            return_errno_with_message!(Errno::EFAULT, "nothing mapped at the old address");
        };
        if inner.tree.vma(idx).range() != (old_addr..old_end) {
            return_errno_with_message!(Errno::EFAULT, "old range spans a hole or several areas");
        }

        // Grow in place when the gap to the next area allows it.
        let next_start = inner
            .tree
            .next_idx(idx)
            .map(|next| inner.tree.vma(next).start);
        let fits_in_place = next_start.map_or(true, |start| old_addr + new_size <= start)
            && check_user_range(&(old_addr..old_addr + new_size)).is_ok();
        if fits_in_place {
            inner.tree.vma_mut(idx).end = old_addr + new_size;
            inner.tree.range_updated(idx);
            self.refresh_mapper(inner.tree.vma(idx));
            self.bump_seq();
            return Ok(old_addr);
        }
        if !may_move {
            return_errno_with_message!(Errno::ENOMEM, "cannot grow in place");
        }

        // Move: carve out a new home, then carry the area and its
        // translations over; frame claims are conserved.
        let new_start = Self::find_free_locked(
            &inner,
            new_size,
            PAGE_SIZE,
            LOWEST_MAP_ADDR,
            MAX_USERSPACE_VADDR,
        )?;
        let old_vma = inner.tree.remove(idx);
        self.drop_mapper(&old_vma);
        let mut new_vma = old_vma.clone();
        new_vma.start = new_start;
        new_vma.end = new_start + new_size;
        let new_idx = self.insert_locked(&mut inner, new_vma)?;
        debug_assert!(inner.tree.vma(new_idx).start == new_start);

        for page in 0..old_size / PAGE_SIZE {
            let old_va = old_addr + page * PAGE_SIZE;
            if let Some((paddr, flags, _)) = self.vm_space.query(old_va) {
                self.vm_space.unmap_gathered(old_va);
                self.vm_space
                    .map(new_start + page * PAGE_SIZE, paddr & !(PAGE_SIZE - 1), flags)?;
            }
        }
        vesper_frame::mm::tlb::shootdown(
            self.vm_space.cpu_mask(),
            vesper_frame::mm::tlb::FlushOp::All,
        );
        self.bump_seq();
        Ok(new_start)
    }

    /// Duplicates the space for `fork`: every area is copied, backing
    /// objects are shared, and private writable translations are
    /// write-protected on both sides so first writes copy.
    pub fn fork(self: &Arc<Self>) -> Result<Arc<Self>> {
        let child = Vmar::new()?;
        let inner = self.inner.write();

        for vma in inner.tree.iter() {
            let mut child_vma = vma.clone();
            // Translations present at fork time are inherited through
            // the copied leaves below. The child's future private pages
            // must land in its own objects, so only shared mappings and
            // the read view of a file keep the parent's object.
            if !vma.flags.contains(VmFlags::SHARED) {
                child_vma.private_pages = None;
                if vma.flags.contains(VmFlags::ANON) {
                    child_vma.vmo = None;
                }
            }

            {
                let mut child_inner = child.inner.write();
                child
                    .insert_locked(&mut child_inner, child_vma)
                    .expect("fresh space cannot overlap");
            }

            let shared = vma.flags.contains(VmFlags::SHARED);
            let mut va = vma.start;
            while va < vma.end {
                if let Some((paddr, mut flags, _)) = self.vm_space.query(va) {
                    use vesper_frame::mm::page_table::PtFlags;
                    let page_paddr = paddr & !(PAGE_SIZE - 1);
                    if !shared && flags.contains(PtFlags::WRITABLE) {
                        self.vm_space.protect(va, |f| f - PtFlags::WRITABLE);
                        flags -= PtFlags::WRITABLE;
                    }
                    child.vm_space.map(va, page_paddr, flags)?;
                    vmo::take_mapping_claim(page_paddr);
                }
                va += PAGE_SIZE;
            }
        }

        let mut child_inner = child.inner.write();
        child_inner.brk_base = inner.brk_base;
        child_inner.brk = inner.brk;
        drop(child_inner);
        self.bump_seq();
        Ok(child)
    }

    /// Fault-tolerant copy out of the space, resolving missing
    /// translations through the page-fault policy.
    pub fn read_bytes(self: &Arc<Self>, addr: Vaddr, buf: &mut [u8]) -> Result<()> {
        self.access_bytes(addr, buf.len(), false, |paddr, offset, len| {
            let src = vesper_frame::mm::paddr_to_vaddr(paddr) as *const u8;
            // SAFETY: The translation was just resolved and the frame is
            // linearly mapped.
            unsafe {
                core::ptr::copy_nonoverlapping(src, buf[offset..].as_mut_ptr(), len);
            }
        })
    }

    /// Fault-tolerant copy into the space, driving copy-on-write.
    pub fn write_bytes(self: &Arc<Self>, addr: Vaddr, buf: &[u8]) -> Result<()> {
        self.access_bytes(addr, buf.len(), true, |paddr, offset, len| {
            let dst = vesper_frame::mm::paddr_to_vaddr(paddr) as *mut u8;
            // SAFETY: The translation was just resolved writable and the
            // frame is linearly mapped.
            unsafe {
                core::ptr::copy_nonoverlapping(buf[offset..].as_ptr(), dst, len);
            }
        })
    }

    pub fn read_val<T: Copy>(self: &Arc<Self>, addr: Vaddr) -> Result<T> {
        let mut val = core::mem::MaybeUninit::<T>::uninit();
        // SAFETY: The buffer spans exactly the value being read.
        let buf = unsafe {
            core::slice::from_raw_parts_mut(val.as_mut_ptr() as *mut u8, core::mem::size_of::<T>())
        };
        self.read_bytes(addr, buf)?;
        // SAFETY: `read_bytes` filled the buffer or returned an error.
        Ok(unsafe { val.assume_init() })
    }

    pub fn write_val<T: Copy>(self: &Arc<Self>, addr: Vaddr, val: &T) -> Result<()> {
        // SAFETY: The buffer spans exactly the value being written.
        let buf = unsafe {
            core::slice::from_raw_parts(val as *const T as *const u8, core::mem::size_of::<T>())
        };
        self.write_bytes(addr, buf)
    }

    fn access_bytes(
        self: &Arc<Self>,
        addr: Vaddr,
        len: usize,
        write: bool,
        mut copy: impl FnMut(Paddr, usize, usize),
    ) -> Result<()> {
        use vesper_frame::mm::page_table::PtFlags;

        let mut done = 0;
        while done < len {
            let va = addr + done;
            let page_end = (va + 1).align_up(PAGE_SIZE).min(addr + len);
            let chunk = page_end - va;

            let mut attempts = 0;
            let paddr = loop {
                match self.vm_space.query(va) {
                    Some((paddr, flags, _)) if !write || flags.contains(PtFlags::WRITABLE) => {
                        break paddr;
                    }
                    resolved => {
                        attempts += 1;
                        if attempts > 2 {
                            return_errno_with_message!(Errno::EFAULT, "unresolvable access");
                        }
                        let info = crate::vm::PageFaultInfo {
                            addr: va,
                            write,
                            present: resolved.is_some(),
                            user: false,
                            instruction: false,
                        };
                        crate::vm::handle_vmar_fault(self, &info)?;
                    }
                }
            };
            copy(paddr, done, chunk);
            done += chunk;
        }
        Ok(())
    }
}

impl Drop for Vmar {
    fn drop(&mut self) {
        // Release every translation's frame claim; objects go with
        // their own references.
        let mut inner = self.inner.write();
        let mut gather = TlbGather::new();
        while let Some(idx) = inner.tree.first_idx() {
            let vma = inner.tree.remove(idx);
            self.teardown_vma_locked(&vma, &mut gather);
        }
        gather.finish_with(self.vm_space.cpu_mask(), vmo::release_mapping_claim);
    }
}

/// Grants the fault path access to tree internals under the read lock.
pub(crate) struct VmaLookup<'a> {
    guard: vesper_frame::sync::RwMutexReadGuard<'a, VmarInner>,
}

impl Vmar {
    pub(crate) fn lookup(&self) -> VmaLookup<'_> {
        VmaLookup {
            guard: self.inner.read(),
        }
    }

    /// Write-locked attachment of a lazily created backing object to the
    /// area containing `addr`.
    pub(crate) fn attach_vmo(&self, addr: Vaddr, vmo: Arc<Vmo>) -> Result<MappedVmo> {
        let mut inner = self.inner.write();
        let Some(idx) = inner.tree.find(addr) else {
            return_errno_with_message!(Errno::EFAULT, "area vanished during fault");
        };
        let vma = inner.tree.vma_mut(idx);
        if let Some(existing) = &vma.vmo {
            return Ok(existing.clone());
        }
        let mapped = MappedVmo {
            vmo: vmo.clone(),
            pgoff: 0,
        };
        vma.vmo = Some(mapped.clone());
        let (start, pgoff, nr) = (vma.start, mapped.pgoff, vma.nr_pages());
        vmo.register_mapper(&self.vm_space, start, pgoff, nr);
        self.bump_seq();
        Ok(mapped)
    }

    /// Extends a `GROWSDOWN` area downward to cover a fault at `addr`
    /// just below it. Bounded growth, with one page kept free toward the
    /// preceding area.
    pub(crate) fn grow_stack(&self, addr: Vaddr) -> Result<()> {
        /// The most a stack may grow in one fault.
        const MAX_GROWTH: usize = 64 * PAGE_SIZE;

        let mut inner = self.inner.write();
        let Some(idx) = inner.tree.find_intersecting(addr, MAX_USERSPACE_VADDR) else {
            return_errno_with_message!(Errno::EFAULT, "no stack above the fault");
        };
        let vma = inner.tree.vma(idx);
        if !vma.flags.contains(VmFlags::GROWSDOWN)
            || addr >= vma.start
            || vma.start - (addr & !(PAGE_SIZE - 1)) > MAX_GROWTH
        {
            return_errno_with_message!(Errno::EFAULT, "fault outside any growable area");
        }
        let new_start = addr & !(PAGE_SIZE - 1);
        if let Some(prev) = inner.tree.prev_idx(idx) {
            if new_start < inner.tree.vma(prev).end + GUARD_SIZE {
                return_errno_with_message!(Errno::ENOMEM, "stack would hit the area below");
            }
        }
        let vma = inner.tree.vma_mut(idx);
        let delta_pages = (vma.start - new_start) / PAGE_SIZE;
        vma.start = new_start;
        if let Some(mapped) = &mut vma.vmo {
            // Keep offsets stable: the object view slides with the start.
            if mapped.pgoff >= delta_pages {
                mapped.pgoff -= delta_pages;
            }
        }
        inner.tree.range_updated(idx);
        self.bump_seq();
        Ok(())
    }

    /// Write-locked attachment of a private-copy overlay.
    pub(crate) fn attach_private_pages(&self, addr: Vaddr, vmo: Arc<Vmo>) -> Result<Arc<Vmo>> {
        let mut inner = self.inner.write();
        let Some(idx) = inner.tree.find(addr) else {
            return_errno_with_message!(Errno::EFAULT, "area vanished during fault");
        };
        let vma = inner.tree.vma_mut(idx);
        if let Some(existing) = &vma.private_pages {
            return Ok(existing.clone());
        }
        vma.private_pages = Some(vmo.clone());
        self.bump_seq();
        Ok(vmo)
    }
}

impl VmaLookup<'_> {
    pub fn find(&self, addr: Vaddr) -> Option<&Vma> {
        self.guard.tree.find(addr).map(|idx| self.guard.tree.vma(idx))
    }
}

fn check_user_range(range: &Range<Vaddr>) -> Result<()> {
    if range.start % PAGE_SIZE != 0
        || range.end % PAGE_SIZE != 0
        || range.start >= range.end
        || range.end > MAX_USERSPACE_VADDR
    {
        return_errno_with_message!(Errno::EINVAL, "bad user range");
    }
    Ok(())
}

fn check_edit_range(range: &Range<Vaddr>) -> Result<()> {
    if range.start % PAGE_SIZE != 0 || range.end % PAGE_SIZE != 0 || range.start >= range.end {
        return_errno_with_message!(Errno::EINVAL, "bad edit range");
    }
    Ok(())
}

/// The number of slots in a per-task VMA cache.
const VMA_CACHE_SLOTS: usize = 4;

/// A small per-task cache of recent lookups, validated against the
/// space's sequence number.
pub struct VmaCache {
    seq: u64,
    entries: [Option<Vma>; VMA_CACHE_SLOTS],
    hand: usize,
}

impl Default for VmaCache {
    fn default() -> Self {
        Self::new()
    }
}

impl VmaCache {
    pub const fn new() -> Self {
        Self {
            seq: 0,
            entries: [None, None, None, None],
            hand: 0,
        }
    }

    /// Finds the area containing `addr`, trying the cache first. The
    /// cache self-invalidates when the space has changed structurally.
    pub fn find(&mut self, vmar: &Vmar, addr: Vaddr) -> Option<Vma> {
        let seq = vmar.seq();
        if self.seq != seq {
            self.entries = [None, None, None, None];
            self.seq = seq;
        } else {
            for entry in self.entries.iter().flatten() {
                if entry.contains(addr) {
                    return Some(entry.clone());
                }
            }
        }
        let found = vmar.find(addr)?;
        self.entries[self.hand] = Some(found.clone());
        self.hand = (self.hand + 1) % VMA_CACHE_SLOTS;
        Some(found)
    }
}
