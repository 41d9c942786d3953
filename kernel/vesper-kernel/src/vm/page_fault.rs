// SPDX-License-Identifier: MPL-2.0

//! The page-fault policy: demand paging and copy-on-write.
//!
//! The hardware handler (or the kernel's own fault-tolerant user-memory
//! accessors) funnels here with the faulting address and the decoded
//! cause bits. Kernel-mode faults consult the exception table before
//! this policy runs; a fault this policy cannot resolve becomes a
//! segmentation violation for user mode or a panic for the kernel.

use vesper_frame::mm::{
    frame::{allocator, meta, paddr_to_pfn},
    page_table::{PageSize, PtFlags, NR_ENTRIES},
    paddr_to_vaddr, MAX_USERSPACE_VADDR,
};

use super::{
    perms::VmFlags,
    vmar::{vma::Vma, Vmar},
    vmo::{self, Vmo},
};
use crate::prelude::*;

/// The decoded cause of a page fault.
#[derive(Clone, Copy, Debug)]
pub struct PageFaultInfo {
    pub addr: Vaddr,
    /// The access was a write.
    pub write: bool,
    /// The translation was present (a protection violation).
    pub present: bool,
    /// The fault came from user mode.
    pub user: bool,
    /// The access was an instruction fetch.
    pub instruction: bool,
}

/// Resolves a fault against an address space. `Ok(())` means the access
/// can be retried invisibly; an error becomes a `SIGSEGV` for user mode.
pub fn handle_vmar_fault(vmar: &Arc<Vmar>, info: &PageFaultInfo) -> Result<()> {
    if info.addr >= MAX_USERSPACE_VADDR {
        return_errno_with_message!(Errno::EFAULT, "fault outside the user range");
    }

    let vma = match lookup_vma(vmar, info.addr) {
        Some(vma) => vma,
        None => {
            // A miss just below a growable stack extends it.
            vmar.grow_stack(info.addr)?;
            lookup_vma(vmar, info.addr)
                .ok_or(Error::with_message(Errno::EFAULT, "no area at the fault"))?
        }
    };

    if !vma.flags.allows(info.write, info.instruction) {
        return_errno_with_message!(Errno::EACCES, "access exceeds the area's permissions");
    }
    if info.user && !vma.flags.contains(VmFlags::USER) {
        return_errno_with_message!(Errno::EACCES, "user access to a kernel area");
    }
    if vma.flags.intersects(VmFlags::IO | VmFlags::PFNMAP) {
        return_errno_with_message!(Errno::EFAULT, "no fault policy for raw mappings");
    }

    let va = info.addr & !(PAGE_SIZE - 1);
    if info.present && info.write {
        resolve_cow_write(vmar, &vma, va)
    } else if info.present {
        // A stale read fault; another CPU resolved it first.
        Ok(())
    } else {
        demand_page(vmar, &vma, va, info.write)
    }
}

fn lookup_vma(vmar: &Arc<Vmar>, addr: Vaddr) -> Option<Vma> {
    let lookup = vmar.lookup();
    lookup.find(addr).cloned()
}

/// Step 6 of the fault algorithm: a write hit a present, read-only
/// translation of a writable area.
fn resolve_cow_write(vmar: &Arc<Vmar>, vma: &Vma, va: Vaddr) -> Result<()> {
    let space = vmar.vm_space();
    let Some((paddr, flags, _)) = space.query(va) else {
        // The translation vanished under us; treat as not-present.
        return demand_page(vmar, vma, va, true);
    };
    if flags.contains(PtFlags::WRITABLE) {
        // Another CPU already broke the share.
        return Ok(());
    }
    let paddr = paddr & !(PAGE_SIZE - 1);

    if vma.flags.contains(VmFlags::SHARED) {
        space.protect(va, |f| f | PtFlags::WRITABLE | PtFlags::DIRTY);
        return Ok(());
    }

    let pgoff = vma.pgoff_of(va);
    let exclusive = meta::slot(paddr_to_pfn(paddr)).share_count() == 1
        && owns_frame(vma, pgoff, paddr);
    if exclusive {
        // The last mapper owns the page outright; re-arm the write bit.
        space.protect(va, |f| f | PtFlags::WRITABLE | PtFlags::DIRTY);
        return Ok(());
    }

    // Copy the page and retarget the translation.
    let new_page = allocator::alloc_page()
        .ok_or(Error::with_message(Errno::ENOMEM, "cannot copy a COW page"))?;
    // SAFETY: Both frames are whole pages in the linear mapping; the old
    // frame stays alive under its share claims.
    unsafe {
        core::ptr::copy_nonoverlapping(
            paddr_to_vaddr(paddr) as *const u8,
            paddr_to_vaddr(new_page) as *mut u8,
            PAGE_SIZE,
        );
    }

    let target = private_object(vmar, vma, va)?;
    target.add_page(pgoff, new_page);

    if let Some(old) = space.unmap(va) {
        vmo::release_mapping_claim(old & !(PAGE_SIZE - 1));
    }
    space.map(va, new_page, vma.flags.pt_flags() | PtFlags::DIRTY)?;
    vmo::take_mapping_claim(new_page);
    Ok(())
}

/// Step 7: a not-present fault allocates or finds the backing page and
/// installs the translation.
fn demand_page(vmar: &Arc<Vmar>, vma: &Vma, va: Vaddr, write: bool) -> Result<()> {
    let space = vmar.vm_space();

    // Under the huge hint, try to satisfy an anonymous fault with one
    // 2 MiB leaf; fall back to a base page on any obstacle.
    if vma.flags.contains(VmFlags::HUGEPAGE) && vma.flags.contains(VmFlags::ANON) {
        if let Some(res) = try_demand_huge(vmar, vma, va) {
            return res;
        }
    }

    let pgoff = vma.pgoff_of(va);
    let shared = vma.flags.contains(VmFlags::SHARED);

    let (paddr, fresh) = if vma.flags.contains(VmFlags::ANON) {
        let object = match &vma.vmo {
            Some(mapped) => mapped.vmo.clone(),
            None => vmar.attach_vmo(va, Vmo::anon_create())?.vmo,
        };
        match object.find_page(pgoff) {
            Some(existing) => (existing, false),
            None => (object.commit_page(pgoff)?, true),
        }
    } else {
        // File- or device-backed.
        let Some(mapped) = &vma.vmo else {
            return_errno_with_message!(Errno::EFAULT, "file area without an object");
        };
        if shared || mapped.vmo.is_device() {
            (mapped.vmo.commit_page(pgoff)?, false)
        } else {
            // Private file view: the page is copied into the area's
            // overlay on first access, read or write.
            let overlay = match &vma.private_pages {
                Some(overlay) => overlay.clone(),
                None => vmar.attach_private_pages(va, Vmo::anon_create())?,
            };
            match overlay.find_page(pgoff) {
                Some(existing) => (existing, false),
                None => {
                    let file_page = mapped.vmo.commit_page(pgoff)?;
                    let copy = allocator::alloc_page().ok_or(Error::with_message(
                        Errno::ENOMEM,
                        "cannot copy a private file page",
                    ))?;
                    // SAFETY: Both frames are whole pages in the linear
                    // mapping.
                    unsafe {
                        core::ptr::copy_nonoverlapping(
                            paddr_to_vaddr(file_page) as *const u8,
                            paddr_to_vaddr(copy) as *mut u8,
                            PAGE_SIZE,
                        );
                    }
                    overlay.add_page(pgoff, copy);
                    (copy, true)
                }
            }
        }
    };

    let mut flags = vma.flags.pt_flags();
    if !shared && !fresh {
        // A page that predates this mapper may be shared; writes must
        // go through the COW policy.
        flags -= PtFlags::WRITABLE;
    }
    if write {
        flags |= PtFlags::DIRTY;
    }
    if !shared && !fresh && write {
        // A write fault on a shared page: install read-only, then break
        // the share immediately.
        space.map(va, paddr, flags)?;
        vmo::take_mapping_claim(paddr);
        return resolve_cow_write(vmar, vma, va);
    }

    space.map(va, paddr, flags)?;
    vmo::take_mapping_claim(paddr);
    Ok(())
}

/// Attempts one 2 MiB mapping for an anonymous fault. `None` means the
/// caller should take the base-page path.
fn try_demand_huge(vmar: &Arc<Vmar>, vma: &Vma, va: Vaddr) -> Option<Result<()>> {
    const HUGE_SIZE: usize = PageSize::Size2M.bytes();
    const HUGE_ORDER: usize = 9;

    let space = vmar.vm_space();
    let huge_va = va & !(HUGE_SIZE - 1);
    if huge_va < vma.start || huge_va + HUGE_SIZE > vma.end {
        return None;
    }
    // The whole window must be untouched or the leaf would shadow
    // existing pages.
    for i in 0..NR_ENTRIES {
        if space.query(huge_va + i * PAGE_SIZE).is_some() {
            return None;
        }
    }
    let block = allocator::alloc_pages(HUGE_ORDER)?;

    let object = match &vma.vmo {
        Some(mapped) => mapped.vmo.clone(),
        None => match vmar.attach_vmo(va, Vmo::anon_create()) {
            Ok(mapped) => mapped.vmo,
            Err(e) => return Some(Err(e)),
        },
    };
    let base_pgoff = vma.pgoff_of(huge_va);
    for i in 0..NR_ENTRIES {
        object.add_page(base_pgoff + i, block + i * PAGE_SIZE);
        vmo::take_mapping_claim(block + i * PAGE_SIZE);
    }

    if let Err(e) = space.map_huge(huge_va, block, vma.flags.pt_flags(), PageSize::Size2M) {
        for i in 0..NR_ENTRIES {
            vmo::release_mapping_claim(block + i * PAGE_SIZE);
        }
        return Some(Err(e.into()));
    }
    Some(Ok(()))
}

/// The object that receives this area's private copies: the area's own
/// anonymous object, or the overlay of a private file view. Created
/// lazily under the write lock.
fn private_object(vmar: &Arc<Vmar>, vma: &Vma, va: Vaddr) -> Result<Arc<Vmo>> {
    if vma.flags.contains(VmFlags::ANON) {
        match &vma.vmo {
            Some(mapped) => Ok(mapped.vmo.clone()),
            None => Ok(vmar.attach_vmo(va, Vmo::anon_create())?.vmo),
        }
    } else {
        match &vma.private_pages {
            Some(overlay) => Ok(overlay.clone()),
            None => vmar.attach_private_pages(va, Vmo::anon_create()),
        }
    }
}

/// Whether the area's own objects hold `paddr` at `pgoff`.
fn owns_frame(vma: &Vma, pgoff: usize, paddr: Paddr) -> bool {
    if let Some(overlay) = &vma.private_pages {
        if overlay.find_page(pgoff) == Some(paddr) {
            return true;
        }
    }
    match &vma.vmo {
        Some(mapped) => mapped.vmo.find_page(pgoff) == Some(paddr),
        None => false,
    }
}

