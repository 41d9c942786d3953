// SPDX-License-Identifier: MPL-2.0

use align_ext::AlignExt;

use super::SyscallContext;
use crate::{prelude::*, vm::VmFlags};

bitflags! {
    struct MmapProt: u64 {
        const PROT_READ  = 0x1;
        const PROT_WRITE = 0x2;
        const PROT_EXEC  = 0x4;
    }
}

bitflags! {
    struct MmapFlags: u64 {
        const MAP_SHARED    = 0x01;
        const MAP_PRIVATE   = 0x02;
        const MAP_FIXED     = 0x10;
        const MAP_ANONYMOUS = 0x20;
        const MAP_GROWSDOWN = 0x0100;
        const MAP_HUGETLB   = 0x4_0000;
    }
}

fn vm_flags_of(prot: MmapProt, flags: MmapFlags) -> VmFlags {
    let mut vm_flags = VmFlags::USER;
    if prot.contains(MmapProt::PROT_READ) {
        vm_flags |= VmFlags::READ;
    }
    if prot.contains(MmapProt::PROT_WRITE) {
        vm_flags |= VmFlags::WRITE;
    }
    if prot.contains(MmapProt::PROT_EXEC) {
        vm_flags |= VmFlags::EXEC;
    }
    if flags.contains(MmapFlags::MAP_SHARED) {
        vm_flags |= VmFlags::SHARED;
    }
    if flags.contains(MmapFlags::MAP_GROWSDOWN) {
        vm_flags |= VmFlags::GROWSDOWN;
    }
    if flags.contains(MmapFlags::MAP_HUGETLB) {
        vm_flags |= VmFlags::HUGEPAGE;
    }
    vm_flags
}

pub fn sys_mmap(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let addr = args[0] as Vaddr;
    let len = args[1] as usize;
    let prot = MmapProt::from_bits_truncate(args[2]);
    let flags = MmapFlags::from_bits_truncate(args[3]);
    // args[4] is the file descriptor, args[5] the file offset; only the
    // anonymous flavor is owned by the core.
    if len == 0 {
        return_errno_with_message!(Errno::EINVAL, "zero-length mapping");
    }
    if !flags.contains(MmapFlags::MAP_ANONYMOUS) {
        return_errno_with_message!(Errno::ENOSYS, "file mappings go through the fs layer");
    }
    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;

    let len = len.align_up(PAGE_SIZE);
    let hint = if flags.contains(MmapFlags::MAP_FIXED) {
        if addr % PAGE_SIZE != 0 {
            return_errno_with_message!(Errno::EINVAL, "unaligned fixed mapping");
        }
        // A fixed mapping silently replaces what was there.
        vmar.unmap_range(addr..addr + len).ok();
        Some(addr)
    } else {
        None
    };

    let start = vmar.map_range(hint, len, PAGE_SIZE, vm_flags_of(prot, flags), None)?;
    Ok(start as isize)
}
