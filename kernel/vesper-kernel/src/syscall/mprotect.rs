// SPDX-License-Identifier: MPL-2.0

use align_ext::AlignExt;

use super::SyscallContext;
use crate::{prelude::*, vm::VmFlags};

pub fn sys_mprotect(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let addr = args[0] as Vaddr;
    let len = args[1] as usize;
    let prot = args[2];
    if addr % PAGE_SIZE != 0 || len == 0 {
        return_errno_with_message!(Errno::EINVAL, "bad protect range");
    }

    let mut flags = VmFlags::USER;
    if prot & 0x1 != 0 {
        flags |= VmFlags::READ;
    }
    if prot & 0x2 != 0 {
        flags |= VmFlags::WRITE;
    }
    if prot & 0x4 != 0 {
        flags |= VmFlags::EXEC;
    }

    let vmar = ctx
        .process
        .vmar()
        .ok_or(Error::with_message(Errno::EINVAL, "no address space"))?;
    vmar.protect(addr..addr + len.align_up(PAGE_SIZE), flags)?;
    Ok(0)
}
