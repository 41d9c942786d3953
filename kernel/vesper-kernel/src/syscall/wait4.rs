// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::{
    prelude::*,
    process::wait::{wait_child, WaitFilter},
};

pub fn sys_wait4(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let pid = args[0] as i64;
    let status_ptr = args[1] as Vaddr;

    let filter = if pid == -1 {
        WaitFilter::AnyChild
    } else if pid > 0 {
        WaitFilter::Child(pid as u32)
    } else {
        return_errno_with_message!(Errno::EINVAL, "process groups are not supported");
    };

    let (reaped, code) = wait_child(ctx.process, filter)?;
    if status_ptr != 0 {
        if let Some(vmar) = ctx.process.vmar() {
            // The wait status word: the exit code in bits 8..16.
            let status: i32 = (code & 0xff) << 8;
            vmar.write_val(status_ptr, &status)?;
        }
    }
    Ok(reaped as isize)
}
