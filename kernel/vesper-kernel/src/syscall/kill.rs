// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::{
    prelude::*,
    process::{process_table, signal},
};

pub fn sys_kill(args: [u64; 6], _ctx: &mut SyscallContext) -> Result<isize> {
    let pid = args[0] as i64;
    let signum = args[1] as u8;
    if pid <= 0 {
        return_errno_with_message!(Errno::EINVAL, "group signalling is not supported");
    }
    let target = process_table::get(pid as u32)
        .ok_or(Error::with_message(Errno::ESRCH, "no such process"))?;
    if signum != 0 {
        signal::send_signal(
            &target,
            signal::Signal {
                num: signum,
                fault_addr: 0,
            },
        );
    }
    Ok(0)
}
