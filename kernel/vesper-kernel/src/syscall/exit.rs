// SPDX-License-Identifier: MPL-2.0

use super::SyscallContext;
use crate::prelude::*;

pub fn sys_exit(args: [u64; 6], ctx: &mut SyscallContext) -> Result<isize> {
    let code = args[0] as i32;
    // Tear down now; the task unwinds through the user-mode loop, which
    // notices the zombie state and never returns to user code.
    crate::process::exit::exit_process(ctx.process, code);
    Ok(0)
}
