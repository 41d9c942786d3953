// SPDX-License-Identifier: MPL-2.0

//! Kernel threads.

use vesper_frame::task::{SchedPolicy, Task, TaskOptions};

use crate::prelude::*;

/// Spawns a kernel thread running `func`. The thread has no user space;
/// it exits when `func` returns.
pub fn kernel_thread<F>(func: F) -> Result<Arc<Task>>
where
    F: Fn() + Send + Sync + 'static,
{
    Ok(TaskOptions::new(func).policy(SchedPolicy::Fair(0)).spawn()?)
}

/// Spawns the asynchronous kernel-stack pool refiller. Runs on the boot
/// CPU before the secondary CPUs enter the scheduler, so every CPU's
/// first thread creation finds a pre-allocated stack.
pub(crate) fn spawn_stack_pool_worker() {
    kernel_thread(|| vesper_frame::task::refill_worker_loop())
        .expect("cannot spawn the stack pool worker");
}
