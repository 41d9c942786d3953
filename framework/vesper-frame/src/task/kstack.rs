// SPDX-License-Identifier: MPL-2.0

//! Kernel stacks and the per-CPU stack pool.

use alloc::vec::Vec;

use log::warn;

use crate::{
    config::{KERNEL_STACK_POOL_TARGET, KERNEL_STACK_SIZE, PAGE_SIZE},
    cpu_local,
    mm::{frame::allocator, paddr_to_vaddr, Paddr},
    prelude::*,
    sync::{SpinLock, WaitQueue},
};

const STACK_ORDER: u32 = (KERNEL_STACK_SIZE / PAGE_SIZE).trailing_zeros();

/// A kernel stack: a physically contiguous block of frames addressed
/// through the linear mapping.
#[derive(Debug)]
pub struct KernelStack {
    base: Paddr,
}

impl KernelStack {
    /// Allocates a stack directly from the frame allocator.
    pub fn new() -> Result<Self> {
        let base = allocator::alloc_pages(STACK_ORDER as usize).ok_or(crate::Error::NoMemory)?;
        Ok(Self { base })
    }

    /// The lowest physical address of the stack.
    pub fn base_paddr(&self) -> Paddr {
        self.base
    }

    /// The virtual address just past the top of the stack, where a new
    /// task's stack pointer starts.
    pub fn end_vaddr(&self) -> usize {
        paddr_to_vaddr(self.base + KERNEL_STACK_SIZE)
    }
}

impl Drop for KernelStack {
    fn drop(&mut self) {
        allocator::free_pages(self.base, STACK_ORDER as usize);
    }
}

cpu_local! {
    static STACK_POOL: SpinLock<Vec<KernelStack>> = SpinLock::new(Vec::new());
}

static REFILL_WAKEUP: WaitQueue = WaitQueue::new();

pub(super) fn init() {
    // Pre-fill the boot CPU's pool so early task creation does not fall
    // back to direct allocation while the refill worker is not up yet.
    refill_cpu_pool(crate::cpu::this_cpu());
}

/// Takes a pre-allocated stack from the executing CPU's pool, falling back
/// to a direct allocation when the pool is dry.
pub(super) fn acquire() -> Result<KernelStack> {
    let popped = STACK_POOL.get().lock_irq_disabled().pop();
    match popped {
        Some(stack) => {
            REFILL_WAKEUP.wake_one();
            Ok(stack)
        }
        None => {
            REFILL_WAKEUP.wake_one();
            KernelStack::new()
        }
    }
}

fn refill_cpu_pool(cpu: u32) {
    loop {
        {
            let pool = STACK_POOL.get_on_cpu(cpu).lock_irq_disabled();
            if pool.len() >= KERNEL_STACK_POOL_TARGET {
                return;
            }
        }
        // Allocate outside the pool lock; the worst case is a transient
        // overshoot by concurrent refills.
        match KernelStack::new() {
            Ok(stack) => STACK_POOL.get_on_cpu(cpu).lock_irq_disabled().push(stack),
            Err(_) => {
                warn!("kernel stack pool refill failed: out of memory");
                return;
            }
        }
    }
}

/// The body of the asynchronous pool-refill worker. The kernel spawns this
/// in a dedicated kernel thread on the boot CPU before the secondary CPUs
/// start scheduling.
pub fn refill_worker_loop() -> ! {
    loop {
        for cpu in 0..crate::cpu::num_cpus() {
            refill_cpu_pool(cpu);
        }
        REFILL_WAKEUP.wait_until(|| {
            let some_pool_dry = (0..crate::cpu::num_cpus()).any(|cpu| {
                STACK_POOL.get_on_cpu(cpu).lock_irq_disabled().len() < KERNEL_STACK_POOL_TARGET
            });
            some_pool_dry.then_some(())
        });
    }
}
