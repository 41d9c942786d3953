// SPDX-License-Identifier: MPL-2.0

//! CPU identity.

use core::sync::atomic::{AtomicU32, Ordering::Relaxed};

static NR_CPUS: AtomicU32 = AtomicU32::new(1);

pub fn num_cpus() -> u32 {
    NR_CPUS.load(Relaxed)
}

/// Returns the identifier of the executing CPU.
///
/// The boot path stores each CPU's logical id in `IA32_TSC_AUX` so it can
/// be read cheaply with `rdpid`-less `rdtscp` semantics via the MSR.
pub fn this_cpu() -> u32 {
    // SAFETY: `IA32_TSC_AUX` is always readable once written during boot.
    unsafe { x86::msr::rdmsr(x86::msr::IA32_TSC_AUX) as u32 }
}

/// Records the number of online CPUs. Called once by the boot CPU after
/// enumerating the application processors.
pub fn set_num_cpus(nr: u32) {
    NR_CPUS.store(nr, Relaxed);
}

/// Stores the executing CPU's logical id. Each CPU calls this on its way
/// up, before any per-CPU state is touched.
pub fn set_this_cpu(id: u32) {
    // SAFETY: `IA32_TSC_AUX` has no side effects besides being readable
    // back; it is dedicated to the CPU id by this kernel.
    unsafe { x86::msr::wrmsr(x86::msr::IA32_TSC_AUX, id as u64) }
}

/// Idles until the next interrupt.
pub fn halt_wait() {
    x86_64::instructions::hlt();
}
