// SPDX-License-Identifier: MPL-2.0

//! Host stand-ins for the architecture glue.
//!
//! These keep the same shape as the `x86` backend but touch no hardware.
//! CPU identity is a process-global that unit tests switch explicitly when
//! they simulate multiple CPUs, and "interrupt state" is a per-CPU flag
//! with the save/restore semantics the real backend has.

pub mod console {
    /// Sends one byte to the early console. Dropped on the host.
    pub fn send(_byte: u8) {}
}

pub mod cpu {
    use core::sync::atomic::{AtomicU32, Ordering::Relaxed};

    static NR_CPUS: AtomicU32 = AtomicU32::new(1);
    static CURRENT_CPU: AtomicU32 = AtomicU32::new(0);

    pub fn num_cpus() -> u32 {
        NR_CPUS.load(Relaxed)
    }

    pub fn this_cpu() -> u32 {
        CURRENT_CPU.load(Relaxed)
    }

    /// Records the number of simulated CPUs.
    pub fn set_num_cpus(nr: u32) {
        NR_CPUS.store(nr, Relaxed);
    }

    /// Switches the simulated current CPU. Only meaningful in tests that
    /// drive several CPUs from one thread of control.
    pub fn set_this_cpu(id: u32) {
        CURRENT_CPU.store(id, Relaxed);
    }

    /// Idles until something interesting happens. A no-op on the host.
    pub fn halt_wait() {
        core::hint::spin_loop();
    }
}

pub mod irq {
    use core::sync::atomic::{AtomicBool, Ordering::Relaxed};

    use crate::config::MAX_CPUS;

    #[allow(clippy::declare_interior_mutable_const)]
    const ENABLED: AtomicBool = AtomicBool::new(true);
    static IRQ_ENABLED: [AtomicBool; MAX_CPUS] = [ENABLED; MAX_CPUS];

    pub fn is_local_enabled() -> bool {
        IRQ_ENABLED[super::cpu::this_cpu() as usize].load(Relaxed)
    }

    pub fn disable_local() {
        IRQ_ENABLED[super::cpu::this_cpu() as usize].store(false, Relaxed);
    }

    pub fn enable_local() {
        IRQ_ENABLED[super::cpu::this_cpu() as usize].store(true, Relaxed);
    }

    pub fn send_ipi(_cpu: u32, _vector: crate::arch::IpiVector) {
        // Cross-CPU interrupts cannot be delivered on the host; the
        // portable callers treat the send as fire-and-forget.
    }
}

pub mod mm {
    use crate::mm::{Paddr, Vaddr};

    pub fn tlb_flush_addr(_vaddr: Vaddr) {}

    pub fn tlb_flush_all() {}

    /// # Safety
    ///
    /// Never called on the host; present only to keep callers portable.
    pub unsafe fn activate_page_table(_root_paddr: Paddr) {}

    pub fn current_page_table_paddr() -> Paddr {
        0
    }
}

pub mod context {
    /// Callee-saved register state of a suspended task.
    #[derive(Debug, Default, Clone, Copy)]
    #[repr(C)]
    pub struct CalleeRegs {
        pub sp: u64,
        pub bx: u64,
        pub bp: u64,
        pub r12: u64,
        pub r13: u64,
        pub r14: u64,
        pub r15: u64,
    }

    #[derive(Debug, Default, Clone, Copy)]
    #[repr(C)]
    pub struct TaskContext {
        pub regs: CalleeRegs,
        pub ip: usize,
    }

    impl TaskContext {
        pub const fn new() -> Self {
            Self {
                regs: CalleeRegs {
                    sp: 0,
                    bx: 0,
                    bp: 0,
                    r12: 0,
                    r13: 0,
                    r14: 0,
                    r15: 0,
                },
                ip: 0,
            }
        }
    }

    /// # Safety
    ///
    /// Real context switching requires a target stack; it cannot happen on
    /// the host.
    pub unsafe fn context_switch(_cur: *mut TaskContext, _nxt: *const TaskContext) {
        unimplemented!("context switching is not available on the host");
    }
}

pub mod fpu {
    /// Placeholder for the 512-byte FXSAVE area of the real backend.
    #[derive(Debug, Default)]
    pub struct FpuState;

    impl FpuState {
        pub fn new() -> Self {
            Self
        }

        pub fn save(&mut self) {}

        pub fn restore(&self) {}
    }
}

pub mod rng {
    /// A hardware random number, if the platform offers one. The host
    /// backend reports none so address-space randomization degrades to the
    /// deterministic path.
    pub fn read_random() -> Option<u64> {
        None
    }
}
