// SPDX-License-Identifier: MPL-2.0

//! The periodic tick.
//!
//! The arch timer interrupt funnels into [`on_tick`], which advances the
//! uptime, runs the scheduler's per-tick bookkeeping, and lets RCU note a
//! potential quiescent state. Uptime is tick-granular; that is all the
//! frame needs for deadlines and time slices.

use core::sync::atomic::{AtomicU64, Ordering::Relaxed};

use crate::config::TICK_NS;

static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// The number of boot-CPU ticks since boot.
pub fn jiffies() -> u64 {
    JIFFIES.load(Relaxed)
}

/// The uptime in nanoseconds, at tick granularity.
pub fn uptime_ns() -> u64 {
    jiffies() * TICK_NS
}

/// Handles one timer tick on the executing CPU.
pub fn on_tick() {
    if crate::cpu::this_cpu() == 0 {
        JIFFIES.fetch_add(1, Relaxed);
    }
    crate::task::scheduler_tick();
    crate::sync::rcu::note_tick();
}
