// SPDX-License-Identifier: MPL-2.0

//! Compile-time tunables of the frame.

/// The size in bytes of a base page.
pub const PAGE_SIZE: usize = 0x1000;

/// log2 of [`PAGE_SIZE`].
pub const PAGE_SHIFT: usize = 12;

/// The number of buddy orders. A block of order `k` spans `2^k` base pages,
/// so the largest block is `2^(MAX_ORDER - 1)` pages (4 MiB).
pub const MAX_ORDER: usize = 11;

/// The upper bound on CPUs the frame is built for. The actual CPU count is
/// discovered at boot and is at most this value.
pub const MAX_CPUS: usize = 64;

/// The number of order-0 frames a per-CPU page cache may hold.
pub const PAGE_CACHE_CAPACITY: usize = 32;

/// Refill the per-CPU page cache up to this many frames when it runs dry.
pub const PAGE_CACHE_TARGET: usize = 16;

/// The size in bytes of a kernel stack, excluding the guard page.
pub const KERNEL_STACK_SIZE: usize = PAGE_SIZE * 16;

/// How many ready-to-use kernel stacks each CPU keeps pooled.
pub const KERNEL_STACK_POOL_TARGET: usize = 4;

/// The nanoseconds between two timer ticks (250 Hz).
pub const TICK_NS: u64 = 4_000_000;

/// The default fan-out of the RCU grace-period tree.
pub const RCU_FANOUT: usize = 64;
