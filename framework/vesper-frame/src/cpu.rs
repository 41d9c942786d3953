// SPDX-License-Identifier: MPL-2.0

//! CPU identity, CPU sets, and CPU-local storage.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use bitvec::prelude::*;
use spin::Once;

use crate::config::MAX_CPUS;

pub use crate::arch::cpu::{num_cpus, this_cpu};

/// Defines one CPU-local variable per declaration.
///
/// # Example
///
/// ```ignore
/// use core::cell::RefCell;
///
/// crate::cpu_local! {
///     static FOO: RefCell<u32> = RefCell::new(1);
/// }
///
/// let guard = crate::trap::disable_local();
/// *FOO.get_with(&guard).borrow_mut() += 1;
/// ```
#[macro_export]
macro_rules! cpu_local {
    // empty
    () => {};

    // multiple declarations
    ($(#[$attr:meta])* $vis:vis static $name:ident: $t:ty = $init:expr; $($rest:tt)*) => {
        $(#[$attr])* $vis static $name: $crate::CpuLocal<$t> = $crate::CpuLocal::new(|| $init);
        $crate::cpu_local!($($rest)*);
    };

    // single declaration
    ($(#[$attr:meta])* $vis:vis static $name:ident: $t:ty = $init:expr) => (
        $(#[$attr])* $vis static $name: $crate::CpuLocal<$t> = $crate::CpuLocal::new(|| $init);
    );
}

/// One slot of CPU-local storage per possible CPU.
///
/// The slots are materialized on first use, one cache line apart so that
/// neighbouring CPUs do not false-share. A slot only hands out immutable
/// references; use atomics or `RefCell` for interior mutation.
pub struct CpuLocal<T> {
    init: fn() -> T,
    slots: Once<Vec<CachePadded<T>>>,
}

#[repr(align(64))]
struct CachePadded<T>(T);

impl<T> CpuLocal<T> {
    /// Creates the storage from a per-CPU initializer.
    pub const fn new(init: fn() -> T) -> Self {
        Self {
            init,
            slots: Once::new(),
        }
    }

    fn slots(&self) -> &Vec<CachePadded<T>> {
        self.slots.call_once(|| {
            let nr = num_cpus() as usize;
            let mut slots = Vec::with_capacity(nr);
            for _ in 0..nr {
                slots.push(CachePadded((self.init)()));
            }
            slots
        })
    }

    /// The slot of the executing CPU.
    ///
    /// The caller must keep the task pinned to the CPU (IRQs or preemption
    /// disabled) for the reference to remain the "local" one; prefer
    /// [`get_with`].
    ///
    /// [`get_with`]: Self::get_with
    pub fn get(&self) -> &T {
        &self.slots()[this_cpu() as usize].0
    }

    /// The slot of the executing CPU, with the pinning witnessed by an
    /// IRQ-disabled guard.
    pub fn get_with<'a>(&'a self, _guard: &'a crate::trap::DisabledLocalIrqGuard) -> &'a T {
        self.get()
    }

    /// The slot of an arbitrary CPU. Cross-CPU access requires `T: Sync`.
    pub fn get_on_cpu(&self, cpu: u32) -> &T
    where
        T: Sync,
    {
        &self.slots()[cpu as usize].0
    }
}

// SAFETY: A non-`Sync` slot value is only reachable through `get`, which
// hands it to the owning CPU alone; cross-CPU access through `get_on_cpu`
// additionally requires `T: Sync`.
unsafe impl<T: Send> Sync for CpuLocal<T> {}

/// A subset of the CPUs in the system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuSet {
    bitset: BitVec,
}

impl CpuSet {
    /// A set containing every possible CPU.
    pub fn new_full() -> Self {
        Self {
            bitset: bitvec![1; num_cpus() as usize],
        }
    }

    /// An empty set.
    pub fn new_empty() -> Self {
        Self {
            bitset: bitvec![0; num_cpus() as usize],
        }
    }

    pub fn add(&mut self, cpu_id: u32) {
        self.bitset.set(cpu_id as usize, true);
    }

    pub fn remove(&mut self, cpu_id: u32) {
        self.bitset.set(cpu_id as usize, false);
    }

    pub fn contains(&self, cpu_id: u32) -> bool {
        self.bitset.get(cpu_id as usize).as_deref() == Some(&true)
    }

    pub fn count(&self) -> usize {
        self.bitset.count_ones()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.bitset.iter_ones().map(|idx| idx as u32)
    }
}

/// A lock-free set of CPUs, used where readers must not take locks (e.g.
/// the set of CPUs an address space is active on).
pub struct AtomicCpuSet {
    bits: AtomicU64,
}

static_assertions::const_assert!(MAX_CPUS <= u64::BITS as usize);

impl AtomicCpuSet {
    pub const fn new_empty() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// Adds a CPU with release semantics, so that prior stores (e.g. the
    /// page-table root switch) are visible to whoever observes the bit.
    pub fn add(&self, cpu_id: u32) {
        self.bits.fetch_or(1 << cpu_id, Ordering::Release);
    }

    pub fn remove(&self, cpu_id: u32) {
        self.bits.fetch_and(!(1 << cpu_id), Ordering::Release);
    }

    pub fn contains(&self, cpu_id: u32) -> bool {
        self.bits.load(Ordering::Acquire) & (1 << cpu_id) != 0
    }

    /// A snapshot of the set with acquire semantics.
    pub fn load(&self) -> u64 {
        self.bits.load(Ordering::Acquire)
    }
}

/// Iterates the CPU ids of a snapshot taken with [`AtomicCpuSet::load`].
pub fn iter_cpu_mask(mut mask: u64) -> impl Iterator<Item = u32> {
    core::iter::from_fn(move || {
        if mask == 0 {
            return None;
        }
        let cpu = mask.trailing_zeros();
        mask &= mask - 1;
        Some(cpu)
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cpu_mask_iteration() {
        let cpus: Vec<u32> = iter_cpu_mask(0b1011).collect();
        assert_eq!(cpus, alloc::vec![0, 1, 3]);
        assert_eq!(iter_cpu_mask(0).count(), 0);
    }
}
