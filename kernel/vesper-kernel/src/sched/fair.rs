// SPDX-License-Identifier: MPL-2.0

//! The weighted-fair class.
//!
//! Runnable tasks are ordered by virtual runtime, which advances in
//! inverse proportion to the task's weight; the pick is always the
//! minimum. A newly queued task is clamped to a small deficit below the
//! queue's minimum so it gets prompt service without starving the rest.

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::Ordering::Relaxed;

use vesper_frame::{config::TICK_NS, task::Task};

/// The weight of nice 0; vruntime advances at real time for it.
const NICE_0_WEIGHT: u64 = 1024;

/// How far below `min_vruntime` a waking task may start.
const WAKEUP_DEFICIT_NS: u64 = 4_000_000;

/// How much a queued task must trail the current one before it preempts.
const PREEMPT_GRANULARITY_NS: u64 = 2_000_000;

/// The nice-to-weight table, geometric with a ~1.25 step per nice level,
/// indexed by `nice + 20`.
#[rustfmt::skip]
const NICE_TO_WEIGHT: [u64; 40] = [
    88761, 71755, 56483, 46273, 36291,
    29154, 23254, 18705, 14949, 11916,
     9548,  7620,  6100,  4904,  3906,
     3121,  2501,  1991,  1586,  1277,
     1024,   820,   655,   526,   423,
      335,   272,   215,   172,   137,
      110,    87,    70,    56,    45,
       36,    29,    23,    18,    15,
];

pub(super) fn weight_of(nice: i8) -> u64 {
    NICE_TO_WEIGHT[(nice as i16 + 20) as usize]
}

pub(super) struct FairRunQueue {
    /// Keyed by (vruntime, tie-breaker).
    tree: BTreeMap<(u64, u64), Arc<Task>>,
    min_vruntime: u64,
    next_seq: u64,
}

impl FairRunQueue {
    pub fn new() -> Self {
        Self {
            tree: BTreeMap::new(),
            min_vruntime: 0,
            next_seq: 0,
        }
    }

    pub fn enqueue(&mut self, task: Arc<Task>, _nice: i8) {
        let attr = task.sched_attr();
        let clamped = attr
            .vruntime
            .load(Relaxed)
            .max(self.min_vruntime.saturating_sub(WAKEUP_DEFICIT_NS));
        attr.vruntime.store(clamped, Relaxed);

        let seq = self.next_seq;
        self.next_seq += 1;
        self.tree.insert((clamped, seq), task);
    }

    pub fn pick_next(&mut self) -> Option<Arc<Task>> {
        let (&key, _) = self.tree.iter().next()?;
        let task = self.tree.remove(&key).unwrap();
        self.min_vruntime = self.min_vruntime.max(key.0);
        Some(task)
    }

    /// Charges one tick of execution to the running task.
    pub fn charge_tick(&mut self, current: &Arc<Task>, nice: i8) {
        let delta = TICK_NS * NICE_0_WEIGHT / weight_of(nice);
        current.sched_attr().vruntime.fetch_add(delta, Relaxed);
    }

    /// Whether the queue's minimum has fallen far enough behind the
    /// running task to take over.
    pub fn should_preempt(&self, current: &Arc<Task>) -> bool {
        let Some((&(min_vruntime, _), _)) = self.tree.iter().next() else {
            return false;
        };
        let current_vruntime = current.sched_attr().vruntime.load(Relaxed);
        min_vruntime + PREEMPT_GRANULARITY_NS < current_vruntime
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}
