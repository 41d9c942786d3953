// SPDX-License-Identifier: MPL-2.0

//! The real-time class: 100 strict priority levels, FIFO within a
//! level, indexed by a two-word bitmap. `SCHED_FIFO` tasks run until
//! they block or yield; `SCHED_RR` tasks carry a time slice and rotate
//! to the tail of their level on expiry.

use alloc::{collections::VecDeque, sync::Arc};

use vesper_frame::task::{Task, MAX_RT_PRIO};

/// The round-robin quantum.
pub(super) const RR_TIMESLICE_NS: i64 = 100_000_000;

pub(super) struct RtRunQueue {
    /// Bit `p` set means `queues[p]` is non-empty; a lower level is a
    /// higher priority.
    bitmap: [u64; 2],
    queues: [VecDeque<Arc<Task>>; MAX_RT_PRIO as usize],
    nr_queued: usize,
}

impl RtRunQueue {
    pub fn new() -> Self {
        Self {
            bitmap: [0; 2],
            queues: core::array::from_fn(|_| VecDeque::new()),
            nr_queued: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nr_queued == 0
    }

    /// Appends at the tail of the task's priority level.
    pub fn enqueue(&mut self, prio: u16, task: Arc<Task>) {
        debug_assert!(prio < MAX_RT_PRIO);
        self.queues[prio as usize].push_back(task);
        self.bitmap[(prio / 64) as usize] |= 1 << (prio % 64);
        self.nr_queued += 1;
    }

    /// The head of the highest non-empty level.
    pub fn pick_next(&mut self) -> Option<Arc<Task>> {
        let prio = self.highest_set()?;
        let queue = &mut self.queues[prio];
        let task = queue.pop_front().expect("bitmap said non-empty");
        if queue.is_empty() {
            self.bitmap[prio / 64] &= !(1 << (prio % 64));
        }
        self.nr_queued -= 1;
        Some(task)
    }

    /// Whether a queued task outranks priority `prio` strictly.
    pub fn has_higher_than(&self, prio: u16) -> bool {
        match self.highest_set() {
            Some(queued) => (queued as u16) < prio,
            None => false,
        }
    }

    fn highest_set(&self) -> Option<usize> {
        if self.bitmap[0] != 0 {
            return Some(self.bitmap[0].trailing_zeros() as usize);
        }
        if self.bitmap[1] != 0 {
            return Some(64 + self.bitmap[1].trailing_zeros() as usize);
        }
        None
    }
}
