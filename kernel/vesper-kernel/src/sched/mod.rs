// SPDX-License-Identifier: MPL-2.0

//! The class-based scheduler.
//!
//! Every CPU owns a run queue with one sub-queue per scheduling class;
//! picking walks the classes in strict priority order: real-time, then
//! weighted-fair, then idle. The whole structure is installed into the
//! frame's scheduler slot, which owns the notion of the *current* task
//! and hands it back to us on every switch and tick.

mod fair;
mod rt;

use alloc::sync::Arc;

use vesper_frame::{
    config::TICK_NS,
    cpu::{num_cpus, this_cpu},
    task::{self, SchedPolicy, Scheduler, Task, TaskOptions},
};

use self::{fair::FairRunQueue, rt::RtRunQueue};
use crate::prelude::*;

/// Installs the class scheduler and parks one idle task per CPU.
pub fn init() {
    let scheduler: &'static ClassScheduler = Box::leak(Box::new(ClassScheduler::new(
        num_cpus() as usize,
    )));
    for cpu in 0..num_cpus() {
        let mut affinity = vesper_frame::cpu::CpuSet::new_empty();
        affinity.add(cpu);
        let idle = TaskOptions::new(idle_loop)
            .policy(SchedPolicy::Idle)
            .cpu_affinity(affinity)
            .build()
            .expect("cannot build the idle task");
        scheduler.rqs[cpu as usize].lock_irq_disabled().idle = Some(idle);
    }
    task::set_scheduler(scheduler);
    info!("scheduler online with {} run queues", num_cpus());
}

/// The idle class body: halt until work arrives, then yield to it.
fn idle_loop() {
    loop {
        if task::need_resched() {
            task::schedule_current();
        }
        vesper_frame::arch::cpu::halt_wait();
    }
}

/// One run queue per CPU behind the frame's `Scheduler` interface.
pub struct ClassScheduler {
    rqs: Vec<SpinLock<RunQueue>>,
}

/// A per-CPU ready-task structure.
pub(crate) struct RunQueue {
    #[allow(dead_code)]
    cpu: u32,
    /// What `pick_next` last handed to the dispatcher, and under which
    /// policy; wakeup preemption compares against it.
    current: Option<(Arc<Task>, SchedPolicy)>,
    nr_running: usize,
    rt: RtRunQueue,
    fair: FairRunQueue,
    idle: Option<Arc<Task>>,
}

impl ClassScheduler {
    pub fn new(nr_cpus: usize) -> Self {
        let rqs = (0..nr_cpus)
            .map(|cpu| {
                SpinLock::new(RunQueue {
                    cpu: cpu as u32,
                    current: None,
                    nr_running: 0,
                    rt: RtRunQueue::new(),
                    fair: FairRunQueue::new(),
                    idle: None,
                })
            })
            .collect();
        Self { rqs }
    }

    /// Picks a home CPU for a waking task: the last CPU when the
    /// affinity mask still allows it, otherwise the first allowed one.
    fn select_cpu(&self, task: &Arc<Task>) -> u32 {
        let affinity = task.cpu_affinity();
        let last = task
            .sched_attr()
            .last_cpu
            .load(core::sync::atomic::Ordering::Relaxed);
        if affinity.contains(last) {
            return last;
        }
        let next = affinity.iter().next();
        next.unwrap_or_else(this_cpu)
    }

    #[cfg(test)]
    pub(crate) fn rq(&self, cpu: usize) -> &SpinLock<RunQueue> {
        &self.rqs[cpu]
    }
}

impl Scheduler for ClassScheduler {
    fn enqueue(&self, task: Arc<Task>) -> Option<u32> {
        let cpu = self.select_cpu(&task);
        let mut rq = self.rqs[cpu as usize].lock_irq_disabled();
        rq.enqueue(task).then_some(cpu)
    }

    fn pick_next(&self, cpu: u32) -> Option<Arc<Task>> {
        self.rqs[cpu as usize].lock_irq_disabled().pick_next()
    }

    fn should_preempt(&self, cpu: u32, current: &Arc<Task>) -> bool {
        self.rqs[cpu as usize]
            .lock_irq_disabled()
            .should_preempt(current)
    }

    fn tick(&self, cpu: u32, current: &Arc<Task>) -> bool {
        self.rqs[cpu as usize].lock_irq_disabled().tick(current)
    }
}

impl RunQueue {
    /// Queues a runnable task under its class. Returns whether the CPU
    /// should reschedule because the newcomer outranks what runs now.
    pub(crate) fn enqueue(&mut self, task: Arc<Task>) -> bool {
        let policy = task.sched_attr().policy();
        match policy {
            SchedPolicy::Fifo(prio) | SchedPolicy::RoundRobin(prio) => {
                if matches!(policy, SchedPolicy::RoundRobin(_)) {
                    let attr = task.sched_attr();
                    if attr.rr_slice_ns.load(core::sync::atomic::Ordering::Relaxed) <= 0 {
                        attr.rr_slice_ns
                            .store(rt::RR_TIMESLICE_NS, core::sync::atomic::Ordering::Relaxed);
                    }
                }
                self.rt.enqueue(prio.get(), task);
                self.nr_running += 1;
                match &self.current {
                    None => true,
                    Some((_, SchedPolicy::Fair(_))) | Some((_, SchedPolicy::Idle)) => true,
                    Some((_, SchedPolicy::Fifo(cur))) | Some((_, SchedPolicy::RoundRobin(cur))) => {
                        prio.get() < cur.get()
                    }
                }
            }
            SchedPolicy::Fair(nice) => {
                self.fair.enqueue(task, nice);
                self.nr_running += 1;
                matches!(self.current, None | Some((_, SchedPolicy::Idle)))
            }
            SchedPolicy::Idle => {
                // The idle task is a permanent resident, not a queue
                // entry.
                self.idle = Some(task);
                false
            }
        }
    }

    /// The class walk: real-time, then fair, then idle.
    pub(crate) fn pick_next(&mut self) -> Option<Arc<Task>> {
        let picked = if let Some(task) = self.rt.pick_next() {
            self.nr_running -= 1;
            task
        } else if let Some(task) = self.fair.pick_next() {
            self.nr_running -= 1;
            task
        } else {
            self.idle.clone()?
        };
        self.current = Some((picked.clone(), picked.sched_attr().policy()));
        Some(picked)
    }

    /// Whether `current` should yield to a queued task right now.
    pub(crate) fn should_preempt(&self, current: &Arc<Task>) -> bool {
        match current.sched_attr().policy() {
            SchedPolicy::Fifo(prio) | SchedPolicy::RoundRobin(prio) => {
                self.rt.has_higher_than(prio.get())
            }
            SchedPolicy::Fair(_) => {
                if !self.rt.is_empty() {
                    return true;
                }
                self.fair.should_preempt(current)
            }
            SchedPolicy::Idle => self.nr_running > 0,
        }
    }

    /// Per-tick accounting for `current`. Returns whether its quantum
    /// expired.
    pub(crate) fn tick(&mut self, current: &Arc<Task>) -> bool {
        match current.sched_attr().policy() {
            SchedPolicy::Fifo(_) => false,
            SchedPolicy::RoundRobin(_) => {
                let attr = current.sched_attr();
                let left = attr
                    .rr_slice_ns
                    .fetch_sub(TICK_NS as i64, core::sync::atomic::Ordering::Relaxed)
                    - TICK_NS as i64;
                if left <= 0 {
                    // Refill now; the dispatcher re-enqueues the task at
                    // the tail of its level.
                    attr.rr_slice_ns
                        .store(rt::RR_TIMESLICE_NS, core::sync::atomic::Ordering::Relaxed);
                    return true;
                }
                false
            }
            SchedPolicy::Fair(nice) => {
                self.fair.charge_tick(current, nice);
                false
            }
            SchedPolicy::Idle => false,
        }
    }

    pub(crate) fn nr_running(&self) -> usize {
        self.nr_running
    }
}

#[cfg(test)]
mod test;
