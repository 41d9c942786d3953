// SPDX-License-Identifier: MPL-2.0

use vesper_frame::{
    mm::sim,
    task::{Priority, SchedPolicy, Task, TaskOptions},
};

use super::*;

fn task_with(policy: SchedPolicy) -> Arc<Task> {
    sim::init();
    TaskOptions::new(|| {}).policy(policy).build().unwrap()
}

fn rt_task(prio: u16) -> Arc<Task> {
    task_with(SchedPolicy::Fifo(Priority::new(prio)))
}

fn rr_task(prio: u16) -> Arc<Task> {
    task_with(SchedPolicy::RoundRobin(Priority::new(prio)))
}

fn fair_task(nice: i8) -> Arc<Task> {
    task_with(SchedPolicy::Fair(nice))
}

#[test]
fn rt_picks_highest_level_fifo_within_level() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();

    let low = rt_task(10);
    let first = rt_task(20);
    let second = rt_task(20);
    rq.enqueue(first.clone());
    rq.enqueue(low.clone());
    rq.enqueue(second.clone());
    assert_eq!(rq.nr_running(), 3);

    // The lowest level index wins; equal levels come out in enqueue
    // order.
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &low));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &first));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &second));
}

#[test]
fn rt_wakeup_preempts_lower_priority_runner() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();

    let low = rt_task(10);
    rq.enqueue(low.clone());
    let running = rq.pick_next().unwrap();
    assert!(Arc::ptr_eq(&running, &low));

    // A higher-priority waker demands the CPU...
    let high = rt_task(5);
    assert!(rq.enqueue(high.clone()));
    assert!(rq.should_preempt(&low));

    // ...and the preempted task goes back to the head of its own level.
    rq.enqueue(low.clone());
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &high));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &low));

    // An equal-priority waker does not preempt a FIFO runner.
    let peer = rt_task(5);
    rq.enqueue(high.clone());
    let running = rq.pick_next().unwrap();
    assert!(!rq.enqueue(peer));
    assert!(!rq.should_preempt(&running));
}

#[test]
fn round_robin_rotates_to_tail_on_slice_expiry() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();

    let a = rr_task(10);
    let b = rr_task(10);
    rq.enqueue(a.clone());
    rq.enqueue(b.clone());

    let running = rq.pick_next().unwrap();
    assert!(Arc::ptr_eq(&running, &a));

    // FIFO-class peers never expire; RR ones do after their slice.
    let ticks_per_slice = (super::rt::RR_TIMESLICE_NS / vesper_frame::config::TICK_NS as i64) as
        usize;
    for _ in 0..ticks_per_slice - 1 {
        assert!(!rq.tick(&running));
    }
    assert!(rq.tick(&running));

    // The dispatcher puts the expired task back; it lands at the tail.
    rq.enqueue(a.clone());
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &b));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &a));
}

#[test]
fn fifo_tasks_are_not_ticked_off_the_cpu() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();
    let solo = rt_task(3);
    rq.enqueue(solo.clone());
    let running = rq.pick_next().unwrap();
    for _ in 0..1000 {
        assert!(!rq.tick(&running));
    }
    assert!(!rq.should_preempt(&running));
}

/// Runs the queue for `ticks` ticks and returns how many each task got.
fn drive_fair(rq: &mut RunQueue, tasks: &[Arc<Task>], ticks: usize) -> Vec<usize> {
    let mut counts = vec![0usize; tasks.len()];
    let mut current = rq.pick_next().unwrap();
    for _ in 0..ticks {
        let slot = tasks
            .iter()
            .position(|t| Arc::ptr_eq(t, &current))
            .expect("unknown task running");
        counts[slot] += 1;
        rq.tick(&current);
        if rq.should_preempt(&current) {
            rq.enqueue(current.clone());
            current = rq.pick_next().unwrap();
        }
    }
    counts
}

#[test]
fn fair_equal_weights_get_equal_time() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();

    let x = fair_task(0);
    let y = fair_task(0);
    rq.enqueue(x.clone());
    rq.enqueue(y.clone());

    let counts = drive_fair(&mut *rq, &[x, y], 1000);
    let diff = counts[0].abs_diff(counts[1]);
    assert!(diff <= 2, "unfair split: {:?}", counts);
}

#[test]
fn fair_weights_bias_cpu_time() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();

    let greedy = fair_task(-5);
    let meek = fair_task(5);
    rq.enqueue(greedy.clone());
    rq.enqueue(meek.clone());

    let counts = drive_fair(&mut *rq, &[greedy, meek], 2000);
    assert!(
        counts[0] > counts[1] * 4,
        "weights had no effect: {:?}",
        counts
    );
}

#[test]
fn idle_class_runs_last() {
    let sched = ClassScheduler::new(1);
    let mut rq = sched.rq(0).lock();
    let idle = task_with(SchedPolicy::Idle);
    rq.enqueue(idle.clone());

    // Nothing runnable: the idle task is picked, again and again.
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &idle));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &idle));

    // Any real work outranks it.
    let worker = fair_task(0);
    assert!(rq.enqueue(worker.clone()));
    assert!(rq.should_preempt(&idle));
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &worker));

    // And the real-time class outranks the fair one.
    let urgent = rt_task(0);
    rq.enqueue(urgent.clone());
    assert!(rq.should_preempt(&worker));
    rq.enqueue(worker);
    assert!(Arc::ptr_eq(&rq.pick_next().unwrap(), &urgent));
}
