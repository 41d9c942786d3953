// SPDX-License-Identifier: MPL-2.0

//! The grace-period tree.
//!
//! Leaves cover consecutive CPUs; each internal node covers a range of
//! its children, up to the single root. For every new grace period each
//! node's pending mask is set to its online children; a CPU reporting a
//! quiescent state clears its bit in its leaf and, when a mask becomes
//! empty, the report propagates one level up. The child's lock is always
//! released before the parent's is taken, and every level re-checks that
//! it still reports against the current grace period. When the root mask
//! empties, the grace period completes and waiters are released.

use alloc::{boxed::Box, collections::VecDeque, vec::Vec};
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::sync::{SpinLock, WaitQueue};

/// A deferred cleanup function.
pub type RcuCallback = Box<dyn FnOnce() + Send + 'static>;

/// The most levels a tree may have; with a fan-out of 64 this covers
/// 64^4 CPUs, far beyond anything we boot on.
const MAX_LEVELS: usize = 4;

struct NodeState {
    /// The children that still owe a quiescent state for `gp_seq`.
    qsmask: u64,
    /// The grace period this node currently tracks.
    gp_seq: u64,
}

struct RcuNode {
    /// Parent node index and this node's bit in the parent's mask.
    parent: Option<(usize, u64)>,
    /// All children of this node (CPU bits for a leaf).
    children_mask: u64,
    state: SpinLock<NodeState>,
}

struct RcuData {
    /// Whether this CPU owes a quiescent state for `gp_seq`.
    qs_pending: AtomicBool,
    /// The grace period the CPU reports against.
    gp_seq: AtomicU64,
    /// The leaf this CPU reports to and its bit there.
    leaf: usize,
    leaf_bit: u64,
    cbs: SpinLock<CallbackLists>,
}

/// Per-CPU callback queues: `next` is the staging list `call_rcu`
/// appends to, `inflight` is the batch awaiting `inflight_gp`.
struct CallbackLists {
    next: VecDeque<RcuCallback>,
    /// The earliest grace period that starts strictly after every
    /// callback now in `next` was enqueued.
    next_ready_gp: u64,
    inflight: VecDeque<RcuCallback>,
    inflight_gp: u64,
}

pub struct RcuTree {
    /// The number of the most recently started grace period.
    gp_seq: AtomicU64,
    /// The number of the most recently completed grace period.
    completed: AtomicU64,
    /// Serializes grace-period starts.
    gp_lock: SpinLock<()>,
    nodes: Vec<RcuNode>,
    data: Vec<RcuData>,
    waiters: WaitQueue,
}

impl RcuTree {
    /// Builds the tree for `nr_cpus` CPUs with the given fan-out.
    pub fn new(nr_cpus: usize, fanout: usize) -> Self {
        assert!(nr_cpus >= 1 && fanout >= 2);

        // Widths of each level, leaves first, root last.
        let mut widths = Vec::new();
        let mut width = nr_cpus.div_ceil(fanout);
        loop {
            widths.push(width);
            if width == 1 {
                break;
            }
            width = width.div_ceil(fanout);
        }
        assert!(widths.len() <= MAX_LEVELS, "too many RCU tree levels");

        // Nodes are stored root first, then each level down; `offsets[l]`
        // is the index of level `l`'s first node (levels counted from the
        // leaves, as in `widths`).
        let mut offsets = alloc::vec![0usize; widths.len()];
        let mut next = 0;
        for level in (0..widths.len()).rev() {
            offsets[level] = next;
            next += widths[level];
        }

        let mut nodes = Vec::with_capacity(next);
        for _ in 0..next {
            nodes.push(RcuNode {
                parent: None,
                children_mask: 0,
                state: SpinLock::new(NodeState {
                    qsmask: 0,
                    gp_seq: 0,
                }),
            });
        }

        // Wire parents and children masks.
        for level in 0..widths.len() {
            for i in 0..widths[level] {
                let idx = offsets[level] + i;
                if level + 1 < widths.len() {
                    let parent = offsets[level + 1] + i / fanout;
                    nodes[idx].parent = Some((parent, 1 << (i % fanout)));
                    nodes[parent].children_mask |= 1 << (i % fanout);
                }
                if level == 0 {
                    let first_cpu = i * fanout;
                    let covered = fanout.min(nr_cpus - first_cpu);
                    nodes[idx].children_mask = mask_of(covered);
                }
            }
        }

        let data = (0..nr_cpus)
            .map(|cpu| RcuData {
                qs_pending: AtomicBool::new(false),
                gp_seq: AtomicU64::new(0),
                leaf: offsets[0] + cpu / fanout,
                leaf_bit: 1 << (cpu % fanout),
                cbs: SpinLock::new(CallbackLists {
                    next: VecDeque::new(),
                    next_ready_gp: 0,
                    inflight: VecDeque::new(),
                    inflight_gp: 0,
                }),
            })
            .collect();

        Self {
            gp_seq: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            gp_lock: SpinLock::new(()),
            nodes,
            data,
            waiters: WaitQueue::new(),
        }
    }

    /// The most recently completed grace period.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    /// The most recently started grace period.
    pub fn started(&self) -> u64 {
        self.gp_seq.load(Ordering::Acquire)
    }

    fn gp_in_progress(&self) -> bool {
        self.started() != self.completed()
    }

    /// Starts a new grace period if none is in progress. Returns the
    /// number of the grace period now in progress.
    fn start_gp(&self) -> u64 {
        let _guard = self.gp_lock.lock_irq_disabled();
        if self.gp_in_progress() {
            return self.started();
        }
        let new_gp = self.started() + 1;

        // Arm the masks root-to-leaves so that a racing report against
        // the new number finds its node initialized.
        for node in &self.nodes {
            let mut state = node.state.lock_irq_disabled();
            state.qsmask = node.children_mask;
            state.gp_seq = new_gp;
        }
        for data in &self.data {
            data.gp_seq.store(new_gp, Ordering::Release);
            data.qs_pending.store(true, Ordering::Release);
        }
        self.gp_seq.store(new_gp, Ordering::Release);
        new_gp
    }

    /// Notes that `cpu` passed through a quiescent state.
    pub fn note_quiescent(&self, cpu: usize) {
        let data = &self.data[cpu];
        if !data.qs_pending.swap(false, Ordering::AcqRel) {
            return;
        }
        let gp = data.gp_seq.load(Ordering::Acquire);
        self.report_qs(data.leaf, data.leaf_bit, gp);
    }

    /// Clears `mask` in `node` for grace period `gp`, propagating upward
    /// while masks empty. Holds one node lock at a time.
    fn report_qs(&self, mut node_idx: usize, mut mask: u64, gp: u64) {
        loop {
            let node = &self.nodes[node_idx];
            let propagate = {
                let mut state = node.state.lock_irq_disabled();
                // The report may race with the next grace period's
                // starter; a stale report must be dropped.
                if state.gp_seq != gp || self.completed() >= gp {
                    return;
                }
                if state.qsmask & mask == 0 {
                    return;
                }
                state.qsmask &= !mask;
                if state.qsmask != 0 {
                    return;
                }
                node.parent
            };
            // The child's lock is released before the parent's is taken,
            // so reports never hold two levels at once.
            match propagate {
                Some((parent, bit)) => {
                    node_idx = parent;
                    mask = bit;
                }
                None => {
                    self.complete_gp(gp);
                    return;
                }
            }
        }
    }

    fn complete_gp(&self, gp: u64) {
        self.completed.store(gp, Ordering::Release);
        self.waiters.wake_all();
    }

    /// Appends a callback to `cpu`'s staging list and makes sure a grace
    /// period is running.
    pub fn call_rcu(&self, cpu: usize, callback: RcuCallback) {
        {
            let mut cbs = self.data[cpu].cbs.lock_irq_disabled();
            cbs.next.push_back(callback);
            // Only a grace period that starts after this point may
            // release the callback; the earliest such is `started + 1`.
            cbs.next_ready_gp = self.started() + 1;
        }
        if !self.gp_in_progress() {
            self.start_gp();
        }
    }

    /// The periodic callback step for `cpu`: invokes the batch whose
    /// grace period has completed, advances staging callbacks into a new
    /// batch, and keeps the grace-period machinery turning. Completed
    /// callbacks run outside all locks, in FIFO order.
    pub fn process_callbacks(&self, cpu: usize) {
        let ready = {
            let mut cbs = self.data[cpu].cbs.lock_irq_disabled();

            if !cbs.inflight.is_empty() && self.completed() >= cbs.inflight_gp {
                core::mem::take(&mut cbs.inflight)
            } else {
                VecDeque::new()
            }
        };
        for callback in ready {
            callback();
        }

        let mut cbs = self.data[cpu].cbs.lock_irq_disabled();
        if cbs.inflight.is_empty() && !cbs.next.is_empty() {
            cbs.inflight = core::mem::take(&mut cbs.next);
            cbs.inflight_gp = cbs.next_ready_gp;
        }
        if !cbs.inflight.is_empty() && cbs.inflight_gp > self.started() && !self.gp_in_progress() {
            // The batch waits for a grace period that has not started
            // yet; kick one off.
            drop(cbs);
            self.start_gp();
        }
    }

    /// Whether `cpu` still owes a quiescent state for the current grace
    /// period.
    pub fn qs_pending(&self, cpu: usize) -> bool {
        self.data[cpu].qs_pending.load(Ordering::Acquire)
    }
}

const fn mask_of(count: usize) -> u64 {
    if count >= 64 {
        u64::MAX
    } else {
        (1u64 << count) - 1
    }
}

#[cfg(test)]
mod test {
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering::SeqCst};

    use super::*;

    fn all_cpus_quiesce(tree: &RcuTree, nr: usize) {
        for cpu in 0..nr {
            tree.note_quiescent(cpu);
        }
    }

    #[test]
    fn gp_completes_only_after_all_cpus_report() {
        let tree = RcuTree::new(4, 2);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        tree.call_rcu(0, Box::new(move || {
            f.fetch_add(1, SeqCst);
        }));
        tree.process_callbacks(0);
        assert_eq!(tree.completed(), 0);

        for cpu in 0..3 {
            tree.note_quiescent(cpu);
            tree.process_callbacks(0);
            assert_eq!(fired.load(SeqCst), 0, "fired before cpu {} reported", cpu + 1);
        }
        tree.note_quiescent(3);
        assert_eq!(tree.completed(), 1);
        tree.process_callbacks(0);
        assert_eq!(fired.load(SeqCst), 1);
    }

    #[test]
    fn callbacks_run_in_fifo_order_per_cpu() {
        let tree = RcuTree::new(2, 2);
        let log = Arc::new(SpinLock::new(alloc::vec::Vec::new()));
        for i in 0..5 {
            let log = log.clone();
            tree.call_rcu(0, Box::new(move || log.lock().push(i)));
        }
        tree.process_callbacks(0);
        all_cpus_quiesce(&tree, 2);
        tree.process_callbacks(0);
        assert_eq!(*log.lock(), alloc::vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn late_callbacks_wait_for_a_later_gp() {
        let tree = RcuTree::new(2, 2);
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        tree.call_rcu(0, Box::new(move || {
            f.store(1, SeqCst);
        }));
        tree.process_callbacks(0); // first batch in flight for GP 1

        // A callback queued while GP 1 runs must not ride GP 1.
        let s = second.clone();
        tree.call_rcu(1, Box::new(move || {
            s.store(1, SeqCst);
        }));
        tree.process_callbacks(1); // stages for GP 2

        all_cpus_quiesce(&tree, 2); // GP 1 completes
        tree.process_callbacks(0);
        tree.process_callbacks(1);
        assert_eq!(first.load(SeqCst), 1);
        assert_eq!(second.load(SeqCst), 0);

        all_cpus_quiesce(&tree, 2); // GP 2 completes
        tree.process_callbacks(1);
        assert_eq!(second.load(SeqCst), 1);
    }

    #[test]
    fn stale_reports_are_dropped() {
        let tree = RcuTree::new(4, 2);
        tree.call_rcu(0, Box::new(|| ()));
        tree.process_callbacks(0);
        // Quiesce, then report again spuriously: the second report must
        // not corrupt the next grace period.
        all_cpus_quiesce(&tree, 4);
        assert_eq!(tree.completed(), 1);
        tree.note_quiescent(0);
        assert_eq!(tree.completed(), 1);
    }

    #[test]
    fn multi_level_tree_covers_odd_cpu_counts() {
        let tree = RcuTree::new(5, 2);
        tree.call_rcu(4, Box::new(|| ()));
        tree.process_callbacks(4);
        for cpu in 0..5 {
            assert_eq!(tree.completed(), 0);
            tree.note_quiescent(cpu);
        }
        assert_eq!(tree.completed(), 1);
    }
}
