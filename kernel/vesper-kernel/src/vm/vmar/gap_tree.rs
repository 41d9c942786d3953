// SPDX-License-Identifier: MPL-2.0

//! The ordered VMA index: an arena-backed AVL tree keyed by area start,
//! augmented with each subtree's maximum gap.
//!
//! A node's *gap* is the free space between the previous area's end (in
//! address order) and its own start; the first area measures from
//! address zero. `max_gap` caches the largest gap in a node's subtree,
//! which lets a free-range search skip entire subtrees that cannot fit
//! the request. Nodes are also threaded onto a doubly linked list in
//! address order for constant-time neighbor access.
//!
//! The augmentation is structural-shape independent: gaps follow the
//! linked list, so rotations only need to refresh the cached `max_gap`
//! values along the touched paths.

use super::vma::Vma;
use crate::prelude::*;

const NIL: u32 = u32::MAX;

struct Node {
    vma: Vma,
    left: u32,
    right: u32,
    parent: u32,
    /// Address-ordered list threading.
    prev: u32,
    next: u32,
    height: u8,
    /// `vma.start - previous area's end`, or `vma.start` for the first.
    gap: usize,
    /// The largest gap within this subtree, own gap included.
    max_gap: usize,
}

pub(super) struct VmaTree {
    nodes: Vec<Node>,
    free: Vec<u32>,
    root: u32,
    head: u32,
    tail: u32,
    count: usize,
}

impl VmaTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: NIL,
            head: NIL,
            tail: NIL,
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    fn n(&self, idx: u32) -> &Node {
        &self.nodes[idx as usize]
    }

    fn nm(&mut self, idx: u32) -> &mut Node {
        &mut self.nodes[idx as usize]
    }

    pub fn vma(&self, idx: u32) -> &Vma {
        &self.n(idx).vma
    }

    pub fn vma_mut(&mut self, idx: u32) -> &mut Vma {
        &mut self.nm(idx).vma
    }

    pub fn next_idx(&self, idx: u32) -> Option<u32> {
        let next = self.n(idx).next;
        (next != NIL).then_some(next)
    }

    pub fn prev_idx(&self, idx: u32) -> Option<u32> {
        let prev = self.n(idx).prev;
        (prev != NIL).then_some(prev)
    }

    pub fn first_idx(&self) -> Option<u32> {
        (self.head != NIL).then_some(self.head)
    }

    /// Iterates the areas in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Vma> + '_ {
        let mut cursor = self.head;
        core::iter::from_fn(move || {
            if cursor == NIL {
                return None;
            }
            let vma = &self.n(cursor).vma;
            cursor = self.n(cursor).next;
            Some(vma)
        })
    }

    fn height(&self, idx: u32) -> i16 {
        if idx == NIL {
            0
        } else {
            self.n(idx).height as i16
        }
    }

    fn max_gap_of(&self, idx: u32) -> usize {
        if idx == NIL {
            0
        } else {
            self.n(idx).max_gap
        }
    }

    /// Refreshes the cached height and `max_gap` of one node.
    fn update(&mut self, idx: u32) {
        let (left, right, gap) = {
            let node = self.n(idx);
            (node.left, node.right, node.gap)
        };
        let height = 1 + self.height(left).max(self.height(right));
        let max_gap = gap.max(self.max_gap_of(left)).max(self.max_gap_of(right));
        let node = self.nm(idx);
        node.height = height as u8;
        node.max_gap = max_gap;
    }

    /// Recomputes a node's own gap from its list predecessor, then pulls
    /// the cached values up to the root.
    fn refresh_gap(&mut self, idx: u32) {
        let prev = self.n(idx).prev;
        let prev_end = if prev == NIL { 0 } else { self.n(prev).vma.end };
        self.nm(idx).gap = self.n(idx).vma.start - prev_end;
        self.pull_up(idx);
    }

    fn pull_up(&mut self, mut idx: u32) {
        while idx != NIL {
            self.update(idx);
            idx = self.n(idx).parent;
        }
    }

    fn replace_child(&mut self, parent: u32, old_child: u32, new_child: u32) {
        if parent == NIL {
            self.root = new_child;
        } else if self.n(parent).left == old_child {
            self.nm(parent).left = new_child;
        } else {
            self.nm(parent).right = new_child;
        }
        if new_child != NIL {
            self.nm(new_child).parent = parent;
        }
    }

    fn rotate_left(&mut self, x: u32) -> u32 {
        let y = self.n(x).right;
        let t = self.n(y).left;
        let parent = self.n(x).parent;
        self.nm(x).right = t;
        if t != NIL {
            self.nm(t).parent = x;
        }
        self.nm(y).left = x;
        self.nm(x).parent = y;
        self.replace_child(parent, x, y);
        self.update(x);
        self.update(y);
        y
    }

    fn rotate_right(&mut self, x: u32) -> u32 {
        let y = self.n(x).left;
        let t = self.n(y).right;
        let parent = self.n(x).parent;
        self.nm(x).left = t;
        if t != NIL {
            self.nm(t).parent = x;
        }
        self.nm(y).right = x;
        self.nm(x).parent = y;
        self.replace_child(parent, x, y);
        self.update(x);
        self.update(y);
        y
    }

    /// Restores the AVL balance walking up from `idx`, refreshing the
    /// augmentation on the way to the root.
    fn rebalance_up(&mut self, mut idx: u32) {
        while idx != NIL {
            self.update(idx);
            let balance = self.height(self.n(idx).left) - self.height(self.n(idx).right);
            let subtree_root = if balance > 1 {
                let left = self.n(idx).left;
                if self.height(self.n(left).left) < self.height(self.n(left).right) {
                    self.rotate_left(left);
                }
                self.rotate_right(idx)
            } else if balance < -1 {
                let right = self.n(idx).right;
                if self.height(self.n(right).right) < self.height(self.n(right).left) {
                    self.rotate_right(right);
                }
                self.rotate_left(idx)
            } else {
                idx
            };
            idx = self.n(subtree_root).parent;
        }
    }

    fn alloc_node(&mut self, vma: Vma) -> u32 {
        let node = Node {
            vma,
            left: NIL,
            right: NIL,
            parent: NIL,
            prev: NIL,
            next: NIL,
            height: 1,
            gap: 0,
            max_gap: 0,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = node;
            idx
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as u32
        }
    }

    /// The area with the greatest start not exceeding `addr`.
    fn find_le(&self, addr: Vaddr) -> Option<u32> {
        let mut cursor = self.root;
        let mut candidate = None;
        while cursor != NIL {
            if self.n(cursor).vma.start <= addr {
                candidate = Some(cursor);
                cursor = self.n(cursor).right;
            } else {
                cursor = self.n(cursor).left;
            }
        }
        candidate
    }

    /// The area containing `addr`, if any.
    pub fn find(&self, addr: Vaddr) -> Option<u32> {
        let idx = self.find_le(addr)?;
        self.n(idx).vma.contains(addr).then_some(idx)
    }

    /// The first area whose range intersects `[lo, hi)`.
    pub fn find_intersecting(&self, lo: Vaddr, hi: Vaddr) -> Option<u32> {
        if let Some(idx) = self.find(lo) {
            return Some(idx);
        }
        // The first area starting inside the window.
        let mut cursor = self.root;
        let mut candidate = None;
        while cursor != NIL {
            if self.n(cursor).vma.start >= lo {
                candidate = Some(cursor);
                cursor = self.n(cursor).left;
            } else {
                cursor = self.n(cursor).right;
            }
        }
        let idx = candidate?;
        (self.n(idx).vma.start < hi).then_some(idx)
    }

    /// Inserts an area, rejecting overlap with existing ones.
    pub fn insert(&mut self, vma: Vma) -> core::result::Result<u32, Vma> {
        // The would-be neighbors bound the overlap check.
        let pred = self.find_le(vma.start);
        if let Some(pred) = pred {
            if self.n(pred).vma.end > vma.start {
                return Err(vma);
            }
        }
        let succ = match pred {
            Some(p) => self.n(p).next,
            None => self.head,
        };
        if succ != NIL && vma.end > self.n(succ).vma.start {
            return Err(vma);
        }

        let idx = self.alloc_node(vma);

        // Attach as a leaf.
        let mut parent = NIL;
        let mut cursor = self.root;
        while cursor != NIL {
            parent = cursor;
            if self.n(idx).vma.start < self.n(cursor).vma.start {
                cursor = self.n(cursor).left;
            } else {
                cursor = self.n(cursor).right;
            }
        }
        self.nm(idx).parent = parent;
        if parent == NIL {
            self.root = idx;
        } else if self.n(idx).vma.start < self.n(parent).vma.start {
            self.nm(parent).left = idx;
        } else {
            self.nm(parent).right = idx;
        }

        // Thread the list between the neighbors.
        let pred = pred.map_or(NIL, |p| p);
        self.nm(idx).prev = pred;
        self.nm(idx).next = succ;
        if pred != NIL {
            self.nm(pred).next = idx;
        } else {
            self.head = idx;
        }
        if succ != NIL {
            self.nm(succ).prev = idx;
        } else {
            self.tail = idx;
        }

        self.count += 1;
        self.refresh_gap(idx);
        if succ != NIL {
            self.refresh_gap(succ);
        }
        self.rebalance_up(idx);
        Ok(idx)
    }

    /// Removes an area, returning it by value.
    pub fn remove(&mut self, idx: u32) -> Vma {
        let (left, right) = (self.n(idx).left, self.n(idx).right);
        if left != NIL && right != NIL {
            // Two children: the successor (which has no left child)
            // donates its area to this slot and is unlinked instead.
            let succ = self.n(idx).next;
            debug_assert_ne!(succ, NIL);
            let succ_vma = core::mem::replace(&mut self.nm(succ).vma, Vma::placeholder());
            let out = core::mem::replace(&mut self.nm(idx).vma, succ_vma);

            // The list entry of the successor disappears; this slot now
            // stands for the successor's area.
            let after = self.n(succ).next;
            self.nm(idx).next = after;
            if after != NIL {
                self.nm(after).prev = idx;
            } else {
                self.tail = idx;
            }

            self.unlink_half_leaf(succ);
            self.refresh_gap(idx);
            self.count -= 1;
            return out;
        }

        // At most one child: unlink directly.
        let next = self.n(idx).next;
        let prev = self.n(idx).prev;
        if prev != NIL {
            self.nm(prev).next = next;
        } else {
            self.head = next;
        }
        if next != NIL {
            self.nm(next).prev = prev;
        } else {
            self.tail = prev;
        }

        let out = core::mem::replace(&mut self.nm(idx).vma, Vma::placeholder());
        self.unlink_half_leaf(idx);
        if next != NIL {
            self.refresh_gap(next);
        }
        self.count -= 1;
        out
    }

    /// Structurally removes a node with at most one child and recycles
    /// its slot. List links must already be fixed.
    fn unlink_half_leaf(&mut self, idx: u32) {
        let (left, right, parent) = {
            let node = self.n(idx);
            (node.left, node.right, node.parent)
        };
        debug_assert!(left == NIL || right == NIL);
        let child = if left != NIL { left } else { right };
        self.replace_child(parent, idx, child);
        if parent != NIL {
            self.rebalance_up(parent);
        }
        self.free.push(idx);
    }

    /// Tells the tree that `idx`'s range changed in place (a split tail
    /// insertion, an expand, or a shrink). Gaps around it are refreshed.
    pub fn range_updated(&mut self, idx: u32) {
        self.refresh_gap(idx);
        let next = self.n(idx).next;
        if next != NIL {
            self.refresh_gap(next);
        }
    }

    /// Bottom-up first-fit search for an aligned free range of `size`
    /// bytes inside `[lo, hi)`, keeping `guard` bytes of free space on
    /// both sides. Gap lengths prune whole subtrees via `max_gap`.
    pub fn find_free(
        &self,
        size: usize,
        align: usize,
        lo: Vaddr,
        hi: Vaddr,
        guard: usize,
    ) -> Option<Vaddr> {
        debug_assert!(align.is_power_of_two() && align >= PAGE_SIZE);
        let needed = size + 2 * guard;

        let candidate = |gap_lo: Vaddr, gap_hi: Vaddr| -> Option<Vaddr> {
            let min_start = gap_lo.checked_add(guard)?.max(lo);
            let start = min_start.checked_add(align - 1)? & !(align - 1);
            let end = start.checked_add(size)?;
            (end + guard <= gap_hi && end <= hi).then_some(start)
        };

        if self.root == NIL {
            return candidate(0, hi);
        }

        // In-order walk with max_gap pruning.
        fn walk(
            tree: &VmaTree,
            idx: u32,
            needed: usize,
            candidate: &impl Fn(Vaddr, Vaddr) -> Option<Vaddr>,
        ) -> Option<Vaddr> {
            if idx == NIL || tree.n(idx).max_gap < needed {
                return None;
            }
            let node = tree.n(idx);
            if let Some(found) = walk(tree, node.left, needed, candidate) {
                return Some(found);
            }
            if node.gap >= needed {
                let gap_hi = node.vma.start;
                let gap_lo = gap_hi - node.gap;
                if let Some(found) = candidate(gap_lo, gap_hi) {
                    return Some(found);
                }
            }
            walk(tree, node.right, needed, candidate)
        }

        if needed <= self.n(self.root).max_gap {
            if let Some(found) = walk(self, self.root, needed, &candidate) {
                return Some(found);
            }
        }

        // The open space after the last area.
        let tail_end = self.n(self.tail).vma.end;
        candidate(tail_end, hi)
    }

    /// Verifies the structural invariants; test support.
    #[cfg(test)]
    fn check(&self) {
        fn rec(tree: &VmaTree, idx: u32, parent: u32) -> (i16, usize) {
            if idx == NIL {
                return (0, 0);
            }
            let node = tree.n(idx);
            assert_eq!(node.parent, parent);
            let (lh, lg) = rec(tree, node.left, idx);
            let (rh, rg) = rec(tree, node.right, idx);
            assert!((lh - rh).abs() <= 1, "unbalanced at {:?}", node.vma);
            assert_eq!(node.height as i16, 1 + lh.max(rh));
            assert_eq!(node.max_gap, node.gap.max(lg).max(rg));
            (node.height as i16, node.max_gap)
        }
        rec(self, self.root, NIL);

        // The list is ordered and the gaps match it.
        let mut cursor = self.head;
        let mut prev_end = 0;
        let mut n = 0;
        while cursor != NIL {
            let node = self.n(cursor);
            assert!(node.vma.start >= prev_end, "overlap in list order");
            assert_eq!(node.gap, node.vma.start - prev_end);
            prev_end = node.vma.end;
            cursor = node.next;
            n += 1;
        }
        assert_eq!(n, self.count);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::vm::perms::VmFlags;

    fn vma(start: Vaddr, end: Vaddr) -> Vma {
        Vma::new_anon(start..end, VmFlags::READ | VmFlags::USER)
    }

    fn tree_of(ranges: &[(Vaddr, Vaddr)]) -> VmaTree {
        let mut tree = VmaTree::new();
        for &(s, e) in ranges {
            tree.insert(vma(s, e)).unwrap();
            tree.check();
        }
        tree
    }

    #[test]
    fn insert_find_and_reject_overlap() {
        let mut tree = tree_of(&[(0x1000, 0x3000), (0x5000, 0x7000), (0x9000, 0xa000)]);

        let idx = tree.find(0x1000).unwrap();
        assert_eq!(tree.vma(idx).range(), 0x1000..0x3000);
        assert_eq!(tree.find(0x2fff), Some(idx));
        assert!(tree.find(0x3000).is_none());
        assert!(tree.find(0x4fff).is_none());
        assert!(tree.find(0x5000).is_some());

        // Overlapping inserts must be refused.
        assert!(tree.insert(vma(0x2000, 0x4000)).is_err());
        assert!(tree.insert(vma(0x4000, 0x6000)).is_err());
        assert!(tree.insert(vma(0x0000, 0x9001)).is_err());
        assert_eq!(tree.len(), 3);

        // A fitting insert between areas works.
        tree.insert(vma(0x3000, 0x4000)).unwrap();
        tree.check();
        assert_eq!(tree.len(), 4);
    }

    #[test]
    fn ordered_iteration_and_removal() {
        let mut tree = tree_of(&[
            (0x9000, 0xa000),
            (0x1000, 0x2000),
            (0x5000, 0x6000),
            (0x3000, 0x4000),
            (0x7000, 0x8000),
        ]);
        let starts: Vec<_> = tree.iter().map(|v| v.start).collect();
        assert_eq!(starts, vec![0x1000, 0x3000, 0x5000, 0x7000, 0x9000]);

        let idx = tree.find(0x5000).unwrap();
        let removed = tree.remove(idx);
        tree.check();
        assert_eq!(removed.range(), 0x5000..0x6000);
        let starts: Vec<_> = tree.iter().map(|v| v.start).collect();
        assert_eq!(starts, vec![0x1000, 0x3000, 0x7000, 0x9000]);

        while let Some(idx) = tree.first_idx() {
            tree.remove(idx);
            tree.check();
        }
        assert_eq!(tree.len(), 0);
        assert!(tree.find(0x1000).is_none());
    }

    #[test]
    fn removal_stress_keeps_balance() {
        let mut tree = VmaTree::new();
        // A deterministic scatter of 64 areas.
        let mut indices = Vec::new();
        for i in 0..64usize {
            let start = ((i * 37) % 64) * 0x10000 + 0x1000;
            indices.push(tree.insert(vma(start, start + 0x1000)).unwrap());
            tree.check();
        }
        // Remove in a different scattered order via lookups.
        for i in 0..64usize {
            let start = ((i * 11) % 64) * 0x10000 + 0x1000;
            let idx = tree.find(start).unwrap();
            tree.remove(idx);
            tree.check();
        }
    }

    #[test]
    fn find_free_respects_guards_and_bounds() {
        let tree = tree_of(&[(0x1000, 0x3000), (0x5000, 0x7000)]);
        // This is the textbook layout: with one-page guards, nothing
        // before 0x5000 fits a page, so the search lands past the last
        // area plus its guard.
        let x = tree
            .find_free(0x1000, PAGE_SIZE, 0, 0x10000, PAGE_SIZE)
            .unwrap();
        assert_eq!(x, 0x8000);

        // Without guards the hole below the first area is usable.
        let x = tree.find_free(0x1000, PAGE_SIZE, 0, 0x10000, 0).unwrap();
        assert_eq!(x, 0);
        let x = tree
            .find_free(0x2000, PAGE_SIZE, 0x1000, 0x10000, 0)
            .unwrap();
        assert_eq!(x, 0x3000);

        // Alignment is honored.
        let x = tree
            .find_free(0x1000, 0x4000, 0, 0x100000, PAGE_SIZE)
            .unwrap();
        assert_eq!(x % 0x4000, 0);
        assert!(x >= 0x8000);

        // An impossible request reports failure.
        assert!(tree
            .find_free(0x100000, PAGE_SIZE, 0, 0x10000, PAGE_SIZE)
            .is_none());
    }

    #[test]
    fn find_free_in_empty_tree() {
        let tree = VmaTree::new();
        let x = tree
            .find_free(0x2000, PAGE_SIZE, 0x4000, 0x10000, PAGE_SIZE)
            .unwrap();
        assert_eq!(x, 0x4000);
    }
}
