#![forbid(unsafe_code)]
//! ID to PRE translation.
//!
//! Live nodes are described as maximal runs of consecutive IDs that occupy
//! consecutive PREs. Runs are kept in PRE order in a treap whose nodes carry
//! subtree weights, so the PRE of a run is the total weight to its left and
//! shifting every later run by an insert or delete costs nothing. A side
//! `BTreeMap` keyed by the first ID of each run answers the predecessor query
//! for [`IdPreMap::pre`].

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::types::{NodeId, Pre, Result, StrataError};

mod tree;

use tree::{Arena, Link};

const PRIORITY_SEED: u64 = 0x5EED_1D5E;

/// A run of `len` consecutive IDs starting at `first_id` that occupy
/// consecutive PREs.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Run {
    /// First ID of the run.
    pub first_id: NodeId,
    /// Number of IDs in the run.
    pub len: u64,
}

impl Run {
    /// Creates a run.
    pub fn new(first_id: impl Into<NodeId>, len: u64) -> Self {
        Self {
            first_id: first_id.into(),
            len,
        }
    }

    fn end_id(&self) -> u64 {
        self.first_id.0 + self.len
    }
}

/// Maps live node IDs to their current PRE.
#[derive(Clone, Debug)]
pub struct IdPreMap {
    arena: Arena,
    root: Link,
    by_id: BTreeMap<u64, usize>,
    rng: ChaCha8Rng,
}

impl Default for IdPreMap {
    fn default() -> Self {
        Self {
            arena: Arena::default(),
            root: None,
            by_id: BTreeMap::new(),
            rng: ChaCha8Rng::seed_from_u64(PRIORITY_SEED),
        }
    }
}

impl IdPreMap {
    /// Map where every ID up to and including `base_id` sits at `pre == id`.
    pub fn new(base_id: NodeId) -> Self {
        Self::identity(base_id.0 + 1)
    }

    /// Map for a freshly built document of `len` nodes whose IDs equal their
    /// PREs.
    pub fn identity(len: u64) -> Self {
        let mut map = Self::default();
        if len > 0 {
            let slot = map.alloc(Run::new(0, len));
            map.root = Some(slot);
        }
        map
    }

    /// Rebuilds a map from runs listed in PRE order.
    ///
    /// Adjacent runs with contiguous IDs are coalesced; empty or overlapping
    /// runs are rejected.
    pub fn from_runs<I>(runs: I) -> Result<Self>
    where
        I: IntoIterator<Item = Run>,
    {
        let mut map = Self::default();
        for run in runs {
            if run.len == 0 {
                return Err(StrataError::Corruption("empty id run"));
            }
            if run.first_id.0.checked_add(run.len).is_none() {
                return Err(StrataError::Corruption("id run overflows"));
            }
            if map.overlaps(&run) {
                return Err(StrataError::Corruption("overlapping id runs"));
            }
            let slot = map.alloc(run);
            let root = map.root.take();
            map.root = map.join(root, Some(slot));
        }
        Ok(map)
    }

    /// Number of live IDs.
    pub fn len(&self) -> u64 {
        self.arena.weight(self.root)
    }

    /// Returns true if no ID is live.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Number of maximal runs.
    pub fn run_count(&self) -> usize {
        self.by_id.len()
    }

    /// Runs in PRE order.
    pub fn runs(&self) -> Vec<Run> {
        let mut out = Vec::with_capacity(self.by_id.len());
        let mut stack = Vec::new();
        let mut cur = self.root;
        loop {
            while let Some(slot) = cur {
                stack.push(slot);
                cur = self.arena.node(slot).left;
            }
            let Some(slot) = stack.pop() else { break };
            out.push(self.arena.node(slot).run);
            cur = self.arena.node(slot).right;
        }
        out
    }

    /// Current PRE of `id`, or `None` if the ID was deleted or never
    /// assigned.
    pub fn pre(&self, id: NodeId) -> Option<Pre> {
        let (&first, &slot) = self.by_id.range(..=id.0).next_back()?;
        let run = self.arena.node(slot).run;
        if id.0 >= run.end_id() {
            return None;
        }
        Some(self.position(slot) + (id.0 - first))
    }

    /// Resolves a batch of IDs, dropping unknown ones; the result is sorted.
    pub fn pres<I>(&self, ids: I) -> Vec<Pre>
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut out: Vec<Pre> = ids.into_iter().filter_map(|id| self.pre(id)).collect();
        out.sort_unstable();
        out
    }

    /// Records that `count` new IDs `id ..= id + count - 1` now occupy
    /// `[pre, pre + count)`; IDs at or after `pre` move up by `count`.
    ///
    /// # Panics
    ///
    /// Panics if `count` is zero or `pre` is past the end.
    pub fn record_insert(&mut self, pre: Pre, id: NodeId, count: u64) {
        assert!(count > 0, "record_insert with zero count");
        assert!(
            pre <= self.len(),
            "record_insert at {pre} past end (len {})",
            self.len()
        );
        debug_assert!(!self.overlaps(&Run::new(id, count)), "ids already mapped");
        let root = self.root.take();
        let (left, right) = self.split(root, pre);
        let slot = self.alloc(Run::new(id, count));
        let left = self.join(left, Some(slot));
        self.root = self.join(left, right);
    }

    /// Records that the `count` nodes starting at `pre`, the first of which
    /// has `id`, were removed; later IDs move down by `count`.
    ///
    /// # Panics
    ///
    /// Panics if the range is not live, `count` is zero, or `id` is not the
    /// node at `pre`.
    pub fn record_delete(&mut self, pre: Pre, id: NodeId, count: u64) {
        assert!(count > 0, "record_delete with zero count");
        assert!(
            pre.checked_add(count).is_some_and(|end| end <= self.len()),
            "record_delete({pre}, {count}) out of range (len {})",
            self.len()
        );
        assert_eq!(self.pre(id), Some(pre), "id {id} is not at pre {pre}");
        let root = self.root.take();
        let (left, rest) = self.split(root, pre);
        let (middle, right) = self.split(rest, count);
        self.release(middle);
        self.root = self.join(left, right);
    }

    fn overlaps(&self, run: &Run) -> bool {
        if let Some((_, &slot)) = self.by_id.range(..=run.first_id.0).next_back() {
            if self.arena.node(slot).run.end_id() > run.first_id.0 {
                return true;
            }
        }
        self.by_id
            .range(run.first_id.0..run.end_id())
            .next()
            .is_some()
    }

    fn alloc(&mut self, run: Run) -> usize {
        let priority = self.rng.gen::<u64>();
        let slot = self.arena.alloc(run, priority);
        self.by_id.insert(run.first_id.0, slot);
        slot
    }

    fn release(&mut self, root: Link) {
        let mut stack: Vec<usize> = root.into_iter().collect();
        while let Some(slot) = stack.pop() {
            let node = *self.arena.node(slot);
            stack.extend(node.left);
            stack.extend(node.right);
            self.by_id.remove(&node.run.first_id.0);
            self.arena.free(slot);
        }
    }

    /// PRE of the first ID of the run stored at `slot`.
    fn position(&self, slot: usize) -> Pre {
        let mut pos = self.arena.weight(self.arena.node(slot).left);
        let mut cur = slot;
        while let Some(parent) = self.arena.node(cur).parent {
            let node = self.arena.node(parent);
            if node.right == Some(cur) {
                pos += self.arena.weight(node.left) + node.run.len;
            }
            cur = parent;
        }
        pos
    }

    /// Splits into the first `pos` PREs and the rest, cutting a run if `pos`
    /// falls inside it. Returned roots have no parent.
    fn split(&mut self, root: Link, pos: u64) -> (Link, Link) {
        let (left, right) = self.split_rec(root, pos);
        self.arena.detach(left);
        self.arena.detach(right);
        (left, right)
    }

    fn split_rec(&mut self, root: Link, pos: u64) -> (Link, Link) {
        let Some(t) = root else {
            return (None, None);
        };
        let node = *self.arena.node(t);
        let left_weight = self.arena.weight(node.left);
        if pos <= left_weight {
            let (a, b) = self.split_rec(node.left, pos);
            self.arena.node_mut(t).left = b;
            self.arena.update(t);
            (a, Some(t))
        } else if pos >= left_weight + node.run.len {
            let (a, b) = self.split_rec(node.right, pos - left_weight - node.run.len);
            self.arena.node_mut(t).right = a;
            self.arena.update(t);
            (Some(t), b)
        } else {
            let cut = pos - left_weight;
            let tail = self.alloc(Run::new(node.run.first_id.0 + cut, node.run.len - cut));
            let right = {
                let n = self.arena.node_mut(t);
                n.run.len = cut;
                n.right.take()
            };
            self.arena.update(t);
            self.arena.detach(right);
            let right = self.merge(Some(tail), right);
            (Some(t), right)
        }
    }

    fn merge(&mut self, a: Link, b: Link) -> Link {
        match (a, b) {
            (None, other) | (other, None) => other,
            (Some(a), Some(b)) => {
                if self.arena.node(a).priority > self.arena.node(b).priority {
                    let right = self.arena.node(a).right;
                    let merged = self.merge(right, Some(b));
                    self.arena.node_mut(a).right = merged;
                    self.arena.update(a);
                    Some(a)
                } else {
                    let left = self.arena.node(b).left;
                    let merged = self.merge(Some(a), left);
                    self.arena.node_mut(b).left = merged;
                    self.arena.update(b);
                    Some(b)
                }
            }
        }
    }

    /// Concatenates two trees, coalescing the runs at the seam when their IDs
    /// are contiguous.
    fn join(&mut self, a: Link, b: Link) -> Link {
        let (Some(a_root), Some(b_root)) = (a, b) else {
            let root = a.or(b);
            self.arena.detach(root);
            return root;
        };
        self.arena.detach(Some(a_root));
        let last = self.arena.rightmost(a_root);
        let first = self.arena.leftmost(b_root);
        let b = if self.arena.node(last).run.end_id() == self.arena.node(first).run.first_id.0 {
            let absorbed = self.arena.node(first).run;
            let (single, rest) = self.split(b, absorbed.len);
            self.release(single);
            self.arena.node_mut(last).run.len += absorbed.len;
            self.arena.update_upwards(last);
            rest
        } else {
            b
        };
        let root = self.merge(Some(a_root), b);
        self.arena.detach(root);
        root
    }
}
