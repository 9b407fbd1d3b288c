use super::Run;

pub(super) type Link = Option<usize>;

#[derive(Clone, Copy, Debug)]
pub(super) struct Node {
    pub(super) run: Run,
    /// Sum of run lengths in this subtree.
    pub(super) weight: u64,
    pub(super) priority: u64,
    pub(super) left: Link,
    pub(super) right: Link,
    pub(super) parent: Link,
}

/// Slot storage for treap nodes; freed slots are reused.
#[derive(Clone, Debug, Default)]
pub(super) struct Arena {
    nodes: Vec<Node>,
    free: Vec<usize>,
}

impl Arena {
    pub(super) fn alloc(&mut self, run: Run, priority: u64) -> usize {
        let node = Node {
            run,
            weight: run.len,
            priority,
            left: None,
            right: None,
            parent: None,
        };
        match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = node;
                slot
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    pub(super) fn free(&mut self, slot: usize) {
        self.free.push(slot);
    }

    pub(super) fn node(&self, slot: usize) -> &Node {
        &self.nodes[slot]
    }

    pub(super) fn node_mut(&mut self, slot: usize) -> &mut Node {
        &mut self.nodes[slot]
    }

    pub(super) fn weight(&self, link: Link) -> u64 {
        link.map_or(0, |slot| self.nodes[slot].weight)
    }

    /// Recomputes the weight of `slot` and points its children back at it.
    pub(super) fn update(&mut self, slot: usize) {
        let Node { left, right, run, .. } = self.nodes[slot];
        let mut weight = run.len;
        for child in [left, right].into_iter().flatten() {
            weight += self.nodes[child].weight;
            self.nodes[child].parent = Some(slot);
        }
        self.nodes[slot].weight = weight;
    }

    /// Refreshes weights from `slot` up to its root.
    pub(super) fn update_upwards(&mut self, slot: usize) {
        let mut cur = Some(slot);
        while let Some(slot) = cur {
            self.update(slot);
            cur = self.nodes[slot].parent;
        }
    }

    pub(super) fn detach(&mut self, link: Link) {
        if let Some(slot) = link {
            self.nodes[slot].parent = None;
        }
    }

    pub(super) fn leftmost(&self, mut slot: usize) -> usize {
        while let Some(left) = self.nodes[slot].left {
            slot = left;
        }
        slot
    }

    pub(super) fn rightmost(&self, mut slot: usize) -> usize {
        while let Some(right) = self.nodes[slot].right {
            slot = right;
        }
        slot
    }
}
