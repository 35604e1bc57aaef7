//! Ticket-weighted order-statistic red-black tree.
//!
//! Augments a standard red-black tree, keyed by thread id, with each node's
//! subtree ticket total, so a weighted draw can descend in O(log n) instead
//! of scanning every candidate. Nodes live in an arena (`Vec<Node>`)
//! addressed by index rather than as a raw pointer graph; there is exactly
//! one kind of unsafe code in this crate and it lives in `platform.rs`,
//! not here.

use alloc::vec::Vec;

use crate::thread::ThreadId;

type NodeIdx = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    Red,
    Black,
}

#[derive(Debug, Clone, Copy)]
struct Node {
    tid: ThreadId,
    tickets: u32,
    subtree_total: u64,
    color: Color,
    parent: Option<NodeIdx>,
    left: Option<NodeIdx>,
    right: Option<NodeIdx>,
}

/// An order-statistic tree over `(ThreadId, tickets)` pairs supporting
/// O(log n) weighted selection.
#[derive(Debug, Default)]
pub struct TicketTree {
    nodes: Vec<Node>,
    free: Vec<NodeIdx>,
    root: Option<NodeIdx>,
    len: usize,
}

impl TicketTree {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// `rbt_total` (0 if empty).
    pub fn total(&self) -> u64 {
        self.subtree_total(self.root)
    }

    pub fn contains(&self, tid: ThreadId) -> bool {
        self.find(tid).is_some()
    }

    fn find(&self, tid: ThreadId) -> Option<NodeIdx> {
        let mut cur = self.root;
        while let Some(i) = cur {
            let n = &self.nodes[i as usize];
            cur = match tid.cmp(&n.tid) {
                core::cmp::Ordering::Less => n.left,
                core::cmp::Ordering::Greater => n.right,
                core::cmp::Ordering::Equal => return Some(i),
            };
        }
        None
    }

    // -- small helpers treating `None` as the implicit black nil leaf --

    fn color_of(&self, idx: Option<NodeIdx>) -> Color {
        idx.map(|i| self.nodes[i as usize].color).unwrap_or(Color::Black)
    }

    fn subtree_total(&self, idx: Option<NodeIdx>) -> u64 {
        idx.map(|i| self.nodes[i as usize].subtree_total).unwrap_or(0)
    }

    fn left_of(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx as usize].left
    }

    fn right_of(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx as usize].right
    }

    fn parent_of(&self, idx: NodeIdx) -> Option<NodeIdx> {
        self.nodes[idx as usize].parent
    }

    /// Recompute one node's cached total purely from its current children;
    /// this is what keeps rotations and splices correct regardless of the
    /// order they're applied in.
    fn update(&mut self, idx: NodeIdx) {
        let n = &self.nodes[idx as usize];
        let total = n.tickets as u64 + self.subtree_total(n.left) + self.subtree_total(n.right);
        self.nodes[idx as usize].subtree_total = total;
    }

    fn update_path_to_root(&mut self, mut idx: Option<NodeIdx>) {
        while let Some(i) = idx {
            self.update(i);
            idx = self.parent_of(i);
        }
    }

    fn alloc_node(&mut self, tid: ThreadId, tickets: u32) -> NodeIdx {
        let node = Node {
            tid,
            tickets,
            subtree_total: tickets as u64,
            color: Color::Red,
            parent: None,
            left: None,
            right: None,
        };
        if let Some(idx) = self.free.pop() {
            self.nodes[idx as usize] = node;
            idx
        } else {
            self.nodes.push(node);
            (self.nodes.len() - 1) as NodeIdx
        }
    }

    fn set_child(&mut self, parent: Option<NodeIdx>, old: Option<NodeIdx>, new: Option<NodeIdx>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                if self.nodes[p as usize].left == old {
                    self.nodes[p as usize].left = new;
                } else {
                    self.nodes[p as usize].right = new;
                }
            }
        }
        if let Some(n) = new {
            self.nodes[n as usize].parent = parent;
        }
    }

    fn rotate_left(&mut self, x: NodeIdx) {
        let y = self.right_of(x).expect("rotate_left requires a right child");
        let x_parent = self.parent_of(x);

        let y_left = self.left_of(y);
        self.nodes[x as usize].right = y_left;
        if let Some(yl) = y_left {
            self.nodes[yl as usize].parent = Some(x);
        }

        self.set_child(x_parent, Some(x), Some(y));

        self.nodes[y as usize].left = Some(x);
        self.nodes[x as usize].parent = Some(y);

        self.update(x);
        self.update(y);
    }

    fn rotate_right(&mut self, x: NodeIdx) {
        let y = self.left_of(x).expect("rotate_right requires a left child");
        let x_parent = self.parent_of(x);

        let y_right = self.right_of(y);
        self.nodes[x as usize].left = y_right;
        if let Some(yr) = y_right {
            self.nodes[yr as usize].parent = Some(x);
        }

        self.set_child(x_parent, Some(x), Some(y));

        self.nodes[y as usize].right = Some(x);
        self.nodes[x as usize].parent = Some(y);

        self.update(x);
        self.update(y);
    }

    /// `rbt_insert`.
    pub fn insert(&mut self, tid: ThreadId, tickets: u32) {
        debug_assert!(!self.contains(tid), "duplicate thread id inserted into ticket tree");
        let tickets = tickets.max(1);
        let idx = self.alloc_node(tid, tickets);
        self.len += 1;

        let mut parent = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            // Bump every visited ancestor now; `update()` on rotated pairs
            // later recomputes purely from children, so this delta and
            // that recompute never disagree.
            self.nodes[c as usize].subtree_total += tickets as u64;
            parent = Some(c);
            cur = if tid < self.nodes[c as usize].tid {
                self.nodes[c as usize].left
            } else {
                self.nodes[c as usize].right
            };
        }
        self.nodes[idx as usize].parent = parent;
        match parent {
            None => self.root = Some(idx),
            Some(p) => {
                if tid < self.nodes[p as usize].tid {
                    self.nodes[p as usize].left = Some(idx);
                } else {
                    self.nodes[p as usize].right = Some(idx);
                }
            }
        }

        self.insert_fixup(idx);
    }

    fn insert_fixup(&mut self, mut z: NodeIdx) {
        while self.color_of(self.parent_of(z)) == Color::Red {
            let parent = self.parent_of(z).unwrap();
            let grandparent = self.parent_of(parent).unwrap(); // red parent always has a grandparent
            if Some(parent) == self.left_of(grandparent) {
                let uncle = self.right_of(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.nodes[parent as usize].color = Color::Black;
                    self.nodes[uncle.unwrap() as usize].color = Color::Black;
                    self.nodes[grandparent as usize].color = Color::Red;
                    z = grandparent;
                } else {
                    if Some(z) == self.right_of(parent) {
                        z = parent;
                        self.rotate_left(z);
                    }
                    let parent = self.parent_of(z).unwrap();
                    let grandparent = self.parent_of(parent).unwrap();
                    self.nodes[parent as usize].color = Color::Black;
                    self.nodes[grandparent as usize].color = Color::Red;
                    self.rotate_right(grandparent);
                }
            } else {
                let uncle = self.left_of(grandparent);
                if self.color_of(uncle) == Color::Red {
                    self.nodes[parent as usize].color = Color::Black;
                    self.nodes[uncle.unwrap() as usize].color = Color::Black;
                    self.nodes[grandparent as usize].color = Color::Red;
                    z = grandparent;
                } else {
                    if Some(z) == self.left_of(parent) {
                        z = parent;
                        self.rotate_right(z);
                    }
                    let parent = self.parent_of(z).unwrap();
                    let grandparent = self.parent_of(parent).unwrap();
                    self.nodes[parent as usize].color = Color::Black;
                    self.nodes[grandparent as usize].color = Color::Red;
                    self.rotate_left(grandparent);
                }
            }
        }
        self.nodes[self.root.unwrap() as usize].color = Color::Black;
    }

    /// `rbt_remove`. Returns `true` if `tid` was present.
    pub fn remove(&mut self, tid: ThreadId) -> bool {
        let Some(z) = self.find(tid) else {
            return false;
        };

        let removed_tickets = self.nodes[z as usize].tickets;
        // Subtract from every ancestor on the path down to (but not
        // including) z; the successor splice below may also touch some
        // of these nodes again, but `update_path_to_root` afterward makes
        // the final state correct regardless of delete order.
        let mut anc = self.parent_of(z);
        while let Some(a) = anc {
            self.nodes[a as usize].subtree_total -= removed_tickets as u64;
            anc = self.parent_of(a);
        }

        let y_original_color;
        let x: Option<NodeIdx>;
        let x_parent: Option<NodeIdx>;

        if self.left_of(z).is_none() {
            x = self.right_of(z);
            x_parent = self.parent_of(z);
            y_original_color = self.nodes[z as usize].color;
            self.set_child(self.parent_of(z), Some(z), x);
        } else if self.right_of(z).is_none() {
            x = self.left_of(z);
            x_parent = self.parent_of(z);
            y_original_color = self.nodes[z as usize].color;
            self.set_child(self.parent_of(z), Some(z), x);
        } else {
            // Successor = minimum of right subtree.
            let mut y = self.right_of(z).unwrap();
            while let Some(l) = self.left_of(y) {
                y = l;
            }
            y_original_color = self.nodes[y as usize].color;
            x = self.right_of(y);

            if self.parent_of(y) == Some(z) {
                x_parent = Some(y);
            } else {
                x_parent = self.parent_of(y);
                self.set_child(self.parent_of(y), Some(y), x);
                let z_right = self.right_of(z);
                self.nodes[y as usize].right = z_right;
                if let Some(zr) = z_right {
                    self.nodes[zr as usize].parent = Some(y);
                }
            }

            self.set_child(self.parent_of(z), Some(z), Some(y));
            let z_left = self.left_of(z);
            self.nodes[y as usize].left = z_left;
            if let Some(zl) = z_left {
                self.nodes[zl as usize].parent = Some(y);
            }
            self.nodes[y as usize].color = self.nodes[z as usize].color;

            // y's tickets stay y's; it now also owns z's former children.
            self.update(y);
        }

        self.free_node(z);
        self.len -= 1;

        // Recompute every node whose child set actually changed, then
        // everything above it, redundant in places, always correct.
        self.update_path_to_root(x_parent);

        if y_original_color == Color::Black {
            self.delete_fixup(x, x_parent);
        }

        true
    }

    fn free_node(&mut self, idx: NodeIdx) {
        self.free.push(idx);
    }

    fn delete_fixup(&mut self, mut x: Option<NodeIdx>, mut x_parent: Option<NodeIdx>) {
        while x != self.root && self.color_of(x) == Color::Black {
            let Some(parent) = x_parent else { break };
            if x == self.left_of(parent) {
                let mut sibling = self.right_of(parent).expect("sibling must exist");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.nodes[sibling as usize].color = Color::Black;
                    self.nodes[parent as usize].color = Color::Red;
                    self.rotate_left(parent);
                    sibling = self.right_of(parent).expect("sibling must exist");
                }
                if self.color_of(self.left_of(sibling)) == Color::Black
                    && self.color_of(self.right_of(sibling)) == Color::Black
                {
                    self.nodes[sibling as usize].color = Color::Red;
                    x = Some(parent);
                    x_parent = self.parent_of(parent);
                } else {
                    if self.color_of(self.right_of(sibling)) == Color::Black {
                        if let Some(sl) = self.left_of(sibling) {
                            self.nodes[sl as usize].color = Color::Black;
                        }
                        self.nodes[sibling as usize].color = Color::Red;
                        self.rotate_right(sibling);
                        sibling = self.right_of(parent).expect("sibling must exist");
                    }
                    self.nodes[sibling as usize].color = self.nodes[parent as usize].color;
                    self.nodes[parent as usize].color = Color::Black;
                    if let Some(sr) = self.right_of(sibling) {
                        self.nodes[sr as usize].color = Color::Black;
                    }
                    self.rotate_left(parent);
                    x = self.root;
                    x_parent = None;
                }
            } else {
                let mut sibling = self.left_of(parent).expect("sibling must exist");
                if self.color_of(Some(sibling)) == Color::Red {
                    self.nodes[sibling as usize].color = Color::Black;
                    self.nodes[parent as usize].color = Color::Red;
                    self.rotate_right(parent);
                    sibling = self.left_of(parent).expect("sibling must exist");
                }
                if self.color_of(self.right_of(sibling)) == Color::Black
                    && self.color_of(self.left_of(sibling)) == Color::Black
                {
                    self.nodes[sibling as usize].color = Color::Red;
                    x = Some(parent);
                    x_parent = self.parent_of(parent);
                } else {
                    if self.color_of(self.left_of(sibling)) == Color::Black {
                        if let Some(sr) = self.right_of(sibling) {
                            self.nodes[sr as usize].color = Color::Black;
                        }
                        self.nodes[sibling as usize].color = Color::Red;
                        self.rotate_left(sibling);
                        sibling = self.left_of(parent).expect("sibling must exist");
                    }
                    self.nodes[sibling as usize].color = self.nodes[parent as usize].color;
                    self.nodes[parent as usize].color = Color::Black;
                    if let Some(sl) = self.left_of(sibling) {
                        self.nodes[sl as usize].color = Color::Black;
                    }
                    self.rotate_right(parent);
                    x = self.root;
                    x_parent = None;
                }
            }
        }
        if let Some(xi) = x {
            self.nodes[xi as usize].color = Color::Black;
        }
    }

    /// `rbt_pick`: with `1 <= r <= total()`, returns the thread whose
    /// cumulative ticket prefix (in-order) first reaches `r`.
    pub fn pick(&self, r: u64) -> Option<ThreadId> {
        let total = self.total();
        if total == 0 || r == 0 || r > total {
            return None;
        }
        let mut cur = self.root;
        let mut remaining = r;
        while let Some(i) = cur {
            let n = &self.nodes[i as usize];
            let left_total = self.subtree_total(n.left);
            if remaining <= left_total {
                cur = n.left;
            } else if remaining <= left_total + n.tickets as u64 {
                return Some(n.tid);
            } else {
                remaining -= left_total + n.tickets as u64;
                cur = n.right;
            }
        }
        None
    }

    /// Walks the tree and panics if the augmentation or RB invariants are
    /// violated. Used by tests, not by the scheduler's hot path.
    #[cfg(any(test, feature = "test-util"))]
    pub fn check_invariants(&self) {
        if let Some(root) = self.root {
            assert_eq!(self.color_of(Some(root)), Color::Black, "root must be black");
            self.check_node(root);
        }
    }

    #[cfg(any(test, feature = "test-util"))]
    fn check_node(&self, idx: NodeIdx) -> u32 {
        let n = &self.nodes[idx as usize];
        let left_total = self.subtree_total(n.left);
        let right_total = self.subtree_total(n.right);
        assert_eq!(
            n.subtree_total,
            n.tickets as u64 + left_total + right_total,
            "subtree_total invariant broken at a node"
        );
        if n.color == Color::Red {
            assert_eq!(self.color_of(n.left), Color::Black, "red node has red child");
            assert_eq!(self.color_of(n.right), Color::Black, "red node has red child");
        }
        let left_black_height = n.left.map(|l| self.check_node(l)).unwrap_or(0);
        let right_black_height = n.right.map(|r| self.check_node(r)).unwrap_or(0);
        assert_eq!(left_black_height, right_black_height, "black-height mismatch");
        left_black_height + if n.color == Color::Black { 1 } else { 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_tree_total_is_zero() {
        let t = TicketTree::new();
        assert_eq!(t.total(), 0);
        assert_eq!(t.pick(1), None);
    }

    #[test]
    fn single_insert_pick_round_trip() {
        let mut t = TicketTree::new();
        t.insert(ThreadId(1), 10);
        t.check_invariants();
        assert_eq!(t.total(), 10);
        for r in 1..=10 {
            assert_eq!(t.pick(r), Some(ThreadId(1)));
        }
    }

    #[test]
    fn pick_respects_prefix_sums() {
        let mut t = TicketTree::new();
        t.insert(ThreadId(1), 5);
        t.insert(ThreadId(2), 3);
        t.insert(ThreadId(3), 2);
        t.check_invariants();
        assert_eq!(t.total(), 10);

        // Thread identity, not insertion order, determines in-order
        // position, so work out which thread owns which prefix range by
        // construction: the reference list-scan walks (1,5) (2,3) (3,2).
        let mut reference = ListScanReference::new();
        reference.insert(ThreadId(1), 5);
        reference.insert(ThreadId(2), 3);
        reference.insert(ThreadId(3), 2);
        for r in 1..=10 {
            assert_eq!(t.pick(r), reference.pick(r));
        }
    }

    #[test]
    fn insert_remove_round_trip_restores_tree() {
        let mut t = TicketTree::new();
        let ids: alloc::vec::Vec<ThreadId> = (0..50).map(ThreadId).collect();
        for (i, &id) in ids.iter().enumerate() {
            t.insert(id, (i as u32 % 7) + 1);
        }
        t.check_invariants();
        let total_before = t.total();

        for &id in &ids {
            assert!(t.remove(id));
        }
        assert_eq!(t.len(), 0);
        assert_eq!(t.total(), 0);
        let _ = total_before;

        for (i, &id) in ids.iter().enumerate() {
            t.insert(id, (i as u32 % 7) + 1);
        }
        t.check_invariants();
        assert_eq!(t.total(), total_before);
    }

    #[test]
    fn remove_missing_thread_is_noop() {
        let mut t = TicketTree::new();
        t.insert(ThreadId(1), 4);
        assert!(!t.remove(ThreadId(99)));
        assert_eq!(t.total(), 4);
    }

    /// A deliberately dumb reference: linear scan of `(id, tickets)` pairs
    /// in *thread-id order*, used only to cross-check `TicketTree::pick`
    /// when both structures are fed the same insert/remove/pick sequence.
    /// Ordered by id rather than insertion order because that's the order
    /// `TicketTree`'s in-order traversal actually produces; it's keyed by
    /// thread id, not discovery order (that ordering is the ready queue's
    /// concern, not this tree's).
    struct ListScanReference {
        entries: alloc::vec::Vec<(ThreadId, u32)>,
    }

    impl ListScanReference {
        fn new() -> Self {
            Self {
                entries: alloc::vec::Vec::new(),
            }
        }

        fn insert(&mut self, id: ThreadId, tickets: u32) {
            let pos = self.entries.partition_point(|&(t, _)| t < id);
            self.entries.insert(pos, (id, tickets));
        }

        fn remove(&mut self, id: ThreadId) {
            self.entries.retain(|&(t, _)| t != id);
        }

        fn total(&self) -> u64 {
            self.entries.iter().map(|&(_, t)| t as u64).sum()
        }

        fn pick(&self, r: u64) -> Option<ThreadId> {
            let mut acc = 0u64;
            for &(id, tickets) in &self.entries {
                acc += tickets as u64;
                if r <= acc {
                    return Some(id);
                }
            }
            None
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// For a random sequence of inserts/removes, `TicketTree::pick` agrees
        /// with a dead-simple list scan for every legal draw, and the
        /// augmentation invariant holds throughout.
        #[test]
        fn rbt_matches_list_scan_reference(
            ops in prop::collection::vec(
                (0u64..40, 1u32..1000, any::<bool>()),
                1..300,
            )
        ) {
            let mut tree = TicketTree::new();
            let mut reference = ListScanReference::new();
            let mut present: alloc::collections::BTreeMap<u64, u32> = alloc::collections::BTreeMap::new();

            for (raw_id, tickets, do_insert) in ops {
                let id = ThreadId(raw_id);
                if do_insert && !present.contains_key(&raw_id) {
                    tree.insert(id, tickets);
                    reference.insert(id, tickets);
                    present.insert(raw_id, tickets);
                } else if !present.is_empty() {
                    if let Some((&k, _)) = present.iter().next() {
                        tree.remove(ThreadId(k));
                        reference.remove(ThreadId(k));
                        present.remove(&k);
                    }
                }
                tree.check_invariants();
                prop_assert_eq!(tree.total(), reference.total());

                let total = tree.total();
                if total > 0 {
                    for r in [1, total / 2 + 1, total] {
                        if r >= 1 && r <= total {
                            prop_assert_eq!(tree.pick(r), reference.pick(r));
                        }
                    }
                }
            }
        }
    }
}
