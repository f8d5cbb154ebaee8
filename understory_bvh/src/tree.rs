// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Core tree implementation: node arena, insertion, removal, refit.

use alloc::vec;
use alloc::vec::Vec;
use core::fmt::Debug;

use crate::sah::{surface_area, union_surface_area};
use crate::types::{Aabb3D, Scalar};

/// Identifier for a node in the tree.
///
/// This is a small, copyable handle consisting of a slot index and a generation counter.
/// It stays stable while the node lives and becomes stale once the node is freed.
///
/// - On allocation a slot gets the next generation for that slot (starting at `1`).
/// - On free the slot goes on a free list; existing ids pointing at it are stale.
/// - On reuse the generation increments, so stale ids never alias the new node.
///
/// Leaf ids returned by [`Bvh::insert`] stay valid until [`Bvh::disconnect`].
/// Internal node ids are only stable until the next structural edit that frees
/// them (a removal can collapse an internal node). Rotations never free nodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

/// Which child slot of an internal node.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Side {
    Left,
    Right,
}

#[derive(Clone, Debug)]
pub(crate) enum NodeKind<P> {
    Internal {
        left: Option<NodeId>,
        right: Option<NodeId>,
        leaf_count: usize,
    },
    Leaf {
        payload: P,
    },
}

#[derive(Clone, Debug)]
pub(crate) struct Node<T, P> {
    pub(crate) generation: u32,
    pub(crate) bounds: Aabb3D<T>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) kind: NodeKind<P>,
}

impl<T, P> Node<T, P> {
    pub(crate) fn children(&self) -> (Option<NodeId>, Option<NodeId>) {
        match self.kind {
            NodeKind::Internal { left, right, .. } => (left, right),
            NodeKind::Leaf { .. } => (None, None),
        }
    }

    pub(crate) fn leaf_count(&self) -> usize {
        match self.kind {
            NodeKind::Internal { leaf_count, .. } => leaf_count,
            NodeKind::Leaf { .. } => 1,
        }
    }

    pub(crate) fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf { .. })
    }
}

/// A dynamic binary bounding volume hierarchy over 3D boxes.
///
/// The tree always has an internal root. An empty tree is a root with no
/// children and [empty](Aabb3D::empty) bounds; queries against it return nothing.
///
/// Nodes live in an arena and are addressed by [`NodeId`]. Children are owning
/// links; the parent link is a plain id, so there is no reference cycle.
pub struct Bvh<T: Scalar, P> {
    nodes: Vec<Option<Node<T, P>>>, // slots
    generations: Vec<u32>,          // last generation per slot (persists across frees)
    free_list: Vec<usize>,
    root: NodeId,
    leaves: usize,
}

impl<T: Scalar, P> Default for Bvh<T, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar, P> Debug for Bvh<T, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let total = self.nodes.len();
        let alive = self.nodes.iter().filter(|n| n.is_some()).count();
        f.debug_struct("Bvh")
            .field("nodes_total", &total)
            .field("nodes_alive", &alive)
            .field("free_list", &self.free_list.len())
            .field("leaves", &self.leaves)
            .field("root_bounds", &self.node(self.root).bounds)
            .finish_non_exhaustive()
    }
}

impl<T: Scalar, P> Bvh<T, P> {
    /// Create an empty tree.
    pub fn new() -> Self {
        let root = Node {
            generation: 1,
            bounds: Aabb3D::empty(),
            parent: None,
            kind: NodeKind::Internal {
                left: None,
                right: None,
                leaf_count: 0,
            },
        };
        Self {
            nodes: vec![Some(root)],
            generations: vec![1],
            free_list: Vec::new(),
            root: NodeId::new(0, 1),
            leaves: 0,
        }
    }

    /// The root node. Always internal and always alive.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Number of leaves.
    pub fn len(&self) -> usize {
        self.leaves
    }

    /// True if the tree holds no leaves.
    pub fn is_empty(&self) -> bool {
        self.leaves == 0
    }

    /// Number of live nodes, internal ones and the root included.
    pub fn node_count(&self) -> usize {
        self.nodes.len() - self.free_list.len()
    }

    /// Remove every node and return to the empty state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Returns true if `id` refers to a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        self.node_opt(id).is_some()
    }

    /// Bounds of a live node.
    pub fn bounds(&self, id: NodeId) -> Option<Aabb3D<T>> {
        self.node_opt(id).map(|n| n.bounds)
    }

    /// Payload of a live leaf.
    pub fn payload(&self, id: NodeId) -> Option<&P> {
        match &self.node_opt(id)?.kind {
            NodeKind::Leaf { payload } => Some(payload),
            NodeKind::Internal { .. } => None,
        }
    }

    /// Parent of a live node; `None` for the root.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node_opt(id)?.parent
    }

    /// `(left, right)` children of a live internal node. Leaves have none.
    pub fn children(&self, id: NodeId) -> (Option<NodeId>, Option<NodeId>) {
        self.node_opt(id)
            .map(Node::children)
            .unwrap_or((None, None))
    }

    /// True if `id` is a live leaf.
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.node_opt(id).is_some_and(Node::is_leaf)
    }

    /// Cached number of leaves under `id` (1 for a leaf, 0 for a stale id).
    pub fn leaf_node_count(&self, id: NodeId) -> usize {
        self.node_opt(id).map(Node::leaf_count).unwrap_or(0)
    }

    /// Iterate over all live leaves in arena order.
    pub fn leaves(&self) -> impl Iterator<Item = (NodeId, &Aabb3D<T>, &P)> + '_ {
        self.nodes.iter().enumerate().filter_map(|(i, slot)| {
            let node = slot.as_ref()?;
            match &node.kind {
                NodeKind::Leaf { payload } => {
                    #[allow(
                        clippy::cast_possible_truncation,
                        reason = "NodeId uses 32-bit indices by design."
                    )]
                    let id = NodeId::new(i as u32, node.generation);
                    Some((id, &node.bounds, payload))
                }
                NodeKind::Internal { .. } => None,
            }
        })
    }

    /// Insert a leaf and return its handle.
    ///
    /// Descends from the root towards the child whose surface area grows least
    /// (ties go to the child with fewer leaves). An internal node with a free
    /// child slot takes the leaf directly; otherwise the reached leaf is paired
    /// with the new one under a fresh internal node. Ancestors are refit.
    pub fn insert(&mut self, bounds: Aabb3D<T>, payload: P) -> NodeId {
        let mut cur = self.root;
        loop {
            let (left, right) = self.node(cur).children();
            let (l, r) = match (left, right) {
                (None, _) => {
                    let leaf = self.push_child(cur, Side::Left, bounds, NodeKind::Leaf { payload });
                    self.fix_upwards(cur);
                    return leaf;
                }
                (_, None) => {
                    let leaf =
                        self.push_child(cur, Side::Right, bounds, NodeKind::Leaf { payload });
                    self.fix_upwards(cur);
                    return leaf;
                }
                (Some(l), Some(r)) => (l, r),
            };
            let (ln, rn) = (self.node(l), self.node(r));
            let cost_l = union_surface_area(&ln.bounds, &bounds) - surface_area(&ln.bounds);
            let cost_r = union_surface_area(&rn.bounds, &bounds) - surface_area(&rn.bounds);
            let go_left =
                cost_l < cost_r || (cost_l == cost_r && ln.leaf_count() <= rn.leaf_count());
            let (next, side) = if go_left { (l, Side::Left) } else { (r, Side::Right) };
            if !self.node(next).is_leaf() {
                cur = next;
                continue;
            }
            // Pair the reached leaf with the new one under a fresh internal node.
            let sibling_bounds = self.node(next).bounds;
            let branch = self.alloc(Node {
                generation: 0,
                bounds: sibling_bounds.union(&bounds),
                parent: None,
                kind: NodeKind::Internal {
                    left: None,
                    right: None,
                    leaf_count: 1,
                },
            });
            self.set_child(cur, side, Some(branch));
            self.set_child(branch, Side::Left, Some(next));
            let leaf = self.push_child(branch, Side::Right, bounds, NodeKind::Leaf { payload });
            self.fix_upwards(branch);
            return leaf;
        }
    }

    /// Detach and free a leaf, returning its payload.
    ///
    /// A non-root internal node left with a single child is collapsed (the child
    /// takes its place); one left with no children is removed. All ancestors are
    /// refit and their leaf counts updated. Returns `None` for stale ids and
    /// internal nodes.
    pub fn disconnect(&mut self, id: NodeId) -> Option<P> {
        if !self.is_leaf(id) {
            return None;
        }
        let parent = self.node(id).parent?;
        self.unlink(parent, id);
        let NodeKind::Leaf { payload } = self.free(id).kind else {
            return None;
        };
        self.leaves -= 1;

        let mut cur = parent;
        while cur != self.root {
            let Some(grand) = self.node(cur).parent else {
                break;
            };
            match self.node(cur).children() {
                (Some(only), None) | (None, Some(only)) => {
                    let side = self.side_of(grand, cur);
                    self.free(cur);
                    self.set_child(grand, side, Some(only));
                }
                (None, None) => {
                    self.unlink(grand, cur);
                    self.free(cur);
                }
                (Some(_), Some(_)) => break,
            }
            cur = grand;
        }
        self.fix_upwards(cur);
        Some(payload)
    }

    /// Replace a leaf's bounds and refit its ancestors.
    ///
    /// Refitting stops at the first ancestor whose bounds do not change.
    /// Returns `false` if `id` is not a live leaf.
    pub fn resize(&mut self, id: NodeId, bounds: Aabb3D<T>) -> bool {
        if !self.is_leaf(id) {
            return false;
        }
        self.node_mut(id).bounds = bounds;
        let mut cur = self.node(id).parent;
        while let Some(n) = cur {
            let before = self.node(n).bounds;
            self.refit(n);
            if self.node(n).bounds == before {
                break;
            }
            cur = self.node(n).parent;
        }
        true
    }

    /// Recompute an internal node's bounds as the union of its present children.
    ///
    /// A node without children gets the empty box. Leaves are left untouched.
    pub fn refit(&mut self, id: NodeId) {
        let Some(node) = self.node_opt(id) else {
            return;
        };
        let (left, right) = node.children();
        if node.is_leaf() {
            return;
        }
        let mut bounds = Aabb3D::empty();
        for child in [left, right].into_iter().flatten() {
            bounds = bounds.union(&self.node(child).bounds);
        }
        self.node_mut(id).bounds = bounds;
    }

    /// Recompute an internal node's cached leaf count from its children's cached counts.
    pub fn update_leaf_node_count(&mut self, id: NodeId) {
        let Some(node) = self.node_opt(id) else {
            return;
        };
        let (left, right) = node.children();
        let sum: usize = [left, right]
            .into_iter()
            .flatten()
            .map(|c| self.node(c).leaf_count())
            .sum();
        if let NodeKind::Internal { leaf_count, .. } = &mut self.node_mut(id).kind {
            *leaf_count = sum;
        }
    }

    /// Refit every internal node and recompute every leaf count, bottom-up.
    pub fn refit_all(&mut self) {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let (left, right) = self.node(id).children();
            if self.node(id).is_leaf() {
                continue;
            }
            order.push(id);
            stack.extend(left);
            stack.extend(right);
        }
        for id in order.into_iter().rev() {
            self.refit(id);
            self.update_leaf_node_count(id);
        }
    }

    /// Global quality metric: the sum of `surface_area * leaf_count` over all non-root nodes.
    ///
    /// Proportional to the expected number of box tests for a random query; every
    /// applied rotation strictly lowers it.
    pub fn total_cost(&self) -> f64 {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.root.idx())
            .filter_map(|(_, n)| n.as_ref())
            .map(|n| surface_area(&n.bounds) * n.leaf_count() as f64)
            .sum()
    }

    // --- internals ---

    pub(crate) fn node_opt(&self, id: NodeId) -> Option<&Node<T, P>> {
        let n = self.nodes.get(id.idx())?.as_ref()?;
        if n.generation != id.1 {
            return None;
        }
        Some(n)
    }

    /// Access a node; panics if `id` is stale.
    pub(crate) fn node(&self, id: NodeId) -> &Node<T, P> {
        self.nodes[id.idx()].as_ref().expect("dangling NodeId")
    }

    /// Access a node mutably; panics if `id` is stale.
    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node<T, P> {
        self.nodes[id.idx()].as_mut().expect("dangling NodeId")
    }

    /// Overwrite the root's bounds without refitting.
    pub(crate) fn set_root_bounds(&mut self, bounds: Aabb3D<T>) {
        let root = self.root;
        self.node_mut(root).bounds = bounds;
    }

    #[allow(
        clippy::cast_possible_truncation,
        reason = "NodeId uses 32-bit indices by design."
    )]
    fn alloc(&mut self, mut node: Node<T, P>) -> NodeId {
        if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            node.generation = generation;
            self.nodes[idx] = Some(node);
            NodeId::new(idx as u32, generation)
        } else {
            node.generation = 1;
            self.nodes.push(Some(node));
            self.generations.push(1);
            NodeId::new((self.nodes.len() - 1) as u32, 1)
        }
    }

    fn free(&mut self, id: NodeId) -> Node<T, P> {
        let node = self.nodes[id.idx()].take().expect("dangling NodeId");
        self.free_list.push(id.idx());
        node
    }

    /// Allocate a node as the `side` child of `parent`. Does not refit.
    pub(crate) fn push_child(
        &mut self,
        parent: NodeId,
        side: Side,
        bounds: Aabb3D<T>,
        kind: NodeKind<P>,
    ) -> NodeId {
        if matches!(kind, NodeKind::Leaf { .. }) {
            self.leaves += 1;
        }
        let id = self.alloc(Node {
            generation: 0,
            bounds,
            parent: None,
            kind,
        });
        self.set_child(parent, side, Some(id));
        id
    }

    /// Link `child` into a slot of `parent`, updating the child's back-reference.
    pub(crate) fn set_child(&mut self, parent: NodeId, side: Side, child: Option<NodeId>) {
        if let NodeKind::Internal { left, right, .. } = &mut self.node_mut(parent).kind {
            match side {
                Side::Left => *left = child,
                Side::Right => *right = child,
            }
        }
        if let Some(c) = child {
            self.node_mut(c).parent = Some(parent);
        }
    }

    /// Which slot of `parent` holds `child`. Panics if it is not a child.
    pub(crate) fn side_of(&self, parent: NodeId, child: NodeId) -> Side {
        match self.node(parent).children() {
            (Some(l), _) if l == child => Side::Left,
            (_, Some(r)) if r == child => Side::Right,
            _ => panic!("{child:?} is not a child of {parent:?}"),
        }
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        let side = self.side_of(parent, child);
        self.set_child(parent, side, None);
        self.node_mut(child).parent = None;
    }

    fn fix_upwards(&mut self, from: NodeId) {
        let mut cur = Some(from);
        while let Some(n) = cur {
            self.refit(n);
            self.update_leaf_node_count(n);
            cur = self.node(n).parent;
        }
    }

    /// Panics unless every structural invariant holds.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let mut stack = vec![self.root];
        let mut seen_leaves = 0;
        assert!(self.node(self.root).parent.is_none(), "root has no parent");
        while let Some(id) = stack.pop() {
            let node = self.node_opt(id).expect("reachable nodes are alive");
            if node.is_leaf() {
                seen_leaves += 1;
                continue;
            }
            let (left, right) = node.children();
            let mut union = Aabb3D::empty();
            let mut count = 0;
            for child in [left, right].into_iter().flatten() {
                let c = self.node_opt(child).expect("children are alive");
                assert_eq!(c.parent, Some(id), "child back-reference points at its owner");
                union = union.union(&c.bounds);
                count += c.leaf_count();
                stack.push(child);
            }
            assert_eq!(node.bounds, union, "internal bounds are the union of children");
            assert_eq!(node.leaf_count(), count, "cached leaf count matches children");
        }
        assert_eq!(seen_leaves, self.leaves, "leaf total matches reachable leaves");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(x: f64, y: f64, z: f64) -> Aabb3D<f64> {
        Aabb3D::from_center(x, y, z, 0.5)
    }

    #[test]
    fn empty_tree_has_empty_root() {
        let bvh: Bvh<f64, u32> = Bvh::new();
        assert!(bvh.is_empty());
        assert!(bvh.bounds(bvh.root()).unwrap().is_empty());
        assert_eq!(bvh.leaf_node_count(bvh.root()), 0);
        bvh.check_invariants();
    }

    #[test]
    fn first_two_inserts_fill_root_slots() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let a = bvh.insert(cube(0.0, 0.0, 0.0), 1);
        let b = bvh.insert(cube(5.0, 0.0, 0.0), 2);
        assert_eq!(bvh.children(bvh.root()), (Some(a), Some(b)));
        assert_eq!(bvh.parent(a), Some(bvh.root()));
        assert_eq!(
            bvh.bounds(bvh.root()),
            Some(Aabb3D::new(-0.5, -0.5, -0.5, 5.5, 0.5, 0.5))
        );
        bvh.check_invariants();
    }

    #[test]
    fn insert_many_keeps_invariants() {
        let mut bvh: Bvh<f32, usize> = Bvh::new();
        for i in 0..100 {
            let x = (i % 10) as f32 * 3.0;
            let z = (i / 10) as f32 * 3.0;
            bvh.insert(Aabb3D::from_center(x, 0.0, z, 1.0), i);
        }
        assert_eq!(bvh.len(), 100);
        assert_eq!(bvh.leaf_node_count(bvh.root()), 100);
        bvh.check_invariants();
        let mut payloads: Vec<_> = bvh.leaves().map(|(_, _, p)| *p).collect();
        payloads.sort_unstable();
        assert_eq!(payloads, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn disconnect_collapses_and_refits() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let ids: Vec<_> = (0..8)
            .map(|i| bvh.insert(cube(i as f64 * 4.0, 0.0, 0.0), i))
            .collect();
        let arena_before = bvh.nodes.iter().filter(|n| n.is_some()).count();
        assert_eq!(bvh.disconnect(ids[7]), Some(7));
        assert!(!bvh.is_alive(ids[7]));
        assert_eq!(bvh.len(), 7);
        bvh.check_invariants();
        // The leaf and its collapsed parent are both gone.
        let arena_after = bvh.nodes.iter().filter(|n| n.is_some()).count();
        assert_eq!(arena_after, arena_before - 2);
        assert_eq!(bvh.bounds(bvh.root()).unwrap().max_x, 24.5);
    }

    #[test]
    fn disconnect_everything_returns_to_empty() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let ids: Vec<_> = (0..5).map(|i| bvh.insert(cube(i as f64, 0.0, 0.0), i)).collect();
        for id in ids {
            assert!(bvh.disconnect(id).is_some());
            bvh.check_invariants();
        }
        assert!(bvh.is_empty());
        assert!(bvh.bounds(bvh.root()).unwrap().is_empty());
    }

    #[test]
    fn disconnect_rejects_internal_and_stale() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let a = bvh.insert(cube(0.0, 0.0, 0.0), 1);
        assert_eq!(bvh.disconnect(bvh.root()), None);
        assert_eq!(bvh.disconnect(a), Some(1));
        assert_eq!(bvh.disconnect(a), None);
    }

    #[test]
    fn freed_slots_are_reused_with_new_generation() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let a = bvh.insert(cube(0.0, 0.0, 0.0), 1);
        bvh.disconnect(a);
        let b = bvh.insert(cube(1.0, 0.0, 0.0), 2);
        assert!(bvh.is_alive(b));
        assert!(!bvh.is_alive(a));
        if a.0 == b.0 {
            assert!(b.1 > a.1, "generation must increase on reuse");
        }
        assert_eq!(bvh.payload(a), None);
        assert_eq!(bvh.payload(b), Some(&2));
    }

    #[test]
    fn resize_grows_and_shrinks_ancestors() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        let ids: Vec<_> = (0..6).map(|i| bvh.insert(cube(i as f64 * 2.0, 0.0, 0.0), i)).collect();
        assert!(bvh.resize(ids[2], cube(100.0, 0.0, 0.0)));
        bvh.check_invariants();
        assert_eq!(bvh.bounds(bvh.root()).unwrap().max_x, 100.5);
        assert!(bvh.resize(ids[2], cube(4.0, 0.0, 0.0)));
        bvh.check_invariants();
        assert_eq!(bvh.bounds(bvh.root()).unwrap().max_x, 10.5);
        assert!(!bvh.resize(bvh.root(), cube(0.0, 0.0, 0.0)));
    }

    #[test]
    fn refit_all_repairs_stale_bounds() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        for i in 0..10 {
            bvh.insert(cube(i as f64, i as f64, 0.0), i);
        }
        let root = bvh.root();
        bvh.node_mut(root).bounds = Aabb3D::empty();
        if let NodeKind::Internal { leaf_count, .. } = &mut bvh.node_mut(root).kind {
            *leaf_count = 0;
        }
        bvh.refit_all();
        bvh.check_invariants();
    }

    #[test]
    fn total_cost_of_two_unit_cubes() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        bvh.insert(cube(0.0, 0.0, 0.0), 0);
        bvh.insert(cube(3.0, 0.0, 0.0), 1);
        assert_eq!(bvh.total_cost(), 6.0);
    }
}
