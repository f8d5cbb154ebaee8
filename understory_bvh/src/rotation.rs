// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Incremental tree-rotation optimizer.
//!
//! At an internal node `N` with children `L` and `R` (and grandchildren `LL`,
//! `LR`, `RL`, `RR` where those are internal), six local restructurings are
//! considered. Each is scored by the surface area heuristic over the two
//! children `N` would have afterwards, and the cheapest candidate that strictly
//! beats `N`'s current cost is applied.
//!
//! A candidate is also required to shrink the area-times-leaves weight of the
//! nodes it rewrites (`L`, `R`, or both), so every applied rotation strictly
//! lowers [`Bvh::total_cost`] and repeated passes always converge. Rotations keep
//! `N`'s bounds and leaf count.

use alloc::vec::Vec;

use log::{debug, trace};

use crate::config::OptimizerConfig;
use crate::sah::{sah_cost, surface_area, union_surface_area};
use crate::traverse::Traversal;
use crate::tree::{Bvh, NodeId, Side};
use crate::types::Scalar;

/// A local restructuring at one internal node.
///
/// Variants are listed in evaluation order; on equal cost the earlier one wins.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum Rotation {
    /// Leave the node as is.
    None = 0,
    /// `R` moves under `L` in place of `LL`; `LL` becomes `N`'s right child.
    LeftLeftUp = 1,
    /// `R` moves under `L` in place of `LR`; `LR` becomes `N`'s right child.
    LeftRightUp = 2,
    /// `L` moves under `R` in place of `RL`; `RL` becomes `N`'s left child.
    RightLeftUp = 3,
    /// `L` moves under `R` in place of `RR`; `RR` becomes `N`'s left child.
    RightRightUp = 4,
    /// Grandchildren regroup as `L = {LL, RL}`, `R = {LR, RR}`.
    SwapLeftRightWithRightLeft = 5,
    /// Grandchildren regroup as `L = {LL, RR}`, `R = {RL, LR}`.
    SwapLeftRightWithRightRight = 6,
}

impl Rotation {
    /// Numeric index, `0` for [`Rotation::None`] and `1..=6` otherwise.
    pub fn index(self) -> u8 {
        self as u8
    }

    /// True for every variant but [`Rotation::None`].
    pub fn is_applied(self) -> bool {
        self != Self::None
    }
}

/// Memoized subtree leaf counts for one optimization session.
///
/// Counts come from an explicit-stack walk of the subtree, independent of the
/// cached counts stored in the tree. Entries are keyed by arena slot and
/// generation, so a reused slot never serves a stale count.
#[derive(Clone, Debug, Default)]
pub struct LeafCounter {
    memo: Vec<Option<(u32, usize)>>,
    stack: Vec<(NodeId, bool)>,
}

impl LeafCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every memoized count.
    pub fn clear(&mut self) {
        self.memo.clear();
        self.stack.clear();
    }

    /// Number of leaves under `id` (1 for a leaf, 0 for a stale id).
    pub fn count<T: Scalar, P>(&mut self, bvh: &Bvh<T, P>, id: NodeId) -> usize {
        if !bvh.is_alive(id) {
            return 0;
        }
        if let Some(n) = self.get(id) {
            return n;
        }
        self.stack.clear();
        self.stack.push((id, false));
        while let Some((cur, expanded)) = self.stack.pop() {
            if self.get(cur).is_some() {
                continue;
            }
            if bvh.is_leaf(cur) {
                self.set(cur, 1);
                continue;
            }
            let (left, right) = bvh.children(cur);
            if expanded {
                let sum: usize = [left, right]
                    .into_iter()
                    .flatten()
                    .map(|c| self.get(c).unwrap_or(0))
                    .sum();
                self.set(cur, sum);
            } else {
                self.stack.push((cur, true));
                self.stack.extend(left.map(|c| (c, false)));
                self.stack.extend(right.map(|c| (c, false)));
            }
        }
        self.get(id).unwrap_or(0)
    }

    fn get(&self, id: NodeId) -> Option<usize> {
        match self.memo.get(id.idx())? {
            Some((generation, n)) if *generation == id.1 => Some(*n),
            _ => None,
        }
    }

    fn set(&mut self, id: NodeId, n: usize) {
        let idx = id.idx();
        if self.memo.len() <= idx {
            self.memo.resize(idx + 1, None);
        }
        self.memo[idx] = Some((id.1, n));
    }
}

/// A node and its family, as seen by candidate evaluation.
#[derive(Clone, Copy, Debug)]
struct Family {
    n: NodeId,
    l: NodeId,
    r: NodeId,
    left_pair: Option<(NodeId, NodeId)>,
    right_pair: Option<(NodeId, NodeId)>,
}

fn family<T: Scalar, P>(bvh: &Bvh<T, P>, n: NodeId) -> Option<Family> {
    if !bvh.is_alive(n) || bvh.is_leaf(n) {
        return None;
    }
    let (Some(l), Some(r)) = bvh.children(n) else {
        return None;
    };
    let pair = |id| match bvh.children(id) {
        (Some(a), Some(b)) => Some((a, b)),
        _ => None,
    };
    Some(Family {
        n,
        l,
        r,
        left_pair: pair(l),
        right_pair: pair(r),
    })
}

/// Area weighted by leaf count: one node's share of [`Bvh::total_cost`].
fn weight(area: f64, leaves: usize) -> f64 {
    area * leaves as f64
}

/// Pick the best rotation for `f` and `N`'s cost under it, or `Rotation::None`
/// with the current cost.
///
/// A candidate wins if it strictly beats the best local cost so far and the
/// nodes it rewrites end up lighter than they are now.
fn choose<T: Scalar, P>(bvh: &Bvh<T, P>, f: &Family, counter: &mut LeafCounter) -> (Rotation, f64) {
    let bounds = |id| bvh.node(id).bounds;
    let parent_area = surface_area(&bounds(f.n));
    let (bl, br) = (bounds(f.l), bounds(f.r));
    let (al, ar) = (surface_area(&bl), surface_area(&br));
    let cl = counter.count(bvh, f.l);
    let cr = counter.count(bvh, f.r);
    let (wl, wr) = (weight(al, cl), weight(ar, cr));

    let mut best = (Rotation::None, sah_cost(parent_area, al, ar, cl, cr));
    let mut consider = |rotation, local: f64, rewritten_before: f64, rewritten_after: f64| {
        if local < best.1 && rewritten_after < rewritten_before {
            best = (rotation, local);
        }
    };

    if let Some((ll, lr)) = f.left_pair {
        let (cll, clr) = (counter.count(bvh, ll), counter.count(bvh, lr));
        let (bll, blr) = (bounds(ll), bounds(lr));
        // N = {L = {R, LR}, LL}
        let merged = union_surface_area(&br, &blr);
        consider(
            Rotation::LeftLeftUp,
            sah_cost(parent_area, merged, surface_area(&bll), cr + clr, cll),
            wl,
            weight(merged, cr + clr),
        );
        // N = {L = {LL, R}, LR}
        let merged = union_surface_area(&bll, &br);
        consider(
            Rotation::LeftRightUp,
            sah_cost(parent_area, merged, surface_area(&blr), cll + cr, clr),
            wl,
            weight(merged, cll + cr),
        );
    }
    if let Some((rl, rr)) = f.right_pair {
        let (crl, crr) = (counter.count(bvh, rl), counter.count(bvh, rr));
        let (brl, brr) = (bounds(rl), bounds(rr));
        // N = {RL, R = {L, RR}}
        let merged = union_surface_area(&bl, &brr);
        consider(
            Rotation::RightLeftUp,
            sah_cost(parent_area, surface_area(&brl), merged, crl, cl + crr),
            wr,
            weight(merged, cl + crr),
        );
        // N = {RR, R = {RL, L}}
        let merged = union_surface_area(&brl, &bl);
        consider(
            Rotation::RightRightUp,
            sah_cost(parent_area, surface_area(&brr), merged, crr, crl + cl),
            wr,
            weight(merged, crl + cl),
        );
    }
    if let (Some((ll, lr)), Some((rl, rr))) = (f.left_pair, f.right_pair) {
        let [cll, clr, crl, crr] = [ll, lr, rl, rr].map(|id| counter.count(bvh, id));
        let [bll, blr, brl, brr] = [ll, lr, rl, rr].map(bounds);
        let (left, right) = (union_surface_area(&bll, &brl), union_surface_area(&blr, &brr));
        consider(
            Rotation::SwapLeftRightWithRightLeft,
            sah_cost(parent_area, left, right, cll + crl, clr + crr),
            wl + wr,
            weight(left, cll + crl) + weight(right, clr + crr),
        );
        let (left, right) = (union_surface_area(&bll, &brr), union_surface_area(&brl, &blr));
        consider(
            Rotation::SwapLeftRightWithRightRight,
            sah_cost(parent_area, left, right, cll + crr, crl + clr),
            wl + wr,
            weight(left, cll + crr) + weight(right, crl + clr),
        );
    }
    best
}

/// Relink the family for `rotation` and refit the child nodes it rewrote.
///
/// Returns the rewritten nodes, bottom-most first.
fn apply<T: Scalar, P>(bvh: &mut Bvh<T, P>, f: &Family, rotation: Rotation) -> [Option<NodeId>; 2] {
    let Family { n, l, r, .. } = *f;
    let changed = match (rotation, f.left_pair, f.right_pair) {
        (Rotation::LeftLeftUp, Some((ll, _)), _) => {
            bvh.set_child(n, Side::Right, Some(ll));
            bvh.set_child(l, Side::Left, Some(r));
            [Some(l), None]
        }
        (Rotation::LeftRightUp, Some((_, lr)), _) => {
            bvh.set_child(n, Side::Right, Some(lr));
            bvh.set_child(l, Side::Right, Some(r));
            [Some(l), None]
        }
        (Rotation::RightLeftUp, _, Some((rl, _))) => {
            bvh.set_child(n, Side::Left, Some(rl));
            bvh.set_child(r, Side::Left, Some(l));
            [Some(r), None]
        }
        (Rotation::RightRightUp, _, Some((_, rr))) => {
            bvh.set_child(n, Side::Left, Some(rr));
            bvh.set_child(r, Side::Right, Some(l));
            [Some(r), None]
        }
        (Rotation::SwapLeftRightWithRightLeft, Some((_, lr)), Some((rl, _))) => {
            bvh.set_child(l, Side::Right, Some(rl));
            bvh.set_child(r, Side::Left, Some(lr));
            [Some(l), Some(r)]
        }
        (Rotation::SwapLeftRightWithRightRight, Some((_, lr)), Some((_, rr))) => {
            bvh.set_child(l, Side::Right, Some(rr));
            bvh.set_child(r, Side::Right, Some(lr));
            [Some(l), Some(r)]
        }
        _ => [None, None],
    };
    for id in changed.into_iter().flatten() {
        bvh.refit(id);
        bvh.update_leaf_node_count(id);
    }
    changed
}

fn rotate_with<T: Scalar, P>(bvh: &mut Bvh<T, P>, n: NodeId, counter: &mut LeafCounter) -> Rotation {
    let Some(f) = family(bvh, n) else {
        return Rotation::None;
    };
    let (rotation, cost) = choose(bvh, &f, counter);
    if !rotation.is_applied() {
        return rotation;
    }
    // Rewritten nodes take their new counts from their (untouched) children.
    for id in apply(bvh, &f, rotation).into_iter().flatten() {
        let (a, b) = bvh.children(id);
        let sum: usize = [a, b]
            .into_iter()
            .flatten()
            .map(|c| counter.count(bvh, c))
            .sum();
        counter.set(id, sum);
    }
    trace!("rotation {} at {n:?}, cost now {cost}", rotation.index());
    rotation
}

impl<T: Scalar, P> Bvh<T, P> {
    /// Evaluate the six rotations at `id` and apply the best strict improvement.
    ///
    /// Returns the applied rotation, or [`Rotation::None`] when `id` is a leaf, is
    /// stale, lacks a child, or is already locally optimal.
    pub fn try_rotate(&mut self, id: NodeId) -> Rotation {
        rotate_with(self, id, &mut LeafCounter::new())
    }

    /// Run a fresh [`Optimizer`] until it converges or has visited `budget` nodes.
    ///
    /// Returns the number of rotations applied.
    pub fn optimize(&mut self, budget: usize) -> usize {
        Optimizer::default().advance(self, budget)
    }
}

/// Incremental whole-tree optimizer.
///
/// Each pass walks the tree in pre-order and tries a rotation at every internal
/// node, visiting the node's post-rotation children afterwards. Passes repeat
/// until one applies no rotation (or [`OptimizerConfig::max_passes`] is hit).
/// The walk is resumable: work can be sliced across calls and the resulting
/// tree is the same as for a single unbounded call.
///
/// Leaf counts are memoized for the duration of a pass and refreshed locally
/// after each rotation. The tree must not be edited structurally in the middle of
/// a pass; call [`Optimizer::reset`] after inserting or removing leaves.
///
/// ```
/// use understory_bvh::{Aabb3D, Bvh, Optimizer, OptimizerConfig};
///
/// let mut bvh: Bvh<f32, u32> = Bvh::new();
/// for i in 0..64 {
///     let x = (i * 37 % 64) as f32;
///     bvh.insert(Aabb3D::from_center(x, 0.0, 0.0, 0.5), i);
/// }
/// let mut opt = Optimizer::new(OptimizerConfig::default().with_nodes_per_step(16));
/// while !opt.is_finished() {
///     opt.step(&mut bvh);
/// }
/// assert!(opt.is_converged());
/// ```
#[derive(Clone, Debug, Default)]
pub struct Optimizer {
    config: OptimizerConfig,
    traversal: Traversal,
    counter: LeafCounter,
    in_pass: bool,
    pass_rotations: usize,
    total_rotations: usize,
    passes: usize,
    state: State,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum State {
    #[default]
    Running,
    Converged,
    PassLimit,
}

impl Optimizer {
    /// Create an optimizer with the given configuration.
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Visit up to [`OptimizerConfig::nodes_per_step`] nodes. Returns rotations applied.
    pub fn step<T: Scalar, P>(&mut self, bvh: &mut Bvh<T, P>) -> usize {
        self.advance(bvh, self.config.nodes_per_step)
    }

    /// Visit up to `budget` nodes, crossing pass boundaries as needed.
    ///
    /// Returns the number of rotations applied during this call.
    pub fn advance<T: Scalar, P>(&mut self, bvh: &mut Bvh<T, P>, budget: usize) -> usize {
        let mut budget = budget;
        let mut applied = 0;
        while budget > 0 && !self.is_finished() {
            if !self.in_pass {
                self.traversal.init(bvh.root());
                self.counter.clear();
                self.pass_rotations = 0;
                self.in_pass = true;
            }
            let before = self.traversal.visited();
            let counter = &mut self.counter;
            let mut rotations = 0;
            let more = self.traversal.advance(bvh, budget, |bvh, id| {
                if rotate_with(bvh, id, counter).is_applied() {
                    rotations += 1;
                }
            });
            budget = budget.saturating_sub(self.traversal.visited() - before);
            applied += rotations;
            self.pass_rotations += rotations;
            self.total_rotations += rotations;
            if !more {
                self.finish_pass();
            }
        }
        applied
    }

    fn finish_pass(&mut self) {
        self.in_pass = false;
        self.passes += 1;
        debug!(
            "optimizer pass {} done: {} rotations over {} nodes",
            self.passes,
            self.pass_rotations,
            self.traversal.visited()
        );
        if self.pass_rotations == 0 {
            self.state = State::Converged;
            debug!(
                "optimizer converged after {} passes, {} rotations",
                self.passes, self.total_rotations
            );
        } else if self.config.max_passes.is_some_and(|max| self.passes >= max) {
            self.state = State::PassLimit;
            debug!("optimizer stopped at pass limit {}", self.passes);
        }
    }

    /// True once the optimizer has converged or hit its pass limit.
    pub fn is_finished(&self) -> bool {
        self.state != State::Running
    }

    /// True if the last completed pass applied no rotation.
    pub fn is_converged(&self) -> bool {
        self.state == State::Converged
    }

    /// Completed whole-tree passes.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Rotations applied since creation or the last reset.
    pub fn total_rotations(&self) -> usize {
        self.total_rotations
    }

    /// Abandon any pass in progress and start over, keeping the configuration.
    pub fn reset(&mut self) {
        *self = Self::new(self.config);
    }
}
