// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Stack-based queries: sphere collection, visitor walks, frustum visibility.
//!
//! None of these recurse. Each takes a [`QueryScratch`] owned by the caller, so
//! steady-state queries do not allocate and two callers never share a stack.

use alloc::vec::Vec;
use core::fmt::Debug;

use crate::tree::{Bvh, NodeId};
use crate::types::{Aabb3D, Scalar};

/// Reusable traversal stack for the query routines.
#[derive(Clone, Debug, Default)]
pub struct QueryScratch {
    stack: Vec<(NodeId, usize)>,
}

impl QueryScratch {
    /// Create an empty scratch stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scratch stack with room for `depth` pending nodes.
    pub fn with_capacity(depth: usize) -> Self {
        Self {
            stack: Vec::with_capacity(depth),
        }
    }
}

/// What a [`Visitor`] wants the walk to do next.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VisitStatus {
    /// Descend into the node's children (if any) and keep going.
    Continue,
    /// Do not descend into this node's children, but keep walking siblings.
    Skip,
    /// End the walk immediately.
    Stop,
}

/// Per-node callbacks for [`Bvh::visit`].
///
/// Depth is `0` at the root. Visitors may keep their own state but cannot
/// change the tree.
pub trait Visitor<T: Scalar, P> {
    /// Called for every internal node reached, before its children.
    fn visit_internal(&mut self, id: NodeId, bounds: &Aabb3D<T>, depth: usize) -> VisitStatus {
        let _ = (id, bounds, depth);
        VisitStatus::Continue
    }

    /// Called for every leaf reached.
    fn visit_leaf(&mut self, id: NodeId, bounds: &Aabb3D<T>, payload: &P, depth: usize) -> VisitStatus;
}

impl<T: Scalar, P> Bvh<T, P> {
    /// Collect payloads of leaves whose bounds come strictly closer than `radius`
    /// to the point `(x, y, z)`.
    ///
    /// Results are cloned into `out` starting at `offset`; collection stops when
    /// the buffer is full. Returns the number of payloads written. A point on a
    /// box's boundary at exactly `radius` does not count.
    ///
    /// ```
    /// use understory_bvh::{Aabb3D, Bvh, QueryScratch};
    ///
    /// let mut bvh: Bvh<f32, u32> = Bvh::new();
    /// bvh.insert(Aabb3D::from_point(0.0, 0.0, 0.0), 1);
    /// bvh.insert(Aabb3D::from_point(5.0, 0.0, 0.0), 2);
    /// bvh.insert(Aabb3D::from_point(0.0, 10.0, 0.0), 3);
    ///
    /// let mut scratch = QueryScratch::new();
    /// let mut out = [0_u32; 8];
    /// let n = bvh.query_sphere(0.0, 0.0, 0.0, 6.0, &mut scratch, &mut out, 0);
    /// let mut hits = out[..n].to_vec();
    /// hits.sort_unstable();
    /// assert_eq!(hits, [1, 2]);
    /// ```
    pub fn query_sphere(
        &self,
        x: T,
        y: T,
        z: T,
        radius: T,
        scratch: &mut QueryScratch,
        out: &mut [P],
        offset: usize,
    ) -> usize
    where
        P: Clone,
    {
        let mut cursor = offset;
        if cursor >= out.len() {
            return 0;
        }
        self.query_sphere_with(x, y, z, radius, scratch, |_, payload| {
            out[cursor] = payload.clone();
            cursor += 1;
            cursor < out.len()
        });
        cursor - offset
    }

    /// Call `f` for each leaf strictly within `radius` of `(x, y, z)`.
    ///
    /// `f` returns `false` to end the query early.
    pub fn query_sphere_with<F>(&self, x: T, y: T, z: T, radius: T, scratch: &mut QueryScratch, mut f: F)
    where
        F: FnMut(NodeId, &P) -> bool,
    {
        let r = T::widen(radius);
        if r.is_nan() || r <= 0.0 {
            return;
        }
        let r2 = r * r;
        let stack = &mut scratch.stack;
        stack.clear();
        stack.push((self.root(), 0));
        while let Some((id, _)) = stack.pop() {
            let node = self.node(id);
            if node.bounds.squared_distance_to_point(x, y, z) >= r2 {
                continue;
            }
            if let Some(payload) = self.payload(id) {
                if !f(id, payload) {
                    break;
                }
                continue;
            }
            let (left, right) = node.children();
            stack.extend(right.map(|c| (c, 0)));
            stack.extend(left.map(|c| (c, 0)));
        }
        stack.clear();
    }

    /// Walk the tree in pre-order (left first), handing nodes to `visitor`.
    ///
    /// Returns `false` if the visitor stopped the walk.
    pub fn visit<V: Visitor<T, P>>(&self, visitor: &mut V, scratch: &mut QueryScratch) -> bool {
        let stack = &mut scratch.stack;
        stack.clear();
        stack.push((self.root(), 0));
        while let Some((id, depth)) = stack.pop() {
            let node = self.node(id);
            let status = match self.payload(id) {
                Some(payload) => visitor.visit_leaf(id, &node.bounds, payload, depth),
                None => visitor.visit_internal(id, &node.bounds, depth),
            };
            match status {
                VisitStatus::Continue => {
                    let (left, right) = node.children();
                    stack.extend(right.map(|c| (c, depth + 1)));
                    stack.extend(left.map(|c| (c, depth + 1)));
                }
                VisitStatus::Skip => {}
                VisitStatus::Stop => {
                    stack.clear();
                    return false;
                }
            }
        }
        true
    }
}

/// A plane `normal · p + d = 0`; points with a positive signed distance are inside.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Plane<T> {
    /// Plane normal, pointing towards the inside.
    pub normal: [T; 3],
    /// Offset term.
    pub d: T,
}

impl<T: Scalar> Plane<T> {
    /// Create a plane from its normal and offset.
    pub const fn new(normal: [T; 3], d: T) -> Self {
        Self { normal, d }
    }

    /// Signed distance of the box corner furthest along the normal.
    fn positive_vertex_distance(&self, b: &Aabb3D<T>) -> f64 {
        let [nx, ny, nz] = self.normal.map(T::widen);
        let pick = |n: f64, lo: T, hi: T| if n >= 0.0 { T::widen(hi) } else { T::widen(lo) };
        nx * pick(nx, b.min_x, b.max_x)
            + ny * pick(ny, b.min_y, b.max_y)
            + nz * pick(nz, b.min_z, b.max_z)
            + T::widen(self.d)
    }
}

/// Six inward-facing planes bounding a view volume.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Frustum<T> {
    /// Left, right, bottom, top, near, far; the order is not significant.
    pub planes: [Plane<T>; 6],
}

impl<T: Scalar> Frustum<T> {
    /// Create a frustum from six inward-facing planes.
    pub const fn new(planes: [Plane<T>; 6]) -> Self {
        Self { planes }
    }

    /// The box-shaped volume of an orthographic camera.
    pub fn orthographic(volume: &Aabb3D<T>) -> Self {
        let one = T::narrow(1.0);
        let neg = T::narrow(-1.0);
        let zero = T::zero();
        let flip = |v: T| T::sub(zero, v);
        Self::new([
            Plane::new([one, zero, zero], flip(volume.min_x)),
            Plane::new([neg, zero, zero], volume.max_x),
            Plane::new([zero, one, zero], flip(volume.min_y)),
            Plane::new([zero, neg, zero], volume.max_y),
            Plane::new([zero, zero, one], flip(volume.min_z)),
            Plane::new([zero, zero, neg], volume.max_z),
        ])
    }

    /// Whether any part of `b` may be visible.
    ///
    /// A box is culled when, for some plane, even its most inward corner has a
    /// signed distance of zero or less. Empty boxes are never visible.
    pub fn may_contain(&self, b: &Aabb3D<T>) -> bool {
        !b.is_empty()
            && self
                .planes
                .iter()
                .all(|plane| plane.positive_vertex_distance(b) > 0.0)
    }
}

/// A growable bit-set of payload indices.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibleSet {
    words: Vec<u64>,
}

impl VisibleSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty set with room for indices below `bits` without growing.
    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: Vec::with_capacity(bits.div_ceil(64)),
        }
    }

    /// Remove every index, keeping the allocation.
    pub fn clear(&mut self) {
        self.words.clear();
    }

    /// Add `index`. Returns `true` if it was not present.
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, bit) = (index / 64, index % 64);
        if self.words.len() <= word {
            self.words.resize(word + 1, 0);
        }
        let mask = 1_u64 << bit;
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    /// Whether `index` is present.
    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / 64)
            .is_some_and(|w| w & (1_u64 << (index % 64)) != 0)
    }

    /// Number of indices present.
    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// True if no index is present.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Present indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            core::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * 64 + bit)
            })
        })
    }
}

/// Visitor that records the leaves a [`Frustum`] may see.
///
/// `index_of` maps a payload to its bit in the [`VisibleSet`]; returning `None`
/// filters the leaf out.
pub struct FrustumCollector<'a, T, F> {
    frustum: &'a Frustum<T>,
    visible: &'a mut VisibleSet,
    index_of: F,
}

impl<T: Debug, F> Debug for FrustumCollector<'_, T, F> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrustumCollector")
            .field("frustum", self.frustum)
            .field("visible", &self.visible.len())
            .finish_non_exhaustive()
    }
}

impl<'a, T, F> FrustumCollector<'a, T, F> {
    /// Collect into `visible`. The set is not cleared first.
    pub fn new(frustum: &'a Frustum<T>, visible: &'a mut VisibleSet, index_of: F) -> Self {
        Self {
            frustum,
            visible,
            index_of,
        }
    }
}

impl<T: Scalar, P, F> Visitor<T, P> for FrustumCollector<'_, T, F>
where
    F: FnMut(&P) -> Option<usize>,
{
    fn visit_internal(&mut self, _id: NodeId, bounds: &Aabb3D<T>, _depth: usize) -> VisitStatus {
        if self.frustum.may_contain(bounds) {
            VisitStatus::Continue
        } else {
            VisitStatus::Skip
        }
    }

    fn visit_leaf(&mut self, _id: NodeId, bounds: &Aabb3D<T>, payload: &P, _depth: usize) -> VisitStatus {
        if self.frustum.may_contain(bounds) {
            if let Some(index) = (self.index_of)(payload) {
                self.visible.insert(index);
            }
        }
        VisitStatus::Continue
    }
}

/// Kind column of a [`DebugRow`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRole {
    /// Internal node.
    Internal,
    /// Leaf node.
    Leaf,
}

/// One node of a [`DebugExport`] dump.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DebugRow<T> {
    /// Distance from the root.
    pub depth: usize,
    /// Whether the node is a leaf.
    pub role: NodeRole,
    /// The node's bounds.
    pub bounds: Aabb3D<T>,
}

/// Visitor that flattens the tree into pre-order [`DebugRow`]s, e.g. for drawing
/// bounding boxes in a debug overlay.
#[derive(Clone, Debug, Default)]
pub struct DebugExport<T> {
    /// Collected rows, in visit order.
    pub rows: Vec<DebugRow<T>>,
    /// Rows deeper than this are not descended into.
    pub max_depth: Option<usize>,
}

impl<T> DebugExport<T> {
    /// Export every node.
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            max_depth: None,
        }
    }

    /// Export nodes down to `depth` only.
    pub fn with_max_depth(depth: usize) -> Self {
        Self {
            rows: Vec::new(),
            max_depth: Some(depth),
        }
    }
}

impl<T: Scalar, P> Visitor<T, P> for DebugExport<T> {
    fn visit_internal(&mut self, _id: NodeId, bounds: &Aabb3D<T>, depth: usize) -> VisitStatus {
        self.rows.push(DebugRow {
            depth,
            role: NodeRole::Internal,
            bounds: *bounds,
        });
        if self.max_depth.is_some_and(|max| depth >= max) {
            VisitStatus::Skip
        } else {
            VisitStatus::Continue
        }
    }

    fn visit_leaf(&mut self, _id: NodeId, bounds: &Aabb3D<T>, _payload: &P, depth: usize) -> VisitStatus {
        self.rows.push(DebugRow {
            depth,
            role: NodeRole::Leaf,
            bounds: *bounds,
        });
        VisitStatus::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn points() -> Bvh<f64, u32> {
        let mut bvh = Bvh::new();
        bvh.insert(Aabb3D::from_point(0.0, 0.0, 0.0), 0);
        bvh.insert(Aabb3D::from_point(5.0, 0.0, 0.0), 1);
        bvh.insert(Aabb3D::from_point(0.0, 10.0, 0.0), 2);
        bvh
    }

    fn grid(n: u32) -> Bvh<f32, u32> {
        let mut bvh = Bvh::new();
        for i in 0..n {
            let (x, y) = ((i % 10) as f32 * 2.0, (i / 10) as f32 * 2.0);
            bvh.insert(Aabb3D::from_center(x, y, 0.0, 0.5), i);
        }
        bvh
    }

    #[test]
    fn sphere_finds_near_points_only() {
        let bvh = points();
        let mut scratch = QueryScratch::new();
        let mut out = [u32::MAX; 4];
        let n = bvh.query_sphere(0.0, 0.0, 0.0, 6.0, &mut scratch, &mut out, 0);
        assert_eq!(n, 2);
        let mut hits = out[..n].to_vec();
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1]);
    }

    #[test]
    fn sphere_boundary_is_exclusive() {
        let bvh = points();
        let mut scratch = QueryScratch::new();
        let mut out = [0; 4];
        assert_eq!(bvh.query_sphere(0.0, 0.0, 0.0, 5.0, &mut scratch, &mut out, 0), 1);
        assert_eq!(out[0], 0);
    }

    #[test]
    fn sphere_writes_at_offset_and_stops_when_full() {
        let bvh = grid(100);
        let mut scratch = QueryScratch::new();
        let mut out = [u32::MAX; 5];
        let n = bvh.query_sphere(9.0, 9.0, 0.0, 100.0, &mut scratch, &mut out, 2);
        assert_eq!(n, 3);
        assert_eq!(&out[..2], &[u32::MAX, u32::MAX]);
        assert!(out[2..].iter().all(|p| *p < 100));
        assert_eq!(bvh.query_sphere(9.0, 9.0, 0.0, 100.0, &mut scratch, &mut out, 5), 0);
    }

    #[test]
    fn sphere_matches_brute_force() {
        let bvh = grid(100);
        let mut scratch = QueryScratch::new();
        let mut out = vec![0_u32; 100];
        for (cx, cy, r) in [(3.0, 3.0, 2.5), (10.0, 0.0, 4.0), (-5.0, -5.0, 1.0), (9.0, 9.0, 0.0)] {
            let n = bvh.query_sphere(cx, cy, 0.0, r, &mut scratch, &mut out, 0);
            let mut got = out[..n].to_vec();
            got.sort_unstable();
            let r2 = f64::from(r) * f64::from(r);
            let mut expected: Vec<u32> = bvh
                .leaves()
                .filter(|(_, b, _)| b.squared_distance_to_point(cx, cy, 0.0) < r2)
                .map(|(_, _, p)| *p)
                .collect();
            expected.sort_unstable();
            assert_eq!(got, expected, "center ({cx}, {cy}) radius {r}");
        }
    }

    #[test]
    fn queries_on_empty_tree_find_nothing() {
        let bvh: Bvh<f64, u32> = Bvh::new();
        let mut scratch = QueryScratch::new();
        let mut out = [0; 4];
        assert_eq!(bvh.query_sphere(0.0, 0.0, 0.0, 1e9, &mut scratch, &mut out, 0), 0);
        let mut visible = VisibleSet::new();
        let frustum = Frustum::orthographic(&Aabb3D::new(-1e9, -1e9, -1e9, 1e9, 1e9, 1e9));
        assert!(bvh.visit(
            &mut FrustumCollector::new(&frustum, &mut visible, |p: &u32| Some(*p as usize)),
            &mut scratch
        ));
        assert!(visible.is_empty());
    }

    #[test]
    fn visitor_sees_depths_and_can_stop() {
        struct Counter {
            leaves: usize,
            max_depth: usize,
            stop_after: usize,
        }
        impl Visitor<f32, u32> for Counter {
            fn visit_leaf(&mut self, _: NodeId, _: &Aabb3D<f32>, _: &u32, depth: usize) -> VisitStatus {
                self.leaves += 1;
                self.max_depth = self.max_depth.max(depth);
                if self.leaves == self.stop_after {
                    VisitStatus::Stop
                } else {
                    VisitStatus::Continue
                }
            }
        }

        let bvh = grid(20);
        let mut scratch = QueryScratch::new();
        let mut all = Counter {
            leaves: 0,
            max_depth: 0,
            stop_after: usize::MAX,
        };
        assert!(bvh.visit(&mut all, &mut scratch));
        assert_eq!(all.leaves, 20);
        assert!(all.max_depth >= 5);

        let mut early = Counter {
            leaves: 0,
            max_depth: 0,
            stop_after: 3,
        };
        assert!(!bvh.visit(&mut early, &mut scratch));
        assert_eq!(early.leaves, 3);
    }

    #[test]
    fn frustum_collects_visible_leaves() {
        let bvh = grid(100);
        // Covers x and y in [3, 7]: cells centered at 4 and 6 fall inside, the
        // neighbors at 2 and 8 end half a unit short.
        let frustum = Frustum::orthographic(&Aabb3D::new(3.0, 3.0, -1.0, 7.0, 7.0, 1.0));
        let mut visible = VisibleSet::with_capacity(100);
        let mut scratch = QueryScratch::new();
        bvh.visit(
            &mut FrustumCollector::new(&frustum, &mut visible, |p: &u32| Some(*p as usize)),
            &mut scratch,
        );
        let got: Vec<usize> = visible.iter().collect();
        assert_eq!(got, vec![22, 23, 32, 33]);
        assert_eq!(visible.len(), 4);
    }

    #[test]
    fn frustum_touching_face_is_culled() {
        let b = Aabb3D::new(0.0_f64, 0.0, 0.0, 1.0, 1.0, 1.0);
        let touching = Frustum::orthographic(&Aabb3D::new(1.0, 0.0, 0.0, 2.0, 1.0, 1.0));
        assert!(!touching.may_contain(&b));
        let overlapping = Frustum::orthographic(&Aabb3D::new(0.5, 0.0, 0.0, 2.0, 1.0, 1.0));
        assert!(overlapping.may_contain(&b));
        assert!(!overlapping.may_contain(&Aabb3D::empty()));
    }

    #[test]
    fn collector_filter_skips_leaves() {
        let bvh = grid(10);
        let frustum = Frustum::orthographic(&Aabb3D::new(-10.0, -10.0, -10.0, 100.0, 100.0, 10.0));
        let mut visible = VisibleSet::new();
        let mut scratch = QueryScratch::new();
        bvh.visit(
            &mut FrustumCollector::new(&frustum, &mut visible, |p: &u32| {
                (p % 2 == 0).then_some(*p as usize)
            }),
            &mut scratch,
        );
        assert_eq!(visible.iter().collect::<Vec<_>>(), vec![0, 2, 4, 6, 8]);
    }

    #[test]
    fn visible_set_basics() {
        let mut set = VisibleSet::new();
        assert!(set.insert(3));
        assert!(!set.insert(3));
        assert!(set.insert(130));
        assert!(set.contains(130));
        assert!(!set.contains(129));
        assert!(!set.contains(10_000));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![3, 130]);
        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn debug_export_records_preorder_rows() {
        let mut bvh: Bvh<f64, u32> = Bvh::new();
        bvh.insert(Aabb3D::from_center(0.0, 0.0, 0.0, 0.5), 0);
        bvh.insert(Aabb3D::from_center(3.0, 0.0, 0.0, 0.5), 1);
        let mut export = DebugExport::new();
        let mut scratch = QueryScratch::new();
        bvh.visit(&mut export, &mut scratch);
        assert_eq!(export.rows.len(), 3);
        assert_eq!(export.rows[0].role, NodeRole::Internal);
        assert_eq!(export.rows[0].depth, 0);
        assert_eq!(export.rows[0].bounds, Aabb3D::new(-0.5, -0.5, -0.5, 3.5, 0.5, 0.5));
        assert_eq!(export.rows[1].role, NodeRole::Leaf);
        assert_eq!(export.rows[1].depth, 1);
        assert_eq!(export.rows[1].bounds.min_x, -0.5);
        assert_eq!(export.rows[2].bounds.min_x, 2.5);

        let mut shallow = DebugExport::with_max_depth(0);
        Bvh::visit(&bvh, &mut shallow, &mut scratch);
        assert_eq!(shallow.rows.len(), 1);
    }
}
