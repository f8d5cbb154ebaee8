// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Surface-area metrics used by insertion and the rotation optimizer.
//!
//! All functions return the *half* surface area (`dx*dy + dy*dz + dz*dx`).
//! The surface area heuristic only compares costs against each other, so the
//! constant factor is irrelevant. Everything is accumulated in `f64`.

use crate::types::{Aabb3D, Scalar, max_t, min_t};

/// Half surface area of a box. Empty and inverted boxes report zero.
#[inline]
pub fn surface_area<T: Scalar>(b: &Aabb3D<T>) -> f64 {
    let [dx, dy, dz] = b.extents();
    dx * dy + dy * dz + dz * dx
}

/// Half surface area of the smallest box enclosing both `a` and `b`.
///
/// Computed straight from the corner scalars; no intermediate box is built.
#[inline]
pub fn union_surface_area<T: Scalar>(a: &Aabb3D<T>, b: &Aabb3D<T>) -> f64 {
    let dx = span(min_t(a.min_x, b.min_x), max_t(a.max_x, b.max_x));
    let dy = span(min_t(a.min_y, b.min_y), max_t(a.max_y, b.max_y));
    let dz = span(min_t(a.min_z, b.min_z), max_t(a.max_z, b.max_z));
    dx * dy + dy * dz + dz * dx
}

#[inline]
fn span<T: Scalar>(lo: T, hi: T) -> f64 {
    (T::widen(hi) - T::widen(lo)).max(0.0)
}

/// Cost of a parent with two children under the surface area heuristic.
///
/// Each child's area is weighted by the number of leaves below it and the sum
/// is normalized by the parent's area. Lower is better. A parent with zero area
/// (all content degenerate) is not normalized.
#[inline]
pub fn sah_cost(
    parent_area: f64,
    left_area: f64,
    right_area: f64,
    left_leaves: usize,
    right_leaves: usize,
) -> f64 {
    let weighted = left_area * left_leaves as f64 + right_area * right_leaves as f64;
    if parent_area > 0.0 {
        weighted / parent_area
    } else {
        weighted
    }
}
