// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Primitive geometry types and helpers.

use alloc::vec::Vec;
use core::cmp::Ordering;
use core::fmt::Debug;

/// Axis-aligned bounding box in 3D.
///
/// `min <= max` per axis for any box describing real content.
/// The [empty](Aabb3D::empty) box is the exception: it is negatively infinite
/// (`min = +inf`, `max = -inf`) so that it is the identity of [`Aabb3D::union`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb3D<T> {
    /// Minimum x
    pub min_x: T,
    /// Minimum y
    pub min_y: T,
    /// Minimum z
    pub min_z: T,
    /// Maximum x
    pub max_x: T,
    /// Maximum y
    pub max_y: T,
    /// Maximum z
    pub max_z: T,
}

impl<T> Aabb3D<T> {
    /// Create a new AABB from min/max corners.
    pub const fn new(min_x: T, min_y: T, min_z: T, max_x: T, max_y: T, max_z: T) -> Self {
        Self {
            min_x,
            min_y,
            min_z,
            max_x,
            max_y,
            max_z,
        }
    }

    /// The six scalars in wire order: min x/y/z, then max x/y/z.
    pub fn to_array(self) -> [T; 6] {
        [
            self.min_x, self.min_y, self.min_z, self.max_x, self.max_y, self.max_z,
        ]
    }

    /// Inverse of [`Aabb3D::to_array`].
    pub fn from_array([min_x, min_y, min_z, max_x, max_y, max_z]: [T; 6]) -> Self {
        Self::new(min_x, min_y, min_z, max_x, max_y, max_z)
    }
}

impl<T: Scalar> Aabb3D<T> {
    /// The negatively infinite box: contains nothing, and is the identity of [`Aabb3D::union`].
    pub fn empty() -> Self {
        let lo = T::infinity();
        let hi = T::neg_infinity();
        Self::new(lo, lo, lo, hi, hi, hi)
    }

    /// A degenerate box around a single point.
    pub fn from_point(x: T, y: T, z: T) -> Self {
        Self::new(x, y, z, x, y, z)
    }

    /// A box of `half` extent on every axis around a center point.
    pub fn from_center(x: T, y: T, z: T, half: T) -> Self {
        Self::new(
            T::sub(x, half),
            T::sub(y, half),
            T::sub(z, half),
            T::add(x, half),
            T::add(y, half),
            T::add(z, half),
        )
    }

    /// Return true if the AABB is empty or inverted (no volume, not even a point). Assumes no NaN.
    pub fn is_empty(&self) -> bool {
        lt(self.max_x, self.min_x) || lt(self.max_y, self.min_y) || lt(self.max_z, self.min_z)
    }

    /// Smallest box enclosing both.
    pub fn union(&self, other: &Self) -> Self {
        union_aabb(*self, *other)
    }

    /// Whether `other` lies entirely within this box (boundaries inclusive).
    pub fn contains(&self, other: &Self) -> bool {
        le(self.min_x, other.min_x)
            && le(self.min_y, other.min_y)
            && le(self.min_z, other.min_z)
            && le(other.max_x, self.max_x)
            && le(other.max_y, self.max_y)
            && le(other.max_z, self.max_z)
    }

    /// Whether the boxes overlap (boundaries inclusive).
    pub fn intersects(&self, other: &Self) -> bool {
        le(self.min_x, other.max_x)
            && le(other.min_x, self.max_x)
            && le(self.min_y, other.max_y)
            && le(other.min_y, self.max_y)
            && le(self.min_z, other.max_z)
            && le(other.min_z, self.max_z)
    }

    /// Squared distance from a point to the closest point of the box, widened to `f64`.
    ///
    /// Zero when the point is inside. Infinite for the [empty](Aabb3D::empty) box.
    pub fn squared_distance_to_point(&self, x: T, y: T, z: T) -> f64 {
        let dx = axis_gap(T::widen(self.min_x), T::widen(self.max_x), T::widen(x));
        let dy = axis_gap(T::widen(self.min_y), T::widen(self.max_y), T::widen(y));
        let dz = axis_gap(T::widen(self.min_z), T::widen(self.max_z), T::widen(z));
        dx * dx + dy * dy + dz * dz
    }

    /// Extent along each axis, widened. Negative axes of inverted boxes clamp to zero.
    pub fn extents(&self) -> [f64; 3] {
        [
            (T::widen(self.max_x) - T::widen(self.min_x)).max(0.0),
            (T::widen(self.max_y) - T::widen(self.min_y)).max(0.0),
            (T::widen(self.max_z) - T::widen(self.min_z)).max(0.0),
        ]
    }

    /// Center of the box.
    pub fn center(&self) -> [T; 3] {
        [
            T::mid(self.min_x, self.max_x),
            T::mid(self.min_y, self.max_y),
            T::mid(self.min_z, self.max_z),
        ]
    }
}

// Distance from `p` to the interval `[lo, hi]`; written so that an inverted
// (empty) interval reports an infinite gap.
#[inline]
fn axis_gap(lo: f64, hi: f64, p: f64) -> f64 {
    let below = lo - p;
    let above = p - hi;
    below.max(above).max(0.0)
}

/// Numeric scalar abstraction for 3D AABBs.
///
/// Only floating-point scalars are supported: the codec quantizes relative
/// positions and the empty box relies on infinities. All area and distance
/// metrics are accumulated in `f64`.
pub trait Scalar: Copy + PartialOrd + Debug {
    /// Size of one encoded scalar in bytes.
    const BYTES: usize;

    /// Add two scalar values.
    fn add(a: Self, b: Self) -> Self;

    /// Subtract two scalar values: a - b.
    fn sub(a: Self, b: Self) -> Self;

    /// Zero value for the scalar type.
    fn zero() -> Self;

    /// Positive infinity.
    fn infinity() -> Self;

    /// Negative infinity.
    fn neg_infinity() -> Self;

    /// Midpoint between a and b.
    fn mid(a: Self, b: Self) -> Self;

    /// Convert a scalar to the `f64` accumulator.
    fn widen(v: Self) -> f64;

    /// Convert back from the accumulator, rounding to nearest.
    fn narrow(v: f64) -> Self;

    /// Append the little-endian encoding of `v`.
    fn write_le(v: Self, out: &mut Vec<u8>);

    /// Decode from exactly [`Scalar::BYTES`] little-endian bytes.
    fn read_le(bytes: &[u8]) -> Self;
}

impl Scalar for f32 {
    const BYTES: usize = 4;

    #[inline]
    fn add(a: Self, b: Self) -> Self {
        a + b
    }

    #[inline]
    fn sub(a: Self, b: Self) -> Self {
        a - b
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn infinity() -> Self {
        Self::INFINITY
    }

    #[inline]
    fn neg_infinity() -> Self {
        Self::NEG_INFINITY
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * (a + b)
    }

    #[inline]
    fn widen(v: Self) -> f64 {
        v as f64
    }

    #[inline]
    #[allow(
        clippy::cast_possible_truncation,
        reason = "Narrowing back to f32 storage is the intended precision."
    )]
    fn narrow(v: f64) -> Self {
        v as Self
    }

    fn write_le(v: Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0_u8; 4];
        buf.copy_from_slice(bytes);
        Self::from_le_bytes(buf)
    }
}

impl Scalar for f64 {
    const BYTES: usize = 8;

    #[inline]
    fn add(a: Self, b: Self) -> Self {
        a + b
    }

    #[inline]
    fn sub(a: Self, b: Self) -> Self {
        a - b
    }

    #[inline]
    fn zero() -> Self {
        0.0
    }

    #[inline]
    fn infinity() -> Self {
        Self::INFINITY
    }

    #[inline]
    fn neg_infinity() -> Self {
        Self::NEG_INFINITY
    }

    #[inline]
    fn mid(a: Self, b: Self) -> Self {
        0.5 * (a + b)
    }

    #[inline]
    fn widen(v: Self) -> f64 {
        v
    }

    #[inline]
    fn narrow(v: f64) -> Self {
        v
    }

    fn write_le(v: Self, out: &mut Vec<u8>) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    fn read_le(bytes: &[u8]) -> Self {
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(bytes);
        Self::from_le_bytes(buf)
    }
}

pub(crate) fn min_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Greater) => b,
        _ => a,
    }
}

pub(crate) fn max_t<T: PartialOrd + Copy>(a: T, b: T) -> T {
    match a.partial_cmp(&b) {
        Some(Ordering::Less) => b,
        _ => a,
    }
}

pub(crate) fn le<T: PartialOrd>(a: T, b: T) -> bool {
    a.partial_cmp(&b)
        .map(|o| o != Ordering::Greater)
        .unwrap_or(false)
}

pub(crate) fn lt<T: PartialOrd>(a: T, b: T) -> bool {
    a.partial_cmp(&b)
        .map(|o| o == Ordering::Less)
        .unwrap_or(false)
}

pub(crate) fn union_aabb<T: PartialOrd + Copy>(a: Aabb3D<T>, b: Aabb3D<T>) -> Aabb3D<T> {
    Aabb3D {
        min_x: min_t(a.min_x, b.min_x),
        min_y: min_t(a.min_y, b.min_y),
        min_z: min_t(a.min_z, b.min_z),
        max_x: max_t(a.max_x, b.max_x),
        max_y: max_t(a.max_y, b.max_y),
        max_z: max_t(a.max_z, b.max_z),
    }
}
