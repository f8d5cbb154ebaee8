// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Compact binary serialization of a [`Bvh`].
//!
//! ## Layout
//!
//! All multi-byte values are little-endian.
//!
//! 1. Root bounds: six scalars at full precision, in
//!    `min_x, min_y, min_z, max_x, max_y, max_z` order.
//! 2. Internal nodes in pre-order, left before right, starting at the root. Each is:
//!    - one [`ChildMarker`] byte describing its two child slots;
//!    - for every present child, left first: its bounds as six `u16` values
//!      quantized against this node's decoded bounds, then the payload if the
//!      child is a leaf.
//!
//! Leaves carry no marker. The format has no version tag or length prefix;
//! callers that need either wrap it.
//!
//! ## Precision
//!
//! Child bounds are lossy. Each scalar maps its position within the parent's
//! extent `E` on that axis to `0..=65535`; minimums round down and maximums round
//! up, so a decoded box encloses the original (up to scalar rounding) and errs
//! by at most `E / 65535` per side. Deeper nodes quantize against
//! already-quantized parents, so the error compounds with depth. Decoded trees
//! are refit, which re-tightens internal bounds around the decoded leaves.

use alloc::vec::Vec;

use bitflags::bitflags;
use log::{debug, warn};

use crate::error::CodecError;
use crate::tree::{Bvh, NodeId, NodeKind, Side};
use crate::types::{Aabb3D, Scalar};

/// Largest row or node count [`encode`] accepts.
pub const MAX_ELEMENTS: usize = (1 << 31) - 1;

/// Quantized value of a scalar at its parent's maximum.
pub const QUANT_MAX: u16 = u16::MAX;

bitflags! {
    /// Structural byte preceding each internal node's child blocks.
    ///
    /// Bits 0-1 describe the left slot and bits 2-3 the right slot: `00` absent,
    /// `10` leaf, `11` internal. The internal pattern includes the leaf bit, so it
    /// is tested first. `01` and any bit above 3 are rejected.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ChildMarker: u8 {
        /// Left child is a leaf.
        const LEFT_LEAF    = 0b0000_0010;
        /// Left child is internal.
        const LEFT_BINARY  = 0b0000_0011;
        /// Right child is a leaf.
        const RIGHT_LEAF   = 0b0000_1000;
        /// Right child is internal.
        const RIGHT_BINARY = 0b0000_1100;
    }
}

/// Contents of one child slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildSlot {
    /// No child.
    Absent,
    /// A leaf child.
    Leaf,
    /// An internal child.
    Internal,
}

impl ChildMarker {
    /// Build the marker for a pair of slots.
    pub fn from_slots(left: ChildSlot, right: ChildSlot) -> Self {
        let pick = |slot, leaf, binary| match slot {
            ChildSlot::Absent => Self::empty(),
            ChildSlot::Leaf => leaf,
            ChildSlot::Internal => binary,
        };
        pick(left, Self::LEFT_LEAF, Self::LEFT_BINARY)
            | pick(right, Self::RIGHT_LEAF, Self::RIGHT_BINARY)
    }

    /// Parse a marker byte into `(left, right)` slots, or `None` for reserved patterns.
    pub fn parse(byte: u8) -> Option<(ChildSlot, ChildSlot)> {
        let marker = Self::from_bits(byte)?;
        Some((
            marker.slot(Self::LEFT_LEAF, Self::LEFT_BINARY)?,
            marker.slot(Self::RIGHT_LEAF, Self::RIGHT_BINARY)?,
        ))
    }

    fn slot(self, leaf: Self, binary: Self) -> Option<ChildSlot> {
        if self.contains(binary) {
            Some(ChildSlot::Internal)
        } else if self.contains(leaf) {
            Some(ChildSlot::Leaf)
        } else if self.intersects(binary) {
            None
        } else {
            Some(ChildSlot::Absent)
        }
    }
}

/// Serializes leaf payloads for [`encode`] and [`decode`].
pub trait PayloadCodec<P> {
    /// Append `payload` to `out`.
    fn encode(&self, payload: &P, out: &mut Vec<u8>);

    /// Read one payload.
    fn decode(&self, reader: &mut ByteReader<'_>) -> Result<P, CodecError>;
}

/// Payload codec for `u32` indices, stored as four little-endian bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct U32Payload;

impl PayloadCodec<u32> for U32Payload {
    fn encode(&self, payload: &u32, out: &mut Vec<u8>) {
        out.extend_from_slice(&payload.to_le_bytes());
    }

    fn decode(&self, reader: &mut ByteReader<'_>) -> Result<u32, CodecError> {
        reader.read_u32()
    }
}

/// Forward-only cursor over an input buffer.
#[derive(Clone, Debug)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Start reading at the beginning of `bytes`.
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Take the next `n` bytes.
    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let end = self.pos.saturating_add(n);
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or(CodecError::UnexpectedEof {
                offset: self.pos,
                needed: n,
            })?;
        self.pos = end;
        Ok(bytes)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1)?[0])
    }

    /// Read a little-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    /// Read a little-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read one full-precision scalar.
    pub fn read_scalar<T: Scalar>(&mut self) -> Result<T, CodecError> {
        Ok(T::read_le(self.read_bytes(T::BYTES)?))
    }
}

/// Encode `bvh`, appending to `out`. Returns the number of bytes written.
pub fn encode<T, P, C>(bvh: &Bvh<T, P>, codec: &C, out: &mut Vec<u8>) -> Result<usize, CodecError>
where
    T: Scalar,
    C: PayloadCodec<P>,
{
    encode_rows(bvh, bvh.len(), codec, out)
}

/// Encode `bvh` alongside a companion row store of `rows` entries.
///
/// Fails with [`CodecError::TooManyElements`] before writing anything if either
/// `rows` or the tree's node count exceeds [`MAX_ELEMENTS`].
pub fn encode_rows<T, P, C>(
    bvh: &Bvh<T, P>,
    rows: usize,
    codec: &C,
    out: &mut Vec<u8>,
) -> Result<usize, CodecError>
where
    T: Scalar,
    C: PayloadCodec<P>,
{
    let nodes = bvh.node_count();
    for count in [rows, nodes] {
        if count > MAX_ELEMENTS {
            warn!("refusing to encode {count} elements; the limit is {MAX_ELEMENTS}");
            return Err(CodecError::TooManyElements { count });
        }
    }

    let start = out.len();
    let root = bvh.root();
    let root_bounds = bvh.node(root).bounds;
    for v in root_bounds.to_array() {
        T::write_le(v, out);
    }

    let mut stack: Vec<(NodeId, Aabb3D<T>)> = Vec::new();
    stack.push((root, root_bounds));
    while let Some((id, parent_bounds)) = stack.pop() {
        let (left, right) = bvh.children(id);
        let slot = |child: Option<NodeId>| match child {
            None => ChildSlot::Absent,
            Some(c) if bvh.is_leaf(c) => ChildSlot::Leaf,
            Some(_) => ChildSlot::Internal,
        };
        out.push(ChildMarker::from_slots(slot(left), slot(right)).bits());

        let mut internals = [None, None];
        for (i, child) in [left, right].into_iter().enumerate() {
            let Some(child) = child else {
                continue;
            };
            let node = bvh.node(child);
            let q = quantize(&node.bounds, &parent_bounds);
            for v in q {
                out.extend_from_slice(&v.to_le_bytes());
            }
            match &node.kind {
                NodeKind::Leaf { payload } => codec.encode(payload, out),
                NodeKind::Internal { .. } => {
                    internals[i] = Some((child, dequantize(q, &parent_bounds)));
                }
            }
        }
        stack.extend(internals[1]);
        stack.extend(internals[0]);
    }

    let written = out.len() - start;
    debug!(
        "encoded {nodes} nodes ({} leaves) into {written} bytes",
        bvh.len()
    );
    Ok(written)
}

/// Decode a tree from the start of `bytes`. Trailing bytes are ignored.
pub fn decode<T, P, C>(bytes: &[u8], codec: &C) -> Result<Bvh<T, P>, CodecError>
where
    T: Scalar,
    C: PayloadCodec<P>,
{
    decode_from(&mut ByteReader::new(bytes), codec)
}

/// Decode a tree from `reader`, leaving it positioned just past the tree.
///
/// The result is refit and its leaf counts recomputed.
pub fn decode_from<T, P, C>(reader: &mut ByteReader<'_>, codec: &C) -> Result<Bvh<T, P>, CodecError>
where
    T: Scalar,
    C: PayloadCodec<P>,
{
    let start = reader.position();
    let mut root_bounds = [T::zero(); 6];
    for v in &mut root_bounds {
        *v = reader.read_scalar()?;
    }
    let root_bounds = Aabb3D::from_array(root_bounds);

    let mut bvh = Bvh::new();
    let root = bvh.root();
    bvh.set_root_bounds(root_bounds);

    let mut stack = Vec::new();
    stack.push((root, root_bounds));
    while let Some((parent, parent_bounds)) = stack.pop() {
        let offset = reader.position();
        let byte = reader.read_u8()?;
        let Some((left, right)) = ChildMarker::parse(byte) else {
            warn!("rejecting child marker {byte:#010b} at byte {offset}");
            return Err(CodecError::InvalidMarker { offset, byte });
        };

        let mut internals = [None, None];
        for (i, (side, slot)) in [(Side::Left, left), (Side::Right, right)]
            .into_iter()
            .enumerate()
        {
            if slot == ChildSlot::Absent {
                continue;
            }
            let mut q = [0_u16; 6];
            for v in &mut q {
                *v = reader.read_u16()?;
            }
            let bounds = dequantize(q, &parent_bounds);
            if slot == ChildSlot::Leaf {
                let payload = codec.decode(reader)?;
                bvh.push_child(parent, side, bounds, NodeKind::Leaf { payload });
            } else {
                let kind = NodeKind::Internal {
                    left: None,
                    right: None,
                    leaf_count: 0,
                };
                let id = bvh.push_child(parent, side, bounds, kind);
                internals[i] = Some((id, bounds));
            }
        }
        stack.extend(internals[1]);
        stack.extend(internals[0]);
    }

    bvh.refit_all();
    debug!(
        "decoded {} nodes ({} leaves) from {} bytes",
        bvh.node_count(),
        bvh.len(),
        reader.position() - start
    );
    Ok(bvh)
}

/// Quantize `child` against `parent`, rounding minimums down and maximums up.
fn quantize<T: Scalar>(child: &Aabb3D<T>, parent: &Aabb3D<T>) -> [u16; 6] {
    let c = child.to_array().map(T::widen);
    let p = parent.to_array().map(T::widen);
    let mut q = [0_u16; 6];
    for axis in 0..3 {
        let (lo, extent) = (p[axis], p[axis + 3] - p[axis]);
        q[axis] = quantize_axis(c[axis], lo, extent, false);
        q[axis + 3] = quantize_axis(c[axis + 3], lo, extent, true);
    }
    q
}

fn dequantize<T: Scalar>(q: [u16; 6], parent: &Aabb3D<T>) -> Aabb3D<T> {
    let p = parent.to_array().map(T::widen);
    let mut out = [T::zero(); 6];
    for (i, v) in out.iter_mut().enumerate() {
        let axis = i % 3;
        let (lo, extent) = (p[axis], p[axis + 3] - p[axis]);
        *v = T::narrow(if usable(extent) {
            lo + f64::from(q[i]) / f64::from(QUANT_MAX) * extent
        } else {
            lo
        });
    }
    Aabb3D::from_array(out)
}

fn usable(extent: f64) -> bool {
    extent.is_finite() && extent > 0.0
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "Float-to-int casts saturate; the result is clamped to the u16 range."
)]
fn quantize_axis(v: f64, lo: f64, extent: f64, round_up: bool) -> u16 {
    if !usable(extent) {
        return 0;
    }
    let t = (v - lo) / extent * f64::from(QUANT_MAX);
    let mut q = t as u32;
    if round_up && f64::from(q) < t {
        q += 1;
    }
    q.min(u32::from(QUANT_MAX)) as u16
}
