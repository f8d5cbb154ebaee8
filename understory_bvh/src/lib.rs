// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory BVH: a dynamic 3D bounding volume hierarchy that keeps itself in shape.
//!
//! Objects move, get added, and get removed; a hierarchy built once degrades.
//! Rather than rebuilding, this crate repairs the tree a little at a time.
//!
//! - Insert, remove, and resize axis-aligned boxes ([`Aabb3D`]) carrying user payloads.
//! - Improve the tree with local rotations scored by the surface area heuristic.
//!   An [`Optimizer`] spreads that work over many calls under a node budget, so it
//!   fits in a per-frame time slice.
//! - Query without recursion or per-call allocation: sphere collection into a
//!   caller buffer, and [`Visitor`] walks for frustum culling ([`FrustumCollector`])
//!   or debug dumps ([`DebugExport`]).
//! - Serialize to a compact, lossy binary form: the root at full precision, every
//!   other box quantized to 16 bits per scalar against its parent ([`codec`]).
//!
//! The tree is generic over the scalar (`f32` or `f64`) and the payload type.
//! Nodes live in an arena and are addressed by generational [`NodeId`] handles.
//!
//! # Example
//!
//! ```rust
//! use understory_bvh::{Aabb3D, Bvh, QueryScratch};
//!
//! let mut bvh: Bvh<f32, u32> = Bvh::new();
//! let a = bvh.insert(Aabb3D::from_center(0.0, 0.0, 0.0, 0.5), 1);
//! bvh.insert(Aabb3D::from_center(5.0, 0.0, 0.0, 0.5), 2);
//! bvh.insert(Aabb3D::from_center(0.0, 10.0, 0.0, 0.5), 3);
//!
//! // Move the first object far away, then let the optimizer tidy up.
//! bvh.resize(a, Aabb3D::from_center(40.0, 40.0, 40.0, 0.5));
//! bvh.optimize(64);
//!
//! let mut scratch = QueryScratch::new();
//! let mut hits = [0_u32; 4];
//! let n = bvh.query_sphere(5.0, 0.0, 0.0, 2.0, &mut scratch, &mut hits, 0);
//! assert_eq!(&hits[..n], &[2]);
//! ```
//!
//! Serialization takes a payload codec:
//!
//! ```rust
//! use understory_bvh::{Aabb3D, Bvh, codec};
//!
//! let mut bvh: Bvh<f64, u32> = Bvh::new();
//! bvh.insert(Aabb3D::new(0.0, 0.0, 0.0, 1.0, 1.0, 1.0), 10);
//! bvh.insert(Aabb3D::new(2.0, 0.0, 0.0, 3.0, 1.0, 1.0), 20);
//!
//! let mut bytes = Vec::new();
//! codec::encode(&bvh, &codec::U32Payload, &mut bytes)?;
//! let back: Bvh<f64, u32> = codec::decode(&bytes, &codec::U32Payload)?;
//! assert_eq!(back.len(), 2);
//! # Ok::<(), understory_bvh::CodecError>(())
//! ```
//!
//! ### Float semantics
//!
//! Coordinates are assumed free of NaNs. Areas and distances are accumulated in `f64`.

#![no_std]

extern crate alloc;

pub mod codec;
pub mod config;
pub mod error;
pub mod query;
pub mod rotation;
pub mod sah;
pub mod traverse;
pub mod tree;
pub mod types;

pub use codec::{ByteReader, PayloadCodec, U32Payload};
pub use config::OptimizerConfig;
pub use error::CodecError;
pub use query::{
    DebugExport, DebugRow, Frustum, FrustumCollector, NodeRole, Plane, QueryScratch, VisibleSet,
    VisitStatus, Visitor,
};
pub use rotation::{LeafCounter, Optimizer, Rotation};
pub use traverse::Traversal;
pub use tree::{Bvh, NodeId};
pub use types::{Aabb3D, Scalar};

/// A [`Bvh`] over `f32` coordinates.
pub type BvhF32<P> = Bvh<f32, P>;

/// A [`Bvh`] over `f64` coordinates.
pub type BvhF64<P> = Bvh<f64, P>;
