// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resumable depth-first traversal.
//!
//! [`Traversal`] keeps its pending-node stack between calls, so a full-tree walk
//! can be spread over many frames: each [`Traversal::advance`] call visits at most
//! `budget` nodes and reports whether work remains.
//!
//! Nodes are visited in pre-order, left before right. A node's children are read
//! *after* its visitor returns, so a visitor that restructures the node (as the
//! rotation optimizer does) has its new children walked. Ids that went stale
//! between calls are skipped.

use alloc::vec::Vec;
use core::borrow::Borrow;

use crate::tree::{Bvh, NodeId};
use crate::types::Scalar;

/// Cursor state for a resumable pre-order walk.
#[derive(Clone, Debug, Default)]
pub struct Traversal {
    stack: Vec<NodeId>,
    visited: usize,
}

impl Traversal {
    /// Create an idle traversal. Call [`Traversal::init`] before advancing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to a single pending node.
    pub fn init(&mut self, root: NodeId) {
        self.stack.clear();
        self.stack.push(root);
        self.visited = 0;
    }

    /// True once every pending node has been visited.
    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Nodes visited since the last [`Traversal::init`].
    pub fn visited(&self) -> usize {
        self.visited
    }

    /// Visit up to `budget` nodes, handing each to `visit` with mutable tree access.
    ///
    /// Returns `true` while nodes remain pending.
    pub fn advance<T, P, F>(&mut self, bvh: &mut Bvh<T, P>, budget: usize, visit: F) -> bool
    where
        T: Scalar,
        F: FnMut(&mut Bvh<T, P>, NodeId),
    {
        self.walk::<T, P, _, _>(bvh, budget, visit)
    }

    /// Read-only flavor of [`Traversal::advance`].
    pub fn advance_ref<T, P, F>(&mut self, bvh: &Bvh<T, P>, budget: usize, mut visit: F) -> bool
    where
        T: Scalar,
        F: FnMut(&Bvh<T, P>, NodeId),
    {
        let mut view = bvh;
        self.walk::<T, P, _, _>(&mut view, budget, |tree, id| visit(*tree, id))
    }

    fn walk<T, P, B, F>(&mut self, bvh: &mut B, budget: usize, mut visit: F) -> bool
    where
        T: Scalar,
        B: Borrow<Bvh<T, P>>,
        F: FnMut(&mut B, NodeId),
    {
        let mut spent = 0;
        while spent < budget {
            let tree = <B as Borrow<Bvh<T, P>>>::borrow(bvh);
            let Some(id) = self.pop_live(|id| tree.is_alive(id)) else {
                break;
            };
            spent += 1;
            visit(bvh, id);
            let tree = <B as Borrow<Bvh<T, P>>>::borrow(bvh);
            self.push_children(tree.children(id));
        }
        !self.is_done()
    }

    fn pop_live(&mut self, is_alive: impl Fn(NodeId) -> bool) -> Option<NodeId> {
        while let Some(id) = self.stack.pop() {
            if is_alive(id) {
                self.visited += 1;
                return Some(id);
            }
        }
        None
    }

    fn push_children(&mut self, (left, right): (Option<NodeId>, Option<NodeId>)) {
        // Right first so the left subtree is walked first.
        self.stack.extend(right);
        self.stack.extend(left);
    }
}
