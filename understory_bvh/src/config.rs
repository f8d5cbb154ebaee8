// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Tuning knobs for the incremental optimizer.

/// Configuration for [`Optimizer`](crate::Optimizer).
///
/// ```
/// use understory_bvh::OptimizerConfig;
///
/// let config = OptimizerConfig::default()
///     .with_nodes_per_step(256)
///     .with_max_passes(Some(4));
/// assert_eq!(config.nodes_per_step, 256);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OptimizerConfig {
    /// Nodes visited by each [`Optimizer::step`](crate::Optimizer::step) call.
    pub nodes_per_step: usize,
    /// Stop after this many whole-tree passes even if the last pass still rotated.
    ///
    /// `None` runs until a pass applies no rotation.
    pub max_passes: Option<usize>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            nodes_per_step: 64,
            max_passes: None,
        }
    }
}

impl OptimizerConfig {
    /// Set the per-step node budget. Zero is raised to one so steps always progress.
    #[must_use]
    pub fn with_nodes_per_step(mut self, nodes: usize) -> Self {
        self.nodes_per_step = nodes.max(1);
        self
    }

    /// Set the pass limit.
    #[must_use]
    pub fn with_max_passes(mut self, passes: Option<usize>) -> Self {
        self.max_passes = passes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = OptimizerConfig::default();
        assert_eq!(c.nodes_per_step, 64);
        assert_eq!(c.max_passes, None);
    }

    #[test]
    fn zero_budget_is_clamped() {
        assert_eq!(OptimizerConfig::default().with_nodes_per_step(0).nodes_per_step, 1);
    }
}
