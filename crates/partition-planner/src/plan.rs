// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Execution plan: the flat step list every worker walks.
//!
//! ```text
//! global inputs (compute ops only, once)
//!   → block 0 ops → block 1 ops → … → block N-1 ops
//!   → global outputs
//! ```
//!
//! Leaves (weights, inputs, KV cache) never appear as steps: their
//! tensors exist before the pass starts. Each blocking step owns one
//! barrier index, numbered consecutively in step order; metadata steps
//! (reshape, permute, transpose, view) have none. The plan is the contract
//! between the planner and the runtime.

use crate::strategy::{strategy_for, work_tensor, PartitionStrategy, WorkTensor};
use crate::PlannerError;
use model_ir::{KernelKind, LayerType, OpGraph, OpInstance, Validated};
use std::collections::HashSet;

/// One op instance in execution order.
#[derive(Debug, Clone)]
pub struct PlanStep {
    /// Dense instance id (see [`OpGraph::instance_id`]).
    pub id: usize,
    pub instance: OpInstance,
    pub layer: LayerType,
    pub kernel: KernelKind,
    /// Instance ids of the inputs, in kernel argument order.
    pub inputs: Vec<usize>,
    /// Barrier pair index for blocking steps.
    pub barrier: Option<usize>,
    /// How the kernel's work is split across workers.
    pub strategy: &'static dyn PartitionStrategy,
    /// Which tensor the work range indexes.
    pub work_tensor: WorkTensor,
}

impl PlanStep {
    /// Returns `true` if the step runs a kernel between a barrier pair.
    pub fn is_blocking(&self) -> bool {
        self.barrier.is_some()
    }
}

/// Aggregate numbers about a plan, for logs and `inspect` output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct PlanStats {
    pub steps: usize,
    pub blocking_steps: usize,
    pub metadata_steps: usize,
    pub leaves: usize,
    pub barrier_count: usize,
    pub thread_count: usize,
}

/// The complete, ordered schedule of one forward pass.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Instance ids that exist before the pass (no producing step).
    pub leaves: Vec<usize>,
    /// Total number of op instances in the graph.
    pub instance_count: usize,
    /// Number of barrier pairs the runtime must provide.
    pub barrier_count: usize,
    /// Workers that walk the plan.
    pub thread_count: usize,
}

impl ExecutionPlan {
    /// Flattens `graph` into a plan for `thread_count` workers.
    ///
    /// # Errors
    /// - [`PlannerError::InvalidThreadCount`] for zero threads.
    /// - [`PlannerError::EmptyGraph`] if the graph has no compute ops.
    pub fn build(graph: &OpGraph<Validated>, thread_count: usize) -> Result<Self, PlannerError> {
        if thread_count == 0 {
            return Err(PlannerError::InvalidThreadCount(thread_count));
        }

        let mut steps = Vec::new();
        let mut leaves = Vec::new();
        let mut barrier_count = 0;

        for instance in graph.instances() {
            let op = graph.op(instance.kind);
            let id = graph.instance_id(instance);
            if op.kernel == KernelKind::None {
                leaves.push(id);
                continue;
            }
            let barrier = op.is_blocking().then(|| {
                barrier_count += 1;
                barrier_count - 1
            });
            let inputs = graph
                .inputs_of(instance)
                .into_iter()
                .map(|i| graph.instance_id(i))
                .collect();
            steps.push(PlanStep {
                id,
                instance,
                layer: op.layer_type,
                kernel: op.kernel,
                inputs,
                barrier,
                strategy: strategy_for(op.kernel),
                work_tensor: work_tensor(op.kernel),
            });
        }

        if steps.is_empty() {
            return Err(PlannerError::EmptyGraph);
        }

        let plan = Self {
            steps,
            leaves,
            instance_count: graph.instance_count(),
            barrier_count,
            thread_count,
        };
        plan.validate()?;

        let stats = plan.stats();
        tracing::info!(
            steps = stats.steps,
            barriers = stats.barrier_count,
            threads = thread_count,
            "execution plan built"
        );
        Ok(plan)
    }

    /// Checks the plan invariants.
    ///
    /// # Checks
    /// - Barrier indices are `0..barrier_count` in step order, present
    ///   exactly on blocking kernels.
    /// - Steps run global inputs, then blocks in increasing order, then
    ///   global outputs.
    /// - Every input is a leaf or produced by an earlier step.
    /// - No instance is produced twice.
    pub fn validate(&self) -> Result<(), PlannerError> {
        if self.thread_count == 0 {
            return Err(PlannerError::InvalidThreadCount(0));
        }
        if self.steps.is_empty() {
            return Err(PlannerError::EmptyGraph);
        }

        let invalid = |step: usize, detail: String| PlannerError::InvalidPlan { step, detail };
        let mut produced: HashSet<usize> = self.leaves.iter().copied().collect();
        let mut next_barrier = 0;
        let mut position = (0u8, 0usize);

        for (i, step) in self.steps.iter().enumerate() {
            match (step.kernel.is_blocking(), step.barrier) {
                (true, Some(b)) if b == next_barrier => next_barrier += 1,
                (true, Some(b)) => {
                    return Err(invalid(i, format!("barrier {b}, expected {next_barrier}")));
                }
                (true, None) => return Err(invalid(i, format!("blocking {} has no barrier", step.instance))),
                (false, Some(_)) => {
                    return Err(invalid(i, format!("metadata step {} has a barrier", step.instance)));
                }
                (false, None) => {}
            }

            let here = match (step.layer, step.instance.block) {
                (LayerType::GlobalInput, None) => (0, 0),
                (LayerType::PerBlock, Some(b)) => (1, b),
                (LayerType::GlobalOutput, None) => (2, 0),
                (layer, block) => {
                    return Err(invalid(i, format!("{} has layer {layer:?} and block {block:?}", step.instance)));
                }
            };
            if here < position {
                return Err(invalid(
                    i,
                    format!("{} scheduled after {:?}", step.instance, position),
                ));
            }
            position = here;

            if step.id >= self.instance_count {
                return Err(invalid(i, format!("instance id {} out of range", step.id)));
            }
            for &input in &step.inputs {
                if !produced.contains(&input) {
                    return Err(invalid(
                        i,
                        format!("{} reads instance {input} before it is produced", step.instance),
                    ));
                }
            }
            if !produced.insert(step.id) {
                return Err(invalid(i, format!("{} produced twice", step.instance)));
            }
        }

        if next_barrier != self.barrier_count {
            return Err(invalid(
                self.steps.len(),
                format!("{next_barrier} barriers used, {} declared", self.barrier_count),
            ));
        }
        Ok(())
    }

    /// Number of steps.
    pub fn num_steps(&self) -> usize {
        self.steps.len()
    }

    /// Steps that run a kernel.
    pub fn blocking_steps(&self) -> impl Iterator<Item = &PlanStep> + '_ {
        self.steps.iter().filter(|s| s.is_blocking())
    }

    /// Steps of one block.
    pub fn block_steps(&self, block: usize) -> impl Iterator<Item = &PlanStep> + '_ {
        self.steps.iter().filter(move |s| s.instance.block == Some(block))
    }

    pub fn stats(&self) -> PlanStats {
        let blocking = self.blocking_steps().count();
        PlanStats {
            steps: self.steps.len(),
            blocking_steps: blocking,
            metadata_steps: self.steps.len() - blocking,
            leaves: self.leaves.len(),
            barrier_count: self.barrier_count,
            thread_count: self.thread_count,
        }
    }

    /// Returns a human-readable summary of the plan.
    pub fn summary(&self) -> String {
        let s = self.stats();
        format!(
            "Plan: {} steps ({} kernels, {} views), {} leaves, {} barrier pairs, {} threads",
            s.steps, s.blocking_steps, s.metadata_steps, s.leaves, s.barrier_count, s.thread_count,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{KernelProfile, ModelConfig, OpKind};

    fn graph() -> OpGraph<Validated> {
        OpGraph::build(&ModelConfig::tiny(KernelProfile::f32()))
            .unwrap()
            .validate()
            .unwrap()
    }

    #[test]
    fn test_plan_counts() {
        let g = graph();
        let plan = ExecutionPlan::build(&g, 4).unwrap();
        let compute_per_block = g.per_block_ops().filter(|op| op.kernel != KernelKind::None).count();
        let blocking_per_block = g.per_block_ops().filter(|op| op.is_blocking()).count();
        // inp_embd + blocks + result_norm, result_norm_mul, result_output
        assert_eq!(plan.num_steps(), 1 + compute_per_block * g.block_count() + 3);
        assert_eq!(plan.barrier_count, 1 + blocking_per_block * g.block_count() + 3);
        assert_eq!(plan.leaves.len() + plan.num_steps(), g.instance_count());
        assert_eq!(plan.thread_count, 4);
    }

    #[test]
    fn test_plan_order() {
        let plan = ExecutionPlan::build(&graph(), 1).unwrap();
        assert_eq!(plan.steps[0].instance.kind, OpKind::InpEmbd);
        assert_eq!(plan.steps.last().map(|s| s.instance.kind), Some(OpKind::ResultOutput));
        let blocks: Vec<usize> = plan.steps.iter().filter_map(|s| s.instance.block).collect();
        assert!(blocks.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(plan.steps[0].layer, LayerType::GlobalInput);
        assert_eq!(plan.steps[1].layer, LayerType::PerBlock);
    }

    #[test]
    fn test_barriers_only_on_kernels() {
        let plan = ExecutionPlan::build(&graph(), 2).unwrap();
        let mut expected = 0;
        for step in &plan.steps {
            match step.kernel {
                KernelKind::Reshape | KernelKind::Permute | KernelKind::Transpose | KernelKind::View => {
                    assert_eq!(step.barrier, None, "{}", step.instance);
                }
                _ => {
                    assert_eq!(step.barrier, Some(expected), "{}", step.instance);
                    expected += 1;
                }
            }
        }
    }

    #[test]
    fn test_cache_store_precedes_window() {
        let g = graph();
        let plan = ExecutionPlan::build(&g, 2).unwrap();
        let pos = |kind| plan.block_steps(1).position(|s| s.instance.kind == kind).unwrap();
        assert!(pos(OpKind::KCacheStore) < pos(OpKind::KView));
        assert!(pos(OpKind::VCacheStore) < pos(OpKind::VView));
    }

    #[test]
    fn test_residual_resolves_to_previous_block() {
        let g = graph();
        let plan = ExecutionPlan::build(&g, 1).unwrap();
        let norm1 = plan
            .block_steps(1)
            .find(|s| s.instance.kind == OpKind::AttnNorm)
            .unwrap();
        let lout0 = g.instance_id(OpInstance { kind: OpKind::LOut, block: Some(0) });
        assert_eq!(norm1.inputs, vec![lout0]);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(matches!(
            ExecutionPlan::build(&graph(), 0),
            Err(PlannerError::InvalidThreadCount(0))
        ));
    }

    #[test]
    fn test_validate_catches_tampering() {
        let good = ExecutionPlan::build(&graph(), 2).unwrap();

        let mut swapped = good.clone();
        swapped.steps.swap(1, 2);
        assert!(swapped.validate().is_err());

        let mut renumbered = good.clone();
        if let Some(step) = renumbered.steps.iter_mut().find(|s| s.barrier == Some(3)) {
            step.barrier = Some(7);
        }
        assert!(matches!(renumbered.validate(), Err(PlannerError::InvalidPlan { .. })));

        let mut dangling = good.clone();
        dangling.steps[0].inputs.push(good.instance_count + 1);
        assert!(dangling.validate().is_err());

        let mut out_of_order = good;
        let last = out_of_order.steps.pop().unwrap();
        out_of_order.steps.insert(0, last);
        assert!(out_of_order.validate().is_err());
    }

    #[test]
    fn test_summary() {
        let plan = ExecutionPlan::build(&graph(), 3).unwrap();
        let s = plan.summary();
        assert!(s.contains("3 threads"));
        let json = serde_json::to_string(&plan.stats()).unwrap();
        assert!(json.contains("\"barrier_count\""));
    }
}
