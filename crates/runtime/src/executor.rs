// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Graph executor: the task every worker runs for one forward pass.
//!
//! All workers walk the same [`ExecutionPlan`]. Each keeps its own table of
//! tensor descriptors, one per instance:
//!
//! - leaves and owned activations are described from their storage slot;
//! - reshape, permute, transpose and view derive a descriptor from their
//!   input without touching data;
//! - copy resolves to its destination view.
//!
//! Blocking steps run between the step's start and end barriers, each worker
//! computing its own shard of the output. Every worker computes the same
//! descriptors, so the table needs no sharing.

use crate::barrier::BarrierPair;
use crate::dispatch::dispatch;
use crate::storage::StorageMap;
use crate::thread_pool::WorkerTask;
use crate::RuntimeError;
use model_ir::{KernelKind, ModelError, OpDef, OpGraph, OpParams, Validated, ViewOffset};
use partition_planner::{ExecutionPlan, PlanStep, WorkTensor};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tensor_core::TensorRef;

/// Per-kernel call count and accumulated time.
pub(crate) type KernelTimings = HashMap<KernelKind, (u64, Duration)>;

/// Walks the plan on every worker of the pool.
pub struct GraphExecutor {
    graph: Arc<OpGraph<Validated>>,
    plan: Arc<ExecutionPlan>,
    storage: Arc<StorageMap>,
    barriers: Vec<BarrierPair>,
    n_past: AtomicUsize,
    n_tokens: AtomicUsize,
    timings: Option<Mutex<KernelTimings>>,
}

impl GraphExecutor {
    /// Creates an executor with one barrier pair per blocking step.
    pub fn new(
        graph: Arc<OpGraph<Validated>>,
        plan: Arc<ExecutionPlan>,
        storage: Arc<StorageMap>,
        spin_iterations: u32,
        profile: bool,
    ) -> Self {
        let barriers = (0..plan.barrier_count)
            .map(|_| BarrierPair::new(plan.thread_count, spin_iterations))
            .collect();
        Self {
            graph,
            plan,
            storage,
            barriers,
            n_past: AtomicUsize::new(0),
            n_tokens: AtomicUsize::new(0),
            timings: profile.then(|| Mutex::new(HashMap::new())),
        }
    }

    /// Sets the token window of the next pass.
    pub(crate) fn set_window(&self, n_past: usize, n_tokens: usize) {
        self.n_past.store(n_past, Ordering::Release);
        self.n_tokens.store(n_tokens, Ordering::Release);
    }

    /// Rearms every barrier pair for the plan's thread count.
    pub(crate) fn reset_barriers(&self) {
        for pair in &self.barriers {
            pair.reset(self.plan.thread_count);
        }
    }

    pub fn barriers(&self) -> &[BarrierPair] {
        &self.barriers
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    /// Takes the kernel timings gathered since the last call.
    pub(crate) fn take_timings(&self) -> KernelTimings {
        match &self.timings {
            Some(t) => std::mem::take(&mut *t.lock().unwrap_or_else(PoisonError::into_inner)),
            None => KernelTimings::new(),
        }
    }

    /// Descriptor of instance `id` from its own storage.
    fn owned_ref(&self, id: usize, op: &OpDef, n_tokens: usize, n_kv: usize) -> Result<TensorRef, RuntimeError> {
        let ptr = self.storage.tensor_ptr(id).ok_or_else(|| {
            ModelError::InvalidGraph(format!("{} (instance {id}) has no storage", op.name))
        })?;
        Ok(TensorRef::with_layout(
            ptr,
            op.dtype,
            op.shape,
            op.active_shape(n_tokens, n_kv),
        ))
    }

    /// Descriptor of a plan step's output.
    fn step_ref(
        &self,
        step: &PlanStep,
        op: &OpDef,
        refs: &[Option<TensorRef>],
        window: (usize, usize),
    ) -> Result<TensorRef, RuntimeError> {
        let (n_past, n_tokens) = window;
        let n_kv = n_past + n_tokens;
        let input = |i: usize| -> Result<TensorRef, RuntimeError> {
            step.inputs
                .get(i)
                .and_then(|&id| refs.get(id).copied().flatten())
                .ok_or_else(|| {
                    ModelError::InvalidGraph(format!("{}: input {i} not resolved", step.instance)).into()
                })
        };

        let r = match (step.kernel, op.params) {
            (KernelKind::Reshape, _) => input(0)?.reshape(op.shape, op.active_shape(n_tokens, n_kv))?,
            (KernelKind::Permute, OpParams::Permute { axes }) => input(0)?.permute(axes),
            (KernelKind::Transpose, _) => input(0)?.transpose(),
            (KernelKind::View, OpParams::View { axis, offset }) => {
                let start = match offset {
                    ViewOffset::Start => 0,
                    ViewOffset::PastTokens => n_past,
                };
                let len = op.active_shape(n_tokens, n_kv).dim(axis);
                input(0)?.narrow(axis, start, len)
            }
            (KernelKind::Permute | KernelKind::View, _) => {
                return Err(RuntimeError::ParamsMismatch {
                    op: op.name.to_string(),
                    kernel: step.kernel,
                })
            }
            (KernelKind::Copy, _) => input(1)?,
            _ => self.owned_ref(step.id, op, n_tokens, n_kv)?,
        };
        Ok(r)
    }

    /// Runs one blocking step's shard between its barriers.
    fn run_blocking(
        &self,
        step: &PlanStep,
        op: &OpDef,
        dst: TensorRef,
        refs: &[Option<TensorRef>],
        pair: &BarrierPair,
        (ith, nth): (usize, usize),
    ) -> Result<(), RuntimeError> {
        let mut operands = [dst; 3];
        for (slot, &id) in operands.iter_mut().zip(&step.inputs) {
            *slot = refs.get(id).copied().flatten().ok_or_else(|| {
                ModelError::InvalidGraph(format!("{}: operand {id} not resolved", step.instance))
            })?;
        }
        let operands = &operands[..step.inputs.len().min(3)];
        let work = match step.work_tensor {
            WorkTensor::Output => dst,
            WorkTensor::Source => operands.first().copied().unwrap_or(dst),
        };
        let range = step.strategy.shard(work.ne(), ith, nth);

        pair.start.arrive_and_wait();
        // SAFETY: the start barrier orders all writes of earlier steps before
        // these reads, shards are disjoint, and the end barrier orders these
        // writes before any later read.
        let result = unsafe { dispatch(op, &dst, operands, range) };
        pair.end.arrive_and_wait();
        result
    }

    fn fault(&self, ith: usize, step: &PlanStep, err: &RuntimeError) -> ! {
        tracing::error!(worker = ith, op = %step.instance, error = %err, "kernel fault; aborting");
        std::process::abort()
    }
}

impl WorkerTask for GraphExecutor {
    fn run(&self, ith: usize, nth: usize) {
        let n_past = self.n_past.load(Ordering::Acquire);
        let n_tokens = self.n_tokens.load(Ordering::Acquire);
        let n_kv = n_past + n_tokens;
        let mut refs: Vec<Option<TensorRef>> = vec![None; self.plan.instance_count];

        for &id in &self.plan.leaves {
            let Some(instance) = self.graph.instance(id) else {
                continue;
            };
            let op = self.graph.op(instance.kind);
            // Unbound leaves stay `None`; a consumer reports them.
            refs[id] = self.owned_ref(id, op, n_tokens, n_kv).ok();
        }

        let mut local = KernelTimings::new();
        let profile = ith == 0 && self.timings.is_some();

        for step in &self.plan.steps {
            let op = self.graph.op(step.instance.kind);
            let dst = match self.step_ref(step, op, &refs, (n_past, n_tokens)) {
                Ok(r) => r,
                Err(e) => self.fault(ith, step, &e),
            };
            refs[step.id] = Some(dst);

            let Some(pair) = step.barrier.and_then(|b| self.barriers.get(b)) else {
                continue;
            };
            if ith == 0 {
                tracing::trace!(op = %step.instance, kernel = %step.kernel, "step");
            }
            let started = profile.then(Instant::now);
            if let Err(e) = self.run_blocking(step, op, dst, &refs, pair, (ith, nth)) {
                self.fault(ith, step, &e);
            }
            if let Some(started) = started {
                let entry = local.entry(step.kernel).or_default();
                entry.0 += 1;
                entry.1 += started.elapsed();
            }
        }

        if let (true, Some(timings)) = (profile, &self.timings) {
            let mut timings = timings.lock().unwrap_or_else(PoisonError::into_inner);
            for (kernel, (calls, total)) in local {
                let entry = timings.entry(kernel).or_default();
                entry.0 += calls;
                entry.1 += total;
            }
        }
    }
}

impl std::fmt::Debug for GraphExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphExecutor")
            .field("steps", &self.plan.steps.len())
            .field("barriers", &self.barriers.len())
            .field("threads", &self.plan.thread_count)
            .finish()
    }
}
