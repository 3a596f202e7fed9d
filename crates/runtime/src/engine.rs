// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The inference engine with a type-state–enforced pipeline.
//!
//! ```text
//! InferenceEngine<Idle>
//!     │  .load_model() / .from_synthetic(config)
//!     ▼
//! InferenceEngine<Planned>      graph validated, plan built, weights open
//!     │  .prepare()
//!     ▼
//! InferenceEngine<Ready>        storage mapped, weights bound, workers spawned
//!     │  .process_input(tokens) → .logits()
//!     │  .reset_state()
//! ```
//!
//! Each state transition consumes the old value and returns a new one,
//! making invalid state sequences a compile error. Each state carries
//! exactly the resources that exist at that point.

use crate::executor::GraphExecutor;
use crate::metrics::InferenceMetrics;
use crate::storage::{MapObserver, NoObserver, StorageMap};
use crate::thread_pool::ThreadPool;
use crate::{RuntimeConfig, RuntimeError, WeightLoader};
use memory_manager::ArenaStats;
use model_ir::{ModelConfig, OpGraph, OpInstance, OpKind, Validated};
use partition_planner::ExecutionPlan;
use std::sync::Arc;
use std::time::Instant;
use tensor_core::{quant, DType, TensorRef};

const _: () = assert!(memory_manager::CACHE_LINE == model_ir::TENSOR_ALIGNMENT);

// ── Type-state markers ─────────────────────────────────────────

/// Engine is created but no model is loaded.
#[derive(Debug)]
pub struct Idle;

/// Graph, plan and weights exist; nothing is allocated for execution.
#[derive(Debug)]
pub struct Planned {
    graph: Arc<OpGraph<Validated>>,
    plan: Arc<ExecutionPlan>,
    weights: WeightLoader,
}

/// Workers are running and the engine accepts tokens.
pub struct Ready {
    // Dropped first: joins the workers before storage and weights go away.
    pool: ThreadPool,
    executor: Arc<GraphExecutor>,
    storage: Arc<StorageMap>,
    graph: Arc<OpGraph<Validated>>,
    plan: Arc<ExecutionPlan>,
    weights: WeightLoader,
    ids: InputIds,
    n_past: usize,
    logits: Vec<f32>,
    metrics: InferenceMetrics,
}

/// Sealed trait for engine states.
pub trait EngineState: std::fmt::Debug {}
impl EngineState for Idle {}
impl EngineState for Planned {}
impl EngineState for Ready {}

impl std::fmt::Debug for Ready {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ready")
            .field("pool", &self.pool)
            .field("executor", &self.executor)
            .field("n_past", &self.n_past)
            .finish()
    }
}

/// Instance ids the main thread writes or reads around each pass.
#[derive(Debug, Clone, Copy)]
struct InputIds {
    tokens: usize,
    positions: usize,
    mask: usize,
    rope_freqs: usize,
    output: usize,
}

impl InputIds {
    fn new(graph: &OpGraph<Validated>) -> Self {
        let id = |kind| graph.instance_id(OpInstance { kind, block: None });
        Self {
            tokens: id(OpKind::InpTokens),
            positions: id(OpKind::InpPos),
            mask: id(OpKind::KqMask),
            rope_freqs: id(OpKind::RopeFreqs),
            output: id(OpKind::ResultOutput),
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────

/// The primary inference engine.
///
/// `S` is a type-state marker that enforces the pipeline ordering at
/// compile time. You cannot call `.process_input()` on an `Idle` engine or
/// `.load_model()` on a `Ready` engine; the compiler catches it.
///
/// # Example
/// ```no_run
/// use runtime::{InferenceEngine, RuntimeConfig};
///
/// # fn example() -> Result<(), runtime::RuntimeError> {
/// let mut engine = InferenceEngine::new(RuntimeConfig::default())
///     .load_model()?
///     .prepare()?;
/// engine.process_input(&[1, 15043, 3186])?;
/// println!("{} logits", engine.logits().len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct InferenceEngine<S: EngineState = Idle> {
    config: RuntimeConfig,
    state: S,
}

impl<S: EngineState> InferenceEngine<S> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }
}

// ── Idle → Planned ─────────────────────────────────────────────

impl InferenceEngine<Idle> {
    /// Creates a new engine from the given configuration.
    pub fn new(config: RuntimeConfig) -> Self {
        tracing::info!(model = %config.model_path.display(), "engine created");
        Self { config, state: Idle }
    }

    /// Opens the model directory, builds and validates the graph, and
    /// plans execution. Transitions to the `Planned` state.
    ///
    /// Steps:
    /// 1. Map the weight file and read its catalog.
    /// 2. Pick the kernel profile (configured, else detected from the file).
    /// 3. Derive the model config from the catalog metadata.
    /// 4. Build and validate the graph, then plan it.
    pub fn load_model(self) -> Result<InferenceEngine<Planned>, RuntimeError> {
        self.config.validate()?;
        let weights = WeightLoader::open(&self.config.model_path)?;
        let profile = match self.config.kernel_profile()? {
            Some(profile) => profile,
            None => weights.catalog().kernel_profile()?,
        };
        let graph = self.build_graph(weights.catalog().model_config(profile)?)?;
        self.into_planned(graph, weights)
    }

    /// Like [`load_model`](Self::load_model) but with deterministic
    /// synthetic weights for `model` (seeded by the config's `seed`).
    pub fn from_synthetic(self, model: ModelConfig) -> Result<InferenceEngine<Planned>, RuntimeError> {
        self.config.validate()?;
        let graph = self.build_graph(model)?;
        let weights = WeightLoader::synthetic(&graph, self.config.seed)?;
        self.into_planned(graph, weights)
    }

    /// Builds and validates the graph. Runtime knobs win over the model
    /// file: batch size always, context length when set.
    fn build_graph(&self, model: ModelConfig) -> Result<OpGraph<Validated>, RuntimeError> {
        let model = model.with_batch_size(self.config.batch_size);
        let model = match self.config.context_length {
            Some(ctx) => model.with_context_length(ctx),
            None => model,
        };
        let graph = OpGraph::build(&model)?.validate()?;
        tracing::info!("{}", graph.summary());
        Ok(graph)
    }

    fn into_planned(
        self,
        graph: OpGraph<Validated>,
        weights: WeightLoader,
    ) -> Result<InferenceEngine<Planned>, RuntimeError> {
        let plan = ExecutionPlan::build(&graph, self.config.resolve_threads())?;
        tracing::info!("{}", plan.summary());

        Ok(InferenceEngine {
            config: self.config,
            state: Planned {
                graph: Arc::new(graph),
                plan: Arc::new(plan),
                weights,
            },
        })
    }
}

// ── Planned → Ready ────────────────────────────────────────────

impl InferenceEngine<Planned> {
    /// Returns a reference to the execution plan.
    pub fn plan(&self) -> &ExecutionPlan {
        &self.state.plan
    }

    /// Returns a reference to the model graph.
    pub fn graph(&self) -> &OpGraph<Validated> {
        &self.state.graph
    }

    pub fn weights(&self) -> &WeightLoader {
        &self.state.weights
    }

    /// Maps storage, binds weights and spawns the workers.
    /// Transitions to the `Ready` state.
    pub fn prepare(self) -> Result<InferenceEngine<Ready>, RuntimeError> {
        self.prepare_with_observer(&mut NoObserver)
    }

    /// Like [`prepare`](Self::prepare), reporting every arena carve.
    pub fn prepare_with_observer(self, observer: &mut dyn MapObserver) -> Result<InferenceEngine<Ready>, RuntimeError> {
        let started = Instant::now();
        let Planned { graph, plan, weights } = self.state;

        let budget = self.config.parse_budget()?;
        let mut storage = StorageMap::build_with_observer(&graph, budget, observer)?;
        weights.bind(&graph, &mut storage)?;

        let ids = InputIds::new(&graph);
        fill_rope_freqs(&graph, &storage, ids.rope_freqs)?;

        let storage = Arc::new(storage);
        let executor = Arc::new(GraphExecutor::new(
            graph.clone(),
            plan.clone(),
            storage.clone(),
            self.config.spin_iterations,
            self.config.enable_profiling,
        ));
        let pool = ThreadPool::new(plan.thread_count)?;

        let mut metrics = InferenceMetrics::new(plan.thread_count, storage.arena().capacity());
        metrics.prepare_duration = started.elapsed();
        tracing::info!(
            barriers = plan.barrier_count,
            ms = metrics.prepare_duration.as_secs_f64() * 1000.0,
            "engine ready"
        );

        Ok(InferenceEngine {
            config: self.config,
            state: Ready {
                pool,
                executor,
                storage,
                graph,
                plan,
                weights,
                ids,
                n_past: 0,
                logits: Vec::new(),
                metrics,
            },
        })
    }
}

/// Writes the rotary inverse frequencies `base^(-2i / D)` once.
fn fill_rope_freqs(graph: &OpGraph<Validated>, storage: &StorageMap, id: usize) -> Result<(), RuntimeError> {
    let op = graph.op(OpKind::RopeFreqs);
    let config = graph.config();
    let half = op.shape.dim(0);
    let dims = (2 * half) as f32;
    let ptr = storage
        .tensor_ptr(id)
        .ok_or_else(|| RuntimeError::ConfigError("rope_freqs has no storage".into()))?;
    let t = TensorRef::contiguous(ptr, op.dtype, op.shape);
    for i in 0..half {
        let freq = config.rope.freq_base.powf(-2.0 * i as f32 / dims);
        // SAFETY: `i` is within the slot; no pass is running.
        unsafe { quant::write_scalar(op.dtype, t.elem_ptr(i, 0, 0, 0), freq) };
    }
    Ok(())
}

/// Writes an integer input element without a float round trip.
///
/// # Safety
/// `ptr` must point at `dtype.type_size()` writable bytes.
unsafe fn write_index(dtype: DType, ptr: *mut u8, value: i64) {
    match dtype {
        DType::I32 => std::ptr::write_unaligned(ptr.cast::<i32>(), value as i32),
        _ => quant::write_scalar(dtype, ptr, value as f32),
    }
}

// ── Ready: run inference ───────────────────────────────────────

impl InferenceEngine<Ready> {
    /// Returns the execution plan.
    pub fn plan(&self) -> &ExecutionPlan {
        &self.state.plan
    }

    /// Returns the model graph.
    pub fn graph(&self) -> &OpGraph<Validated> {
        &self.state.graph
    }

    pub fn weights(&self) -> &WeightLoader {
        &self.state.weights
    }

    pub fn executor(&self) -> &GraphExecutor {
        &self.state.executor
    }

    /// Storage of every instance (read-only while no pass runs).
    pub fn storage(&self) -> &StorageMap {
        &self.state.storage
    }

    /// Tokens processed since creation or the last [`reset_state`](Self::reset_state).
    pub fn n_past(&self) -> usize {
        self.state.n_past
    }

    /// Maximum tokens per session.
    pub fn context_length(&self) -> usize {
        self.state.graph.config().context_length
    }

    /// Logits of the last processed token (empty before the first pass).
    pub fn logits(&self) -> &[f32] {
        &self.state.logits
    }

    pub fn metrics(&self) -> &InferenceMetrics {
        &self.state.metrics
    }

    /// Arena usage snapshot.
    pub fn arena_stats(&self) -> ArenaStats {
        self.state.storage.arena().stats()
    }

    /// Runs the model over `tokens`, appending them to the session.
    ///
    /// Tokens are processed in chunks of at most `batch_size`; afterwards
    /// [`logits`](Self::logits) holds the output for the last token.
    ///
    /// # Errors
    /// - [`RuntimeError::EmptyInput`] for an empty slice.
    /// - [`RuntimeError::InvalidToken`] for an id outside the vocabulary.
    /// - [`RuntimeError::ContextExhausted`] if the tokens do not fit in the
    ///   remaining context.
    ///
    /// Nothing is processed when an error is returned.
    pub fn process_input(&mut self, tokens: &[u32]) -> Result<(), RuntimeError> {
        let config = self.state.graph.config();
        if tokens.is_empty() {
            return Err(RuntimeError::EmptyInput);
        }
        if let Some(&token) = tokens.iter().find(|&&t| t as usize >= config.vocab_size) {
            return Err(RuntimeError::InvalidToken {
                token,
                vocab_size: config.vocab_size,
            });
        }
        if self.state.n_past + tokens.len() > config.context_length {
            return Err(RuntimeError::ContextExhausted {
                n_past: self.state.n_past,
                requested: tokens.len(),
                context_length: config.context_length,
            });
        }

        let mut last = 0;
        for chunk in tokens.chunks(config.batch_size) {
            self.run_pass(chunk);
            last = chunk.len();
        }
        self.read_logits(last);
        Ok(())
    }

    /// One forward pass over `chunk` (at most `batch_size` tokens).
    fn run_pass(&mut self, chunk: &[u32]) {
        let n_past = self.state.n_past;
        let n_tokens = chunk.len();
        self.write_inputs(chunk, n_past);

        let started = Instant::now();
        self.state.executor.set_window(n_past, n_tokens);
        self.state.pool.run(self.state.executor.clone());
        let elapsed = started.elapsed();

        self.state.n_past += n_tokens;
        self.state.metrics.record_pass(n_past, n_tokens, elapsed);
        for (kernel, (calls, total)) in self.state.executor.take_timings() {
            self.state.metrics.record_kernel(kernel, calls, total);
        }
        tracing::debug!(
            n_past,
            n_tokens,
            ms = elapsed.as_secs_f64() * 1000.0,
            "forward pass"
        );
    }

    /// Writes token ids, positions and the causal mask for the next pass.
    fn write_inputs(&self, chunk: &[u32], n_past: usize) {
        let graph = &self.state.graph;
        let storage = &self.state.storage;
        let ids = self.state.ids;
        let n_tokens = chunk.len();
        let n_kv = n_past + n_tokens;

        let tokens = graph.op(OpKind::InpTokens);
        let positions = graph.op(OpKind::InpPos);
        let mask = graph.op(OpKind::KqMask);
        let (Some(tp), Some(pp), Some(mp)) = (
            storage.tensor_ptr(ids.tokens),
            storage.tensor_ptr(ids.positions),
            storage.tensor_ptr(ids.mask),
        ) else {
            return;
        };
        let tokens_t = TensorRef::contiguous(tp, tokens.dtype, tokens.shape);
        let positions_t = TensorRef::contiguous(pp, positions.dtype, positions.shape);
        let mask_t = TensorRef::contiguous(mp, mask.dtype, mask.shape);

        // SAFETY: the pool is idle (`run` is synchronous and we hold
        // `&mut self` upstream), indices are within each slot's static
        // shape since n_tokens <= batch_size and n_kv <= context_length.
        unsafe {
            for (i, &token) in chunk.iter().enumerate() {
                write_index(tokens.dtype, tokens_t.elem_ptr(i, 0, 0, 0), i64::from(token));
                write_index(positions.dtype, positions_t.elem_ptr(i, 0, 0, 0), (n_past + i) as i64);
                for j in 0..n_kv {
                    let v = if j <= n_past + i { 0.0 } else { f32::NEG_INFINITY };
                    quant::write_scalar(mask.dtype, mask_t.elem_ptr(j, i, 0, 0), v);
                }
            }
        }
    }

    /// Copies the output row of the last token of the last pass.
    fn read_logits(&mut self, last_chunk: usize) {
        let op = self.state.graph.op(OpKind::ResultOutput);
        let Some(ptr) = self.state.storage.tensor_ptr(self.state.ids.output) else {
            return;
        };
        let t = TensorRef::contiguous(ptr, op.dtype, op.shape);
        let row = last_chunk.saturating_sub(1);
        let vocab = op.shape.dim(0);
        self.state.logits.clear();
        // SAFETY: the pool is idle and `row` < batch_size.
        self.state
            .logits
            .extend((0..vocab).map(|j| unsafe { quant::read_scalar(op.dtype, t.elem_ptr(j, row, 0, 0)) }));
    }

    /// Starts a new session: rewinds the context position and rearms every
    /// barrier. Storage is reused as is; stale cache rows are masked out.
    pub fn reset_state(&mut self) {
        self.state.executor.reset_barriers();
        self.state.n_past = 0;
        self.state.logits.clear();
        tracing::debug!("session reset");
    }
}
