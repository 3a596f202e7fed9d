// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Op graph: the complete decoder as a static DAG of tensor operations.
//!
//! # Type-State Pattern
//!
//! The graph transitions through states enforced at compile time:
//!
//! ```text
//! OpGraph<Loaded>      ops instantiated from the config, not yet checked.
//!       │  .validate()
//!       ▼
//! OpGraph<Validated>   DAG, contracts and layouts verified; ready for planning.
//! ```
//!
//! The execution planner only accepts `OpGraph<Validated>`, so a graph
//! with a broken kernel contract can never reach the runtime.
//!
//! # Instances
//!
//! Each [`OpDef`] is instantiated once (global ops) or once per block
//! (per-block ops). Instances are numbered in execution order: global
//! inputs, then block 0, block 1, ..., then global outputs.

use crate::config::ModelConfig;
use crate::contract::check_contract;
use crate::llama;
use crate::op::{InputRef, KernelKind, LayerType, OpDef, OpKind, OpRole};
use crate::ModelError;
use std::fmt;

/// Alignment of every tensor slice in the activation arena.
pub const TENSOR_ALIGNMENT: usize = 64;

/// Rounds `bytes` up to [`TENSOR_ALIGNMENT`].
pub fn align_up(bytes: usize) -> usize {
    bytes.div_ceil(TENSOR_ALIGNMENT) * TENSOR_ALIGNMENT
}

// ── Type-state markers ─────────────────────────────────────────────

/// Marker: graph has been built but not validated.
#[derive(Debug, Clone)]
pub struct Loaded;

/// Marker: graph has been validated and is ready for planning.
#[derive(Debug, Clone)]
pub struct Validated;

/// Sealed trait for graph states.
pub trait GraphState: fmt::Debug + Clone {}
impl GraphState for Loaded {}
impl GraphState for Validated {}

// ── OpInstance ─────────────────────────────────────────────────────

/// One concrete tensor: an op kind plus its block for per-block ops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OpInstance {
    pub kind: OpKind,
    /// `None` for global ops.
    pub block: Option<usize>,
}

impl fmt::Display for OpInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.block {
            Some(b) => write!(f, "blk.{b}.{}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

// ── OpGraph ────────────────────────────────────────────────────────

/// The static op graph of one model configuration.
#[derive(Debug, Clone)]
pub struct OpGraph<S: GraphState = Loaded> {
    config: ModelConfig,
    /// Indexed by [`OpKind::index`].
    ops: Vec<OpDef>,
    global_inputs: Vec<OpKind>,
    per_block: Vec<OpKind>,
    global_outputs: Vec<OpKind>,
    /// Position of each kind within its ordered list.
    positions: Vec<usize>,
    _state: std::marker::PhantomData<S>,
}

// ── Loaded state ───────────────────────────────────────────────────

impl OpGraph<Loaded> {
    /// Instantiates the LLaMA op table for `config`.
    pub fn build(config: &ModelConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let table = llama::build(config);
        let mut positions = vec![usize::MAX; OpKind::COUNT];
        for list in [&table.global_inputs, &table.per_block, &table.global_outputs] {
            for (pos, kind) in list.iter().enumerate() {
                positions[kind.index()] = pos;
            }
        }
        let graph = Self {
            config: config.clone(),
            ops: table.ops,
            global_inputs: table.global_inputs,
            per_block: table.per_block,
            global_outputs: table.global_outputs,
            positions,
            _state: std::marker::PhantomData,
        };
        tracing::info!(
            blocks = config.block_count,
            ops = graph.ops.len(),
            instances = graph.instance_count(),
            "op graph built"
        );
        Ok(graph)
    }

    /// Mutable access to an op definition before validation.
    pub fn op_mut(&mut self, kind: OpKind) -> &mut OpDef {
        &mut self.ops[kind.index()]
    }

    /// Validates the graph and transitions to the `Validated` state.
    ///
    /// # Checks
    /// - Every kind is defined once and listed once, in the list matching
    ///   its layer type.
    /// - Every input names an op visible from the consumer's layer.
    /// - The graph is acyclic.
    /// - Within a list, producers come before consumers.
    /// - Every op satisfies its kernel contract.
    /// - Quantized rows hold whole blocks, and copies only write into
    ///   state or activation storage.
    pub fn validate(mut self) -> Result<OpGraph<Validated>, ModelError> {
        self.check_lists()?;
        self.check_references()?;
        self.check_acyclic()?;
        self.check_ordering()?;
        self.check_contracts()?;
        self.check_layouts()?;
        self.fill_depths();

        tracing::debug!(
            arena_bytes = self.total_required_bytes(),
            max_depth = self.ops.iter().map(|o| o.depth).max().unwrap_or(0),
            "op graph validated"
        );
        Ok(OpGraph {
            config: self.config,
            ops: self.ops,
            global_inputs: self.global_inputs,
            per_block: self.per_block,
            global_outputs: self.global_outputs,
            positions: self.positions,
            _state: std::marker::PhantomData,
        })
    }

    fn check_lists(&self) -> Result<(), ModelError> {
        let mut seen = vec![false; OpKind::COUNT];
        for (layer, list) in self.lists() {
            for kind in list {
                if std::mem::replace(&mut seen[kind.index()], true) {
                    return Err(ModelError::InvalidGraph(format!("{kind} is listed twice")));
                }
                let op = self.op(*kind);
                if op.kind != *kind {
                    return Err(ModelError::InvalidGraph(format!(
                        "slot {kind} holds the definition of {}",
                        op.kind
                    )));
                }
                if op.layer_type != layer {
                    return Err(ModelError::InvalidGraph(format!(
                        "{kind} is {:?} but listed as {layer:?}",
                        op.layer_type
                    )));
                }
            }
        }
        if let Some(i) = seen.iter().position(|s| !s) {
            return Err(ModelError::InvalidGraph(format!("{} is not listed", OpKind::ALL[i])));
        }
        Ok(())
    }

    fn check_references(&self) -> Result<(), ModelError> {
        for op in &self.ops {
            for input in &op.inputs {
                let bad = |detail: String| -> Result<(), ModelError> {
                    Err(ModelError::InvalidGraph(format!("{} input {input:?}: {detail}", op.name)))
                };
                match *input {
                    InputRef::Op(kind) => {
                        let layer = self.op(kind).layer_type;
                        let visible = match op.layer_type {
                            LayerType::GlobalInput => layer == LayerType::GlobalInput,
                            LayerType::PerBlock => {
                                matches!(layer, LayerType::GlobalInput | LayerType::PerBlock)
                            }
                            LayerType::GlobalOutput => layer != LayerType::None,
                            LayerType::None => false,
                        };
                        if !visible {
                            return bad(format!("{layer:?} op is not visible from {:?}", op.layer_type));
                        }
                    }
                    InputRef::PreviousBlock { op: prev, first } => {
                        if op.layer_type != LayerType::PerBlock {
                            return bad("previous-block input outside a block".into());
                        }
                        if self.op(prev).layer_type != LayerType::PerBlock
                            || self.op(first).layer_type != LayerType::GlobalInput
                        {
                            return bad("needs a per-block op and a global input".into());
                        }
                        let (p, f) = (self.op(prev), self.op(first));
                        if p.shape != f.shape || p.dtype != f.dtype {
                            return bad(format!(
                                "{} {} {} differs from {} {} {}",
                                p.name, p.dtype, p.shape, f.name, f.dtype, f.shape
                            ));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Kind-level DFS. Previous-block edges point to the global `first` op,
    /// so the residual chain across blocks is not a cycle.
    fn check_acyclic(&self) -> Result<(), ModelError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            Active,
            Done,
        }

        fn visit(graph: &OpGraph<Loaded>, kind: OpKind, marks: &mut [Mark]) -> Result<(), ModelError> {
            match marks[kind.index()] {
                Mark::Done => return Ok(()),
                Mark::Active => {
                    return Err(ModelError::CycleDetected {
                        op: kind.name().to_string(),
                    })
                }
                Mark::New => {}
            }
            marks[kind.index()] = Mark::Active;
            for input in &graph.op(kind).inputs {
                visit(graph, kind_edge(*input), marks)?;
            }
            marks[kind.index()] = Mark::Done;
            Ok(())
        }

        let mut marks = vec![Mark::New; OpKind::COUNT];
        for &kind in OpKind::ALL {
            visit(self, kind, &mut marks)?;
        }
        Ok(())
    }

    fn check_ordering(&self) -> Result<(), ModelError> {
        for op in &self.ops {
            for input in &op.inputs {
                let InputRef::Op(src) = *input else { continue };
                let same_list = self.op(src).layer_type == op.layer_type;
                if same_list && self.positions[src.index()] >= self.positions[op.kind.index()] {
                    return Err(ModelError::InvalidGraph(format!(
                        "{} is ordered before its input {src}",
                        op.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn check_contracts(&self) -> Result<(), ModelError> {
        for op in &self.ops {
            let inputs: Vec<&OpDef> = op.inputs.iter().map(|i| self.op(kind_of_input(*i))).collect();
            check_contract(op, &inputs)?;
        }
        Ok(())
    }

    fn check_layouts(&self) -> Result<(), ModelError> {
        for op in &self.ops {
            if op.dtype.is_quantized() && op.shape.dim(0) % op.dtype.block_size() != 0 {
                return Err(ModelError::InvalidGraph(format!(
                    "{} rows of {} elements split a {} block",
                    op.name,
                    op.shape.dim(0),
                    op.dtype
                )));
            }
            let strides = op.strides();
            if op.shape.num_elements() > 0 && strides[3] * op.shape.dim(3) != op.shape.byte_size(op.dtype) {
                return Err(ModelError::InvalidGraph(format!(
                    "{} strides {strides:?} do not cover {} bytes",
                    op.name,
                    op.shape.byte_size(op.dtype)
                )));
            }
            if op.kernel == KernelKind::Copy {
                let root = self.op(self.storage_root(op.kind));
                if !matches!(root.role, OpRole::State | OpRole::Activation) {
                    return Err(ModelError::InvalidGraph(format!(
                        "{} writes into {:?} storage of {}",
                        op.name, root.role, root.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn fill_depths(&mut self) {
        fn depth(graph: &OpGraph<Loaded>, kind: OpKind, memo: &mut [Option<usize>]) -> usize {
            if let Some(d) = memo[kind.index()] {
                return d;
            }
            let d = graph
                .op(kind)
                .inputs
                .iter()
                .map(|i| depth(graph, kind_edge(*i), memo) + 1)
                .max()
                .unwrap_or(0);
            memo[kind.index()] = Some(d);
            d
        }

        let mut memo = vec![None; OpKind::COUNT];
        let depths: Vec<usize> = OpKind::ALL.iter().map(|&k| depth(self, k, &mut memo)).collect();
        for (op, d) in self.ops.iter_mut().zip(depths) {
            op.depth = d;
        }
    }
}

/// Kind whose definition describes the input's tensor.
fn kind_of_input(input: InputRef) -> OpKind {
    match input {
        InputRef::Op(kind) | InputRef::PreviousBlock { op: kind, .. } => kind,
    }
}

/// Kind-level dependency edge used for cycle and depth analysis.
fn kind_edge(input: InputRef) -> OpKind {
    match input {
        InputRef::Op(kind) => kind,
        InputRef::PreviousBlock { first, .. } => first,
    }
}

// ── Any state ──────────────────────────────────────────────────────

impl<S: GraphState> OpGraph<S> {
    /// The configuration the graph was built from.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Number of transformer blocks.
    pub fn block_count(&self) -> usize {
        self.config.block_count
    }

    /// The definition of `kind`.
    pub fn op(&self, kind: OpKind) -> &OpDef {
        &self.ops[kind.index()]
    }

    fn lists(&self) -> [(LayerType, &[OpKind]); 3] {
        [
            (LayerType::GlobalInput, self.global_inputs.as_slice()),
            (LayerType::PerBlock, self.per_block.as_slice()),
            (LayerType::GlobalOutput, self.global_outputs.as_slice()),
        ]
    }

    /// Global input ops in execution order.
    pub fn global_input_ops(&self) -> impl Iterator<Item = &OpDef> + '_ {
        self.global_inputs.iter().map(|&k| self.op(k))
    }

    /// Per-block ops in execution order.
    pub fn per_block_ops(&self) -> impl Iterator<Item = &OpDef> + '_ {
        self.per_block.iter().map(|&k| self.op(k))
    }

    /// Global output ops in execution order.
    pub fn global_output_ops(&self) -> impl Iterator<Item = &OpDef> + '_ {
        self.global_outputs.iter().map(|&k| self.op(k))
    }

    /// All op definitions: global inputs, per-block, global outputs.
    pub fn iter_ops(&self) -> impl Iterator<Item = &OpDef> + '_ {
        self.global_input_ops()
            .chain(self.per_block_ops())
            .chain(self.global_output_ops())
    }

    /// Number of per-block op kinds.
    pub fn ops_per_block(&self) -> usize {
        self.per_block.len()
    }

    /// Total number of op instances.
    pub fn instance_count(&self) -> usize {
        self.global_inputs.len() + self.per_block.len() * self.block_count() + self.global_outputs.len()
    }

    /// Dense id of an instance, in execution order.
    ///
    /// # Panics
    /// If `inst.block` does not match the layer of `inst.kind`.
    pub fn instance_id(&self, inst: OpInstance) -> usize {
        let pos = self.positions[inst.kind.index()];
        let (g, p, n) = (self.global_inputs.len(), self.per_block.len(), self.block_count());
        match (self.op(inst.kind).layer_type, inst.block) {
            (LayerType::GlobalInput, None) => pos,
            (LayerType::PerBlock, Some(b)) if b < n => g + b * p + pos,
            (LayerType::GlobalOutput, None) => g + n * p + pos,
            _ => panic!("invalid op instance {inst}"),
        }
    }

    /// Inverse of [`instance_id`](Self::instance_id).
    pub fn instance(&self, id: usize) -> Option<OpInstance> {
        let (g, p, n) = (self.global_inputs.len(), self.per_block.len(), self.block_count());
        if id < g {
            Some(OpInstance { kind: self.global_inputs[id], block: None })
        } else if id < g + n * p {
            let r = id - g;
            Some(OpInstance { kind: self.per_block[r % p], block: Some(r / p) })
        } else {
            self.global_outputs
                .get(id - g - n * p)
                .map(|&kind| OpInstance { kind, block: None })
        }
    }

    /// All instances in execution order.
    pub fn instances(&self) -> impl Iterator<Item = OpInstance> + '_ {
        (0..self.instance_count()).filter_map(|id| self.instance(id))
    }

    /// Instance that `input` refers to when read from block `block`.
    ///
    /// A per-block kind referenced from a global op resolves to the last
    /// block.
    pub fn resolve_input(&self, input: InputRef, block: Option<usize>) -> OpInstance {
        let last = self.block_count().saturating_sub(1);
        match input {
            InputRef::Op(kind) => match self.op(kind).layer_type {
                LayerType::PerBlock => OpInstance { kind, block: Some(block.unwrap_or(last)) },
                _ => OpInstance { kind, block: None },
            },
            InputRef::PreviousBlock { op, first } => match block {
                Some(b) if b > 0 => OpInstance { kind: op, block: Some(b - 1) },
                _ => OpInstance { kind: first, block: None },
            },
        }
    }

    /// Resolved inputs of `inst` in kernel argument order.
    pub fn inputs_of(&self, inst: OpInstance) -> Vec<OpInstance> {
        self.op(inst.kind)
            .inputs
            .iter()
            .map(|&i| self.resolve_input(i, inst.block))
            .collect()
    }

    /// Kind that owns the storage `kind` aliases (itself if it owns storage).
    pub fn storage_root(&self, kind: OpKind) -> OpKind {
        let mut kind = kind;
        while let Some(src) = self.op(kind).alias_source() {
            match self.op(kind).inputs.get(src) {
                Some(&input) => kind = kind_of_input(input),
                None => break,
            }
        }
        kind
    }

    /// How many storage slots `op` occupies.
    pub fn multiplicity(&self, op: &OpDef) -> usize {
        match op.layer_type {
            LayerType::PerBlock => self.block_count(),
            _ => 1,
        }
    }

    /// Arena bytes for every input, state and activation slot, each
    /// rounded up to [`TENSOR_ALIGNMENT`]. Weights are excluded.
    pub fn total_required_bytes(&self) -> usize {
        self.iter_ops()
            .filter(|op| op.is_arena_resident())
            .map(|op| align_up(op.total_required_bytes()) * self.multiplicity(op))
            .sum()
    }

    /// Bytes of all weight tensors.
    pub fn weight_bytes(&self) -> usize {
        self.iter_ops()
            .filter(|op| op.role == OpRole::Weight)
            .map(|op| op.total_required_bytes() * self.multiplicity(op))
            .sum()
    }

    /// Returns a summary string describing the graph.
    pub fn summary(&self) -> String {
        const MB: f64 = 1024.0 * 1024.0;
        let c = &self.config;
        format!(
            "LLaMA {:?} ({:?}, {} weights): {} blocks, {} ops, {} instances, arena {:.1} MB, weights {:.1} MB",
            c.size,
            c.generation,
            c.kernel_profile.weight,
            c.block_count,
            self.ops.len(),
            self.instance_count(),
            self.total_required_bytes() as f64 / MB,
            self.weight_bytes() as f64 / MB,
        )
    }
}

impl<S: GraphState> fmt::Display for OpGraph<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.summary())?;
        for (layer, list) in self.lists() {
            writeln!(f, "{layer:?}:")?;
            for &kind in list {
                writeln!(f, "  {}", self.op(kind).summary())?;
            }
        }
        Ok(())
    }
}
