// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the inference runtime.

/// Errors that can occur while loading, preparing or driving the engine.
///
/// Kernel faults inside a worker are not represented here: they are logged
/// and abort the process, since a half-computed pass cannot be recovered.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Failed to open, map or bind the weight file.
    #[error("weight loading failed for '{tensor}': {detail}")]
    WeightLoadError { tensor: String, detail: String },

    /// A kernel rejected its operands.
    #[error("kernel error in '{op}': {source}")]
    KernelError {
        op: String,
        #[source]
        source: tensor_core::TensorError,
    },

    /// An op carries parameters that do not belong to its kernel.
    #[error("op '{op}' has parameters that do not match kernel {kernel}")]
    ParamsMismatch { op: String, kernel: model_ir::KernelKind },

    /// Arena allocation or carving failed.
    #[error("memory error: {0}")]
    MemoryError(#[from] memory_manager::MemoryError),

    /// The execution planner returned an error.
    #[error("planner error: {0}")]
    PlannerError(#[from] partition_planner::PlannerError),

    /// Graph construction, validation or catalog resolution failed.
    #[error("model error: {0}")]
    ModelError(#[from] model_ir::ModelError),

    /// Tensor descriptor error outside a kernel.
    #[error("tensor error: {0}")]
    TensorError(#[from] tensor_core::TensorError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker {index}: {source}")]
    ThreadSpawn {
        index: usize,
        #[source]
        source: std::io::Error,
    },

    /// The session has no room for more tokens.
    #[error("context exhausted: {n_past} tokens processed, {requested} more requested, context length {context_length}")]
    ContextExhausted {
        n_past: usize,
        requested: usize,
        context_length: usize,
    },

    /// A token id outside the vocabulary.
    #[error("token {token} is outside the vocabulary of {vocab_size}")]
    InvalidToken { token: u32, vocab_size: usize },

    /// `process_input` was called with no tokens.
    #[error("no input tokens")]
    EmptyInput,
}
