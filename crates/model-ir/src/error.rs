// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for model configuration, graph construction and the tensor catalog.

use tensor_core::{DType, Shape};

/// Errors that can occur when building or validating a model representation.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The tensor catalog file could not be read.
    #[error("failed to read catalog: {0}")]
    CatalogReadError(#[from] std::io::Error),

    /// The catalog JSON is malformed.
    #[error("failed to parse catalog: {0}")]
    CatalogParseError(#[from] serde_json::Error),

    /// The SafeTensors header could not be parsed.
    #[error("failed to load SafeTensors: {0}")]
    SafeTensorsError(String),

    /// A required metadata key is absent.
    #[error("missing metadata key: {key}")]
    MissingMetadata { key: String },

    /// The model file describes an architecture this engine does not implement.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(String),

    /// A catalog entry names a dtype the engine cannot store.
    #[error("unsupported dtype '{dtype}' for tensor {name}")]
    UnsupportedDType { name: String, dtype: String },

    /// The hyper-parameters are inconsistent.
    #[error("invalid model config: {0}")]
    InvalidConfig(String),

    /// An op's inputs or output break its kernel contract.
    #[error("contract violation in {op} ({kernel}): {detail}")]
    ContractViolation {
        op: String,
        kernel: &'static str,
        detail: String,
    },

    /// The op graph contains a dependency cycle.
    #[error("dependency cycle through op {op}")]
    CycleDetected { op: String },

    /// The op graph is otherwise malformed.
    #[error("invalid op graph: {0}")]
    InvalidGraph(String),

    /// A weight op has no tensor in the catalog.
    #[error("weight tensor not found: {name}")]
    WeightNotFound { name: String },

    /// A catalog tensor has different dims than its op.
    #[error("weight {name} has shape {actual}, expected {expected}")]
    WeightShapeMismatch {
        name: String,
        expected: Shape,
        actual: Shape,
    },

    /// A catalog tensor has a different dtype than its op.
    #[error("weight {name} has dtype {actual}, expected {expected}")]
    WeightDTypeMismatch {
        name: String,
        expected: DType,
        actual: DType,
    },
}
