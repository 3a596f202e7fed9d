// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Materialized tensor catalog.
//!
//! The catalog is the hand-off from an external model-file parser: a
//! metadata map plus, for every tensor, its dims, dtype and byte offset in
//! the weight file. Tensor *data* is never read here.
//!
//! # Format
//! ```json
//! {
//!   "metadata": { "general.architecture": "llama", "llama.block_count": 32, ... },
//!   "tensors": {
//!     "blk.0.attn_q.weight": { "dims": [4096, 4096], "dtype": "q4_0", "byte_offset": 0 },
//!     ...
//!   }
//! }
//! ```
//!
//! Dims are axis-0-first (GGUF order): `dims[0]` is the contiguous axis.

use crate::config::{KernelProfile, Metadata, MetadataValue, ModelConfig};
use crate::graph::{GraphState, OpGraph, OpInstance};
use crate::names::resolve_tensor_name;
use crate::op::{OpKind, OpRole};
use crate::ModelError;
use std::collections::BTreeMap;
use std::path::Path;
use tensor_core::{DType, Shape};

/// One tensor of the weight file.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorRecord {
    /// Axis-0-first dims.
    pub dims: Vec<usize>,
    /// Element type label (`"f16"`, `"q4_0"`, ...).
    pub dtype: String,
    /// Offset of the first byte from the start of the weight file.
    pub byte_offset: usize,
}

impl TensorRecord {
    /// Parsed dtype.
    pub fn dtype(&self, name: &str) -> Result<DType, ModelError> {
        DType::from_str_loose(&self.dtype).ok_or_else(|| ModelError::UnsupportedDType {
            name: name.to_string(),
            dtype: self.dtype.clone(),
        })
    }

    /// Dims as a [`Shape`], or `None` for rank > 4.
    pub fn shape(&self) -> Option<Shape> {
        Shape::from_slice(&self.dims)
    }
}

/// A weight slot paired with the catalog tensor that fills it.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightEntry {
    pub instance: OpInstance,
    /// Catalog name of the tensor.
    pub name: String,
    pub byte_offset: usize,
    pub byte_len: usize,
}

/// Metadata plus tensor records of one model file.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TensorCatalog {
    #[serde(default)]
    pub metadata: Metadata,
    pub tensors: BTreeMap<String, TensorRecord>,
}

impl TensorCatalog {
    /// Parses a catalog from JSON.
    pub fn from_json(json: &str) -> Result<Self, ModelError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Loads a catalog from a JSON file path.
    pub fn from_file(path: &Path) -> Result<Self, ModelError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Serializes the catalog to pretty JSON.
    pub fn to_json(&self) -> Result<String, ModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Builds a catalog from the bytes of a SafeTensors file.
    ///
    /// Row-major shapes are reversed into axis-0-first order, byte offsets
    /// are relative to the start of `bytes`, and string metadata from the
    /// header's `__metadata__` table is parsed into typed values.
    pub fn from_safetensors(bytes: &[u8]) -> Result<Self, ModelError> {
        let tensors = safetensors::SafeTensors::deserialize(bytes)
            .map_err(|e| ModelError::SafeTensorsError(format!("SafeTensors parse error: {e}")))?;
        let (_, header) = safetensors::SafeTensors::read_metadata(bytes)
            .map_err(|e| ModelError::SafeTensorsError(format!("SafeTensors header error: {e}")))?;

        let mut catalog = TensorCatalog::default();
        if let Some(meta) = header.metadata() {
            for (k, v) in meta {
                catalog.metadata.insert(k.clone(), MetadataValue::parse(v));
            }
        }
        for (name, view) in tensors.tensors() {
            let dtype = convert_safetensor_dtype(view.dtype()).ok_or_else(|| ModelError::UnsupportedDType {
                name: name.clone(),
                dtype: format!("{:?}", view.dtype()),
            })?;
            let byte_offset = view.data().as_ptr() as usize - bytes.as_ptr() as usize;
            catalog.tensors.insert(
                name,
                TensorRecord {
                    dims: view.shape().iter().rev().copied().collect(),
                    dtype: dtype.as_str().to_string(),
                    byte_offset,
                },
            );
        }
        tracing::debug!(tensors = catalog.tensors.len(), "catalog read from SafeTensors header");
        Ok(catalog)
    }

    /// Builds the model configuration from the catalog metadata.
    pub fn model_config(&self, profile: KernelProfile) -> Result<ModelConfig, ModelError> {
        ModelConfig::from_metadata(&self.metadata, profile)
    }

    /// Kernel profile matching the dtypes stored in the file.
    ///
    /// Weight and norm dtypes come from block 0's query projection and
    /// attention norm; the remaining fields keep their defaults.
    pub fn kernel_profile(&self) -> Result<KernelProfile, ModelError> {
        let mut profile = KernelProfile::default();
        for (name, record) in &self.tensors {
            match resolve_tensor_name(name) {
                Some((OpKind::AttnQWeight, Some(0))) => profile.weight = record.dtype(name)?,
                Some((OpKind::AttnNormWeight, Some(0))) => profile.norm = record.dtype(name)?,
                _ => {}
            }
        }
        Ok(profile)
    }

    /// Pairs every weight slot of `graph` with its catalog tensor.
    ///
    /// A missing `output.weight` falls back to the token embedding table
    /// (tied embeddings). Unknown catalog names are logged and skipped.
    ///
    /// # Errors
    /// - [`ModelError::WeightNotFound`] if a weight slot has no tensor.
    /// - [`ModelError::WeightShapeMismatch`] / [`ModelError::WeightDTypeMismatch`]
    ///   if a tensor disagrees with its op.
    pub fn weight_entries<S: GraphState>(&self, graph: &OpGraph<S>) -> Result<Vec<WeightEntry>, ModelError> {
        let mut by_instance: BTreeMap<OpInstance, (&str, &TensorRecord)> = BTreeMap::new();
        for (name, record) in &self.tensors {
            match resolve_tensor_name(name) {
                Some((kind, block)) if block.map_or(true, |b| b < graph.block_count()) => {
                    by_instance.insert(OpInstance { kind, block }, (name.as_str(), record));
                }
                _ => tracing::debug!(tensor = %name, "catalog tensor not used by the graph"),
            }
        }
        let embd = OpInstance { kind: OpKind::TokenEmbdWeight, block: None };
        let output = OpInstance { kind: OpKind::OutputWeight, block: None };
        if !by_instance.contains_key(&output) {
            if let Some(&tied) = by_instance.get(&embd) {
                tracing::info!("output.weight absent; using tied token embeddings");
                by_instance.insert(output, tied);
            }
        }

        let mut entries = Vec::new();
        for inst in graph.instances() {
            let op = graph.op(inst.kind);
            if op.role != OpRole::Weight {
                continue;
            }
            let &(name, record) = by_instance.get(&inst).ok_or_else(|| ModelError::WeightNotFound {
                name: crate::names::gguf_name(inst.kind, inst.block).unwrap_or_else(|| inst.to_string()),
            })?;
            let dtype = record.dtype(name)?;
            let shape = record.shape().ok_or_else(|| {
                ModelError::InvalidGraph(format!("{name} has rank {} > 4", record.dims.len()))
            })?;
            if shape != op.shape {
                return Err(ModelError::WeightShapeMismatch {
                    name: name.to_string(),
                    expected: op.shape,
                    actual: shape,
                });
            }
            if dtype != op.dtype {
                return Err(ModelError::WeightDTypeMismatch {
                    name: name.to_string(),
                    expected: op.dtype,
                    actual: dtype,
                });
            }
            entries.push(WeightEntry {
                instance: inst,
                name: name.to_string(),
                byte_offset: record.byte_offset,
                byte_len: shape.byte_size(dtype),
            });
        }
        Ok(entries)
    }
}

/// Converts a SafeTensors `Dtype` to our [`DType`].
fn convert_safetensor_dtype(st_dtype: safetensors::Dtype) -> Option<DType> {
    match st_dtype {
        safetensors::Dtype::F32 => Some(DType::F32),
        safetensors::Dtype::F16 => Some(DType::F16),
        safetensors::Dtype::BF16 => Some(DType::BF16),
        safetensors::Dtype::I32 => Some(DType::I32),
        _ => None,
    }
}
