// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # model-ir
//!
//! A static intermediate representation of the LLaMA decoder.
//!
//! Rather than interpreting a model file op by op, this crate builds the
//! complete graph of tensor operations once from the hyper-parameters and
//! checks every shape/type contract before anything runs:
//!
//! - [`ModelConfig`]: hyper-parameters from a preset or file metadata.
//! - [`OpKind`] / [`OpDef`]: one definition per logical tensor.
//! - [`contract`]: per-kernel shape/type rules.
//! - [`OpGraph`]: the ordered op lists with a **type-state pattern**
//!   (`Loaded` → `Validated`).
//! - [`TensorCatalog`]: tensor names, dims, dtypes and file offsets handed
//!   over by an external model-file parser.
//!
//! # Example
//! ```
//! use model_ir::{KernelProfile, ModelConfig, ModelGeneration, ModelSize, OpGraph};
//!
//! let config = ModelConfig::preset(ModelSize::Llama7B, ModelGeneration::V2, KernelProfile::q4_0())
//!     .unwrap();
//! let graph = OpGraph::build(&config).unwrap().validate().unwrap();
//! println!("{}", graph.summary());
//! for op in graph.per_block_ops() {
//!     println!("  {}", op.summary());
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod contract;
mod error;
pub mod graph;
mod llama;
pub mod names;
pub mod op;

pub use catalog::{TensorCatalog, TensorRecord, WeightEntry};
pub use config::{
    KernelProfile, KvCacheStrategy, Metadata, MetadataValue, ModelArch, ModelConfig,
    ModelGeneration, ModelSize, RopeParams,
};
pub use error::ModelError;
pub use graph::{align_up, GraphState, Loaded, OpGraph, OpInstance, Validated, TENSOR_ALIGNMENT};
pub use names::resolve_tensor_name;
pub use op::{
    AxisRole, InputRef, KernelKind, LayerType, OpDef, OpKind, OpParams, OpRole, OpTraits,
    ViewOffset,
};
