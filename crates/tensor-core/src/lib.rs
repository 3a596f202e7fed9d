// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # tensor-core
//!
//! Tensor descriptors and reference CPU kernels for graph inference.
//!
//! This crate provides:
//! - [`DType`]: storage element types, including block-quantized `Q8_0`/`Q4_0`.
//! - [`Shape`]: fixed four-axis shapes (axis 0 innermost) with byte sizes and strides.
//! - [`TensorRef`]: a copyable raw view over arena or mapped-file storage.
//! - [`ops`]: partitionable kernels (`mul_mat`, `rms_norm`, `rope`, `softmax`, ...).
//! - [`quant`]: row encoders/decoders for every storage dtype.
//! - [`simd`]: AVX2 / NEON row primitives with a scalar fallback.
//!
//! # Design Goals
//! - Zero-copy views: reshape, permute, transpose and narrow only rewrite
//!   descriptors.
//! - No output allocation in kernels; callers own all storage.
//! - Each kernel computes a caller-chosen sub-range so work can be sharded
//!   across threads without synchronisation inside the kernel.

mod dtype;
mod error;
pub mod ops;
pub mod quant;
mod shape;
pub mod simd;
mod tensor;

pub use dtype::DType;
pub use error::TensorError;
pub use shape::{Shape, MAX_DIMS};
pub use tensor::TensorRef;
