// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for tensor descriptors and kernels.

use crate::{DType, Shape};

/// Errors that can occur while describing or converting tensor data.
#[derive(Debug, thiserror::Error)]
pub enum TensorError {
    /// The provided buffer size does not match the expected size for the given shape and dtype.
    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    /// Two tensors have incompatible shapes for the requested operation.
    #[error("incompatible shapes for {op}: {lhs} vs {rhs}")]
    ShapeMismatch {
        op: &'static str,
        lhs: Shape,
        rhs: Shape,
    },

    /// The requested data type is not supported for this operation.
    #[error("unsupported dtype {dtype} for operation {op}")]
    UnsupportedDType { op: &'static str, dtype: DType },

    /// A reshape or row access needs a contiguous axis 0 but the view is strided.
    #[error("{op} requires a contiguous tensor")]
    NonContiguous { op: &'static str },

    /// A gather index points outside the source table.
    #[error("index {index} out of bounds for {len} rows")]
    IndexOutOfBounds { index: i64, len: usize },

    /// A quantized row length is not a multiple of the block size.
    #[error("row of {len} elements is not a multiple of the {dtype} block size")]
    PartialBlock { dtype: DType, len: usize },
}
