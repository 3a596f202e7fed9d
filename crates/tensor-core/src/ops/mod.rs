// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Reference CPU kernels over [`TensorRef`] descriptors.
//!
//! Every kernel computes a sub-range of its output and is meant to be
//! called concurrently by several workers with disjoint ranges. Row kernels
//! take a range of flat output rows; [`mul_mat`] takes a range along output
//! axis 0. Kernels never allocate output storage: they read and write
//! through the raw pointers the caller hands them, so all of them are
//! `unsafe`.
//!
//! # Safety contract shared by all kernels
//! - every `TensorRef` must describe live storage covering its active extents;
//! - the output region selected by the range must not be written by anyone
//!   else for the duration of the call;
//! - inputs must not be written concurrently.

mod binary_op;
mod copy_op;
mod get_rows_op;
mod mul_mat_op;
mod rms_norm_op;
mod rope_op;
mod softmax_op;
mod unary_op;

pub use binary_op::{add, mul, sub};
pub use copy_op::{cont, copy};
pub use get_rows_op::get_rows;
pub use mul_mat_op::mul_mat;
pub use rms_norm_op::rms_norm;
pub use rope_op::rope;
pub use softmax_op::softmax;
pub use unary_op::silu;

use crate::{quant, DType, TensorError, TensorRef};
use std::ops::Range;

/// Returns the `ith` of `nth` near-equal contiguous chunks of `0..total`.
///
/// The first `total % nth` chunks get one extra unit, so the union over all
/// `ith` is exactly `0..total` and chunks never overlap.
///
/// # Examples
/// ```
/// use tensor_core::ops::split_range;
/// assert_eq!(split_range(10, 0, 3), 0..4);
/// assert_eq!(split_range(10, 1, 3), 4..7);
/// assert_eq!(split_range(10, 2, 3), 7..10);
/// assert_eq!(split_range(2, 3, 4), 2..2);
/// ```
pub fn split_range(total: usize, ith: usize, nth: usize) -> Range<usize> {
    let nth = nth.max(1);
    let base = total / nth;
    let extra = total % nth;
    let start = ith * base + ith.min(extra);
    let len = base + usize::from(ith < extra);
    start.min(total)..(start + len).min(total)
}

/// Scratch buffer for reading one row as `f32`.
///
/// Packed, aligned `f32` rows are returned in place; anything else is
/// decoded or gathered into the buffer.
pub(crate) struct RowBuf {
    buf: Vec<f32>,
}

impl RowBuf {
    pub(crate) fn new(len: usize) -> Self {
        Self { buf: vec![0.0; len] }
    }

    /// Reads row `(i1, i2, i3)` of `t`.
    ///
    /// # Safety
    /// See the module-level contract.
    pub(crate) unsafe fn load<'a>(
        &'a mut self,
        t: &TensorRef,
        i1: usize,
        i2: usize,
        i3: usize,
    ) -> Result<&'a [f32], TensorError> {
        let n = t.ne()[0];
        let ptr = t.row_ptr(i1, i2, i3);
        if t.is_row_contiguous() {
            if t.dtype() == DType::F32 && is_f32_aligned(ptr) {
                return Ok(std::slice::from_raw_parts(ptr as *const f32, n));
            }
            if self.buf.len() < n {
                self.buf.resize(n, 0.0);
            }
            let bytes = std::slice::from_raw_parts(ptr as *const u8, quant::byte_len(t.dtype(), n));
            quant::decode_row(t.dtype(), bytes, &mut self.buf[..n])?;
            return Ok(&self.buf[..n]);
        }
        if t.dtype().is_quantized() {
            return Err(TensorError::NonContiguous { op: "row read" });
        }
        if self.buf.len() < n {
            self.buf.resize(n, 0.0);
        }
        let stride = t.nb()[0];
        for (i0, v) in self.buf[..n].iter_mut().enumerate() {
            *v = quant::read_scalar(t.dtype(), ptr.add(i0 * stride));
        }
        Ok(&self.buf[..n])
    }

    pub(crate) fn out(&mut self, len: usize) -> &mut [f32] {
        if self.buf.len() < len {
            self.buf.resize(len, 0.0);
        }
        &mut self.buf[..len]
    }
}

/// Writes `vals` into row `(i1, i2, i3)` of `t`, converting to its dtype.
///
/// # Safety
/// See the module-level contract.
pub(crate) unsafe fn store_row(
    t: &TensorRef,
    i1: usize,
    i2: usize,
    i3: usize,
    vals: &[f32],
) -> Result<(), TensorError> {
    let ptr = t.row_ptr(i1, i2, i3);
    if t.is_row_contiguous() {
        if t.dtype() == DType::F32 && is_f32_aligned(ptr) {
            std::ptr::copy_nonoverlapping(vals.as_ptr(), ptr as *mut f32, vals.len());
            return Ok(());
        }
        let bytes = std::slice::from_raw_parts_mut(ptr, quant::byte_len(t.dtype(), vals.len()));
        return quant::encode_row(t.dtype(), vals, bytes);
    }
    if t.dtype().is_quantized() {
        return Err(TensorError::NonContiguous { op: "row write" });
    }
    let stride = t.nb()[0];
    for (i0, &v) in vals.iter().enumerate() {
        quant::write_scalar(t.dtype(), ptr.add(i0 * stride), v);
    }
    Ok(())
}

/// Reads element `i` of a rank-1 integer tensor.
///
/// # Safety
/// `i` must be within axis 0 of `t`.
pub(crate) unsafe fn read_index(t: &TensorRef, i: usize) -> i64 {
    let ptr = t.elem_ptr(i, 0, 0, 0);
    match t.dtype() {
        DType::I32 => std::ptr::read_unaligned(ptr.cast::<i32>()) as i64,
        other => quant::read_scalar(other, ptr) as i64,
    }
}

fn is_f32_aligned(ptr: *const u8) -> bool {
    (ptr as usize) % std::mem::align_of::<f32>() == 0
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::{Shape, TensorRef};

    /// Wraps a vector as a contiguous f32 tensor for kernel tests.
    pub fn tensor(buf: &mut [f32], dims: [usize; 4]) -> TensorRef {
        TensorRef::from_f32_slice(buf, Shape::new(dims)).unwrap()
    }

    /// Wraps an i32 vector as a rank-1 index tensor.
    pub fn index(buf: &mut [i32]) -> TensorRef {
        let len = buf.len();
        TensorRef::contiguous(buf.as_mut_ptr().cast(), crate::DType::I32, Shape::vector(len))
    }

    pub fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() <= tol, "index {i}: {x} vs {y}");
        }
    }
}
