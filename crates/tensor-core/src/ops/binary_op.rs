// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Broadcasting elementwise binary kernels: `mul`, `add`, `sub`.
//!
//! The second operand is broadcast along any axis where its extent is 1,
//! which covers both per-channel weight scaling (`[E, 1]` onto `[E, T]`)
//! and same-shape residual adds.

use super::{store_row, RowBuf};
use crate::{simd, TensorError, TensorRef};
use std::ops::Range;

#[derive(Clone, Copy)]
enum BinaryOp {
    Mul,
    Add,
    Sub,
}

/// `dst = a * b` over the given output rows.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn mul(
    dst: &TensorRef,
    a: &TensorRef,
    b: &TensorRef,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    binary(dst, a, b, rows, BinaryOp::Mul)
}

/// `dst = a + b` over the given output rows.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn add(
    dst: &TensorRef,
    a: &TensorRef,
    b: &TensorRef,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    binary(dst, a, b, rows, BinaryOp::Add)
}

/// `dst = a - b` over the given output rows.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn sub(
    dst: &TensorRef,
    a: &TensorRef,
    b: &TensorRef,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    binary(dst, a, b, rows, BinaryOp::Sub)
}

unsafe fn binary(
    dst: &TensorRef,
    a: &TensorRef,
    b: &TensorRef,
    rows: Range<usize>,
    op: BinaryOp,
) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    if a.ne()[0] != n || b.ne()[0] != n {
        return Err(TensorError::ShapeMismatch {
            op: "binary",
            lhs: a.shape(),
            rhs: b.shape(),
        });
    }
    let bne = b.ne();
    let mut abuf = RowBuf::new(n);
    let mut bbuf = RowBuf::new(n);
    let mut obuf = RowBuf::new(n);

    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let x = abuf.load(a, i1, i2, i3)?;
        let y = bbuf.load(b, i1 % bne[1], i2 % bne[2], i3 % bne[3])?;
        let out = obuf.out(n);
        match op {
            BinaryOp::Mul => simd::mul(x, y, out),
            BinaryOp::Add => simd::add(x, y, out),
            BinaryOp::Sub => {
                for ((o, &p), &q) in out.iter_mut().zip(x).zip(y) {
                    *o = p - q;
                }
            }
        }
        store_row(dst, i1, i2, i3, out)?;
    }
    Ok(())
}
