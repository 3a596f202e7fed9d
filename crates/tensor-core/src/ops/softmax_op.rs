// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Scaled, masked softmax along axis 0.

use super::{store_row, RowBuf};
use crate::{TensorError, TensorRef};
use std::ops::Range;

/// Computes `softmax(x * scale + mask)` for each output row.
///
/// Row `i1` of the input uses row `i1` of the mask (broadcast over
/// axes 2 and 3), so a `[C, T]` causal mask serves every attention head.
/// The maximum is subtracted before exponentiation for stability.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn softmax(
    dst: &TensorRef,
    src: &TensorRef,
    mask: Option<&TensorRef>,
    scale: f32,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    if let Some(m) = mask {
        if m.ne()[0] != n {
            return Err(TensorError::ShapeMismatch {
                op: "softmax",
                lhs: src.shape(),
                rhs: m.shape(),
            });
        }
    }
    let mut ibuf = RowBuf::new(n);
    let mut mbuf = RowBuf::new(n);
    let mut obuf = RowBuf::new(n);
    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let x = ibuf.load(src, i1, i2, i3)?;
        let out = obuf.out(n);
        match mask {
            Some(m) => {
                let mv = mbuf.load(m, i1 % m.ne()[1], 0, 0)?;
                for ((o, &v), &mk) in out.iter_mut().zip(x).zip(mv) {
                    *o = v * scale + mk;
                }
            }
            None => {
                for (o, &v) in out.iter_mut().zip(x) {
                    *o = v * scale;
                }
            }
        }
        let max = out.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for o in out.iter_mut() {
            let e = if *o == f32::NEG_INFINITY { 0.0 } else { (*o - max).exp() };
            *o = e;
            sum += e;
        }
        if sum > 0.0 {
            let inv = 1.0 / sum;
            for o in out.iter_mut() {
                *o *= inv;
            }
        }
        store_row(dst, i1, i2, i3, out)?;
    }
    Ok(())
}
