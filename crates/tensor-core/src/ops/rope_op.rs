// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Rotary position embedding over adjacent element pairs.

use super::{read_index, store_row, RowBuf};
use crate::{TensorError, TensorRef};
use std::ops::Range;

/// Rotates each pair `(x[2i], x[2i + 1])` of a `[D, H, T]` tensor by
/// `theta = pos[t] * freq_scale * freqs[i]`.
///
/// `pos` is a rank-1 integer tensor of length `T`; `freqs` holds the
/// `D / 2` inverse frequencies `base^(-2i / D)`.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn rope(
    dst: &TensorRef,
    src: &TensorRef,
    pos: &TensorRef,
    freqs: &TensorRef,
    freq_scale: f32,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    if n % 2 != 0 || freqs.ne()[0] < n / 2 || pos.ne()[0] < src.ne()[2] {
        return Err(TensorError::ShapeMismatch {
            op: "rope",
            lhs: src.shape(),
            rhs: freqs.shape(),
        });
    }
    let mut ibuf = RowBuf::new(n);
    let mut fbuf = RowBuf::new(n / 2);
    let mut obuf = RowBuf::new(n);
    let inv_freq = fbuf.load(freqs, 0, 0, 0)?;

    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let p = read_index(pos, i2) as f32;
        let x = ibuf.load(src, i1, i2, i3)?;
        let out = obuf.out(n);
        for i in 0..n / 2 {
            let theta = p * freq_scale * inv_freq[i];
            let (sin, cos) = theta.sin_cos();
            let (x0, x1) = (x[2 * i], x[2 * i + 1]);
            out[2 * i] = x0 * cos - x1 * sin;
            out[2 * i + 1] = x0 * sin + x1 * cos;
        }
        store_row(dst, i1, i2, i3, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{assert_close, index, tensor};

    fn freqs(dim: usize, base: f32) -> Vec<f32> {
        (0..dim / 2).map(|i| base.powf(-2.0 * i as f32 / dim as f32)).collect()
    }

    #[test]
    fn test_position_zero_is_identity() {
        let mut x = vec![1.0, 2.0, 3.0, 4.0];
        let mut out = vec![0.0; 4];
        let mut p = vec![0i32];
        let mut f = freqs(4, 10000.0);
        let tx = tensor(&mut x, [4, 1, 1, 1]);
        let to = tensor(&mut out, [4, 1, 1, 1]);
        let tf = tensor(&mut f, [2, 1, 1, 1]);
        unsafe { rope(&to, &tx, &index(&mut p), &tf, 1.0, 0..1) }.unwrap();
        assert_close(&out, &[1.0, 2.0, 3.0, 4.0], 1e-6);
    }

    #[test]
    fn test_first_pair_rotates_by_position() {
        // freqs[0] == 1, so the first pair rotates by exactly pos radians.
        let mut x = vec![1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 1.0, 0.0];
        let mut out = vec![0.0; 8];
        let mut p = vec![0i32, 3];
        let mut f = freqs(4, 10000.0);
        let tx = tensor(&mut x, [4, 1, 2, 1]);
        let to = tensor(&mut out, [4, 1, 2, 1]);
        let tf = tensor(&mut f, [2, 1, 1, 1]);
        unsafe { rope(&to, &tx, &index(&mut p), &tf, 1.0, 0..2) }.unwrap();
        assert_close(&out[4..6], &[3.0f32.cos(), 3.0f32.sin()], 1e-6);
        let norm = (out[6] * out[6] + out[7] * out[7]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_freq_scale_compresses_positions() {
        let mut x = vec![1.0, 0.0];
        let mut a = vec![0.0; 2];
        let mut b = vec![0.0; 2];
        let mut p4 = vec![4i32];
        let mut p2 = vec![2i32];
        let mut f = vec![1.0];
        let tx = tensor(&mut x, [2, 1, 1, 1]);
        let tf = tensor(&mut f, [1, 1, 1, 1]);
        let ta = tensor(&mut a, [2, 1, 1, 1]);
        let tb = tensor(&mut b, [2, 1, 1, 1]);
        unsafe {
            rope(&ta, &tx, &index(&mut p4), &tf, 0.5, 0..1).unwrap();
            rope(&tb, &tx, &index(&mut p2), &tf, 1.0, 0..1).unwrap();
        }
        assert_close(&a, &b, 1e-6);
    }
}
