// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Root-mean-square normalisation.

use super::{store_row, RowBuf};
use crate::{TensorError, TensorRef};
use std::ops::Range;

/// Normalises each row: `y = x / sqrt(mean(x^2) + eps)`.
///
/// The learned per-channel scale is applied by a separate `mul` op.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn rms_norm(
    dst: &TensorRef,
    src: &TensorRef,
    eps: f32,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    let mut ibuf = RowBuf::new(n);
    let mut obuf = RowBuf::new(n);
    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let x = ibuf.load(src, i1, i2, i3)?;
        let mean_sq = x.iter().map(|v| v * v).sum::<f32>() / n as f32;
        let scale = 1.0 / (mean_sq + eps).sqrt();
        let out = obuf.out(n);
        for (o, &v) in out.iter_mut().zip(x) {
            *o = v * scale;
        }
        store_row(dst, i1, i2, i3, out)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::{assert_close, tensor};

    #[test]
    fn test_rms_norm_basic() {
        // mean(x^2) = (1 + 4 + 9 + 16) / 4 = 7.5
        let mut x = vec![1.0, 2.0, 3.0, 4.0];
        let mut out = vec![0.0; 4];
        let (tx, to) = (tensor(&mut x, [4, 1, 1, 1]), tensor(&mut out, [4, 1, 1, 1]));
        unsafe { rms_norm(&to, &tx, 0.0, 0..1) }.unwrap();
        let r = 7.5f32.sqrt();
        assert_close(&out, &[1.0 / r, 2.0 / r, 3.0 / r, 4.0 / r], 1e-6);
    }

    #[test]
    fn test_rms_norm_rows_independent() {
        let mut x = vec![3.0, 4.0, 0.0, 0.0];
        let mut out = vec![9.0; 4];
        let (tx, to) = (tensor(&mut x, [2, 2, 1, 1]), tensor(&mut out, [2, 2, 1, 1]));
        unsafe { rms_norm(&to, &tx, 1e-5, 1..2) }.unwrap();
        assert_eq!(&out[..2], &[9.0, 9.0]);
        assert_eq!(&out[2..], &[0.0, 0.0]);
    }
}
