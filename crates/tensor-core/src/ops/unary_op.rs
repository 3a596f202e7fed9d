// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Elementwise activation kernels.

use super::{store_row, RowBuf};
use crate::{TensorError, TensorRef};
use std::ops::Range;

/// SiLU activation `x * sigmoid(x)` over the given output rows.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn silu(dst: &TensorRef, src: &TensorRef, rows: Range<usize>) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    let mut ibuf = RowBuf::new(n);
    let mut obuf = RowBuf::new(n);
    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let x = ibuf.load(src, i1, i2, i3)?;
        let out = obuf.out(n);
        for (o, &v) in out.iter_mut().zip(x) {
            *o = v / (1.0 + (-v).exp());
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
    fn test_silu_values() {
        let mut x = vec![0.0, 1.0, -1.0, 10.0];
        let mut out = vec![0.0; 4];
        let (tx, to) = (tensor(&mut x, [4, 1, 1, 1]), tensor(&mut out, [4, 1, 1, 1]));
        unsafe { silu(&to, &tx, 0..1) }.unwrap();
        assert_close(&out, &[0.0, 0.731_058_6, -0.268_941_4, 9.999_546], 1e-5);
    }
}
