// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Matrix multiplication in the row-dot-row convention.
//!
//! With `a` of shape `[K, M, A2, A3]` and `b` of shape `[K, N, B2, B3]`,
//! the output is `[M, N, B2, B3]` and
//! `dst[i0, i1, i2, i3] = dot(a[:, i0, i2 / r, i3], b[:, i1, i2, i3])`
//! where `r = B2 / A2`. The broadcast over axis 2 lets several query
//! heads share one key/value head (grouped-query attention).
//!
//! `a` may be any storage dtype, including a strided view (a transposed
//! cache slice); rows that are not packed `f32` are decoded once per output
//! column.

use super::RowBuf;
use crate::{quant, simd, DType, TensorError, TensorRef};
use std::ops::Range;

/// Computes the output elements in `elems`, a range over the flattened
/// output with axis 0 varying fastest.
///
/// Unit `u` maps to `(u % M, u / M % N, u / (M N) % B2, u / (M N B2))`.
/// Splitting over every output element keeps all workers busy when the
/// output has a single column per head, as in single-token decode.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn mul_mat(
    dst: &TensorRef,
    a: &TensorRef,
    b: &TensorRef,
    elems: Range<usize>,
) -> Result<(), TensorError> {
    let [k, m, a2, a3] = a.ne();
    let [kb, n, b2, b3] = b.ne();
    if k != kb || a2 == 0 || b2 % a2 != 0 || a3 != b3 || dst.ne() != [m, n, b2, b3] {
        return Err(TensorError::ShapeMismatch {
            op: "mul_mat",
            lhs: a.shape(),
            rhs: b.shape(),
        });
    }
    if dst.dtype() != DType::F32 {
        return Err(TensorError::UnsupportedDType {
            op: "mul_mat",
            dtype: dst.dtype(),
        });
    }
    let ratio = b2 / a2;
    let total = m * n * b2 * b3;
    let mut arow = RowBuf::new(k);
    let mut brow = RowBuf::new(k);

    for u in elems.start.min(total)..elems.end.min(total) {
        let i0 = u % m;
        let i1 = u / m % n;
        let i2 = u / (m * n) % b2;
        let i3 = u / (m * n * b2);
        let av = arow.load(a, i0, i2 / ratio, i3)?;
        let bv = brow.load(b, i1, i2, i3)?;
        quant::write_scalar(DType::F32, dst.elem_ptr(i0, i1, i2, i3), simd::dot(av, bv));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::split_range;
    use crate::ops::test_util::{assert_close, tensor};
    use crate::{quant, Shape};

    #[test]
    fn test_mul_mat_2x3_times_3x2() {
        // a rows: [1,2,3], [4,5,6]; b rows: [7,9,11], [8,10,12]
        let mut a = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let mut b = vec![7.0, 9.0, 11.0, 8.0, 10.0, 12.0];
        let mut out = vec![0.0; 4];
        let ta = tensor(&mut a, [3, 2, 1, 1]);
        let tb = tensor(&mut b, [3, 2, 1, 1]);
        let to = tensor(&mut out, [2, 2, 1, 1]);
        unsafe { mul_mat(&to, &ta, &tb, 0..4) }.unwrap();
        // dst[i0, i1] = dot(a row i0, b row i1)
        assert_close(&out, &[58.0, 139.0, 64.0, 154.0], 1e-5);
    }

    #[test]
    fn test_mul_mat_gqa_broadcast() {
        // One kv head shared by two query heads.
        let mut a = vec![1.0, 0.0, 0.0, 1.0]; // [2, 2, 1]
        let mut b = vec![3.0, 4.0, 5.0, 6.0]; // [2, 1, 2]
        let mut out = vec![0.0; 4]; // [2, 1, 2]
        let ta = tensor(&mut a, [2, 2, 1, 1]);
        let tb = tensor(&mut b, [2, 1, 2, 1]);
        let to = tensor(&mut out, [2, 1, 2, 1]);
        unsafe { mul_mat(&to, &ta, &tb, 0..4) }.unwrap();
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_mul_mat_quantized_weight_matches_dequantized() {
        let k = 64;
        let m = 3;
        let w: Vec<f32> = (0..k * m).map(|i| ((i as f32) * 0.11).sin()).collect();
        let mut packed = vec![0u8; Shape::matrix(k, m).byte_size(DType::Q8_0)];
        for r in 0..m {
            let row_bytes = quant::byte_len(DType::Q8_0, k);
            quant::encode_row(DType::Q8_0, &w[r * k..(r + 1) * k], &mut packed[r * row_bytes..(r + 1) * row_bytes]).unwrap();
        }
        let mut deq = vec![0.0f32; k * m];
        for r in 0..m {
            let row_bytes = quant::byte_len(DType::Q8_0, k);
            quant::decode_row(DType::Q8_0, &packed[r * row_bytes..(r + 1) * row_bytes], &mut deq[r * k..(r + 1) * k]).unwrap();
        }
        let mut x: Vec<f32> = (0..k).map(|i| i as f32 / k as f32).collect();
        let mut out_q = vec![0.0; m];
        let mut out_f = vec![0.0; m];

        let tq = TensorRef::from_bytes(&mut packed, DType::Q8_0, Shape::matrix(k, m)).unwrap();
        let tf = tensor(&mut deq, [k, m, 1, 1]);
        let tx = tensor(&mut x, [k, 1, 1, 1]);
        let toq = tensor(&mut out_q, [m, 1, 1, 1]);
        let tof = tensor(&mut out_f, [m, 1, 1, 1]);
        unsafe {
            mul_mat(&toq, &tq, &tx, 0..m).unwrap();
            mul_mat(&tof, &tf, &tx, 0..m).unwrap();
        }
        assert_close(&out_q, &out_f, 1e-5);
    }

    #[test]
    fn test_mul_mat_strided_lhs() {
        // Transposed view: a = t^T where t rows are [1,2],[3,4],[5,6].
        let mut t = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let tt = tensor(&mut t, [2, 3, 1, 1]).transpose(); // ne [3, 2]
        let mut b = vec![1.0, 1.0, 1.0];
        let tb = tensor(&mut b, [3, 1, 1, 1]);
        let mut out = vec![0.0; 2];
        let to = tensor(&mut out, [2, 1, 1, 1]);
        unsafe { mul_mat(&to, &tt, &tb, 0..2) }.unwrap();
        assert_eq!(out, vec![9.0, 12.0]);
    }

    #[test]
    fn test_element_split_is_exact() {
        let k = 16;
        let mut a: Vec<f32> = (0..k * 7).map(|i| (i as f32 * 0.05).cos()).collect();
        let mut b: Vec<f32> = (0..k * 3).map(|i| (i as f32 * 0.09).sin()).collect();
        let mut one = vec![0.0; 21];
        let mut many = vec![0.0; 21];
        let ta = tensor(&mut a, [k, 7, 1, 1]);
        let tb = tensor(&mut b, [k, 3, 1, 1]);
        let t1 = tensor(&mut one, [7, 3, 1, 1]);
        let tn = tensor(&mut many, [7, 3, 1, 1]);
        unsafe {
            mul_mat(&t1, &ta, &tb, 0..21).unwrap();
            for ith in 0..4 {
                mul_mat(&tn, &ta, &tb, split_range(21, ith, 4)).unwrap();
            }
        }
        assert_eq!(one, many);
    }

    #[test]
    fn test_single_column_heads_split_across_workers() {
        // Decode-shaped scores: one column per head, four heads over two kv heads.
        let k = 8;
        let mut a: Vec<f32> = (0..k * 2).map(|i| i as f32 * 0.25).collect(); // [8, 1, 2]
        let mut b: Vec<f32> = (0..k * 4).map(|i| (i as f32 * 0.3).sin()).collect(); // [8, 1, 4]
        let mut one = vec![0.0; 4];
        let mut many = vec![f32::NAN; 4];
        let ta = tensor(&mut a, [k, 1, 2, 1]);
        let tb = tensor(&mut b, [k, 1, 4, 1]);
        let t1 = tensor(&mut one, [1, 1, 4, 1]);
        let tn = tensor(&mut many, [1, 1, 4, 1]);
        unsafe {
            mul_mat(&t1, &ta, &tb, 0..4).unwrap();
            for ith in 0..4 {
                let range = split_range(4, ith, 4);
                assert_eq!(range.len(), 1);
                mul_mat(&tn, &ta, &tb, range).unwrap();
            }
        }
        assert_eq!(one, many);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut a = vec![0.0; 6];
        let mut b = vec![0.0; 4];
        let mut out = vec![0.0; 4];
        let ta = tensor(&mut a, [3, 2, 1, 1]);
        let tb = tensor(&mut b, [2, 2, 1, 1]);
        let to = tensor(&mut out, [2, 2, 1, 1]);
        assert!(unsafe { mul_mat(&to, &ta, &tb, 0..2) }.is_err());
    }
}
