// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Copies between tensors of possibly different layouts and dtypes.

use super::{store_row, RowBuf};
use crate::{quant, TensorError, TensorRef};
use std::ops::Range;

/// Copies `src` into `dst` element by element, converting dtype.
///
/// Both tensors must have identical active extents; either may be strided.
/// Used to write new keys/values into a window of the cache.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn copy(dst: &TensorRef, src: &TensorRef, rows: Range<usize>) -> Result<(), TensorError> {
    if dst.ne() != src.ne() {
        return Err(TensorError::ShapeMismatch {
            op: "copy",
            lhs: src.shape(),
            rhs: dst.shape(),
        });
    }
    let mut buf = RowBuf::new(src.ne()[0]);
    for row in rows {
        let (i1, i2, i3) = src.row_coords(row);
        let vals = buf.load(src, i1, i2, i3)?;
        store_row(dst, i1, i2, i3, vals)?;
    }
    Ok(())
}

/// Materialises a strided `src` into the packed `dst`.
///
/// Elements are visited in axis-0-first order of `src`; source row `r`
/// lands at flat element offset `r * src.ne[0]` of `dst`, whatever shape
/// `dst` declares.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn cont(dst: &TensorRef, src: &TensorRef, rows: Range<usize>) -> Result<(), TensorError> {
    if dst.num_elements() != src.num_elements() {
        return Err(TensorError::ShapeMismatch {
            op: "cont",
            lhs: src.shape(),
            rhs: dst.shape(),
        });
    }
    if !dst.is_contiguous() {
        return Err(TensorError::NonContiguous { op: "cont" });
    }
    let n = src.ne()[0];
    let mut buf = RowBuf::new(n);
    for row in rows {
        let (i1, i2, i3) = src.row_coords(row);
        let vals = buf.load(src, i1, i2, i3)?;
        let offset = quant::byte_len(dst.dtype(), row * n);
        let bytes = std::slice::from_raw_parts_mut(
            dst.as_ptr().add(offset),
            quant::byte_len(dst.dtype(), n),
        );
        quant::encode_row(dst.dtype(), vals, bytes)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::test_util::tensor;
    use crate::{DType, Shape};

    #[test]
    fn test_copy_into_f16_window() {
        let mut src = vec![1.0, 2.0, 3.0, 4.0];
        let mut cache = vec![0u8; 2 * 4 * 3];
        let ts = tensor(&mut src, [4, 1, 1, 1]);
        let tc = TensorRef::from_bytes(&mut cache, DType::F16, Shape::matrix(4, 3)).unwrap();
        let window = tc.narrow(1, 2, 1);
        unsafe { copy(&window, &ts, 0..1) }.unwrap();

        let mut row = vec![0.0f32; 4];
        quant::decode_row(DType::F16, &cache[16..24], &mut row).unwrap();
        assert_eq!(row, vec![1.0, 2.0, 3.0, 4.0]);
        assert!(cache[..16].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_cont_of_permuted() {
        // [2, 2, 2] permuted to swap axes 1 and 2, then packed.
        let mut src: Vec<f32> = (0..8).map(|v| v as f32).collect();
        let ts = tensor(&mut src, [2, 2, 2, 1]).permute([0, 2, 1, 3]);
        let mut out = vec![0.0; 8];
        let to = tensor(&mut out, [4, 2, 1, 1]);
        unsafe { cont(&to, &ts, 0..4) }.unwrap();
        assert_eq!(out, vec![0.0, 1.0, 4.0, 5.0, 2.0, 3.0, 6.0, 7.0]);
    }

    #[test]
    fn test_copy_extent_mismatch() {
        let mut a = vec![0.0; 4];
        let mut b = vec![0.0; 2];
        let ta = tensor(&mut a, [4, 1, 1, 1]);
        let tb = tensor(&mut b, [2, 1, 1, 1]);
        assert!(unsafe { copy(&tb, &ta, 0..1) }.is_err());
    }
}
