// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Four-axis tensor shapes with axis 0 innermost.
//!
//! Every op in the graph carries exactly four logical dimensions. Axis 0 is
//! the contiguous axis; lower-rank tensors pad the trailing axes with 1.
//! A `[4096, 32000]` weight is therefore 32000 rows of 4096 elements.

use crate::DType;
use std::fmt;

/// Number of logical axes every shape carries.
pub const MAX_DIMS: usize = 4;

/// Logical dimensions of a tensor, innermost axis first.
///
/// Shapes are plain values: all methods are pure, so computing byte sizes
/// or strides twice for the same shape and dtype yields identical results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Shape {
    dims: [usize; MAX_DIMS],
}

impl Shape {
    /// Creates a shape from all four axes.
    ///
    /// # Examples
    /// ```
    /// use tensor_core::Shape;
    /// let s = Shape::new([128, 32, 1, 1]);
    /// assert_eq!(s.rank(), 2);
    /// assert_eq!(s.num_elements(), 4096);
    /// ```
    pub const fn new(dims: [usize; MAX_DIMS]) -> Self {
        Self { dims }
    }

    /// Creates a 1-D shape.
    pub const fn vector(len: usize) -> Self {
        Self::new([len, 1, 1, 1])
    }

    /// Creates a 2-D shape of `rows` rows holding `cols` contiguous elements.
    pub const fn matrix(cols: usize, rows: usize) -> Self {
        Self::new([cols, rows, 1, 1])
    }

    /// Creates a 3-D shape.
    pub const fn tensor3(d0: usize, d1: usize, d2: usize) -> Self {
        Self::new([d0, d1, d2, 1])
    }

    /// Builds a shape from up to four leading dimensions.
    ///
    /// Returns `None` when more than four dimensions are supplied.
    pub fn from_slice(dims: &[usize]) -> Option<Self> {
        if dims.len() > MAX_DIMS {
            return None;
        }
        let mut out = [1usize; MAX_DIMS];
        out[..dims.len()].copy_from_slice(dims);
        Some(Self::new(out))
    }

    /// Number of axes up to and including the last non-unit one.
    ///
    /// Scalars and all-ones shapes report rank 1.
    pub fn rank(&self) -> usize {
        self.dims
            .iter()
            .rposition(|&d| d != 1)
            .map(|i| i + 1)
            .unwrap_or(1)
    }

    /// Total number of logical elements.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Number of rows, i.e. the product of axes 1..4.
    pub fn num_rows(&self) -> usize {
        self.dims[1] * self.dims[2] * self.dims[3]
    }

    /// Returns the dimensions as an array.
    pub fn dims(&self) -> [usize; MAX_DIMS] {
        self.dims
    }

    /// Returns the size of one axis.
    ///
    /// # Panics
    /// Panics if `axis >= 4`.
    pub fn dim(&self, axis: usize) -> usize {
        self.dims[axis]
    }

    /// Returns a copy with one axis replaced.
    pub fn with_dim(&self, axis: usize, len: usize) -> Self {
        let mut dims = self.dims;
        dims[axis] = len;
        Self::new(dims)
    }

    /// Returns a copy with axes reordered so that output axis `i` is input
    /// axis `axes[i]`.
    pub fn permuted(&self, axes: [usize; MAX_DIMS]) -> Self {
        let mut dims = [1usize; MAX_DIMS];
        for (i, &a) in axes.iter().enumerate() {
            dims[i] = self.dims[a];
        }
        Self::new(dims)
    }

    /// Bytes required to store this shape contiguously:
    /// `ceil(num_elements / block_size) * type_size`.
    pub fn byte_size(&self, dtype: DType) -> usize {
        let blocks = self.num_elements().div_ceil(dtype.block_size());
        blocks * dtype.type_size()
    }

    /// Byte strides of a contiguous tensor of this shape.
    ///
    /// `nb[0]` is the block size in bytes, `nb[1]` spans one row of
    /// `dims[0] / block_size` blocks, and every outer axis multiplies by the
    /// logical extent of the axis below it.
    pub fn strides(&self, dtype: DType) -> [usize; MAX_DIMS] {
        let mut nb = [0usize; MAX_DIMS];
        nb[0] = dtype.type_size();
        nb[1] = nb[0] * (self.dims[0] / dtype.block_size());
        for i in 2..MAX_DIMS {
            nb[i] = nb[i - 1] * self.dims[i - 1];
        }
        nb
    }

    /// Returns `true` if `other` can be broadcast onto `self` along axis 1:
    /// axis 0 matches, axis 1 is 1 or equal, outer axes match exactly.
    pub fn is_row_broadcast_of(&self, other: &Shape) -> bool {
        self.dims[0] == other.dims[0]
            && (other.dims[1] == 1 || other.dims[1] == self.dims[1])
            && self.dims[2] == other.dims[2]
            && self.dims[3] == other.dims[3]
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.dims;
        write!(f, "[{a}, {b}, {c}, {d}]")
    }
}

impl From<[usize; MAX_DIMS]> for Shape {
    fn from(dims: [usize; MAX_DIMS]) -> Self {
        Self::new(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_vector_shape() {
        let s = Shape::vector(5);
        assert_eq!(s.rank(), 1);
        assert_eq!(s.num_elements(), 5);
        assert_eq!(s.num_rows(), 1);
        assert_eq!(s.strides(DType::F32), [4, 20, 20, 20]);
    }

    #[test]
    fn test_matrix_shape() {
        let s = Shape::matrix(4, 3);
        assert_eq!(s.rank(), 2);
        assert_eq!(s.num_elements(), 12);
        assert_eq!(s.num_rows(), 3);
        assert_eq!(s.strides(DType::F32), [4, 16, 48, 48]);
        assert_eq!(s.byte_size(DType::F32), 48);
    }

    #[test]
    fn test_rank_of_ones() {
        assert_eq!(Shape::new([1, 1, 1, 1]).rank(), 1);
        assert_eq!(Shape::new([1, 1, 7, 1]).rank(), 3);
    }

    #[test]
    fn test_quantized_strides() {
        // 4096 x 32000 Q8_0 weight: 128 blocks of 34 bytes per row.
        let s = Shape::matrix(4096, 32000);
        let nb = s.strides(DType::Q8_0);
        assert_eq!(nb[0], 34);
        assert_eq!(nb[1], 34 * 128);
        assert_eq!(nb[2], 34 * 128 * 32000);
        assert_eq!(s.byte_size(DType::Q8_0), 34 * 128 * 32000);
    }

    #[test]
    fn test_byte_size_rounds_up_partial_block() {
        let s = Shape::vector(33);
        assert_eq!(s.byte_size(DType::Q4_0), 2 * 18);
    }

    #[test]
    fn test_permuted() {
        let s = Shape::tensor3(128, 32, 7);
        assert_eq!(s.permuted([0, 2, 1, 3]), Shape::tensor3(128, 7, 32));
        assert_eq!(s.permuted([2, 0, 1, 3]), Shape::tensor3(7, 128, 32));
    }

    #[test]
    fn test_row_broadcast() {
        let a = Shape::matrix(8, 4);
        assert!(a.is_row_broadcast_of(&Shape::matrix(8, 1)));
        assert!(a.is_row_broadcast_of(&Shape::matrix(8, 4)));
        assert!(!a.is_row_broadcast_of(&Shape::matrix(8, 2)));
        assert!(!a.is_row_broadcast_of(&Shape::matrix(4, 1)));
    }

    #[test]
    fn test_from_slice() {
        assert_eq!(Shape::from_slice(&[3, 2]), Some(Shape::matrix(3, 2)));
        assert_eq!(Shape::from_slice(&[1, 2, 3, 4, 5]), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(format!("{}", Shape::tensor3(2, 3, 4)), "[2, 3, 4, 1]");
    }

    proptest! {
        #[test]
        fn prop_byte_size_is_pure(d0 in 1usize..512, d1 in 1usize..64, d2 in 1usize..8) {
            let s = Shape::tensor3(d0 * 32, d1, d2);
            for dtype in [DType::F32, DType::F16, DType::Q8_0, DType::Q4_0] {
                prop_assert_eq!(s.byte_size(dtype), s.byte_size(dtype));
                prop_assert_eq!(s.strides(dtype), s.strides(dtype));
            }
        }

        #[test]
        fn prop_contiguous_strides_span_byte_size(d0 in 1usize..64, d1 in 1usize..64, d2 in 1usize..8, d3 in 1usize..4) {
            let s = Shape::new([d0 * 32, d1, d2, d3]);
            for dtype in [DType::F32, DType::BF16, DType::Q8_0, DType::Q4_0] {
                let nb = s.strides(dtype);
                prop_assert_eq!(nb[3] * d3, s.byte_size(dtype));
                if !dtype.is_quantized() {
                    for i in 1..MAX_DIMS {
                        prop_assert_eq!(nb[i], nb[i - 1] * s.dim(i - 1));
                    }
                }
            }
        }
    }
}
