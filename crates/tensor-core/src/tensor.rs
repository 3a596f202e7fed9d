// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Raw tensor descriptors over externally owned storage.
//!
//! The engine never owns tensor data through a `TensorRef`: activations live
//! in the memory arena and weights in the mapped model file. A `TensorRef`
//! only records where the first element is, how many elements each axis
//! currently spans, and the byte stride of every axis. View, permute and
//! transpose are pure descriptor rewrites and never touch memory.

use crate::{DType, Shape, TensorError, MAX_DIMS};

/// A copyable descriptor of a strided tensor region.
///
/// `ne` holds the active element count per axis and `nb` the byte stride per
/// axis. For quantized types `nb[0]` is the stride between blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorRef {
    data: *mut u8,
    dtype: DType,
    ne: [usize; MAX_DIMS],
    nb: [usize; MAX_DIMS],
}

// SAFETY: a TensorRef is a plain address plus geometry. Exclusive access to
// the bytes it describes is coordinated by the executor's barrier protocol:
// between a start and end barrier every output element is written by exactly
// one worker and inputs are only read.
unsafe impl Send for TensorRef {}
unsafe impl Sync for TensorRef {}

impl TensorRef {
    /// Describes a contiguous tensor of `shape` starting at `data`.
    pub fn contiguous(data: *mut u8, dtype: DType, shape: Shape) -> Self {
        Self {
            data,
            dtype,
            ne: shape.dims(),
            nb: shape.strides(dtype),
        }
    }

    /// Describes a tensor laid out with the strides of `layout` but spanning
    /// only the `active` extents.
    ///
    /// Storage is always sized for the static maximum; shorter runtime
    /// extents simply leave trailing rows untouched.
    pub fn with_layout(data: *mut u8, dtype: DType, layout: Shape, active: Shape) -> Self {
        Self {
            data,
            dtype,
            ne: active.dims(),
            nb: layout.strides(dtype),
        }
    }

    /// Wraps a mutable `f32` slice as a contiguous tensor of `shape`.
    ///
    /// # Errors
    /// Returns [`TensorError::BufferSizeMismatch`] if the slice length does
    /// not match the shape.
    pub fn from_f32_slice(values: &mut [f32], shape: Shape) -> Result<Self, TensorError> {
        if values.len() != shape.num_elements() {
            return Err(TensorError::BufferSizeMismatch {
                expected: shape.byte_size(DType::F32),
                actual: values.len() * DType::F32.type_size(),
            });
        }
        Ok(Self::contiguous(values.as_mut_ptr().cast(), DType::F32, shape))
    }

    /// Wraps a mutable byte buffer holding `dtype` data as a contiguous tensor.
    ///
    /// # Errors
    /// Returns [`TensorError::BufferSizeMismatch`] if the buffer is too small.
    pub fn from_bytes(bytes: &mut [u8], dtype: DType, shape: Shape) -> Result<Self, TensorError> {
        let expected = shape.byte_size(dtype);
        if bytes.len() < expected {
            return Err(TensorError::BufferSizeMismatch {
                expected,
                actual: bytes.len(),
            });
        }
        Ok(Self::contiguous(bytes.as_mut_ptr(), dtype, shape))
    }

    /// Element type.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Active extents per axis.
    pub fn ne(&self) -> [usize; MAX_DIMS] {
        self.ne
    }

    /// Byte strides per axis.
    pub fn nb(&self) -> [usize; MAX_DIMS] {
        self.nb
    }

    /// Active extents as a [`Shape`].
    pub fn shape(&self) -> Shape {
        Shape::new(self.ne)
    }

    /// Address of the first element.
    pub fn as_ptr(&self) -> *mut u8 {
        self.data
    }

    /// Number of rows (product of axes 1..4).
    pub fn num_rows(&self) -> usize {
        self.ne[1] * self.ne[2] * self.ne[3]
    }

    /// Number of active elements.
    pub fn num_elements(&self) -> usize {
        self.ne.iter().product()
    }

    /// Returns `true` if axis 0 is densely packed.
    pub fn is_row_contiguous(&self) -> bool {
        self.nb[0] == self.dtype.type_size()
    }

    /// Returns `true` if the whole active region is densely packed in
    /// axis-0-first order.
    pub fn is_contiguous(&self) -> bool {
        let dense = Shape::new(self.ne).strides(self.dtype);
        (0..MAX_DIMS).all(|i| self.ne[i] == 1 || self.nb[i] == dense[i])
    }

    /// Splits a flat row index into `(i1, i2, i3)`.
    pub fn row_coords(&self, row: usize) -> (usize, usize, usize) {
        let i1 = row % self.ne[1];
        let i2 = (row / self.ne[1]) % self.ne[2];
        let i3 = row / (self.ne[1] * self.ne[2]);
        (i1, i2, i3)
    }

    /// Address of the first element of row `(i1, i2, i3)`.
    ///
    /// # Safety
    /// The indices must lie within the active extents and the described
    /// storage must be live.
    pub unsafe fn row_ptr(&self, i1: usize, i2: usize, i3: usize) -> *mut u8 {
        self.data
            .add(i1 * self.nb[1] + i2 * self.nb[2] + i3 * self.nb[3])
    }

    /// Address of element `(i0, i1, i2, i3)` of a non-quantized tensor.
    ///
    /// # Safety
    /// Same as [`row_ptr`](Self::row_ptr); `i0` must be within axis 0.
    pub unsafe fn elem_ptr(&self, i0: usize, i1: usize, i2: usize, i3: usize) -> *mut u8 {
        self.row_ptr(i1, i2, i3).add(i0 * self.nb[0])
    }

    /// Narrows `axis` to `len` elements starting at element `offset`.
    ///
    /// The descriptor keeps the source strides, so the result is usually
    /// non-contiguous along outer axes.
    pub fn narrow(&self, axis: usize, offset: usize, len: usize) -> Self {
        let mut out = *self;
        // SAFETY: pointer arithmetic only; callers keep offset + len within the source.
        out.data = unsafe { self.data.add(offset * self.nb[axis]) };
        out.ne[axis] = len;
        out
    }

    /// Replaces the active extents while keeping strides.
    pub fn with_extents(&self, ne: [usize; MAX_DIMS]) -> Self {
        Self { ne, ..*self }
    }

    /// Reorders axes so that output axis `i` is input axis `axes[i]`.
    pub fn permute(&self, axes: [usize; MAX_DIMS]) -> Self {
        let mut ne = [1usize; MAX_DIMS];
        let mut nb = [0usize; MAX_DIMS];
        for (i, &a) in axes.iter().enumerate() {
            ne[i] = self.ne[a];
            nb[i] = self.nb[a];
        }
        Self { ne, nb, ..*self }
    }

    /// Swaps axes 0 and 1.
    pub fn transpose(&self) -> Self {
        self.permute([1, 0, 2, 3])
    }

    /// Reinterprets a contiguous region with a new layout.
    ///
    /// # Errors
    /// Returns [`TensorError::NonContiguous`] if `self` is strided.
    pub fn reshape(&self, layout: Shape, active: Shape) -> Result<Self, TensorError> {
        if !self.is_contiguous() {
            return Err(TensorError::NonContiguous { op: "reshape" });
        }
        Ok(Self::with_layout(self.data, self.dtype, layout, active))
    }
}
