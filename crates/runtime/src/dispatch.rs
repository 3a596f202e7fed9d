// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Maps a blocking op onto its `tensor_core` kernel.

use crate::RuntimeError;
use model_ir::{KernelKind, OpDef, OpParams};
use std::ops::Range;
use tensor_core::{ops, TensorRef};

/// Runs the kernel of `op` over `range`, writing into `dst`.
///
/// `inputs` are the operand descriptors in kernel argument order. For
/// `copy`, `dst` is the destination view (the op's second input).
///
/// # Safety
/// Same contract as [`tensor_core::ops`]: every descriptor must point at
/// live storage, and no other thread may touch the part of `dst` selected
/// by `range` during the call.
pub(crate) unsafe fn dispatch(
    op: &OpDef,
    dst: &TensorRef,
    inputs: &[TensorRef],
    range: Range<usize>,
) -> Result<(), RuntimeError> {
    let result = match (op.kernel, op.params, inputs) {
        (KernelKind::GetRows, _, [table, idx]) => ops::get_rows(dst, table, idx, range),
        (KernelKind::RmsNorm, OpParams::RmsNorm { eps }, [src]) => ops::rms_norm(dst, src, eps, range),
        (KernelKind::Mul, _, [a, b]) => ops::mul(dst, a, b, range),
        (KernelKind::Add, _, [a, b]) => ops::add(dst, a, b, range),
        (KernelKind::Sub, _, [a, b]) => ops::sub(dst, a, b, range),
        (KernelKind::MulMat, _, [a, b]) => ops::mul_mat(dst, a, b, range),
        (KernelKind::Cont, _, [src]) => ops::cont(dst, src, range),
        (KernelKind::Copy, _, [src, _]) => ops::copy(dst, src, range),
        (KernelKind::Silu, _, [src]) => ops::silu(dst, src, range),
        (KernelKind::Rope, OpParams::Rope { freq_scale }, [src, pos, freqs]) => {
            ops::rope(dst, src, pos, freqs, freq_scale, range)
        }
        (KernelKind::Softmax, OpParams::Softmax { scale }, [src, mask]) => {
            ops::softmax(dst, src, Some(mask), scale, range)
        }
        (KernelKind::Softmax, OpParams::Softmax { scale }, [src]) => ops::softmax(dst, src, None, scale, range),
        (kernel, _, _) => {
            return Err(RuntimeError::ParamsMismatch {
                op: op.name.to_string(),
                kernel,
            })
        }
    };
    result.map_err(|source| RuntimeError::KernelError {
        op: op.name.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use model_ir::{LayerType, OpKind, OpRole};
    use tensor_core::{DType, Shape};

    fn def(kernel: KernelKind, params: OpParams, shape: Shape) -> OpDef {
        OpDef::new(OpKind::FfnOut, LayerType::PerBlock, kernel, OpRole::Activation, DType::F32, shape)
            .with_params(params)
    }

    #[test]
    fn test_dispatch_add() {
        let shape = Shape::matrix(4, 2);
        let mut a = vec![1.0f32; 8];
        let mut b = vec![2.0f32; 8];
        let mut out = vec![0.0f32; 8];
        let ta = TensorRef::from_f32_slice(&mut a, shape).unwrap();
        let tb = TensorRef::from_f32_slice(&mut b, shape).unwrap();
        let dst = TensorRef::from_f32_slice(&mut out, shape).unwrap();
        let op = def(KernelKind::Add, OpParams::None, shape);
        unsafe { dispatch(&op, &dst, &[ta, tb], 0..2).unwrap() };
        assert_eq!(out, vec![3.0; 8]);
    }

    #[test]
    fn test_dispatch_partial_range() {
        let shape = Shape::matrix(2, 3);
        let mut src = vec![-1.0f32, 2.0, -3.0, 4.0, -5.0, 6.0];
        let mut out = vec![0.0f32; 6];
        let ts = TensorRef::from_f32_slice(&mut src, shape).unwrap();
        let dst = TensorRef::from_f32_slice(&mut out, shape).unwrap();
        let op = def(KernelKind::Silu, OpParams::None, shape);
        unsafe { dispatch(&op, &dst, &[ts], 1..2).unwrap() };
        assert_eq!(out[0], 0.0);
        assert!(out[2] < 0.0 && out[3] > 3.0);
        assert_eq!(out[4], 0.0);
    }

    #[test]
    fn test_missing_params_rejected() {
        let shape = Shape::vector(4);
        let mut src = vec![1.0f32; 4];
        let mut out = vec![0.0f32; 4];
        let ts = TensorRef::from_f32_slice(&mut src, shape).unwrap();
        let dst = TensorRef::from_f32_slice(&mut out, shape).unwrap();
        let op = def(KernelKind::RmsNorm, OpParams::None, shape);
        let err = unsafe { dispatch(&op, &dst, &[ts], 0..1) }.unwrap_err();
        assert!(matches!(err, RuntimeError::ParamsMismatch { kernel: KernelKind::RmsNorm, .. }));
    }

    #[test]
    fn test_kernel_error_names_op() {
        let mut a = vec![1.0f32; 4];
        let mut b = vec![1.0f32; 6];
        let mut out = vec![0.0f32; 4];
        let ta = TensorRef::from_f32_slice(&mut a, Shape::matrix(2, 2)).unwrap();
        let tb = TensorRef::from_f32_slice(&mut b, Shape::matrix(3, 2)).unwrap();
        let dst = TensorRef::from_f32_slice(&mut out, Shape::matrix(2, 2)).unwrap();
        let op = def(KernelKind::MulMat, OpParams::None, Shape::matrix(2, 2));
        let err = unsafe { dispatch(&op, &dst, &[ta, tb], 0..2) }.unwrap_err();
        assert!(matches!(err, RuntimeError::KernelError { ref op, .. } if op == "ffn_out"));
    }
}
