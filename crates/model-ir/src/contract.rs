// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Kernel shape/type contracts.
//!
//! Each kernel has a zero-sized type implementing [`KernelContract`]. The
//! graph validation pass calls [`check_contract`] once per op; a graph that
//! breaks any contract never reaches the `Validated` state, so kernels can
//! trust their operands at run time.
//!
//! Dims are in axis-0-first order: `d0` is the contiguous axis.

use crate::op::{KernelKind, OpDef, OpParams};
use crate::ModelError;
use tensor_core::{DType, Shape};

/// Result of a single contract check; the message becomes the `detail`
/// of [`ModelError::ContractViolation`].
pub type ContractResult = Result<(), String>;

/// Shape/type rule for one kernel.
pub trait KernelContract {
    /// Kernel this contract applies to.
    const KIND: KernelKind;

    /// Checks `op` against its resolved inputs (in argument order).
    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult;
}

// ── Helpers ────────────────────────────────────────────────────────

fn ensure(cond: bool, detail: impl FnOnce() -> String) -> ContractResult {
    if cond {
        Ok(())
    } else {
        Err(detail())
    }
}

fn same_shape(out: &OpDef, input: &OpDef) -> ContractResult {
    ensure(out.shape == input.shape, || {
        format!("output {} differs from input {} ({})", out.shape, input.shape, input.name)
    })
}

fn same_elements(out: &OpDef, input: &OpDef) -> ContractResult {
    ensure(out.shape.num_elements() == input.shape.num_elements(), || {
        format!(
            "output {} has {} elements, input {} has {}",
            out.shape,
            out.shape.num_elements(),
            input.shape,
            input.shape.num_elements()
        )
    })
}

fn same_dtype(out: &OpDef, input: &OpDef) -> ContractResult {
    ensure(out.dtype == input.dtype, || {
        format!("output dtype {} differs from input {} ({})", out.dtype, input.dtype, input.name)
    })
}

fn f32_output(out: &OpDef) -> ContractResult {
    ensure(out.dtype == DType::F32, || format!("output dtype must be f32, got {}", out.dtype))
}

fn index_vector(t: &OpDef, len: usize) -> ContractResult {
    ensure(t.dtype.is_integral(), || format!("{} must be integral, got {}", t.name, t.dtype))?;
    ensure(t.shape.rank() == 1 && t.shape.dim(0) == len, || {
        format!("{} must be a vector of {len}, got {}", t.name, t.shape)
    })
}

/// Broadcast rule shared by the elementwise binary kernels.
fn broadcast_binary(out: &OpDef, a: &Shape, b: &Shape) -> ContractResult {
    ensure(a.dim(0) == b.dim(0) && a.dim(0) == out.shape.dim(0), || {
        format!("row length mismatch: {a} / {b} -> {}", out.shape)
    })?;
    ensure(b.dim(1) == 1 || b.dim(1) == a.dim(1), || {
        format!("rhs {b} does not broadcast over {a}")
    })?;
    ensure(out.shape.dim(1) == a.dim(1), || format!("output {} != lhs {a}", out.shape))?;
    ensure(
        (2..4).all(|i| a.dim(i) == b.dim(i) && a.dim(i) == out.shape.dim(i)),
        || format!("outer axes differ: {a} / {b} -> {}", out.shape),
    )
}

// ── Contracts ──────────────────────────────────────────────────────

/// Leaf tensors take no inputs.
pub struct NoneContract;

impl KernelContract for NoneContract {
    const KIND: KernelKind = KernelKind::None;

    fn check(_op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        ensure(inputs.is_empty(), || format!("leaf op has {} inputs", inputs.len()))
    }
}

/// `dst = a ⊙ b` with `b` broadcast over rows.
pub struct MulContract;

impl KernelContract for MulContract {
    const KIND: KernelKind = KernelKind::Mul;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        f32_output(op)?;
        broadcast_binary(op, &inputs[0].shape, &inputs[1].shape)
    }
}

/// `dst = a + b`.
pub struct AddContract;

impl KernelContract for AddContract {
    const KIND: KernelKind = KernelKind::Add;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        f32_output(op)?;
        broadcast_binary(op, &inputs[0].shape, &inputs[1].shape)
    }
}

/// `dst = a - b`.
pub struct SubContract;

impl KernelContract for SubContract {
    const KIND: KernelKind = KernelKind::Sub;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        f32_output(op)?;
        broadcast_binary(op, &inputs[0].shape, &inputs[1].shape)
    }
}

/// `dst[i, j] = Σ_k a[k, i] · b[k, j]` per matrix, with grouped broadcast
/// of `a` along axis 2.
pub struct MulMatContract;

impl KernelContract for MulMatContract {
    const KIND: KernelKind = KernelKind::MulMat;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let (a, b, out) = (&inputs[0].shape, &inputs[1].shape, &op.shape);
        f32_output(op)?;
        ensure(a.dim(0) == b.dim(0), || format!("inner dims differ: {a} x {b}"))?;
        ensure(out.dim(0) == a.dim(1), || format!("output rows {out} != lhs cols {a}"))?;
        ensure(out.dim(1) == b.dim(1), || format!("output cols {out} != rhs cols {b}"))?;
        ensure(a.dim(2) > 0 && b.dim(2) % a.dim(2) == 0, || {
            format!("rhs axis 2 of {b} is not a multiple of lhs {a}")
        })?;
        ensure(out.dim(2) == b.dim(2), || format!("output {out} axis 2 != rhs {b}"))?;
        ensure(a.dim(3) == b.dim(3) && b.dim(3) == out.dim(3), || {
            format!("axis 3 differs: {a} x {b} -> {out}")
        })?;
        let dtype = inputs[0].dtype;
        ensure(!dtype.is_quantized() || a.dim(0) % dtype.block_size() == 0, || {
            format!("{dtype} rows of {} elements split a block", a.dim(0))
        })
    }
}

/// Embedding lookup: one table row per index.
pub struct GetRowsContract;

impl KernelContract for GetRowsContract {
    const KIND: KernelKind = KernelKind::GetRows;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let (table, idx) = (inputs[0], inputs[1]);
        f32_output(op)?;
        ensure(idx.dtype.is_integral() && idx.shape.rank() == 1, || {
            format!("index {} must be an integral vector, got {} {}", idx.name, idx.dtype, idx.shape)
        })?;
        ensure(op.shape.dim(0) == table.shape.dim(0), || {
            format!("output {} row length != table {}", op.shape, table.shape)
        })?;
        ensure(op.shape.dim(1) == idx.shape.dim(0), || {
            format!("output {} rows != index length {}", op.shape, idx.shape.dim(0))
        })
    }
}

/// Root-mean-square normalisation along axis 0.
pub struct RmsNormContract;

impl KernelContract for RmsNormContract {
    const KIND: KernelKind = KernelKind::RmsNorm;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        f32_output(op)?;
        same_shape(op, inputs[0])?;
        ensure(matches!(op.params, OpParams::RmsNorm { eps } if eps > 0.0), || {
            format!("rms_norm needs a positive eps, got {:?}", op.params)
        })
    }
}

/// `x · sigmoid(x)`.
pub struct SiluContract;

impl KernelContract for SiluContract {
    const KIND: KernelKind = KernelKind::Silu;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        f32_output(op)?;
        same_shape(op, inputs[0])
    }
}

/// Rotary position embedding over adjacent pairs of axis 0.
pub struct RopeContract;

impl KernelContract for RopeContract {
    const KIND: KernelKind = KernelKind::Rope;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let (x, pos, freqs) = (inputs[0], inputs[1], inputs[2]);
        f32_output(op)?;
        same_shape(op, x)?;
        let d0 = x.shape.dim(0);
        ensure(d0 % 2 == 0, || format!("rope needs an even row length, got {d0}"))?;
        index_vector(pos, x.shape.dim(2))?;
        ensure(freqs.shape.rank() == 1 && freqs.shape.dim(0) == d0 / 2, || {
            format!("frequency table {} must hold {} entries", freqs.shape, d0 / 2)
        })?;
        ensure(freqs.dtype == DType::F32, || format!("frequency table dtype {}", freqs.dtype))
    }
}

/// Scaled, masked softmax along axis 0.
pub struct SoftmaxContract;

impl KernelContract for SoftmaxContract {
    const KIND: KernelKind = KernelKind::Softmax;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let (x, mask) = (inputs[0], inputs[1]);
        f32_output(op)?;
        same_shape(op, x)?;
        ensure(mask.shape.dim(0) == x.shape.dim(0), || {
            format!("mask {} row length != input {}", mask.shape, x.shape)
        })?;
        ensure(mask.shape.dim(1) == x.shape.dim(1), || {
            format!("mask {} does not cover the {} rows of {}", mask.shape, x.shape.dim(1), x.shape)
        })?;
        ensure(matches!(op.params, OpParams::Softmax { scale } if scale > 0.0), || {
            format!("softmax needs a positive scale, got {:?}", op.params)
        })
    }
}

/// Reinterprets a packed tensor with new dims.
pub struct ReshapeContract;

impl KernelContract for ReshapeContract {
    const KIND: KernelKind = KernelKind::Reshape;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        same_dtype(op, inputs[0])?;
        same_elements(op, inputs[0])
    }
}

/// Reorders axes.
pub struct PermuteContract;

impl KernelContract for PermuteContract {
    const KIND: KernelKind = KernelKind::Permute;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        same_dtype(op, inputs[0])?;
        let OpParams::Permute { axes } = op.params else {
            return Err(format!("permute without axes: {:?}", op.params));
        };
        let mut seen = [false; 4];
        for &a in &axes {
            ensure(a < 4 && !seen[a], || format!("axes {axes:?} are not a permutation"))?;
            seen[a] = true;
        }
        ensure(inputs[0].shape.permuted(axes) == op.shape, || {
            format!("{} permuted by {axes:?} is not {}", inputs[0].shape, op.shape)
        })
    }
}

/// Swaps axes 0 and 1.
pub struct TransposeContract;

impl KernelContract for TransposeContract {
    const KIND: KernelKind = KernelKind::Transpose;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        same_dtype(op, inputs[0])?;
        ensure(inputs[0].shape.permuted([1, 0, 2, 3]) == op.shape, || {
            format!("{} transposed is not {}", inputs[0].shape, op.shape)
        })
    }
}

/// Window over one axis of the source.
pub struct ViewContract;

impl KernelContract for ViewContract {
    const KIND: KernelKind = KernelKind::View;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let src = inputs[0];
        same_dtype(op, src)?;
        let OpParams::View { axis, .. } = op.params else {
            return Err(format!("view without a window: {:?}", op.params));
        };
        ensure(axis < 4, || format!("view axis {axis} out of range"))?;
        ensure(op.shape.num_elements() <= src.shape.num_elements(), || {
            format!("view {} is larger than {}", op.shape, src.shape)
        })?;
        ensure(
            (0..4).all(|i| if i == axis { op.shape.dim(i) <= src.shape.dim(i) } else { op.shape.dim(i) == src.shape.dim(i) }),
            || format!("window {} does not fit {} along axis {axis}", op.shape, src.shape),
        )
    }
}

/// Packs a strided view.
pub struct ContContract;

impl KernelContract for ContContract {
    const KIND: KernelKind = KernelKind::Cont;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        same_dtype(op, inputs[0])?;
        same_elements(op, inputs[0])
    }
}

/// Writes input 0 into the storage of input 1.
pub struct CopyContract;

impl KernelContract for CopyContract {
    const KIND: KernelKind = KernelKind::Copy;

    fn check(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
        let (src, dst) = (inputs[0], inputs[1]);
        same_dtype(op, dst)?;
        ensure(src.shape == dst.shape && dst.shape == op.shape, || {
            format!("copy {} -> {} as {}", src.shape, dst.shape, op.shape)
        })
    }
}

// ── Dispatch ───────────────────────────────────────────────────────

fn run<C: KernelContract>(op: &OpDef, inputs: &[&OpDef]) -> ContractResult {
    debug_assert_eq!(C::KIND, op.kernel);
    C::check(op, inputs)
}

/// Checks `op` against the contract of its kernel.
///
/// # Errors
/// Returns [`ModelError::ContractViolation`] naming the op and kernel.
pub fn check_contract(op: &OpDef, inputs: &[&OpDef]) -> Result<(), ModelError> {
    let violation = |detail: String| ModelError::ContractViolation {
        op: op.name.to_string(),
        kernel: op.kernel.as_str(),
        detail,
    };
    if inputs.len() != op.kernel.arity() {
        return Err(violation(format!(
            "expected {} inputs, got {}",
            op.kernel.arity(),
            inputs.len()
        )));
    }
    let result = match op.kernel {
        KernelKind::None => run::<NoneContract>(op, inputs),
        KernelKind::Mul => run::<MulContract>(op, inputs),
        KernelKind::Add => run::<AddContract>(op, inputs),
        KernelKind::Sub => run::<SubContract>(op, inputs),
        KernelKind::MulMat => run::<MulMatContract>(op, inputs),
        KernelKind::GetRows => run::<GetRowsContract>(op, inputs),
        KernelKind::RmsNorm => run::<RmsNormContract>(op, inputs),
        KernelKind::Silu => run::<SiluContract>(op, inputs),
        KernelKind::Rope => run::<RopeContract>(op, inputs),
        KernelKind::Softmax => run::<SoftmaxContract>(op, inputs),
        KernelKind::Reshape => run::<ReshapeContract>(op, inputs),
        KernelKind::Permute => run::<PermuteContract>(op, inputs),
        KernelKind::Transpose => run::<TransposeContract>(op, inputs),
        KernelKind::View => run::<ViewContract>(op, inputs),
        KernelKind::Cont => run::<ContContract>(op, inputs),
        KernelKind::Copy => run::<CopyContract>(op, inputs),
    };
    result.map_err(violation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{AxisRole, LayerType, OpKind, OpRole};

    fn def(kernel: KernelKind, dtype: DType, dims: [usize; 4]) -> OpDef {
        OpDef {
            kind: OpKind::Kq,
            name: "test_op",
            layer_type: LayerType::PerBlock,
            kernel,
            role: OpRole::Activation,
            dtype,
            shape: Shape::new(dims),
            axis_roles: [AxisRole::Fixed; 4],
            inputs: vec![],
            params: OpParams::None,
            depth: 0,
        }
    }

    #[test]
    fn test_mul_mat_gqa() {
        let k = def(KernelKind::None, DType::F16, [128, 512, 8, 1]);
        let q = def(KernelKind::None, DType::F32, [128, 4, 32, 1]);
        let out = def(KernelKind::MulMat, DType::F32, [512, 4, 32, 1]);
        check_contract(&out, &[&k, &q]).unwrap();

        let bad = def(KernelKind::MulMat, DType::F32, [512, 4, 8, 1]);
        assert!(check_contract(&bad, &[&k, &q]).is_err());
    }

    #[test]
    fn test_mul_mat_rejects_inner_mismatch() {
        let w = def(KernelKind::None, DType::Q4_0, [4096, 4096, 1, 1]);
        let x = def(KernelKind::None, DType::F32, [4095, 1, 1, 1]);
        let out = def(KernelKind::MulMat, DType::F32, [4096, 1, 1, 1]);
        let err = check_contract(&out, &[&w, &x]).unwrap_err();
        assert!(matches!(err, ModelError::ContractViolation { kernel: "mul_mat", .. }));
    }

    #[test]
    fn test_mul_broadcast() {
        let x = def(KernelKind::None, DType::F32, [64, 7, 1, 1]);
        let w = def(KernelKind::None, DType::F32, [64, 1, 1, 1]);
        let out = def(KernelKind::Mul, DType::F32, [64, 7, 1, 1]);
        check_contract(&out, &[&x, &w]).unwrap();

        let w3 = def(KernelKind::None, DType::F32, [64, 3, 1, 1]);
        assert!(check_contract(&out, &[&x, &w3]).is_err());
    }

    #[test]
    fn test_sub_contract_names_its_kernel() {
        let x = def(KernelKind::None, DType::F32, [64, 7, 1, 1]);
        let y = def(KernelKind::None, DType::F32, [64, 7, 1, 1]);
        let out = def(KernelKind::Sub, DType::F32, [64, 7, 1, 1]);
        check_contract(&out, &[&x, &y]).unwrap();

        let short = def(KernelKind::None, DType::F32, [32, 7, 1, 1]);
        let err = check_contract(&out, &[&x, &short]).unwrap_err();
        assert!(matches!(err, ModelError::ContractViolation { kernel: "sub", .. }));

        let f16_out = def(KernelKind::Sub, DType::F16, [64, 7, 1, 1]);
        assert!(check_contract(&f16_out, &[&x, &y]).is_err());
    }

    #[test]
    fn test_rope_needs_matching_positions() {
        let x = def(KernelKind::None, DType::F32, [128, 32, 4, 1]);
        let pos = def(KernelKind::None, DType::I32, [4, 1, 1, 1]);
        let freqs = def(KernelKind::None, DType::F32, [64, 1, 1, 1]);
        let out = def(KernelKind::Rope, DType::F32, [128, 32, 4, 1]);
        check_contract(&out, &[&x, &pos, &freqs]).unwrap();

        let pos_f = def(KernelKind::None, DType::F32, [4, 1, 1, 1]);
        assert!(check_contract(&out, &[&x, &pos_f, &freqs]).is_err());
    }

    #[test]
    fn test_permute_shape() {
        let x = def(KernelKind::None, DType::F32, [128, 32, 4, 1]);
        let mut out = def(KernelKind::Permute, DType::F32, [128, 4, 32, 1]);
        out.params = OpParams::Permute { axes: [0, 2, 1, 3] };
        check_contract(&out, &[&x]).unwrap();
        out.params = OpParams::Permute { axes: [0, 2, 2, 3] };
        assert!(check_contract(&out, &[&x]).is_err());
    }

    #[test]
    fn test_view_window_must_fit() {
        let cache = def(KernelKind::None, DType::F16, [128, 8, 512, 1]);
        let mut view = def(KernelKind::View, DType::F16, [128, 8, 4, 1]);
        view.params = OpParams::View { axis: 2, offset: crate::op::ViewOffset::PastTokens };
        check_contract(&view, &[&cache]).unwrap();
        view.shape = Shape::new([128, 8, 513, 1]);
        assert!(check_contract(&view, &[&cache]).is_err());
    }

    #[test]
    fn test_arity_checked() {
        let x = def(KernelKind::None, DType::F32, [8, 1, 1, 1]);
        let out = def(KernelKind::Silu, DType::F32, [8, 1, 1, 1]);
        assert!(check_contract(&out, &[&x, &x]).is_err());
    }
}
