// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Op definitions for the static inference graph.
//!
//! Every logical tensor of the model (weights, inputs, the KV cache, and
//! every intermediate activation) is one [`OpDef`]. An op carries the
//! static maximum shape of its tensor, the kernel that produces it, and
//! the ops it reads. Weight data is **not** stored here: weights are bound
//! to the mapped model file by the runtime.

use tensor_core::{DType, Shape, MAX_DIMS};

// ── OpKind ─────────────────────────────────────────────────────────

macro_rules! op_kinds {
    ($($variant:ident => $name:literal),+ $(,)?) => {
        /// Closed enumeration of every logical tensor in the LLaMA graph.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum OpKind {
            $($variant),+
        }

        impl OpKind {
            /// All kinds in declaration order.
            pub const ALL: &'static [OpKind] = &[$(OpKind::$variant),+];

            /// Canonical tensor name.
            pub fn name(self) -> &'static str {
                match self {
                    $(OpKind::$variant => $name),+
                }
            }

            /// Parses a canonical name back into a kind.
            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(OpKind::$variant),)+
                    _ => None,
                }
            }
        }
    };
}

op_kinds! {
    // global inputs
    TokenEmbdWeight => "token_embd_weight",
    InpTokens => "inp_tokens",
    InpPos => "inp_pos",
    RopeFreqs => "rope_freqs",
    KqMask => "kq_mask",
    InpEmbd => "inp_embd",
    // per-block weights and state
    AttnNormWeight => "attn_norm_weight",
    AttnQWeight => "attn_q_weight",
    AttnKWeight => "attn_k_weight",
    AttnVWeight => "attn_v_weight",
    AttnOutputWeight => "attn_output_weight",
    FfnNormWeight => "ffn_norm_weight",
    FfnGateWeight => "ffn_gate_weight",
    FfnUpWeight => "ffn_up_weight",
    FfnDownWeight => "ffn_down_weight",
    CacheK => "cache_k",
    CacheV => "cache_v",
    // per-block compute
    AttnNorm => "attn_norm",
    AttnNormMul => "attn_norm_mul",
    Qcur => "qcur",
    QcurReshaped => "qcur_reshaped",
    QcurRope => "qcur_rope",
    Kcur => "kcur",
    KcurReshaped => "kcur_reshaped",
    KcurRope => "kcur_rope",
    Vcur => "vcur",
    VcurReshaped => "vcur_reshaped",
    KCacheView => "k_cache_view",
    KCacheStore => "k_cache_store",
    VCacheView => "v_cache_view",
    VCacheStore => "v_cache_store",
    QPermuted => "q_permuted",
    KView => "k_view",
    KPermuted => "k_permuted",
    Kq => "kq",
    KqSoftMax => "kq_soft_max",
    VView => "v_view",
    VPermuted => "v_permuted",
    VTransposed => "v_transposed",
    Kqv => "kqv",
    KqvMerged => "kqv_merged",
    KqvMergedCont => "kqv_merged_cont",
    KqvOut => "kqv_out",
    FfnInp => "ffn_inp",
    FfnNorm => "ffn_norm",
    FfnNormMul => "ffn_norm_mul",
    FfnGate => "ffn_gate",
    FfnSilu => "ffn_silu",
    FfnUp => "ffn_up",
    FfnGatePar => "ffn_gate_par",
    FfnOut => "ffn_out",
    LOut => "l_out",
    // global outputs
    OutputNormWeight => "output_norm_weight",
    OutputWeight => "output_weight",
    ResultNorm => "result_norm",
    ResultNormMul => "result_norm_mul",
    ResultOutput => "result_output",
}

impl OpKind {
    /// Position in [`OpKind::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Number of kinds.
    pub const COUNT: usize = OpKind::ResultOutput as usize + 1;
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// ── Classification enums ───────────────────────────────────────────

/// Where in the model an op lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerType {
    /// Not placed in any list.
    None,
    /// Instantiated once, before the first block.
    GlobalInput,
    /// Instantiated once per transformer block.
    PerBlock,
    /// Instantiated once, after the last block.
    GlobalOutput,
}

/// The computation that produces an op's tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    /// Leaf: weight, input or state tensor.
    None,
    GetRows,
    RmsNorm,
    Mul,
    MulMat,
    Reshape,
    Permute,
    Transpose,
    View,
    Cont,
    Copy,
    Rope,
    Softmax,
    Silu,
    Add,
    Sub,
}

impl KernelKind {
    /// Number of inputs the kernel reads.
    pub fn arity(self) -> usize {
        match self {
            KernelKind::None => 0,
            KernelKind::RmsNorm
            | KernelKind::Reshape
            | KernelKind::Permute
            | KernelKind::Transpose
            | KernelKind::View
            | KernelKind::Cont
            | KernelKind::Silu => 1,
            KernelKind::GetRows
            | KernelKind::Mul
            | KernelKind::MulMat
            | KernelKind::Copy
            | KernelKind::Softmax
            | KernelKind::Add
            | KernelKind::Sub => 2,
            KernelKind::Rope => 3,
        }
    }

    /// Returns `true` if the kernel performs compute and therefore needs a
    /// barrier pair. Reshape, permute, transpose and view only rewrite a
    /// descriptor.
    pub fn is_blocking(self) -> bool {
        !matches!(
            self,
            KernelKind::None
                | KernelKind::Reshape
                | KernelKind::Permute
                | KernelKind::Transpose
                | KernelKind::View
        )
    }

    /// Index of the input whose storage the output aliases, if any.
    pub fn alias_source(self) -> Option<usize> {
        match self {
            KernelKind::Reshape | KernelKind::Permute | KernelKind::Transpose | KernelKind::View => {
                Some(0)
            }
            KernelKind::Copy => Some(1),
            _ => None,
        }
    }

    /// Lowercase label.
    pub fn as_str(self) -> &'static str {
        match self {
            KernelKind::None => "none",
            KernelKind::GetRows => "get_rows",
            KernelKind::RmsNorm => "rms_norm",
            KernelKind::Mul => "mul",
            KernelKind::MulMat => "mul_mat",
            KernelKind::Reshape => "reshape",
            KernelKind::Permute => "permute",
            KernelKind::Transpose => "transpose",
            KernelKind::View => "view",
            KernelKind::Cont => "cont",
            KernelKind::Copy => "copy",
            KernelKind::Rope => "rope",
            KernelKind::Softmax => "softmax",
            KernelKind::Silu => "silu",
            KernelKind::Add => "add",
            KernelKind::Sub => "sub",
        }
    }
}

impl std::fmt::Display for KernelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an op's storage comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpRole {
    /// Bound zero-copy to the model file.
    Weight,
    /// Filled by the engine before each pass (tokens, positions, mask).
    Input,
    /// Persists across passes (KV cache).
    State,
    /// Produced by a kernel during the pass.
    Activation,
}

/// How an axis extent behaves at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisRole {
    /// Always the static extent.
    Fixed,
    /// Number of tokens in the current pass.
    Tokens,
    /// Filled context length: `n_past + n_tokens`.
    Context,
}

/// A reference from a consumer op to one of its inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputRef {
    /// The op of this kind in the same block (or the global op). A
    /// per-block kind referenced from a global op resolves to the last
    /// block.
    Op(OpKind),
    /// Block 0 reads the global `first`; block `k` reads `op` of block `k - 1`.
    PreviousBlock { op: OpKind, first: OpKind },
}

/// Where a view window starts along its axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewOffset {
    /// Element 0.
    Start,
    /// Element `n_past` (the first free cache slot).
    PastTokens,
}

/// Kernel parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpParams {
    None,
    RmsNorm { eps: f32 },
    Rope { freq_scale: f32 },
    Softmax { scale: f32 },
    Permute { axes: [usize; MAX_DIMS] },
    View { axis: usize, offset: ViewOffset },
}

// ── OpDef ──────────────────────────────────────────────────────────

/// Static description of one logical tensor.
#[derive(Debug, Clone)]
pub struct OpDef {
    /// Which logical tensor this is.
    pub kind: OpKind,
    /// Canonical name, e.g. `"attn_q_weight"`.
    pub name: &'static str,
    /// Placement in the graph.
    pub layer_type: LayerType,
    /// Producing kernel.
    pub kernel: KernelKind,
    /// Storage class.
    pub role: OpRole,
    /// Element type of the output.
    pub dtype: DType,
    /// Static maximum dims.
    pub shape: Shape,
    /// Runtime behaviour of each axis.
    pub axis_roles: [AxisRole; MAX_DIMS],
    /// Inputs in kernel argument order.
    pub inputs: Vec<InputRef>,
    /// Kernel parameters.
    pub params: OpParams,
    /// Longest path from a leaf; filled in by validation.
    pub depth: usize,
}

impl OpDef {
    /// Creates an op with no inputs, fixed axes and no parameters.
    pub fn new(
        kind: OpKind,
        layer_type: LayerType,
        kernel: KernelKind,
        role: OpRole,
        dtype: DType,
        shape: Shape,
    ) -> Self {
        Self {
            kind,
            name: kind.name(),
            layer_type,
            kernel,
            role,
            dtype,
            shape,
            axis_roles: [AxisRole::Fixed; MAX_DIMS],
            inputs: Vec::new(),
            params: OpParams::None,
            depth: 0,
        }
    }

    pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = InputRef>) -> Self {
        self.inputs = inputs.into_iter().collect();
        self
    }

    pub fn with_axis_roles(mut self, axis_roles: [AxisRole; MAX_DIMS]) -> Self {
        self.axis_roles = axis_roles;
        self
    }

    pub fn with_params(mut self, params: OpParams) -> Self {
        self.params = params;
        self
    }

    /// Byte strides of the op's static layout.
    pub fn strides(&self) -> [usize; MAX_DIMS] {
        self.shape.strides(self.dtype)
    }

    /// Bytes of storage this op owns; 0 for ops that alias an input.
    pub fn total_required_bytes(&self) -> usize {
        if self.kernel.alias_source().is_some() {
            0
        } else {
            self.shape.byte_size(self.dtype)
        }
    }

    /// Returns `true` if the kernel performs compute.
    pub fn is_blocking(&self) -> bool {
        self.kernel.is_blocking()
    }

    /// Index of the input whose storage this op aliases.
    pub fn alias_source(&self) -> Option<usize> {
        self.kernel.alias_source()
    }

    /// Returns `true` if the op's storage lives in the memory arena.
    pub fn is_arena_resident(&self) -> bool {
        self.role != OpRole::Weight && self.total_required_bytes() > 0
    }

    /// Shape for a pass over `n_tokens` new tokens with `n_kv` filled
    /// context positions.
    pub fn active_shape(&self, n_tokens: usize, n_kv: usize) -> Shape {
        let mut dims = self.shape.dims();
        for (d, role) in dims.iter_mut().zip(self.axis_roles) {
            match role {
                AxisRole::Fixed => {}
                AxisRole::Tokens => *d = n_tokens,
                AxisRole::Context => *d = n_kv,
            }
        }
        Shape::new(dims)
    }

    /// One-line description for logs and `inspect` output.
    pub fn summary(&self) -> String {
        format!(
            "{:<20} {:<9} {:<5} {:<22} inputs={}",
            self.name,
            self.kernel,
            self.dtype,
            self.shape.to_string(),
            self.inputs.len(),
        )
    }
}

/// Uniform read access to op properties.
pub trait OpTraits {
    /// Element type of the op's output.
    fn output_dtype(&self) -> DType;
    /// Static dims of the op's output.
    fn dims(&self) -> Shape;
    /// Producing kernel.
    fn kernel_kind(&self) -> KernelKind;
    /// Inputs in kernel argument order.
    fn input_ids(&self) -> &[InputRef];
}

impl OpTraits for OpDef {
    fn output_dtype(&self) -> DType {
        self.dtype
    }

    fn dims(&self) -> Shape {
        self.shape
    }

    fn kernel_kind(&self) -> KernelKind {
        self.kernel
    }

    fn input_ids(&self) -> &[InputRef] {
        &self.inputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: OpKind, shape: Shape) -> OpDef {
        OpDef::new(kind, LayerType::PerBlock, KernelKind::None, OpRole::State, DType::F16, shape)
    }

    #[test]
    fn test_names_round_trip() {
        assert_eq!(OpKind::ALL.len(), OpKind::COUNT);
        for (i, &k) in OpKind::ALL.iter().enumerate() {
            assert_eq!(k.index(), i);
            assert_eq!(OpKind::from_name(k.name()), Some(k));
        }
        assert_eq!(OpKind::KqSoftMax.name(), "kq_soft_max");
    }

    #[test]
    fn test_aliasing_ops_need_no_storage() {
        let mut op = leaf(OpKind::KView, Shape::tensor3(128, 32, 64));
        assert_eq!(op.total_required_bytes(), 128 * 32 * 64 * 2);
        for k in [
            KernelKind::Reshape,
            KernelKind::Permute,
            KernelKind::Transpose,
            KernelKind::View,
            KernelKind::Copy,
        ] {
            op.kernel = k;
            assert_eq!(op.total_required_bytes(), 0, "{k}");
        }
        op.kernel = KernelKind::Copy;
        assert_eq!(op.alias_source(), Some(1));
        assert!(op.is_blocking());
        op.kernel = KernelKind::View;
        assert!(!op.is_blocking());
    }

    #[test]
    fn test_active_shape() {
        let mut op = leaf(OpKind::Kq, Shape::tensor3(512, 8, 32));
        op.axis_roles = [AxisRole::Context, AxisRole::Tokens, AxisRole::Fixed, AxisRole::Fixed];
        assert_eq!(op.active_shape(3, 10), Shape::tensor3(10, 3, 32));
    }

    #[test]
    fn test_arity() {
        assert_eq!(KernelKind::Rope.arity(), 3);
        assert_eq!(KernelKind::Copy.arity(), 2);
        assert_eq!(KernelKind::None.arity(), 0);
    }
}
