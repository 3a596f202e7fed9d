// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Op table of the LLaMA decoder.
//!
//! Notation (axis 0 first): `E` embedding, `H` heads, `Hkv` key/value heads,
//! `D` head dim, `F` feed-forward width, `V` vocabulary, `T` tokens per pass,
//! `C` context length.

use crate::config::ModelConfig;
use crate::op::{
    AxisRole, InputRef, KernelKind, LayerType, OpDef, OpKind, OpParams, OpRole, ViewOffset,
};
use tensor_core::Shape;

use AxisRole::{Context as Ctx, Fixed as Fix, Tokens as Tok};
use OpKind as K;

/// Axes `[0, 2, 1, 3]`: swap axes 1 and 2.
const SWAP_1_2: [usize; 4] = [0, 2, 1, 3];

/// The three ordered op lists plus one definition per [`OpKind`].
pub(crate) struct OpTable {
    /// Indexed by [`OpKind::index`].
    pub ops: Vec<OpDef>,
    pub global_inputs: Vec<OpKind>,
    pub per_block: Vec<OpKind>,
    pub global_outputs: Vec<OpKind>,
}

struct Builder {
    layer: LayerType,
    ops: Vec<OpDef>,
    order: Vec<OpKind>,
}

impl Builder {
    fn new(layer: LayerType) -> Self {
        Self {
            layer,
            ops: Vec::new(),
            order: Vec::new(),
        }
    }

    fn leaf(&mut self, kind: OpKind, role: OpRole, dtype: tensor_core::DType, shape: Shape) -> &mut OpDef {
        self.push(OpDef::new(kind, self.layer, KernelKind::None, role, dtype, shape))
    }

    fn compute(
        &mut self,
        kind: OpKind,
        kernel: KernelKind,
        dtype: tensor_core::DType,
        shape: Shape,
        inputs: impl IntoIterator<Item = InputRef>,
    ) -> &mut OpDef {
        let op = OpDef::new(kind, self.layer, kernel, OpRole::Activation, dtype, shape).with_inputs(inputs);
        self.push(op)
    }

    fn push(&mut self, op: OpDef) -> &mut OpDef {
        self.order.push(op.kind);
        self.ops.push(op);
        let last = self.ops.len() - 1;
        &mut self.ops[last]
    }
}

fn op(kind: OpKind) -> InputRef {
    InputRef::Op(kind)
}

/// Builds the op table for `config`.
pub(crate) fn build(config: &ModelConfig) -> OpTable {
    let p = config.kernel_profile;
    let (e, h, hkv, d) = (
        config.embedding_length,
        config.head_count,
        config.head_count_kv,
        config.head_dim(),
    );
    let (f, v, t, c) = (
        config.feed_forward_length,
        config.vocab_size,
        config.batch_size,
        config.context_length,
    );
    let act = p.activation;

    // ── global inputs ──
    let mut g = Builder::new(LayerType::GlobalInput);
    g.leaf(K::TokenEmbdWeight, OpRole::Weight, p.weight, Shape::matrix(e, v));
    g.leaf(K::InpTokens, OpRole::Input, p.index, Shape::vector(t)).axis_roles = [Tok, Fix, Fix, Fix];
    g.leaf(K::InpPos, OpRole::Input, p.index, Shape::vector(t)).axis_roles = [Tok, Fix, Fix, Fix];
    g.leaf(K::RopeFreqs, OpRole::Input, act, Shape::vector(d / 2));
    g.leaf(K::KqMask, OpRole::Input, act, Shape::matrix(c, t)).axis_roles = [Ctx, Tok, Fix, Fix];
    g.compute(
        K::InpEmbd,
        KernelKind::GetRows,
        act,
        Shape::matrix(e, t),
        [op(K::TokenEmbdWeight), op(K::InpTokens)],
    )
    .axis_roles = [Fix, Tok, Fix, Fix];

    // ── per block ──
    let mut b = Builder::new(LayerType::PerBlock);
    let et = [Fix, Tok, Fix, Fix];
    let dht = [Fix, Fix, Tok, Fix];
    let eps = OpParams::RmsNorm { eps: config.rms_norm_eps };
    let rope = OpParams::Rope { freq_scale: config.rope.freq_scale };
    let residual = InputRef::PreviousBlock { op: K::LOut, first: K::InpEmbd };

    b.leaf(K::AttnNormWeight, OpRole::Weight, p.norm, Shape::vector(e));
    b.leaf(K::AttnQWeight, OpRole::Weight, p.weight, Shape::matrix(e, h * d));
    b.leaf(K::AttnKWeight, OpRole::Weight, p.weight, Shape::matrix(e, hkv * d));
    b.leaf(K::AttnVWeight, OpRole::Weight, p.weight, Shape::matrix(e, hkv * d));
    b.leaf(K::AttnOutputWeight, OpRole::Weight, p.weight, Shape::matrix(h * d, e));
    b.leaf(K::FfnNormWeight, OpRole::Weight, p.norm, Shape::vector(e));
    b.leaf(K::FfnGateWeight, OpRole::Weight, p.weight, Shape::matrix(e, f));
    b.leaf(K::FfnUpWeight, OpRole::Weight, p.weight, Shape::matrix(e, f));
    b.leaf(K::FfnDownWeight, OpRole::Weight, p.weight, Shape::matrix(f, e));
    b.leaf(K::CacheK, OpRole::State, p.kv_cache, Shape::tensor3(d, hkv, c));
    b.leaf(K::CacheV, OpRole::State, p.kv_cache, Shape::tensor3(d, hkv, c));

    b.compute(K::AttnNorm, KernelKind::RmsNorm, act, Shape::matrix(e, t), [residual])
        .set_axes_and_params(et, eps);
    b.compute(
        K::AttnNormMul,
        KernelKind::Mul,
        act,
        Shape::matrix(e, t),
        [op(K::AttnNorm), op(K::AttnNormWeight)],
    )
    .axis_roles = et;

    // queries
    b.compute(K::Qcur, KernelKind::MulMat, act, Shape::matrix(h * d, t), [op(K::AttnQWeight), op(K::AttnNormMul)])
        .axis_roles = et;
    b.compute(K::QcurReshaped, KernelKind::Reshape, act, Shape::tensor3(d, h, t), [op(K::Qcur)])
        .axis_roles = dht;
    b.compute(
        K::QcurRope,
        KernelKind::Rope,
        act,
        Shape::tensor3(d, h, t),
        [op(K::QcurReshaped), op(K::InpPos), op(K::RopeFreqs)],
    )
    .set_axes_and_params(dht, rope);

    // keys
    b.compute(K::Kcur, KernelKind::MulMat, act, Shape::matrix(hkv * d, t), [op(K::AttnKWeight), op(K::AttnNormMul)])
        .axis_roles = et;
    b.compute(K::KcurReshaped, KernelKind::Reshape, act, Shape::tensor3(d, hkv, t), [op(K::Kcur)])
        .axis_roles = dht;
    b.compute(
        K::KcurRope,
        KernelKind::Rope,
        act,
        Shape::tensor3(d, hkv, t),
        [op(K::KcurReshaped), op(K::InpPos), op(K::RopeFreqs)],
    )
    .set_axes_and_params(dht, rope);

    // values
    b.compute(K::Vcur, KernelKind::MulMat, act, Shape::matrix(hkv * d, t), [op(K::AttnVWeight), op(K::AttnNormMul)])
        .axis_roles = et;
    b.compute(K::VcurReshaped, KernelKind::Reshape, act, Shape::tensor3(d, hkv, t), [op(K::Vcur)])
        .axis_roles = dht;

    // cache writes at positions [n_past, n_past + n_tokens)
    let past = OpParams::View { axis: 2, offset: ViewOffset::PastTokens };
    b.compute(K::KCacheView, KernelKind::View, p.kv_cache, Shape::tensor3(d, hkv, t), [op(K::CacheK)])
        .set_axes_and_params(dht, past);
    b.compute(
        K::KCacheStore,
        KernelKind::Copy,
        p.kv_cache,
        Shape::tensor3(d, hkv, t),
        [op(K::KcurRope), op(K::KCacheView)],
    )
    .axis_roles = dht;
    b.compute(K::VCacheView, KernelKind::View, p.kv_cache, Shape::tensor3(d, hkv, t), [op(K::CacheV)])
        .set_axes_and_params(dht, past);
    b.compute(
        K::VCacheStore,
        KernelKind::Copy,
        p.kv_cache,
        Shape::tensor3(d, hkv, t),
        [op(K::VcurReshaped), op(K::VCacheView)],
    )
    .axis_roles = dht;

    // attention scores over the filled context
    let swap = OpParams::Permute { axes: SWAP_1_2 };
    let window = OpParams::View { axis: 2, offset: ViewOffset::Start };
    b.compute(K::QPermuted, KernelKind::Permute, act, Shape::tensor3(d, t, h), [op(K::QcurRope)])
        .set_axes_and_params([Fix, Tok, Fix, Fix], swap);
    b.compute(K::KView, KernelKind::View, p.kv_cache, Shape::tensor3(d, hkv, c), [op(K::CacheK)])
        .set_axes_and_params([Fix, Fix, Ctx, Fix], window);
    b.compute(K::KPermuted, KernelKind::Permute, p.kv_cache, Shape::tensor3(d, c, hkv), [op(K::KView)])
        .set_axes_and_params([Fix, Ctx, Fix, Fix], swap);
    b.compute(K::Kq, KernelKind::MulMat, act, Shape::tensor3(c, t, h), [op(K::KPermuted), op(K::QPermuted)])
        .axis_roles = [Ctx, Tok, Fix, Fix];
    b.compute(
        K::KqSoftMax,
        KernelKind::Softmax,
        act,
        Shape::tensor3(c, t, h),
        [op(K::Kq), op(K::KqMask)],
    )
    .set_axes_and_params(
        [Ctx, Tok, Fix, Fix],
        OpParams::Softmax { scale: 1.0 / (d as f32).sqrt() },
    );

    // weighted values
    b.compute(K::VView, KernelKind::View, p.kv_cache, Shape::tensor3(d, hkv, c), [op(K::CacheV)])
        .set_axes_and_params([Fix, Fix, Ctx, Fix], window);
    b.compute(K::VPermuted, KernelKind::Permute, p.kv_cache, Shape::tensor3(d, c, hkv), [op(K::VView)])
        .set_axes_and_params([Fix, Ctx, Fix, Fix], swap);
    b.compute(K::VTransposed, KernelKind::Transpose, p.kv_cache, Shape::tensor3(c, d, hkv), [op(K::VPermuted)])
        .axis_roles = [Ctx, Fix, Fix, Fix];
    b.compute(
        K::Kqv,
        KernelKind::MulMat,
        act,
        Shape::tensor3(d, t, h),
        [op(K::VTransposed), op(K::KqSoftMax)],
    )
    .axis_roles = [Fix, Tok, Fix, Fix];
    b.compute(K::KqvMerged, KernelKind::Permute, act, Shape::tensor3(d, h, t), [op(K::Kqv)])
        .set_axes_and_params(dht, swap);
    b.compute(K::KqvMergedCont, KernelKind::Cont, act, Shape::matrix(h * d, t), [op(K::KqvMerged)])
        .axis_roles = et;
    b.compute(
        K::KqvOut,
        KernelKind::MulMat,
        act,
        Shape::matrix(e, t),
        [op(K::AttnOutputWeight), op(K::KqvMergedCont)],
    )
    .axis_roles = et;

    // feed-forward
    b.compute(K::FfnInp, KernelKind::Add, act, Shape::matrix(e, t), [op(K::KqvOut), residual])
        .axis_roles = et;
    b.compute(K::FfnNorm, KernelKind::RmsNorm, act, Shape::matrix(e, t), [op(K::FfnInp)])
        .set_axes_and_params(et, eps);
    b.compute(
        K::FfnNormMul,
        KernelKind::Mul,
        act,
        Shape::matrix(e, t),
        [op(K::FfnNorm), op(K::FfnNormWeight)],
    )
    .axis_roles = et;
    b.compute(K::FfnGate, KernelKind::MulMat, act, Shape::matrix(f, t), [op(K::FfnGateWeight), op(K::FfnNormMul)])
        .axis_roles = et;
    b.compute(K::FfnSilu, KernelKind::Silu, act, Shape::matrix(f, t), [op(K::FfnGate)])
        .axis_roles = et;
    b.compute(K::FfnUp, KernelKind::MulMat, act, Shape::matrix(f, t), [op(K::FfnUpWeight), op(K::FfnNormMul)])
        .axis_roles = et;
    b.compute(K::FfnGatePar, KernelKind::Mul, act, Shape::matrix(f, t), [op(K::FfnSilu), op(K::FfnUp)])
        .axis_roles = et;
    b.compute(K::FfnOut, KernelKind::MulMat, act, Shape::matrix(e, t), [op(K::FfnDownWeight), op(K::FfnGatePar)])
        .axis_roles = et;
    b.compute(K::LOut, KernelKind::Add, act, Shape::matrix(e, t), [op(K::FfnOut), op(K::FfnInp)])
        .axis_roles = et;

    // ── global outputs ──
    let mut o = Builder::new(LayerType::GlobalOutput);
    o.leaf(K::OutputNormWeight, OpRole::Weight, p.norm, Shape::vector(e));
    o.leaf(K::OutputWeight, OpRole::Weight, p.weight, Shape::matrix(e, v));
    o.compute(K::ResultNorm, KernelKind::RmsNorm, act, Shape::matrix(e, t), [op(K::LOut)])
        .set_axes_and_params(et, eps);
    o.compute(
        K::ResultNormMul,
        KernelKind::Mul,
        act,
        Shape::matrix(e, t),
        [op(K::ResultNorm), op(K::OutputNormWeight)],
    )
    .axis_roles = et;
    o.compute(
        K::ResultOutput,
        KernelKind::MulMat,
        act,
        Shape::matrix(v, t),
        [op(K::OutputWeight), op(K::ResultNormMul)],
    )
    .axis_roles = et;

    let mut ops: Vec<OpDef> = g.ops.into_iter().chain(b.ops).chain(o.ops).collect();
    ops.sort_by_key(|op| op.kind.index());
    OpTable {
        ops,
        global_inputs: g.order,
        per_block: b.order,
        global_outputs: o.order,
    }
}

impl OpDef {
    fn set_axes_and_params(&mut self, axis_roles: [AxisRole; 4], params: OpParams) {
        self.axis_roles = axis_roles;
        self.params = params;
    }
}
