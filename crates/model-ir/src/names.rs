// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Tensor-name resolution for GGUF and HuggingFace checkpoints.

use crate::op::OpKind;

/// Global tensors: (GGUF name, HF name, kind).
const GLOBAL_NAMES: &[(&str, &str, OpKind)] = &[
    ("token_embd.weight", "model.embed_tokens.weight", OpKind::TokenEmbdWeight),
    ("output_norm.weight", "model.norm.weight", OpKind::OutputNormWeight),
    ("output.weight", "lm_head.weight", OpKind::OutputWeight),
];

/// Per-block tensor suffixes: (GGUF suffix, HF suffix, kind).
const BLOCK_NAMES: &[(&str, &str, OpKind)] = &[
    ("attn_norm.weight", "input_layernorm.weight", OpKind::AttnNormWeight),
    ("attn_q.weight", "self_attn.q_proj.weight", OpKind::AttnQWeight),
    ("attn_k.weight", "self_attn.k_proj.weight", OpKind::AttnKWeight),
    ("attn_v.weight", "self_attn.v_proj.weight", OpKind::AttnVWeight),
    ("attn_output.weight", "self_attn.o_proj.weight", OpKind::AttnOutputWeight),
    ("ffn_norm.weight", "post_attention_layernorm.weight", OpKind::FfnNormWeight),
    ("ffn_gate.weight", "mlp.gate_proj.weight", OpKind::FfnGateWeight),
    ("ffn_up.weight", "mlp.up_proj.weight", OpKind::FfnUpWeight),
    ("ffn_down.weight", "mlp.down_proj.weight", OpKind::FfnDownWeight),
];

/// Maps a checkpoint tensor name to its op kind and block.
///
/// Accepts GGUF names (`blk.3.attn_q.weight`) and HuggingFace names
/// (`model.layers.3.self_attn.q_proj.weight`). Returns `None` for tensors
/// the graph does not use (rotary caches, biases, ...).
pub fn resolve_tensor_name(name: &str) -> Option<(OpKind, Option<usize>)> {
    if let Some(&(_, _, kind)) = GLOBAL_NAMES.iter().find(|(g, h, _)| *g == name || *h == name) {
        return Some((kind, None));
    }
    let (block, suffix, gguf) = if let Some(rest) = name.strip_prefix("blk.") {
        let (n, suffix) = rest.split_once('.')?;
        (n, suffix, true)
    } else {
        let rest = name.strip_prefix("model.layers.")?;
        let (n, suffix) = rest.split_once('.')?;
        (n, suffix, false)
    };
    let block: usize = block.parse().ok()?;
    BLOCK_NAMES
        .iter()
        .find(|(g, h, _)| if gguf { *g == suffix } else { *h == suffix })
        .map(|&(_, _, kind)| (kind, Some(block)))
}

/// GGUF name of a weight tensor, or `None` for non-weight kinds.
pub fn gguf_name(kind: OpKind, block: Option<usize>) -> Option<String> {
    if let Some((g, _, _)) = GLOBAL_NAMES.iter().find(|(_, _, k)| *k == kind) {
        return Some((*g).to_string());
    }
    let (suffix, _, _) = BLOCK_NAMES.iter().find(|(_, _, k)| *k == kind)?;
    block.map(|b| format!("blk.{b}.{suffix}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gguf_names() {
        assert_eq!(resolve_tensor_name("token_embd.weight"), Some((OpKind::TokenEmbdWeight, None)));
        assert_eq!(resolve_tensor_name("blk.12.attn_q.weight"), Some((OpKind::AttnQWeight, Some(12))));
        assert_eq!(resolve_tensor_name("blk.0.ffn_down.weight"), Some((OpKind::FfnDownWeight, Some(0))));
        assert_eq!(resolve_tensor_name("output.weight"), Some((OpKind::OutputWeight, None)));
    }

    #[test]
    fn test_hf_names() {
        assert_eq!(
            resolve_tensor_name("model.layers.7.self_attn.o_proj.weight"),
            Some((OpKind::AttnOutputWeight, Some(7)))
        );
        assert_eq!(
            resolve_tensor_name("model.layers.0.post_attention_layernorm.weight"),
            Some((OpKind::FfnNormWeight, Some(0)))
        );
        assert_eq!(resolve_tensor_name("lm_head.weight"), Some((OpKind::OutputWeight, None)));
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(resolve_tensor_name("rope_freqs.weight"), None);
        assert_eq!(resolve_tensor_name("blk.x.attn_q.weight"), None);
        assert_eq!(resolve_tensor_name("blk.3.attn_q.bias"), None);
        assert_eq!(resolve_tensor_name("model.layers.3.attn_q.weight"), None);
    }

    #[test]
    fn test_gguf_name_round_trip() {
        for &(_, _, kind) in BLOCK_NAMES {
            let name = gguf_name(kind, Some(4)).unwrap();
            assert_eq!(resolve_tensor_name(&name), Some((kind, Some(4))));
        }
        assert_eq!(gguf_name(OpKind::Kq, Some(0)), None);
        assert_eq!(gguf_name(OpKind::AttnQWeight, None), None);
    }
}
