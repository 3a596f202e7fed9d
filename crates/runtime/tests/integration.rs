// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Integration tests: end-to-end inference pipeline.
//!
//! These tests exercise the complete flow from graph construction →
//! planning → storage mapping → weight binding → barrier-synchronised
//! execution, proving that the crates compose correctly and that the
//! type-state transitions work end-to-end.

use memory_manager::ArenaSlice;
use model_ir::{KernelProfile, ModelConfig, OpInstance, OpKind};
use runtime::{InferenceEngine, MapObserver, Ready, RuntimeConfig, RuntimeError, Slot, WeightLoader};
use std::collections::HashMap;

// ── Helpers ────────────────────────────────────────────────────

fn config(threads: usize) -> RuntimeConfig {
    RuntimeConfig {
        num_threads: Some(threads),
        batch_size: 8,
        seed: 42,
        ..Default::default()
    }
}

fn tiny_engine(config: RuntimeConfig, profile: KernelProfile) -> InferenceEngine<Ready> {
    InferenceEngine::new(config)
        .from_synthetic(ModelConfig::tiny(profile))
        .unwrap()
        .prepare()
        .unwrap()
}

fn argmax(logits: &[f32]) -> usize {
    logits
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap()
}

const PROMPT: [u32; 5] = [1, 17, 42, 99, 200];

// ── Pipeline ───────────────────────────────────────────────────

#[test]
fn test_full_pipeline_produces_finite_logits() {
    let mut engine = tiny_engine(config(2), KernelProfile::f32());
    assert!(engine.logits().is_empty());

    engine.process_input(&PROMPT).unwrap();
    assert_eq!(engine.n_past(), PROMPT.len());
    assert_eq!(engine.logits().len(), 256);
    assert!(engine.logits().iter().all(|v| v.is_finite()));
    assert!(engine.logits().iter().any(|&v| v != 0.0));

    let m = engine.metrics();
    assert_eq!(m.passes.len(), 1);
    assert_eq!(m.tokens_processed, PROMPT.len());
    assert_eq!(m.thread_count, 2);
}

#[test]
fn test_reset_state_reproduces_logits() {
    let mut engine = tiny_engine(config(2), KernelProfile::f32());
    engine.process_input(&PROMPT).unwrap();
    let first = engine.logits().to_vec();

    // Pollute the cache with a different continuation, then start over.
    engine.process_input(&[7, 8, 9]).unwrap();
    engine.reset_state();
    assert_eq!(engine.n_past(), 0);
    assert!(engine.logits().is_empty());

    engine.process_input(&PROMPT).unwrap();
    assert_eq!(engine.logits(), first.as_slice());
}

#[test]
fn test_thread_count_does_not_change_logits() {
    let mut single = tiny_engine(config(1), KernelProfile::f32());
    let mut quad = tiny_engine(config(4), KernelProfile::f32());
    single.process_input(&PROMPT).unwrap();
    quad.process_input(&PROMPT).unwrap();
    assert_eq!(single.logits(), quad.logits());

    single.process_input(&[3]).unwrap();
    quad.process_input(&[3]).unwrap();
    assert_eq!(single.logits(), quad.logits());
}

#[test]
fn test_incremental_matches_single_pass() {
    let mut batched = tiny_engine(config(2), KernelProfile::f32());
    batched.process_input(&PROMPT).unwrap();

    let mut stepped = tiny_engine(config(2), KernelProfile::f32());
    for &t in &PROMPT {
        stepped.process_input(&[t]).unwrap();
    }
    assert_eq!(stepped.n_past(), PROMPT.len());
    assert_eq!(stepped.metrics().passes.len(), PROMPT.len());

    for (a, b) in batched.logits().iter().zip(stepped.logits()) {
        assert!((a - b).abs() < 1e-3, "{a} vs {b}");
    }
    assert_eq!(argmax(batched.logits()), argmax(stepped.logits()));
}

#[test]
fn test_long_input_is_chunked_by_batch_size() {
    let cfg = RuntimeConfig {
        batch_size: 4,
        ..config(2)
    };
    let mut engine = tiny_engine(cfg, KernelProfile::f32());
    let tokens: Vec<u32> = (0..10).map(|i| i * 7 + 1).collect();
    engine.process_input(&tokens).unwrap();

    assert_eq!(engine.n_past(), 10);
    let passes: Vec<_> = engine.metrics().passes.iter().map(|p| (p.n_past, p.n_tokens)).collect();
    assert_eq!(passes, vec![(0, 4), (4, 4), (8, 2)]);
    assert!(engine.logits().iter().all(|v| v.is_finite()));
}

// ── Errors ─────────────────────────────────────────────────────

#[test]
fn test_empty_input_rejected() {
    let mut engine = tiny_engine(config(1), KernelProfile::f32());
    assert!(matches!(engine.process_input(&[]), Err(RuntimeError::EmptyInput)));
}

#[test]
fn test_invalid_token_rejected_without_side_effects() {
    let mut engine = tiny_engine(config(1), KernelProfile::f32());
    let err = engine.process_input(&[1, 256]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::InvalidToken { token: 256, vocab_size: 256 }
    ));
    assert_eq!(engine.n_past(), 0);
    assert!(engine.metrics().passes.is_empty());
}

#[test]
fn test_context_exhausted() {
    let cfg = RuntimeConfig {
        context_length: Some(16),
        ..config(2)
    };
    let mut engine = tiny_engine(cfg, KernelProfile::f32());
    assert_eq!(engine.context_length(), 16);

    let tokens: Vec<u32> = (0..12).collect();
    engine.process_input(&tokens).unwrap();
    let err = engine.process_input(&[1, 2, 3, 4, 5]).unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::ContextExhausted { n_past: 12, requested: 5, context_length: 16 }
    ));
    assert_eq!(engine.n_past(), 12);

    // Exactly filling the context is fine.
    engine.process_input(&[1, 2, 3, 4]).unwrap();
    assert_eq!(engine.n_past(), 16);

    engine.reset_state();
    engine.process_input(&tokens).unwrap();
}

#[test]
fn test_memory_budget_too_small() {
    let cfg = RuntimeConfig {
        memory_budget: Some("1K".into()),
        ..config(1)
    };
    let planned = InferenceEngine::new(cfg)
        .from_synthetic(ModelConfig::tiny(KernelProfile::f32()))
        .unwrap();
    assert!(matches!(planned.prepare(), Err(RuntimeError::MemoryError(_))));
}

#[test]
fn test_missing_model_dir() {
    let cfg = RuntimeConfig {
        model_path: "/nonexistent/model".into(),
        ..config(1)
    };
    assert!(InferenceEngine::new(cfg).load_model().is_err());
}

// ── Storage ────────────────────────────────────────────────────

#[derive(Default)]
struct Carves(HashMap<OpInstance, ArenaSlice>);

impl MapObserver for Carves {
    fn on_carve(&mut self, instance: OpInstance, slice: ArenaSlice) {
        self.0.insert(instance, slice);
    }
}

#[test]
fn test_arena_fully_covered_and_caches_per_block() {
    let planned = InferenceEngine::new(config(2))
        .from_synthetic(ModelConfig::tiny(KernelProfile::f16()))
        .unwrap();
    let required = planned.graph().total_required_bytes();

    let mut carves = Carves::default();
    let engine = planned.prepare_with_observer(&mut carves).unwrap();
    let stats = engine.arena_stats();
    assert_eq!(stats.capacity_bytes, required);
    assert_eq!(stats.carved_bytes, required);

    let mut slices: Vec<_> = carves.0.values().copied().collect();
    slices.sort_by_key(|s| s.offset);
    let mut cursor = 0;
    for s in &slices {
        assert_eq!(s.offset, cursor, "gap or overlap at {cursor}");
        cursor += s.len;
    }
    assert_eq!(cursor, required);

    for kind in [OpKind::CacheK, OpKind::CacheV] {
        let b0 = carves.0[&OpInstance { kind, block: Some(0) }];
        let b1 = carves.0[&OpInstance { kind, block: Some(1) }];
        assert_ne!(b0.offset, b1.offset);
    }
}

#[test]
fn test_cache_writes_stay_in_their_block() {
    let mut engine = tiny_engine(config(2), KernelProfile::f32());
    engine.process_input(&PROMPT).unwrap();

    let graph = engine.graph();
    let op = graph.op(OpKind::CacheK);
    let row = tensor_core::quant::byte_len(op.dtype, op.shape.dim(0) * op.shape.dim(1));
    let written = PROMPT.len() * row;

    let mut rows = Vec::new();
    for block in 0..graph.block_count() {
        let id = graph.instance_id(OpInstance { kind: OpKind::CacheK, block: Some(block) });
        let Slot::Arena(slice) = engine.storage().slot(id) else {
            panic!("cache of block {block} is not arena-backed");
        };
        let bytes = engine.storage().arena().bytes(slice);
        assert!(bytes[..written].iter().any(|&b| b != 0), "block {block} not written");
        assert!(
            bytes[written..].iter().all(|&b| b == 0),
            "block {block} written past position {}",
            PROMPT.len()
        );
        rows.push(bytes[..written].to_vec());
    }
    assert_ne!(rows[0], rows[1]);
}

#[test]
fn test_foreign_bytes_in_one_block_do_not_reach_the_next() {
    const SENTINEL: u8 = 0x5A;
    let cache_k = |block| OpInstance { kind: OpKind::CacheK, block: Some(block) };

    let mut reference = tiny_engine(config(2), KernelProfile::f32());
    reference.process_input(&PROMPT).unwrap();

    let mut engine = tiny_engine(config(2), KernelProfile::f32());
    let op = engine.graph().op(OpKind::CacheK);
    let row = tensor_core::quant::byte_len(op.dtype, op.shape.dim(0) * op.shape.dim(1));
    let written = PROMPT.len() * row;
    let id0 = engine.graph().instance_id(cache_k(0));
    let id1 = engine.graph().instance_id(cache_k(1));
    let Slot::Arena(slice0) = engine.storage().slot(id0) else {
        panic!("cache of block 0 is not arena-backed");
    };
    let ptr = engine.storage().tensor_ptr(id0).unwrap();
    // SAFETY: the pool is idle between passes and the range lies inside
    // block 0's slice.
    unsafe { std::ptr::write_bytes(ptr.add(written), SENTINEL, slice0.len - written) };

    engine.process_input(&PROMPT).unwrap();
    assert_eq!(engine.logits(), reference.logits());

    let Slot::Arena(slice1) = engine.storage().slot(id1) else {
        panic!("cache of block 1 is not arena-backed");
    };
    let Slot::Arena(ref1) = reference.storage().slot(id1) else {
        panic!("cache of block 1 is not arena-backed");
    };
    assert_eq!(
        engine.storage().arena().bytes(slice1),
        reference.storage().arena().bytes(ref1),
        "block 1 cache differs after writing into block 0"
    );

    let block0 = engine.storage().arena().bytes(slice0);
    assert!(block0[written..].iter().all(|&b| b == SENTINEL));
}

#[test]
fn test_every_weight_bound() {
    let engine = tiny_engine(config(1), KernelProfile::f32());
    let graph = engine.graph();
    let weights = graph
        .instances()
        .filter(|i| graph.op(i.kind).role == model_ir::OpRole::Weight)
        .count();
    assert_eq!(engine.weights().catalog().tensors.len(), weights);
}

// ── Weight files ───────────────────────────────────────────────

#[test]
fn test_exported_model_matches_synthetic() {
    let dir = tempfile::tempdir().unwrap();
    let mut synthetic = tiny_engine(config(2), KernelProfile::f32());
    synthetic.weights().export(dir.path()).unwrap();
    synthetic.process_input(&PROMPT).unwrap();

    let cfg = RuntimeConfig {
        model_path: dir.path().to_path_buf(),
        ..config(2)
    };
    let mut loaded = InferenceEngine::new(cfg).load_model().unwrap().prepare().unwrap();
    assert!(loaded.weights().is_file_backed());
    loaded.process_input(&PROMPT).unwrap();
    assert_eq!(loaded.logits(), synthetic.logits());
}

#[test]
fn test_profile_mismatch_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let graph = model_ir::OpGraph::build(&ModelConfig::tiny(KernelProfile::f32()))
        .unwrap()
        .validate()
        .unwrap();
    WeightLoader::synthetic(&graph, 1).unwrap().export(dir.path()).unwrap();

    let cfg = RuntimeConfig {
        model_path: dir.path().to_path_buf(),
        kernel_profile: Some("q8_0".into()),
        ..config(1)
    };
    let err = InferenceEngine::new(cfg).load_model().and_then(|p| p.prepare());
    assert!(err.is_err());
}

// ── Kernel profiles ────────────────────────────────────────────

#[test]
fn test_quantized_profiles_run() {
    for profile in [KernelProfile::f16(), KernelProfile::q8_0(), KernelProfile::q4_0()] {
        let mut engine = tiny_engine(config(3), profile);
        engine.process_input(&PROMPT).unwrap();
        assert!(
            engine.logits().iter().all(|v| v.is_finite()),
            "non-finite logits for {profile:?}"
        );
    }
}

#[test]
fn test_profiling_records_kernels() {
    let cfg = RuntimeConfig {
        enable_profiling: true,
        ..config(2)
    };
    let mut engine = tiny_engine(cfg, KernelProfile::f32());
    engine.process_input(&PROMPT).unwrap();

    let m = engine.metrics();
    assert!(!m.kernels.is_empty());
    let hottest = m.hottest_kernel().unwrap();
    assert!(hottest.calls > 0);
    assert!(m.summary().contains("tok/s"));
}

#[test]
fn test_barrier_generations_advance_per_pass() {
    let mut engine = tiny_engine(config(2), KernelProfile::f32());
    engine.process_input(&[1]).unwrap();
    engine.process_input(&[2]).unwrap();
    for pair in engine.executor().barriers() {
        assert_eq!(pair.start.generation(), 2);
        assert_eq!(pair.end.generation(), 2);
    }
}

// ── Properties ─────────────────────────────────────────────────

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn prop_logits_independent_of_thread_count(
            tokens in proptest::collection::vec(0u32..256, 1..20),
            threads in 2usize..6,
        ) {
            let mut single = tiny_engine(config(1), KernelProfile::f32());
            let mut multi = tiny_engine(config(threads), KernelProfile::f32());
            single.process_input(&tokens).unwrap();
            multi.process_input(&tokens).unwrap();
            prop_assert_eq!(single.logits(), multi.logits());
            prop_assert_eq!(multi.n_past(), tokens.len());
        }
    }
}
