// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ginfer run` command: process a token sequence.
//!
//! Demonstrates the full type-state pipeline:
//! ```text
//! InferenceEngine<Idle> → load_model → <Planned> → prepare → <Ready> → process_input
//! ```
//!
//! Sampling is out of scope; the command prints the highest logits of the
//! last token.

use model_ir::{KernelProfile, ModelConfig};
use runtime::{InferenceEngine, RuntimeConfig};
use std::path::PathBuf;

pub struct RunArgs {
    pub model: Option<PathBuf>,
    pub tokens: String,
    pub threads: Option<usize>,
    pub batch_size: Option<usize>,
    pub memory_budget: Option<String>,
    pub top: usize,
    pub synthetic: bool,
}

pub fn execute(base: RuntimeConfig, args: RunArgs) -> anyhow::Result<()> {
    super::banner("ginfer · Inference Runner");

    let tokens: Vec<u32> = super::parse_list(&args.tokens, "token")?;
    if tokens.len() > base.max_tokens {
        anyhow::bail!("{} tokens given, max_tokens is {}", tokens.len(), base.max_tokens);
    }

    // ── Configuration ──────────────────────────────────────────
    let config = RuntimeConfig {
        model_path: args.model.unwrap_or(base.model_path),
        num_threads: args.threads.or(base.num_threads),
        batch_size: args.batch_size.unwrap_or(base.batch_size),
        memory_budget: args.memory_budget.or(base.memory_budget),
        ..base
    };
    config.validate()?;

    println!("  Config:");
    if args.synthetic {
        println!("   Model:    <synthetic tiny, seed {}>", config.seed);
    } else {
        println!("   Model:    {}", config.model_path.display());
    }
    println!("   Threads:  {}", config.resolve_threads());
    println!("   Batch:    {}", config.batch_size);
    println!("   Tokens:   {}", tokens.len());
    println!();

    // ── Type-State Pipeline ────────────────────────────────────
    println!("  [1/3] Building graph and execution plan...");
    let engine = InferenceEngine::new(config);
    let planned = if args.synthetic {
        let profile = engine.config().kernel_profile()?.unwrap_or_else(KernelProfile::f32);
        engine.from_synthetic(ModelConfig::tiny(profile))?
    } else {
        engine.load_model()?
    };
    println!("        {}", planned.graph().summary());
    println!("        {}", planned.plan().summary());
    println!();

    println!("  [2/3] Mapping storage, binding weights, spawning workers...");
    let mut ready = planned.prepare()?;
    println!("        {}", ready.arena_stats().summary());
    println!();

    println!("  [3/3] Processing {} tokens...", tokens.len());
    ready.process_input(&tokens)?;
    println!();

    // ── Results ────────────────────────────────────────────────
    let mut ranked: Vec<(usize, f32)> = ready.logits().iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));

    println!("  Top {} logits of the last token:", args.top.min(ranked.len()));
    for (token, logit) in ranked.iter().take(args.top) {
        println!("   {token:>8}  {logit:>12.5}");
    }
    println!();
    println!("  Metrics:");
    println!("   {}", ready.metrics().summary());
    println!();

    Ok(())
}
