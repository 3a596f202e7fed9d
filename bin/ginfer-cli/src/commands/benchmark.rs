// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ginfer benchmark` command: sweep thread counts on a synthetic model.
//!
//! Each configuration processes a prompt, then a series of single-token
//! decode steps, and reports prompt and decode throughput. The logits of
//! every configuration are compared against the first one.

use model_ir::{KernelProfile, ModelConfig};
use runtime::{InferenceEngine, RuntimeConfig};
use std::time::Instant;

#[derive(Debug)]
struct BenchResult {
    threads: usize,
    barriers: usize,
    prepare_ms: f64,
    prompt_tps: f64,
    decode_tps: f64,
    hottest: String,
    logits: Vec<f32>,
}

pub fn execute(
    base: RuntimeConfig,
    threads: &str,
    profile: &str,
    prompt: usize,
    decode: usize,
) -> anyhow::Result<()> {
    super::banner("ginfer · Benchmark Suite");

    let thread_counts: Vec<usize> = super::parse_list(threads, "thread count")?;
    let kernel_profile = KernelProfile::from_name(profile)
        .ok_or_else(|| anyhow::anyhow!("unknown kernel profile '{profile}'"))?;
    let model = ModelConfig::tiny(kernel_profile);
    if prompt == 0 || prompt + decode > model.context_length {
        anyhow::bail!(
            "prompt ({prompt}) must be non-zero and prompt + decode ({}) must fit the context of {}",
            prompt + decode,
            model.context_length
        );
    }

    println!("  Model:   tiny synthetic, {profile} weights, seed {}", base.seed);
    println!("  Threads: {thread_counts:?}");
    println!("  Session: {prompt} prompt tokens + {decode} decode steps");
    println!();

    println!(
        "  {:>7} {:>9} {:>11} {:>12} {:>12}  {:<10}",
        "Threads", "Barriers", "Prepare", "Prompt t/s", "Decode t/s", "Hottest"
    );
    println!("  {}", "-".repeat(68));

    let mut results = Vec::new();
    for &n in &thread_counts {
        let config = RuntimeConfig {
            num_threads: Some(n),
            enable_profiling: true,
            ..base.clone()
        };
        match run_single(config, model.clone(), prompt, decode) {
            Ok(r) => {
                println!(
                    "  {:>7} {:>9} {:>9.2}ms {:>12.1} {:>12.1}  {:<10}",
                    r.threads, r.barriers, r.prepare_ms, r.prompt_tps, r.decode_tps, r.hottest
                );
                results.push(r);
            }
            Err(e) => println!("  {n:>7}     FAILED: {e}"),
        }
    }
    println!();

    // ── Summary ────────────────────────────────────────────────
    let Some(first) = results.first() else {
        println!("  No successful benchmark runs.");
        return Ok(());
    };
    let consistent = results.iter().all(|r| r.logits == first.logits);
    let fastest = results
        .iter()
        .max_by(|a, b| a.decode_tps.total_cmp(&b.decode_tps))
        .map_or(first.threads, |r| r.threads);

    println!("  Summary:");
    println!("   Fastest decode:   {fastest} threads");
    println!(
        "   Logits agree:     {}",
        if consistent { "yes" } else { "NO" }
    );
    println!();

    if !consistent {
        anyhow::bail!("logits differ across thread counts");
    }
    Ok(())
}

/// Runs one session and measures it.
fn run_single(
    config: RuntimeConfig,
    model: ModelConfig,
    prompt: usize,
    decode: usize,
) -> anyhow::Result<BenchResult> {
    let mut engine = InferenceEngine::new(config).from_synthetic(model)?.prepare()?;
    let vocab = engine.graph().config().vocab_size as u32;
    let prompt_tokens: Vec<u32> = (0..prompt as u32).map(|i| (i * 31 + 1) % vocab).collect();

    let started = Instant::now();
    engine.process_input(&prompt_tokens)?;
    let prompt_secs = started.elapsed().as_secs_f64();
    let logits = engine.logits().to_vec();

    let started = Instant::now();
    for i in 0..decode as u32 {
        engine.process_input(&[(i * 17 + 3) % vocab])?;
    }
    let decode_secs = started.elapsed().as_secs_f64();

    let m = engine.metrics();
    tracing::debug!("{}", m.summary());
    Ok(BenchResult {
        threads: engine.plan().thread_count,
        barriers: engine.plan().barrier_count,
        prepare_ms: m.prepare_duration.as_secs_f64() * 1000.0,
        prompt_tps: rate(prompt, prompt_secs),
        decode_tps: rate(decode, decode_secs),
        hottest: m
            .hottest_kernel()
            .map_or_else(|| "-".to_string(), |k| k.kernel.to_string()),
        logits,
    })
}

fn rate(tokens: usize, secs: f64) -> f64 {
    if secs > 0.0 {
        tokens as f64 / secs
    } else {
        0.0
    }
}
