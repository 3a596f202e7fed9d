// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `ginfer inspect` command: display the op graph and memory requirements.
//!
//! Reads hyper-parameters from a model directory's metadata, or from a
//! published size, then prints the arena and weight footprint, the ops per
//! layer and the execution plan for the requested thread count.

use model_ir::{KernelProfile, ModelConfig, ModelGeneration, ModelSize, OpGraph, OpRole};
use partition_planner::ExecutionPlan;
use runtime::{RuntimeConfig, WeightLoader};
use std::path::PathBuf;

pub struct InspectArgs {
    pub model: Option<PathBuf>,
    pub preset: Option<String>,
    pub generation: String,
    pub profile: Option<String>,
    pub threads: usize,
    pub ops: bool,
    pub json: bool,
}

pub fn execute(base: RuntimeConfig, args: InspectArgs) -> anyhow::Result<()> {
    let profile = match args.profile.as_deref().or(base.kernel_profile.as_deref()) {
        Some(name) => Some(
            KernelProfile::from_name(name)
                .ok_or_else(|| anyhow::anyhow!("unknown kernel profile '{name}'"))?,
        ),
        None => None,
    };

    let model = match &args.preset {
        Some(size) => {
            let size = ModelSize::from_str_loose(size)
                .ok_or_else(|| anyhow::anyhow!("unknown model size '{size}'"))?;
            let generation = parse_generation(&args.generation)?;
            ModelConfig::preset(size, generation, profile.unwrap_or_default())?
        }
        None => {
            let path = args.model.unwrap_or(base.model_path);
            let weights = WeightLoader::open(&path)?;
            let profile = match profile {
                Some(p) => p,
                None => weights.catalog().kernel_profile()?,
            };
            weights.catalog().model_config(profile)?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&model)?);
        return Ok(());
    }

    super::banner("ginfer · Model Inspector");

    let model = model.with_batch_size(base.batch_size);
    let graph = OpGraph::build(&model)?.validate()?;
    let plan = ExecutionPlan::build(&graph, args.threads)?;

    // ── Summary ────────────────────────────────────────────────
    const MB: f64 = 1024.0 * 1024.0;
    println!("  {}", graph.summary());
    println!();
    println!("  Hyper-parameters:");
    println!("   Embedding:      {}", model.embedding_length);
    println!("   Feed-forward:   {}", model.feed_forward_length);
    println!(
        "   Heads:          {} ({} kv, head dim {})",
        model.head_count,
        model.head_count_kv,
        model.head_dim()
    );
    println!("   Blocks:         {}", model.block_count);
    println!("   Vocabulary:     {}", model.vocab_size);
    println!("   Context:        {}", model.context_length);
    println!("   Batch:          {}", model.batch_size);
    println!("   Rope base:      {}", model.rope.freq_base);
    println!();

    // ── Memory ─────────────────────────────────────────────────
    let cache_bytes: usize = graph
        .iter_ops()
        .filter(|op| op.role == OpRole::State)
        .map(|op| op.total_required_bytes() * graph.multiplicity(op))
        .sum();
    println!("  Memory:");
    println!("   Weights:        {:>10.2} MB", graph.weight_bytes() as f64 / MB);
    println!("   Arena:          {:>10.2} MB", graph.total_required_bytes() as f64 / MB);
    println!("    of which KV:   {:>10.2} MB", cache_bytes as f64 / MB);
    println!();

    // ── Plan ───────────────────────────────────────────────────
    println!("  {}", plan.summary());
    println!();

    if args.ops {
        println!(
            "  {:<24} {:<10} {:<11} {:<6} {:<22} {:>4}",
            "Op", "Kernel", "Role", "DType", "Shape", "x"
        );
        println!("  {}", "-".repeat(82));
        for op in graph.iter_ops() {
            println!(
                "  {:<24} {:<10} {:<11} {:<6} {:<22} {:>4}",
                op.name,
                op.kernel.as_str(),
                format!("{:?}", op.role),
                op.dtype.to_string(),
                op.shape.to_string(),
                graph.multiplicity(op),
            );
        }
        println!();
    }

    Ok(())
}

fn parse_generation(s: &str) -> anyhow::Result<ModelGeneration> {
    match s.trim().to_lowercase().as_str() {
        "v1" | "1" => Ok(ModelGeneration::V1),
        "v2" | "2" => Ok(ModelGeneration::V2),
        "v3" | "3" => Ok(ModelGeneration::V3),
        other => anyhow::bail!("unknown generation '{other}'; expected v1, v2 or v3"),
    }
}
