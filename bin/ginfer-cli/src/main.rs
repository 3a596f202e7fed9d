// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # ginfer
//!
//! Command-line interface for the graph-inference-rt runtime.
//!
//! ## Usage
//! ```bash
//! # Process a token sequence and print the top logits
//! ginfer run --model ./models/llama-2-7b --tokens 1,15043,3186 --threads 4
//!
//! # Inspect the op graph of a model file or a published size
//! ginfer inspect --model ./models/llama-2-7b
//! ginfer inspect --preset 7b --generation v2 --profile q4_0
//!
//! # Compare thread counts on a tiny synthetic model
//! ginfer benchmark --threads 1,2,4
//! ```

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ginfer",
    about = "Static-graph LLaMA inference on the CPU",
    version,
    author
)]
struct Cli {
    /// Path to a TOML configuration file (CLI arguments override it).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (repeat for more: -v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the model over a token sequence and print the top logits.
    Run {
        /// Model directory (`catalog.json` + `weights.bin`, or `model.safetensors`).
        #[arg(short, long)]
        model: Option<PathBuf>,

        /// Comma-separated token ids.
        #[arg(short, long)]
        tokens: String,

        /// Worker threads (defaults to online cores).
        #[arg(short = 'j', long)]
        threads: Option<usize>,

        /// Maximum tokens per forward pass.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Arena ceiling, e.g. "512M".
        #[arg(short = 'b', long)]
        memory_budget: Option<String>,

        /// Number of top logits to print.
        #[arg(long, default_value_t = 5)]
        top: usize,

        /// Use deterministic synthetic weights for a tiny model.
        #[arg(long)]
        synthetic: bool,
    },

    /// Print the op graph, memory requirements and execution plan.
    Inspect {
        /// Model directory to read metadata from.
        #[arg(short, long, conflicts_with = "preset")]
        model: Option<PathBuf>,

        /// Published size instead of a model file (1b, 7b, 8b, 13b, 70b).
        #[arg(short, long)]
        preset: Option<String>,

        /// Generation for `--preset`: v1, v2 or v3.
        #[arg(short, long, default_value = "v2")]
        generation: String,

        /// Kernel profile: f32, f16, q8_0 or q4_0.
        #[arg(long)]
        profile: Option<String>,

        /// Threads to plan for.
        #[arg(short = 'j', long, default_value_t = 4)]
        threads: usize,

        /// List every op.
        #[arg(long)]
        ops: bool,

        /// Print the model configuration as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Compare forward-pass throughput across thread counts.
    Benchmark {
        /// Comma-separated thread counts.
        #[arg(short = 'j', long, default_value = "1,2,4")]
        threads: String,

        /// Kernel profile of the synthetic model.
        #[arg(long, default_value = "q8_0")]
        profile: String,

        /// Prompt tokens per session.
        #[arg(long, default_value_t = 8)]
        prompt: usize,

        /// Single-token decode steps per session.
        #[arg(long, default_value_t = 32)]
        decode: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    commands::init_tracing(cli.verbose);
    let base = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            model,
            tokens,
            threads,
            batch_size,
            memory_budget,
            top,
            synthetic,
        } => commands::run::execute(
            base,
            commands::run::RunArgs {
                model,
                tokens,
                threads,
                batch_size,
                memory_budget,
                top,
                synthetic,
            },
        ),
        Commands::Inspect {
            model,
            preset,
            generation,
            profile,
            threads,
            ops,
            json,
        } => commands::inspect::execute(
            base,
            commands::inspect::InspectArgs {
                model,
                preset,
                generation,
                profile,
                threads,
                ops,
                json,
            },
        ),
        Commands::Benchmark {
            threads,
            profile,
            prompt,
            decode,
        } => commands::benchmark::execute(base, &threads, &profile, prompt, decode),
    }
}
