// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Inference profiling metrics.
//!
//! [`InferenceMetrics`] collects per-pass and per-kernel timing plus
//! throughput. Kernel timings are only filled when profiling is enabled in
//! the [`RuntimeConfig`](crate::RuntimeConfig).

use model_ir::KernelKind;
use std::time::Duration;

/// One forward pass over a chunk of tokens.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PassMetrics {
    /// Tokens processed by the pass.
    pub n_tokens: usize,
    /// Context position the pass started at.
    pub n_past: usize,
    /// Wall-clock time from releasing the workers until they all finished.
    pub duration: Duration,
}

/// Accumulated wall time of one kernel across all its ops.
#[derive(Debug, Clone, serde::Serialize)]
pub struct KernelMetrics {
    pub kernel: KernelKind,
    /// Number of op executions.
    pub calls: u64,
    /// Time between the op's start and end barriers, summed.
    pub total: Duration,
}

/// Aggregate metrics for an inference session.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InferenceMetrics {
    /// Time spent mapping storage, binding weights and spawning workers.
    pub prepare_duration: Duration,
    /// Sum of all pass durations.
    pub total_compute_duration: Duration,
    /// Per-pass metrics.
    pub passes: Vec<PassMetrics>,
    /// Per-kernel totals, in first-seen order.
    pub kernels: Vec<KernelMetrics>,
    /// Bytes of the activation/state arena.
    pub arena_bytes: usize,
    /// Number of worker threads.
    pub thread_count: usize,
    /// Number of tokens processed.
    pub tokens_processed: usize,
}

impl InferenceMetrics {
    /// Creates an empty metrics container.
    pub fn new(thread_count: usize, arena_bytes: usize) -> Self {
        Self {
            prepare_duration: Duration::ZERO,
            total_compute_duration: Duration::ZERO,
            passes: Vec::new(),
            kernels: Vec::new(),
            arena_bytes,
            thread_count,
            tokens_processed: 0,
        }
    }

    /// Records one finished pass.
    pub fn record_pass(&mut self, n_past: usize, n_tokens: usize, duration: Duration) {
        self.total_compute_duration += duration;
        self.tokens_processed += n_tokens;
        self.passes.push(PassMetrics {
            n_tokens,
            n_past,
            duration,
        });
    }

    /// Adds `calls` executions of `kernel` taking `total`.
    pub fn record_kernel(&mut self, kernel: KernelKind, calls: u64, total: Duration) {
        match self.kernels.iter_mut().find(|k| k.kernel == kernel) {
            Some(k) => {
                k.calls += calls;
                k.total += total;
            }
            None => self.kernels.push(KernelMetrics { kernel, calls, total }),
        }
    }

    /// Drops pass and kernel records, keeping the setup figures.
    pub fn clear(&mut self) {
        self.total_compute_duration = Duration::ZERO;
        self.tokens_processed = 0;
        self.passes.clear();
        self.kernels.clear();
    }

    /// Returns tokens per second throughput.
    pub fn tokens_per_second(&self) -> f64 {
        let secs = self.total_compute_duration.as_secs_f64();
        if secs <= 0.0 || self.tokens_processed == 0 {
            return 0.0;
        }
        self.tokens_processed as f64 / secs
    }

    /// Kernel with the largest accumulated time.
    pub fn hottest_kernel(&self) -> Option<&KernelMetrics> {
        self.kernels.iter().max_by_key(|k| k.total)
    }

    /// Returns a human-readable summary suitable for CLI output.
    pub fn summary(&self) -> String {
        let arena_mb = self.arena_bytes as f64 / (1024.0 * 1024.0);
        let mut s = format!(
            "Inference: {:.2}ms prepare, {:.2}ms compute, {} passes, {} tokens ({:.1} tok/s), \
             {} threads, arena {:.2} MB",
            self.prepare_duration.as_secs_f64() * 1000.0,
            self.total_compute_duration.as_secs_f64() * 1000.0,
            self.passes.len(),
            self.tokens_processed,
            self.tokens_per_second(),
            self.thread_count,
            arena_mb,
        );
        if let Some(hot) = self.hottest_kernel() {
            s.push_str(&format!(
                ", hottest kernel {} ({:.2}ms over {} calls)",
                hot.kernel,
                hot.total.as_secs_f64() * 1000.0,
                hot.calls
            ));
        }
        s
    }
}
