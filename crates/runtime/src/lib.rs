// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # runtime
//!
//! The execution engine that drives a static LLaMA op graph on the CPU.
//!
//! The runtime takes:
//! - A validated `OpGraph` from `model-ir`.
//! - An `ExecutionPlan` from `partition-planner`.
//! - A `MemoryArena` from `memory-manager`, carved once for every
//!   activation and cache tensor.
//!
//! It binds weights zero-copy into their slots, then runs forward passes on
//! a persistent pool of workers. Each compute op sits between a start and an
//! end barrier; every worker computes a disjoint shard of its output.
//!
//! # Type-State Pipeline
//! ```text
//! InferenceEngine<Idle> → InferenceEngine<Planned> → InferenceEngine<Ready>
//! ```
//! Transitions are compile-time checked: only a `Ready` engine can process
//! tokens, and only a `Planned` engine can be prepared.

pub mod barrier;
mod config;
mod dispatch;
mod engine;
mod error;
mod executor;
mod metrics;
mod storage;
mod thread_pool;
mod weight_loader;

pub use barrier::{BarrierPair, SpinBarrier};
pub use config::RuntimeConfig;
pub use engine::{EngineState, Idle, InferenceEngine, Planned, Ready};
pub use error::RuntimeError;
pub use executor::GraphExecutor;
pub use metrics::{InferenceMetrics, KernelMetrics, PassMetrics};
pub use storage::{MapObserver, Slot, StorageMap};
pub use thread_pool::{ThreadPool, WorkerTask};
pub use weight_loader::WeightLoader;
