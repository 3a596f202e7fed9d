// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Runtime configuration loaded from TOML files or constructed programmatically.
//!
//! # TOML Format
//! ```toml
//! model_path = "./models/llama-2-7b"
//! num_threads = 4
//! batch_size = 8
//! context_length = 2048
//! max_tokens = 128
//! seed = 42
//! memory_budget = "4G"
//! kernel_profile = "q4_0"
//! spin_iterations = 2000
//! enable_profiling = true
//! ```

use memory_manager::MemoryBudget;
use model_ir::KernelProfile;
use std::path::{Path, PathBuf};

/// Configuration for the inference runtime.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding `catalog.json` + `weights.bin` or `model.safetensors`.
    pub model_path: PathBuf,
    /// Number of worker threads (defaults to number of online CPU cores).
    pub num_threads: Option<usize>,
    /// Maximum tokens per forward pass.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Context length override; the model's own value when absent.
    pub context_length: Option<usize>,
    /// Upper bound on tokens processed by the CLI `run` command.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Seed for synthetic weights.
    #[serde(default)]
    pub seed: u64,
    /// Optional ceiling on the arena (human-readable, e.g. `"512M"`).
    pub memory_budget: Option<String>,
    /// Kernel profile name (`"f32"`, `"f16"`, `"q8_0"`, `"q4_0"`); detected
    /// from the weight file when absent.
    pub kernel_profile: Option<String>,
    /// Spin iterations before a barrier waiter parks.
    #[serde(default = "default_spin")]
    pub spin_iterations: u32,
    /// Whether to record per-kernel timings.
    #[serde(default)]
    pub enable_profiling: bool,
}

fn default_batch_size() -> usize {
    8
}

fn default_max_tokens() -> usize {
    128
}

fn default_spin() -> u32 {
    2000
}

impl RuntimeConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, super::RuntimeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::RuntimeError::ConfigError(format!(
                "cannot read config '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_toml(&content)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, super::RuntimeError> {
        let config: Self = toml::from_str(toml_str).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML parse error: {e}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Serialises configuration to TOML.
    pub fn to_toml(&self) -> Result<String, super::RuntimeError> {
        toml::to_string_pretty(self).map_err(|e| {
            super::RuntimeError::ConfigError(format!("TOML serialise error: {e}"))
        })
    }

    /// Rejects values no engine can run with.
    pub fn validate(&self) -> Result<(), super::RuntimeError> {
        if self.batch_size == 0 {
            return Err(super::RuntimeError::ConfigError("batch_size must be at least 1".into()));
        }
        if self.num_threads == Some(0) {
            return Err(super::RuntimeError::ConfigError("num_threads must be at least 1".into()));
        }
        if self.context_length == Some(0) {
            return Err(super::RuntimeError::ConfigError("context_length must be at least 1".into()));
        }
        Ok(())
    }

    /// Parses the memory budget string into a [`MemoryBudget`].
    pub fn parse_budget(&self) -> Result<Option<MemoryBudget>, super::RuntimeError> {
        self.memory_budget
            .as_deref()
            .map(|s| {
                MemoryBudget::parse(s)
                    .map_err(|e| super::RuntimeError::ConfigError(format!("invalid budget: {e}")))
            })
            .transpose()
    }

    /// Resolves the number of worker threads.
    pub fn resolve_threads(&self) -> usize {
        self.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Resolves the configured kernel profile, if any.
    pub fn kernel_profile(&self) -> Result<Option<KernelProfile>, super::RuntimeError> {
        self.kernel_profile
            .as_deref()
            .map(|name| {
                KernelProfile::from_name(name).ok_or_else(|| {
                    super::RuntimeError::ConfigError(format!(
                        "unknown kernel profile '{name}'; expected 'f32', 'f16', 'q8_0' or 'q4_0'"
                    ))
                })
            })
            .transpose()
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("./models/llama"),
            num_threads: None,
            batch_size: default_batch_size(),
            context_length: None,
            max_tokens: default_max_tokens(),
            seed: 0,
            memory_budget: None,
            kernel_profile: None,
            spin_iterations: default_spin(),
            enable_profiling: false,
        }
    }
}
