// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for memory management.

/// Errors that can occur while creating or carving the arena.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// The arena would exceed the memory budget.
    #[error("out of memory: requested {requested_bytes} bytes, but only {available_bytes} available (budget: {budget_bytes})")]
    OutOfMemory {
        requested_bytes: usize,
        available_bytes: usize,
        budget_bytes: usize,
    },

    /// The system allocator refused the arena.
    #[error("failed to allocate {bytes} bytes aligned to {align}")]
    AllocationFailed { bytes: usize, align: usize },

    /// A carve does not fit in the remaining arena space.
    #[error("arena exhausted carving '{label}': requested {requested} bytes, {remaining} remaining")]
    ArenaExhausted {
        label: String,
        requested: usize,
        remaining: usize,
    },

    /// Attempted to allocate or carve zero bytes.
    #[error("cannot allocate zero-sized buffer")]
    ZeroSizedAllocation,

    /// A budget string could not be parsed.
    #[error("invalid budget string: '{0}', expected a number followed by an optional suffix (K, M, G)")]
    InvalidBudget(String),

    /// The carve ledger does not tile the arena exactly.
    #[error("arena layout violation: {0}")]
    LayoutViolation(String),
}
