// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for the execution planner.

/// Errors that can occur while building or checking an execution plan.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    /// The graph has no compute ops.
    #[error("cannot plan an empty op graph")]
    EmptyGraph,

    /// Plans need at least one worker.
    #[error("invalid thread count {0}: at least one worker is required")]
    InvalidThreadCount(usize),

    /// A plan step breaks an ordering or numbering rule.
    #[error("invalid plan at step {step}: {detail}")]
    InvalidPlan { step: usize, detail: String },
}
