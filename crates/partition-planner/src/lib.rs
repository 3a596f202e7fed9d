// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # partition-planner
//!
//! Turns a validated [`OpGraph`](model_ir::OpGraph) into the flat
//! [`ExecutionPlan`] every worker thread walks, and decides how each
//! kernel's work is split between workers.
//!
//! # Strategies
//!
//! | Strategy | Work unit | Used by |
//! |---|---|---|
//! | [`RowSplit`] | one row (axes 1..3) | element-wise, norm, rope, softmax, copies |
//! | [`ElementSplit`] | one output element | `mul_mat` |
//!
//! # Trait-Based Extensibility
//!
//! Both implement [`PartitionStrategy`], so a new split only needs a new
//! `work_units`:
//!
//! ```ignore
//! #[derive(Debug)]
//! struct HeadSplit;
//! impl PartitionStrategy for HeadSplit {
//!     fn name(&self) -> &'static str { "head-split" }
//!     fn work_units(&self, ne: [usize; 4]) -> usize { ne[2] }
//! }
//! ```
//!
//! # Example
//! ```
//! use model_ir::{KernelProfile, ModelConfig, OpGraph};
//! use partition_planner::ExecutionPlan;
//!
//! let graph = OpGraph::build(&ModelConfig::tiny(KernelProfile::f32()))
//!     .unwrap()
//!     .validate()
//!     .unwrap();
//! let plan = ExecutionPlan::build(&graph, 4).unwrap();
//! println!("{}", plan.summary());
//! ```

mod error;
pub(crate) mod plan;
pub mod strategy;

pub use error::PlannerError;
pub use plan::{ExecutionPlan, PlanStats, PlanStep};
pub use strategy::{strategy_for, work_tensor, ElementSplit, PartitionStrategy, RowSplit, WorkTensor};
