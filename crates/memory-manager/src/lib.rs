// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! # memory-manager
//!
//! A single-allocation arena for every activation, input and KV-cache
//! tensor of the inference graph.
//!
//! # Key Components
//!
//! - [`MemoryArena`]: one zeroed allocation aligned to [`CACHE_LINE`],
//!   carved front to back into [`ArenaSlice`]s.
//! - [`ArenaLayout`]: the ledger of every carve, with
//!   [`verify_coverage`](ArenaLayout::verify_coverage) proving the slices
//!   are disjoint and tile the arena.
//! - [`MemoryBudget`]: an optional hard ceiling with human-readable
//!   parsing (`"512M"`, `"1G"`, etc.).
//! - [`ArenaStats`]: capacity, carved bytes and padding.
//!
//! # Example
//! ```
//! use memory_manager::{MemoryArena, MemoryBudget};
//!
//! let mut arena = MemoryArena::with_budget(4096, MemoryBudget::from_mb(1)).unwrap();
//! let q = arena.carve("qcur", Some(0), 1000).unwrap();
//! let k = arena.carve("kcur", Some(0), 1000).unwrap();
//! assert_eq!(q.len, 1024);
//! assert_eq!(k.offset, 1024);
//! ```

mod arena;
mod budget;
mod error;
pub mod layout;
mod stats;

pub use arena::{round_up, ArenaSlice, MemoryArena, CACHE_LINE};
pub use budget::MemoryBudget;
pub use error::MemoryError;
pub use layout::{ArenaLayout, CarveRecord};
pub use stats::ArenaStats;
