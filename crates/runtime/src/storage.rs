// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Storage mapping: where every op instance's bytes live.
//!
//! | Op | Storage |
//! |---|---|
//! | input, state, activation | one arena slice per instance |
//! | reshape, permute, transpose, view, copy | none (aliases an input) |
//! | weight | pointer into the weight backing, bound later |

use memory_manager::{ArenaSlice, MemoryArena, MemoryBudget};
use model_ir::{ModelError, OpGraph, OpInstance, OpRole, Validated};
use std::ptr::NonNull;

/// Storage of one op instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Owned slice of the arena.
    Arena(ArenaSlice),
    /// Zero-copy pointer into the weight backing.
    Weight(NonNull<u8>),
    /// Resolved from an input at run time.
    Alias,
    /// Weight slot not bound yet.
    Unbound,
}

/// Receives every carve as the storage map is built.
pub trait MapObserver {
    fn on_carve(&mut self, instance: OpInstance, slice: ArenaSlice);
}

/// Observer that ignores everything.
pub(crate) struct NoObserver;

impl MapObserver for NoObserver {
    fn on_carve(&mut self, _instance: OpInstance, _slice: ArenaSlice) {}
}

/// The arena plus one [`Slot`] per instance, indexed by instance id.
pub struct StorageMap {
    arena: MemoryArena,
    slots: Vec<Slot>,
}

// SAFETY: weight pointers refer to read-only mapped or owned memory that
// outlives the map; arena bytes are only written under the executor's
// barrier protocol or while no pass is running.
unsafe impl Send for StorageMap {}
unsafe impl Sync for StorageMap {}

impl StorageMap {
    /// Sizes one arena for the whole graph and carves every owned slot.
    ///
    /// # Errors
    /// Allocation failure or a budget smaller than the arena.
    pub fn build(graph: &OpGraph<Validated>, budget: Option<MemoryBudget>) -> Result<Self, memory_manager::MemoryError> {
        Self::build_with_observer(graph, budget, &mut NoObserver)
    }

    /// Like [`build`](Self::build), reporting each carve to `observer`.
    pub fn build_with_observer(
        graph: &OpGraph<Validated>,
        budget: Option<MemoryBudget>,
        observer: &mut dyn MapObserver,
    ) -> Result<Self, memory_manager::MemoryError> {
        let total = graph.total_required_bytes();
        let mut arena = match budget {
            Some(budget) => MemoryArena::with_budget(total, budget)?,
            None => MemoryArena::new(total)?,
        };

        let mut slots = Vec::with_capacity(graph.instance_count());
        for instance in graph.instances() {
            let op = graph.op(instance.kind);
            let slot = if op.role == OpRole::Weight {
                Slot::Unbound
            } else if op.alias_source().is_some() {
                Slot::Alias
            } else if op.is_arena_resident() {
                let slice = arena.carve(op.name, instance.block, op.total_required_bytes())?;
                observer.on_carve(instance, slice);
                Slot::Arena(slice)
            } else {
                Slot::Unbound
            };
            slots.push(slot);
        }

        tracing::info!(
            arena_mb = total as f64 / (1024.0 * 1024.0),
            slices = arena.layout().len(),
            "storage mapped"
        );
        Ok(Self { arena, slots })
    }

    /// Slot of instance `id`.
    pub fn slot(&self, id: usize) -> Slot {
        self.slots.get(id).copied().unwrap_or(Slot::Unbound)
    }

    /// Base address of instance `id`, or `None` for aliases and unbound weights.
    pub fn tensor_ptr(&self, id: usize) -> Option<*mut u8> {
        match self.slot(id) {
            Slot::Arena(slice) => Some(self.arena.slice_ptr(slice)),
            Slot::Weight(ptr) => Some(ptr.as_ptr()),
            Slot::Alias | Slot::Unbound => None,
        }
    }

    /// Points weight slot `id` at `ptr`.
    pub(crate) fn bind_weight(&mut self, id: usize, ptr: NonNull<u8>) {
        if let Some(slot) = self.slots.get_mut(id) {
            *slot = Slot::Weight(ptr);
        }
    }

    /// Checks that every weight slot of `graph` is bound.
    pub fn check_bound(&self, graph: &OpGraph<Validated>) -> Result<(), ModelError> {
        for (id, instance) in graph.instances().enumerate() {
            if graph.op(instance.kind).role == OpRole::Weight && self.slot(id) == Slot::Unbound {
                return Err(ModelError::WeightNotFound {
                    name: instance.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn arena(&self) -> &MemoryArena {
        &self.arena
    }

    /// Number of weight slots bound so far.
    pub fn bound_weights(&self) -> usize {
        self.slots.iter().filter(|s| matches!(s, Slot::Weight(_))).count()
    }
}

impl std::fmt::Debug for StorageMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageMap")
            .field("arena", &self.arena)
            .field("slots", &self.slots.len())
            .finish()
    }
}
