// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The tensor arena.
//!
//! # Design
//!
//! ```text
//! MemoryArena::new(total)         one zeroed, 64-byte aligned allocation
//!       │
//!       │  carve(label, block, len)   bump pointer, len rounded up to 64
//!       ▼
//!   ArenaSlice { offset, len }  ──►  ArenaLayout ledger
//! ```
//!
//! Slices are plain offsets, not borrows: the arena outlives every tensor
//! descriptor built from it, and the runtime hands raw pointers to worker
//! threads that synchronise on op barriers. Nothing is ever freed
//! individually; the whole allocation is released when the arena drops.

use crate::layout::{ArenaLayout, CarveRecord};
use crate::{ArenaStats, MemoryBudget, MemoryError};
use std::alloc::{self, Layout};
use std::ops::Range;
use std::ptr::NonNull;

/// Alignment of the arena base and of every carved slice.
pub const CACHE_LINE: usize = 64;

/// Rounds `bytes` up to a multiple of [`CACHE_LINE`].
pub fn round_up(bytes: usize) -> usize {
    bytes.div_ceil(CACHE_LINE) * CACHE_LINE
}

/// A carved region of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArenaSlice {
    /// Byte offset from the arena base; a multiple of [`CACHE_LINE`].
    pub offset: usize,
    /// Aligned length in bytes.
    pub len: usize,
}

impl ArenaSlice {
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// One aligned allocation carved into tensor slices.
pub struct MemoryArena {
    base: NonNull<u8>,
    layout: Layout,
    cursor: usize,
    ledger: ArenaLayout,
    budget: Option<MemoryBudget>,
}

// The arena owns its allocation outright; shared access only hands out
// raw pointers whose synchronisation is the caller's responsibility.
unsafe impl Send for MemoryArena {}
unsafe impl Sync for MemoryArena {}

impl MemoryArena {
    /// Allocates a zeroed arena of `total_bytes`.
    ///
    /// # Errors
    /// [`MemoryError::ZeroSizedAllocation`] for 0 bytes and
    /// [`MemoryError::AllocationFailed`] if the system allocator refuses.
    pub fn new(total_bytes: usize) -> Result<Self, MemoryError> {
        if total_bytes == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let layout = Layout::from_size_align(total_bytes, CACHE_LINE).map_err(|_| {
            MemoryError::AllocationFailed {
                bytes: total_bytes,
                align: CACHE_LINE,
            }
        })?;
        // SAFETY: `layout` has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let base = NonNull::new(raw).ok_or(MemoryError::AllocationFailed {
            bytes: total_bytes,
            align: CACHE_LINE,
        })?;
        tracing::info!(bytes = total_bytes, "arena allocated");
        Ok(Self {
            base,
            layout,
            cursor: 0,
            ledger: ArenaLayout::default(),
            budget: None,
        })
    }

    /// Like [`new`](Self::new), but fails with
    /// [`MemoryError::OutOfMemory`] before allocating if `total_bytes`
    /// exceeds `budget`.
    pub fn with_budget(total_bytes: usize, budget: MemoryBudget) -> Result<Self, MemoryError> {
        budget.check(total_bytes)?;
        let mut arena = Self::new(total_bytes)?;
        arena.budget = Some(budget);
        Ok(arena)
    }

    /// Carves the next `len` bytes (rounded up to [`CACHE_LINE`]).
    ///
    /// # Errors
    /// [`MemoryError::ArenaExhausted`] if the slice does not fit.
    pub fn carve(&mut self, label: &str, block: Option<usize>, len: usize) -> Result<ArenaSlice, MemoryError> {
        if len == 0 {
            return Err(MemoryError::ZeroSizedAllocation);
        }
        let aligned = round_up(len);
        let remaining = self.remaining();
        if aligned > remaining {
            return Err(MemoryError::ArenaExhausted {
                label: label.to_string(),
                requested: aligned,
                remaining,
            });
        }
        let slice = ArenaSlice {
            offset: self.cursor,
            len: aligned,
        };
        self.cursor += aligned;
        self.ledger.push(CarveRecord {
            label: label.to_string(),
            block,
            range: slice.range(),
            requested: len,
        });
        tracing::trace!(label, ?block, offset = slice.offset, len = aligned, "carved");
        Ok(slice)
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Bytes not yet carved.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.cursor
    }

    /// The budget the arena was checked against, if any.
    pub fn budget(&self) -> Option<MemoryBudget> {
        self.budget
    }

    /// The carve ledger.
    pub fn layout(&self) -> &ArenaLayout {
        &self.ledger
    }

    /// Usage snapshot.
    pub fn stats(&self) -> ArenaStats {
        ArenaStats::from_layout(self.capacity(), &self.ledger)
    }

    /// Raw pointer to the start of `slice`.
    ///
    /// # Panics
    /// If `slice` lies outside the arena.
    pub fn slice_ptr(&self, slice: ArenaSlice) -> *mut u8 {
        assert!(slice.range().end <= self.capacity(), "slice {slice:?} outside arena");
        // SAFETY: the offset is in bounds of the allocation.
        unsafe { self.base.as_ptr().add(slice.offset) }
    }

    /// Shared view of a slice's bytes.
    pub fn bytes(&self, slice: ArenaSlice) -> &[u8] {
        // SAFETY: bounds checked by `slice_ptr`; the memory is initialised
        // (zeroed at allocation).
        unsafe { std::slice::from_raw_parts(self.slice_ptr(slice), slice.len) }
    }

    /// Mutable view of a slice's bytes.
    pub fn bytes_mut(&mut self, slice: ArenaSlice) -> &mut [u8] {
        // SAFETY: as for `bytes`, and `&mut self` excludes other borrows.
        unsafe { std::slice::from_raw_parts_mut(self.slice_ptr(slice), slice.len) }
    }
}

impl Drop for MemoryArena {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with exactly this layout.
        unsafe { alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}

impl std::fmt::Debug for MemoryArena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryArena")
            .field("capacity", &self.capacity())
            .field("carved", &self.cursor)
            .field("slices", &self.ledger.len())
            .field("budget", &self.budget)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_base_is_aligned_and_zeroed() {
        let arena = MemoryArena::new(4096).unwrap();
        let all = ArenaSlice { offset: 0, len: 4096 };
        assert_eq!(arena.slice_ptr(all) as usize % CACHE_LINE, 0);
        assert!(arena.bytes(all).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_carve_rounds_to_cache_line() {
        let mut arena = MemoryArena::new(256).unwrap();
        let a = arena.carve("a", None, 10).unwrap();
        let b = arena.carve("b", Some(3), 65).unwrap();
        assert_eq!(a, ArenaSlice { offset: 0, len: 64 });
        assert_eq!(b, ArenaSlice { offset: 64, len: 128 });
        assert_eq!(arena.remaining(), 64);
        assert_eq!(arena.layout().find("b", Some(3)).unwrap().requested, 65);
        assert_eq!(arena.slice_ptr(b) as usize % CACHE_LINE, 0);
    }

    #[test]
    fn test_carve_past_end() {
        let mut arena = MemoryArena::new(128).unwrap();
        arena.carve("a", None, 100).unwrap();
        let err = arena.carve("b", None, 1).unwrap_err();
        assert!(matches!(err, MemoryError::ArenaExhausted { remaining: 0, .. }));
    }

    #[test]
    fn test_zero_sized() {
        assert!(matches!(MemoryArena::new(0), Err(MemoryError::ZeroSizedAllocation)));
        let mut arena = MemoryArena::new(64).unwrap();
        assert!(matches!(arena.carve("a", None, 0), Err(MemoryError::ZeroSizedAllocation)));
    }

    #[test]
    fn test_budget_enforced() {
        let err = MemoryArena::with_budget(2048, MemoryBudget::from_bytes(1024)).unwrap_err();
        assert!(matches!(err, MemoryError::OutOfMemory { requested_bytes: 2048, .. }));
        let arena = MemoryArena::with_budget(1024, MemoryBudget::from_bytes(1024)).unwrap();
        assert_eq!(arena.budget(), Some(MemoryBudget::from_bytes(1024)));
    }

    #[test]
    fn test_writes_stay_in_their_slice() {
        let mut arena = MemoryArena::new(128).unwrap();
        let s = arena.carve("x", None, 64).unwrap();
        let t = arena.carve("y", None, 64).unwrap();
        arena.bytes_mut(s).fill(0xAB);
        assert!(arena.bytes(s).iter().all(|&b| b == 0xAB));
        assert!(arena.bytes(t).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_stats() {
        let mut arena = MemoryArena::new(192).unwrap();
        arena.carve("a", None, 60).unwrap();
        arena.carve("b", None, 128).unwrap();
        let stats = arena.stats();
        assert_eq!(stats.capacity_bytes, 192);
        assert_eq!(stats.carved_bytes, 192);
        assert_eq!(stats.padding_bytes, 4);
        arena.layout().verify_coverage(192).unwrap();
    }

    proptest! {
        #[test]
        fn prop_carves_tile_the_arena(lens in proptest::collection::vec(1usize..300, 1..20)) {
            let total: usize = lens.iter().map(|&l| round_up(l)).sum();
            let mut arena = MemoryArena::new(total).unwrap();
            for (i, &len) in lens.iter().enumerate() {
                let s = arena.carve("t", Some(i), len).unwrap();
                prop_assert_eq!(s.offset % CACHE_LINE, 0);
                prop_assert!(s.len >= len);
            }
            prop_assert_eq!(arena.remaining(), 0);
            prop_assert!(arena.layout().verify_coverage(total).is_ok());
        }
    }
}
