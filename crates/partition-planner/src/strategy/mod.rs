// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! The [`PartitionStrategy`] trait and the two work splits.
//!
//! Every blocking op is executed by all workers at once. A strategy turns
//! the extents of the op's work tensor into a number of independent work
//! units and hands each worker a contiguous `[start, end)` range of them.
//! The union of all shards is the full range and shards never overlap, so
//! each output element is written by exactly one worker.

use model_ir::KernelKind;
use std::fmt;
use std::ops::Range;
use tensor_core::ops::split_range;
use tensor_core::MAX_DIMS;

/// Splits an op's work across `nth` workers.
///
/// Strategies are purely arithmetic, with no I/O or shared state, so one
/// static instance serves every worker.
pub trait PartitionStrategy: fmt::Debug + Send + Sync {
    /// Human-readable name of this strategy.
    fn name(&self) -> &'static str;

    /// Number of independent work units for a work tensor spanning `ne`.
    fn work_units(&self, ne: [usize; MAX_DIMS]) -> usize;

    /// The units worker `ith` of `nth` processes.
    fn shard(&self, ne: [usize; MAX_DIMS], ith: usize, nth: usize) -> Range<usize> {
        split_range(self.work_units(ne), ith, nth)
    }
}

/// One unit per row: the product of axes 1..3.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowSplit;

impl PartitionStrategy for RowSplit {
    fn name(&self) -> &'static str {
        "row-split"
    }

    fn work_units(&self, ne: [usize; MAX_DIMS]) -> usize {
        ne[1] * ne[2] * ne[3]
    }
}

/// One unit per output element, axis 0 varying fastest.
///
/// Used by `mul_mat`. For a weight product, axis 0 walks the weight rows,
/// so contiguous shards still stream disjoint slices of the weights; for
/// attention scores with a single cached position, the heads on axis 2
/// are spread across the workers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElementSplit;

impl PartitionStrategy for ElementSplit {
    fn name(&self) -> &'static str {
        "element-split"
    }

    fn work_units(&self, ne: [usize; MAX_DIMS]) -> usize {
        ne.iter().product()
    }
}

static ROW_SPLIT: RowSplit = RowSplit;
static ELEMENT_SPLIT: ElementSplit = ElementSplit;

/// Which tensor a kernel's work range indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkTensor {
    /// The op's own output.
    Output,
    /// Input 0: copy and cont walk the rows of their source.
    Source,
}

/// The strategy used for `kernel`.
pub fn strategy_for(kernel: KernelKind) -> &'static dyn PartitionStrategy {
    match kernel {
        KernelKind::MulMat => &ELEMENT_SPLIT,
        _ => &ROW_SPLIT,
    }
}

/// The tensor whose extents `kernel`'s work range is measured against.
pub fn work_tensor(kernel: KernelKind) -> WorkTensor {
    match kernel {
        KernelKind::Copy | KernelKind::Cont => WorkTensor::Source,
        _ => WorkTensor::Output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strategy_selection() {
        assert_eq!(strategy_for(KernelKind::MulMat).name(), "element-split");
        assert_eq!(strategy_for(KernelKind::RmsNorm).name(), "row-split");
        assert_eq!(strategy_for(KernelKind::Softmax).name(), "row-split");
        assert_eq!(work_tensor(KernelKind::Cont), WorkTensor::Source);
        assert_eq!(work_tensor(KernelKind::Add), WorkTensor::Output);
    }

    #[test]
    fn test_row_split_counts_outer_axes() {
        assert_eq!(RowSplit.work_units([16, 3, 4, 2]), 24);
        assert_eq!(ElementSplit.work_units([16, 3, 4, 2]), 384);
    }

    #[test]
    fn test_mul_mat_split_covers_heads_at_decode() {
        // First decode step: one cached position, 32 heads.
        let ne = [1, 1, 32, 1];
        let strategy = strategy_for(KernelKind::MulMat);
        for ith in 0..4 {
            let r = strategy.shard(ne, ith, 4);
            assert_eq!(r.len(), 8, "worker {ith} got {r:?}");
        }
    }

    #[test]
    fn test_more_threads_than_rows() {
        let ne = [8, 2, 1, 1];
        let shards: Vec<_> = (0..4).map(|i| RowSplit.shard(ne, i, 4)).collect();
        assert_eq!(shards, vec![0..1, 1..2, 2..2, 2..2]);
    }

    proptest! {
        #[test]
        fn prop_shards_tile_the_work(
            d0 in 1usize..300,
            d1 in 1usize..40,
            d2 in 1usize..8,
            nth in 1usize..17,
        ) {
            let ne = [d0, d1, d2, 1];
            for strategy in [strategy_for(KernelKind::MulMat), strategy_for(KernelKind::Mul)] {
                let total = strategy.work_units(ne);
                let mut cursor = 0;
                for ith in 0..nth {
                    let r = strategy.shard(ne, ith, nth);
                    prop_assert_eq!(r.start, cursor);
                    prop_assert!(r.end >= r.start);
                    cursor = r.end;
                }
                prop_assert_eq!(cursor, total);
            }
        }
    }
}
