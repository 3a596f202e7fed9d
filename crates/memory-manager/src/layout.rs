// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Carve ledger.
//!
//! Every slice handed out by the arena is recorded so that tests and
//! diagnostics can prove the slices are pairwise disjoint and tile the
//! arena exactly.

use crate::MemoryError;
use std::ops::Range;

/// One carved slice.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CarveRecord {
    /// Tensor name the slice was carved for.
    pub label: String,
    /// Block index for per-block tensors.
    pub block: Option<usize>,
    /// Byte range inside the arena (aligned length).
    pub range: Range<usize>,
    /// Bytes the caller asked for before alignment.
    pub requested: usize,
}

impl CarveRecord {
    /// Alignment padding at the end of the slice.
    pub fn padding(&self) -> usize {
        self.range.len() - self.requested
    }
}

/// Ordered ledger of carves.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ArenaLayout {
    records: Vec<CarveRecord>,
}

impl ArenaLayout {
    pub(crate) fn push(&mut self, record: CarveRecord) {
        self.records.push(record);
    }

    /// All carves in carve order.
    pub fn records(&self) -> &[CarveRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Finds the carve for `label` in `block`.
    pub fn find(&self, label: &str, block: Option<usize>) -> Option<&CarveRecord> {
        self.records.iter().find(|r| r.label == label && r.block == block)
    }

    /// Checks that the carves are pairwise disjoint and cover `[0, total)`
    /// with no gaps.
    pub fn verify_coverage(&self, total: usize) -> Result<(), MemoryError> {
        let mut sorted: Vec<&CarveRecord> = self.records.iter().collect();
        sorted.sort_by_key(|r| r.range.start);

        let mut cursor = 0;
        for r in sorted {
            if r.range.start < cursor {
                return Err(MemoryError::LayoutViolation(format!(
                    "'{}' {:?} overlaps the previous slice ending at {cursor}",
                    r.label, r.range
                )));
            }
            if r.range.start > cursor {
                return Err(MemoryError::LayoutViolation(format!(
                    "gap {cursor}..{} before '{}'",
                    r.range.start, r.label
                )));
            }
            cursor = r.range.end;
        }
        if cursor != total {
            return Err(MemoryError::LayoutViolation(format!(
                "slices cover {cursor} of {total} bytes"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(label: &str, range: Range<usize>) -> CarveRecord {
        CarveRecord {
            label: label.into(),
            block: None,
            requested: range.len(),
            range,
        }
    }

    #[test]
    fn test_exact_cover() {
        let mut l = ArenaLayout::default();
        l.push(record("b", 64..192));
        l.push(record("a", 0..64));
        l.verify_coverage(192).unwrap();
        assert_eq!(l.find("b", None).map(|r| r.range.clone()), Some(64..192));
    }

    #[test]
    fn test_overlap_detected() {
        let mut l = ArenaLayout::default();
        l.push(record("a", 0..128));
        l.push(record("b", 64..192));
        assert!(matches!(l.verify_coverage(192), Err(MemoryError::LayoutViolation(_))));
    }

    #[test]
    fn test_gap_detected() {
        let mut l = ArenaLayout::default();
        l.push(record("a", 0..64));
        l.push(record("b", 128..192));
        assert!(l.verify_coverage(192).is_err());
    }

    #[test]
    fn test_short_cover_detected() {
        let mut l = ArenaLayout::default();
        l.push(record("a", 0..64));
        assert!(l.verify_coverage(128).is_err());
    }
}
