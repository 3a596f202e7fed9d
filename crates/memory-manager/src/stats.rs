// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Arena statistics for profiling and diagnostics.

use crate::layout::ArenaLayout;

/// Snapshot of how the arena is used.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ArenaStats {
    /// Size of the single backing allocation.
    pub capacity_bytes: usize,
    /// Bytes handed out so far, including alignment padding.
    pub carved_bytes: usize,
    /// Number of carves.
    pub slice_count: usize,
    /// Bytes lost to 64-byte rounding.
    pub padding_bytes: usize,
    /// Largest single slice.
    pub largest_slice_bytes: usize,
}

impl ArenaStats {
    pub(crate) fn from_layout(capacity_bytes: usize, layout: &ArenaLayout) -> Self {
        let records = layout.records();
        Self {
            capacity_bytes,
            carved_bytes: records.iter().map(|r| r.range.len()).sum(),
            slice_count: records.len(),
            padding_bytes: records.iter().map(|r| r.padding()).sum(),
            largest_slice_bytes: records.iter().map(|r| r.range.len()).max().unwrap_or(0),
        }
    }

    /// Fraction of the capacity carved, in `[0.0, 1.0]`.
    ///
    /// Returns `0.0` for an empty arena.
    pub fn utilization(&self) -> f64 {
        if self.capacity_bytes == 0 {
            return 0.0;
        }
        self.carved_bytes as f64 / self.capacity_bytes as f64
    }

    /// Returns a human-readable summary.
    pub fn summary(&self) -> String {
        const MB: f64 = 1024.0 * 1024.0;
        format!(
            "Arena: {:.2} MB capacity, {:.2} MB carved in {} slices ({:.0}%), \
             {} B padding, largest slice {:.2} MB",
            self.capacity_bytes as f64 / MB,
            self.carved_bytes as f64 / MB,
            self.slice_count,
            self.utilization() * 100.0,
            self.padding_bytes,
            self.largest_slice_bytes as f64 / MB,
        )
    }
}
