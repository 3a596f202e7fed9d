// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Row gather (embedding lookup).

use super::{read_index, store_row, RowBuf};
use crate::{TensorError, TensorRef};
use std::ops::Range;

/// `dst[:, i] = table[:, idx[i]]`, decoding the table's storage dtype.
///
/// # Errors
/// Returns [`TensorError::IndexOutOfBounds`] for an index outside the
/// table.
///
/// # Safety
/// See the [module-level contract](crate::ops).
pub unsafe fn get_rows(
    dst: &TensorRef,
    table: &TensorRef,
    idx: &TensorRef,
    rows: Range<usize>,
) -> Result<(), TensorError> {
    let n = dst.ne()[0];
    let table_rows = table.ne()[1];
    let mut buf = RowBuf::new(n);
    for row in rows {
        let (i1, i2, i3) = dst.row_coords(row);
        let id = read_index(idx, i1);
        if id < 0 || id as usize >= table_rows {
            return Err(TensorError::IndexOutOfBounds {
                index: id,
                len: table_rows,
            });
        }
        let src = buf.load(table, id as usize, 0, 0)?;
        store_row(dst, i1, i2, i3, src)?;
    }
    Ok(())
}
