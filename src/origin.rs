use serde::{Deserialize, Serialize};

use crate::error::GridError;
use crate::indexer::GridIndex;

/// Translation that moves the minimum occupied cell to (0, 0), plus the
/// resulting dense extents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginFrame {
    pub min_row: i64,
    pub min_col: i64,
    pub rows: usize,
    pub cols: usize,
}

impl OriginFrame {
    /// Zero-based (row, col) of a lattice address, if it lies inside the frame.
    pub fn normalize(&self, row: i64, col: i64) -> Option<(usize, usize)> {
        let r = usize::try_from(i128::from(row) - i128::from(self.min_row)).ok()?;
        let c = usize::try_from(i128::from(col) - i128::from(self.min_col)).ok()?;
        (r < self.rows && c < self.cols).then_some((r, c))
    }
}

/// Bounding rectangle of the occupied cells.
///
/// Fails with `GridTooLarge` when either extent exceeds `max_extent`, which
/// only happens when the spacing estimate has collapsed.
pub fn resolve_origin(index: &GridIndex, max_extent: usize) -> Result<OriginFrame, GridError> {
    let mut cells = index.entries.iter().map(|e| (e.row, e.col));
    let Some((row, col)) = cells.next() else {
        return Err(GridError::InsufficientObservations { found: 0 });
    };

    let (mut min_row, mut max_row, mut min_col, mut max_col) = (row, row, col, col);
    for (row, col) in cells {
        min_row = min_row.min(row);
        max_row = max_row.max(row);
        min_col = min_col.min(col);
        max_col = max_col.max(col);
    }

    let span = |min: i64, max: i64| {
        u64::try_from(i128::from(max) - i128::from(min) + 1).unwrap_or(u64::MAX)
    };
    let (rows, cols) = (span(min_row, max_row), span(min_col, max_col));
    let limit = max_extent as u64;
    if rows > limit || cols > limit {
        return Err(GridError::GridTooLarge {
            rows,
            cols,
            max_extent,
        });
    }

    log::debug!("origin at cell ({min_row}, {min_col}), extent {rows}x{cols}");
    Ok(OriginFrame {
        min_row,
        min_col,
        rows: rows as usize,
        cols: cols as usize,
    })
}
