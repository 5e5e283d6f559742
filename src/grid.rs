//! Dense grid output and the arrow symbols carried by displaced dots.

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::indexer::GridIndex;
use crate::origin::OriginFrame;

const ABSENT: char = '.';
const CENTERED: char = 'o';

/// Direction in which a dot sits off its nominal grid intersection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Symbol {
    Up,
    Down,
    Left,
    Right,
}

impl Symbol {
    /// Classifies a sub-cell offset given as (column, row) cell units, with
    /// rows growing down the image. Offsets below `min_offset` on both axes
    /// carry no symbol.
    pub fn from_offset(offset: (f64, f64), min_offset: f64) -> Option<Self> {
        let (du, dv) = offset;
        if !(du.is_finite() && dv.is_finite()) || du.abs().max(dv.abs()) < min_offset {
            return None;
        }
        Some(if du.abs() >= dv.abs() {
            if du > 0.0 { Self::Right } else { Self::Left }
        } else if dv > 0.0 {
            Self::Down
        } else {
            Self::Up
        })
    }

    pub fn arrow(self) -> char {
        match self {
            Self::Up => '↑',
            Self::Down => '↓',
            Self::Left => '←',
            Self::Right => '→',
        }
    }

    pub fn from_arrow(ch: char) -> Option<Self> {
        match ch {
            '↑' => Some(Self::Up),
            '↓' => Some(Self::Down),
            '←' => Some(Self::Left),
            '→' => Some(Self::Right),
            _ => None,
        }
    }
}

/// Dense row-major presence matrix anchored in pixel space.
///
/// `cells`, `symbols` and `sources` all hold `rows * cols` entries. `origin`
/// is the pixel position of cell (0, 0); `col_step` and `row_step` are the
/// pixel displacements to the next column and row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    pub rows: usize,
    pub cols: usize,
    pub cells: Vec<bool>,
    pub symbols: Vec<Option<Symbol>>,
    /// Index of the observation occupying each cell.
    pub sources: Vec<Option<usize>>,
    pub origin: (f64, f64),
    pub col_step: (f64, f64),
    pub row_step: (f64, f64),
}

impl Grid {
    fn offset(&self, row: usize, col: usize) -> Option<usize> {
        (row < self.rows && col < self.cols).then(|| row * self.cols + col)
    }

    /// Presence of a dot; out-of-range cells read as absent.
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.offset(row, col).is_some_and(|i| self.cells[i])
    }

    pub fn symbol(&self, row: usize, col: usize) -> Option<Symbol> {
        self.offset(row, col).and_then(|i| self.symbols[i])
    }

    pub fn source(&self, row: usize, col: usize) -> Option<usize> {
        self.offset(row, col).and_then(|i| self.sources[i])
    }

    /// Nominal pixel position of a cell, whether or not a dot was found there.
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        let (r, c) = (row as f64, col as f64);
        (
            self.origin.0 + c * self.col_step.0 + r * self.row_step.0,
            self.origin.1 + c * self.col_step.1 + r * self.row_step.1,
        )
    }

    pub fn present_count(&self) -> usize {
        self.cells.iter().filter(|&&present| present).count()
    }

    pub fn symbol_rows(&self) -> impl Iterator<Item = &[Option<Symbol>]> {
        self.symbols.chunks(self.cols.max(1))
    }

    /// One line per row: `.` for an empty cell, `o` for a centered dot and
    /// an arrow for a displaced one.
    pub fn to_arrow_text(&self) -> String {
        self.arrow_rows()
            .iter()
            .map(|row| row.iter().collect::<String>())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn arrow_rows(&self) -> Vec<Vec<char>> {
        (0..self.rows)
            .map(|r| {
                (0..self.cols)
                    .map(|c| match (self.get(r, c), self.symbol(r, c)) {
                        (false, _) => ABSENT,
                        (true, Some(symbol)) => symbol.arrow(),
                        (true, None) => CENTERED,
                    })
                    .collect()
            })
            .collect()
    }

    /// Compact JSON array of rows, one string per cell, using the same
    /// characters as [`Grid::to_arrow_text`].
    pub fn to_arrow_json(&self) -> String {
        let mut out = String::from("[\n");
        let rows = self.arrow_rows();
        for (ri, row) in rows.iter().enumerate() {
            out.push_str("  [");
            for (ci, ch) in row.iter().enumerate() {
                if ci > 0 {
                    out.push_str(", ");
                }
                out.push('"');
                out.push(*ch);
                out.push('"');
            }
            out.push(']');
            out.push_str(if ri + 1 < rows.len() { ",\n" } else { "\n" });
        }
        out.push(']');
        out
    }
}

/// Fills the dense grid from the sparse index within `frame`.
pub fn materialize(index: &GridIndex, frame: &OriginFrame, symbol_min_offset: f64) -> Grid {
    let len = frame.rows * frame.cols;
    let mut cells = vec![false; len];
    let mut symbols = vec![None; len];
    let mut sources = vec![None; len];

    for entry in &index.entries {
        let Some((r, c)) = frame.normalize(entry.row, entry.col) else {
            continue;
        };
        let i = r * frame.cols + c;
        cells[i] = true;
        symbols[i] = Symbol::from_offset(entry.offset, symbol_min_offset);
        sources[i] = Some(entry.observation);
    }

    let lattice = &index.lattice;
    let origin = lattice.cell_center(frame.min_row as f64, frame.min_col as f64);
    let pair = |v: Vector2<f64>| (v.x, v.y);

    Grid {
        rows: frame.rows,
        cols: frame.cols,
        cells,
        symbols,
        sources,
        origin: pair(origin),
        col_step: pair(lattice.model().dx()),
        row_step: pair(lattice.model().dy()),
    }
}
