//! Cell types for the schema grid.

use serde::{Deserialize, Serialize};

/// A single cell of the schema grid.
///
/// The grid rows describe schema fields (name, type, cardinality,
/// structure), so cell content is always textual. Write attribution is
/// tracked per cell for display and audit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Current textual content.
    pub value: String,
    /// User who last wrote this cell, if any write has happened.
    pub last_writer: Option<String>,
    /// Sequence number of the history entry that last wrote this cell.
    /// Zero for cells never written in the owning session.
    pub last_op_seq: u64,
}

impl Cell {
    /// Create a cell with the given value and no write attribution.
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            last_writer: None,
            last_op_seq: 0,
        }
    }

    /// Whether the cell holds no content.
    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }
}

/// Reference to a single cell by coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for CellRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A rectangular selection of cells, inclusive on both ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellRange {
    pub start_row: usize,
    pub start_col: usize,
    pub end_row: usize,
    pub end_col: usize,
}

impl CellRange {
    pub fn new(start_row: usize, start_col: usize, end_row: usize, end_col: usize) -> Self {
        Self {
            start_row,
            start_col,
            end_row,
            end_col,
        }
    }

    /// Whether the range covers exactly one cell.
    pub fn is_single_cell(&self) -> bool {
        self.start_row == self.end_row && self.start_col == self.end_col
    }

    /// Return a copy with start/end ordered so start <= end on both axes.
    pub fn normalized(&self) -> Self {
        Self {
            start_row: self.start_row.min(self.end_row),
            start_col: self.start_col.min(self.end_col),
            end_row: self.start_row.max(self.end_row),
            end_col: self.start_col.max(self.end_col),
        }
    }

    /// Whether the (normalized) range contains the given cell.
    pub fn contains(&self, cell: CellRef) -> bool {
        let n = self.normalized();
        cell.row >= n.start_row
            && cell.row <= n.end_row
            && cell.col >= n.start_col
            && cell.col <= n.end_col
    }
}
