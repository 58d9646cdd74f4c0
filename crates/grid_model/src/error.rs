//! Error types for the grid model.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for grid operations.
pub type GridResult<T> = Result<T, GridError>;

/// Grid axis, used in structural error reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Row,
    Column,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Row => write!(f, "row"),
            Axis::Column => write!(f, "column"),
        }
    }
}

/// Errors produced when applying operations to a grid.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GridError {
    /// Cell address outside the current grid bounds.
    #[error("cell ({row}, {col}) is outside the current {rows}x{cols} grid")]
    CellOutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    /// Row index outside the current bounds.
    #[error("row {index} is outside the current grid ({rows} rows)")]
    RowOutOfRange { index: usize, rows: usize },

    /// Column index outside the current bounds.
    #[error("column {index} is outside the current grid ({cols} columns)")]
    ColOutOfRange { index: usize, cols: usize },

    /// The operation would remove the last remaining row or column.
    #[error("the grid must keep at least one {0}")]
    StructuralLimit(Axis),

    /// A consistency check failed. The owning session must treat this as
    /// fatal and close rather than continue on corrupted state.
    #[error("grid invariant violated: {0}")]
    InvariantViolation(String),
}

impl GridError {
    /// Whether this error is an out-of-range addressing failure.
    pub fn is_out_of_range(&self) -> bool {
        matches!(
            self,
            GridError::CellOutOfRange { .. }
                | GridError::RowOutOfRange { .. }
                | GridError::ColOutOfRange { .. }
        )
    }
}
