//! Grid mutation operations.

use crate::cell::CellRef;
use serde::{Deserialize, Serialize};

/// A single mutation of the schema grid.
///
/// Structural variants renumber subsequent indices so that row/column
/// indices stay contiguous from zero after every application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GridOp {
    /// Overwrite the value of one cell.
    SetCell {
        row: usize,
        col: usize,
        value: String,
    },
    /// Insert an empty row, shifting subsequent rows down. An index past
    /// the current row count appends.
    InsertRow { at: usize },
    /// Delete a row, shifting subsequent rows up.
    DeleteRow { at: usize },
    /// Insert an empty column, shifting subsequent columns right. An index
    /// past the current column count appends.
    InsertCol { at: usize },
    /// Delete a column, shifting subsequent columns left.
    DeleteCol { at: usize },
}

impl GridOp {
    /// The discriminant-only view of this operation.
    pub fn kind(&self) -> GridOpKind {
        match self {
            GridOp::SetCell { .. } => GridOpKind::SetCell,
            GridOp::InsertRow { .. } => GridOpKind::InsertRow,
            GridOp::DeleteRow { .. } => GridOpKind::DeleteRow,
            GridOp::InsertCol { .. } => GridOpKind::InsertCol,
            GridOp::DeleteCol { .. } => GridOpKind::DeleteCol,
        }
    }

    /// Whether this operation changes the grid shape.
    pub fn is_structural(&self) -> bool {
        !matches!(self, GridOp::SetCell { .. })
    }

    /// The cell targeted by a content write, if any.
    pub fn target_cell(&self) -> Option<CellRef> {
        match self {
            GridOp::SetCell { row, col, .. } => Some(CellRef::new(*row, *col)),
            _ => None,
        }
    }
}

/// Discriminant of a [`GridOp`], used in permission checks, error
/// reporting, and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridOpKind {
    SetCell,
    InsertRow,
    DeleteRow,
    InsertCol,
    DeleteCol,
}

impl std::fmt::Display for GridOpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GridOpKind::SetCell => "set_cell",
            GridOpKind::InsertRow => "insert_row",
            GridOpKind::DeleteRow => "delete_row",
            GridOpKind::InsertCol => "insert_col",
            GridOpKind::DeleteCol => "delete_col",
        };
        write!(f, "{}", name)
    }
}
