//! Client intents.
//!
//! An [`Intent`] is the closed tagged union a transport decodes client
//! requests into, exactly once, at the boundary; anything that does not
//! parse into one of these variants is rejected there and never reaches
//! the core. When a session accepts a mutation it assigns the sequence
//! number and stamps the envelope fields onto the resulting
//! [`HistoryEntry`](crate::history::HistoryEntry).

use crate::permissions::ActionKind;
use grid_model::GridOp;
use serde::{Deserialize, Serialize};

/// A mutating client request, decoded at the transport boundary.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Intent {
    /// Overwrite one cell's value.
    SetCell {
        row: usize,
        col: usize,
        value: String,
    },
    /// Insert an empty row at `at` (clamped to append).
    InsertRow { at: usize },
    /// Delete the row at `at`.
    DeleteRow { at: usize },
    /// Insert an empty column at `at` (clamped to append).
    InsertCol { at: usize },
    /// Delete the column at `at`.
    DeleteCol { at: usize },
    /// Rewind the active history to entry `seq`.
    Revert { seq: u64 },
}

impl Intent {
    /// The permission-relevant action this intent performs.
    pub fn action(&self) -> ActionKind {
        match self {
            Intent::SetCell { .. } => ActionKind::SetCell,
            Intent::InsertRow { .. } => ActionKind::InsertRow,
            Intent::DeleteRow { .. } => ActionKind::DeleteRow,
            Intent::InsertCol { .. } => ActionKind::InsertCol,
            Intent::DeleteCol { .. } => ActionKind::DeleteCol,
            Intent::Revert { .. } => ActionKind::Revert,
        }
    }

    /// The grid operation this intent maps to; `None` for reverts, which
    /// the history manager handles instead of the grid.
    pub fn to_grid_op(&self) -> Option<GridOp> {
        match self {
            Intent::SetCell { row, col, value } => Some(GridOp::SetCell {
                row: *row,
                col: *col,
                value: value.clone(),
            }),
            Intent::InsertRow { at } => Some(GridOp::InsertRow { at: *at }),
            Intent::DeleteRow { at } => Some(GridOp::DeleteRow { at: *at }),
            Intent::InsertCol { at } => Some(GridOp::InsertCol { at: *at }),
            Intent::DeleteCol { at } => Some(GridOp::DeleteCol { at: *at }),
            Intent::Revert { .. } => None,
        }
    }
}
