//! The authoritative cell matrix for one collaboration session.
//!
//! A [`Grid`] is a dense, rectangular matrix of [`Cell`]s. All mutation
//! goes through [`Grid::apply`], which is the single source of truth for
//! grid content: it validates bounds, enforces the one-row/one-column
//! structural minimum, and renumbers indices so they stay contiguous after
//! every structural edit.

use crate::cell::Cell;
use crate::error::{Axis, GridError, GridResult};
use crate::op::GridOp;
use crate::snapshot::GridSnapshot;
use serde::{Deserialize, Serialize};

/// Change produced by one applied operation, suitable for broadcasting to
/// clients as a state delta.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GridDelta {
    /// A cell's value was overwritten.
    CellSet {
        row: usize,
        col: usize,
        value: String,
        writer: String,
        seq: u64,
    },
    /// An empty row appeared at `at`; subsequent rows shifted down.
    RowInserted { at: usize },
    /// The row at `at` disappeared; subsequent rows shifted up.
    RowDeleted { at: usize },
    /// An empty column appeared at `at`; subsequent columns shifted right.
    ColInserted { at: usize },
    /// The column at `at` disappeared; subsequent columns shifted left.
    ColDeleted { at: usize },
    /// The grid was rebuilt by a history revert. Clients replace their
    /// local state with the carried snapshot instead of patching.
    Reverted {
        target_seq: u64,
        snapshot: GridSnapshot,
    },
}

/// The shared grid state of a collaboration session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    rows: Vec<Vec<Cell>>,
}

impl Grid {
    /// Create an empty grid of the given dimensions. Both dimensions are
    /// clamped to at least one, the structural minimum.
    pub fn new(rows: usize, cols: usize) -> Self {
        let rows = rows.max(1);
        let cols = cols.max(1);
        Self {
            rows: (0..rows)
                .map(|_| (0..cols).map(|_| Cell::default()).collect())
                .collect(),
        }
    }

    /// Rebuild a grid from a snapshot. Ragged snapshots are padded to the
    /// widest row; an empty snapshot yields the 1x1 minimum grid.
    pub fn from_snapshot(snapshot: &GridSnapshot) -> Self {
        if snapshot.cells.is_empty() {
            return Self::new(1, 1);
        }
        let width = snapshot
            .cells
            .iter()
            .map(|row| row.len())
            .max()
            .unwrap_or(1)
            .max(1);
        let rows = snapshot
            .cells
            .iter()
            .map(|row| {
                let mut row = row.clone();
                row.resize(width, Cell::default());
                row
            })
            .collect();
        Self { rows }
    }

    /// Serialize the full grid content. This is the exchange format for
    /// schema format services and for joining clients.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            cells: self.rows.clone(),
        }
    }

    /// Number of rows. Always at least one.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns. Always at least one.
    pub fn col_count(&self) -> usize {
        self.rows.first().map(|row| row.len()).unwrap_or(0)
    }

    /// Look up a cell by coordinates.
    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// Whether the coordinates address a cell inside current bounds.
    pub fn contains(&self, row: usize, col: usize) -> bool {
        self.cell(row, col).is_some()
    }

    /// A full row of cells.
    pub fn row(&self, index: usize) -> Option<&[Cell]> {
        self.rows.get(index).map(|r| r.as_slice())
    }

    /// A full column of cells, cloned top to bottom.
    pub fn column(&self, index: usize) -> Option<Vec<Cell>> {
        if index >= self.col_count() {
            return None;
        }
        Some(self.rows.iter().map(|row| row[index].clone()).collect())
    }

    /// Iterate rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.rows.iter().map(|r| r.as_slice())
    }

    /// Apply one operation, attributing content writes to `writer` with
    /// history sequence `seq`.
    ///
    /// Never fails for well-formed, in-bounds operations beyond the two
    /// documented conditions: out-of-range addressing and the structural
    /// minimum of one row and one column.
    pub fn apply(&mut self, op: &GridOp, writer: &str, seq: u64) -> GridResult<GridDelta> {
        match op {
            GridOp::SetCell { row, col, value } => self.set_cell(*row, *col, value, writer, seq),
            GridOp::InsertRow { at } => Ok(self.insert_row(*at)),
            GridOp::DeleteRow { at } => self.delete_row(*at),
            GridOp::InsertCol { at } => Ok(self.insert_col(*at)),
            GridOp::DeleteCol { at } => self.delete_col(*at),
        }
    }

    fn set_cell(
        &mut self,
        row: usize,
        col: usize,
        value: &str,
        writer: &str,
        seq: u64,
    ) -> GridResult<GridDelta> {
        let (rows, cols) = (self.row_count(), self.col_count());
        let cell = self
            .rows
            .get_mut(row)
            .and_then(|r| r.get_mut(col))
            .ok_or(GridError::CellOutOfRange {
                row,
                col,
                rows,
                cols,
            })?;
        cell.value = value.to_string();
        cell.last_writer = Some(writer.to_string());
        cell.last_op_seq = seq;
        Ok(GridDelta::CellSet {
            row,
            col,
            value: value.to_string(),
            writer: writer.to_string(),
            seq,
        })
    }

    fn insert_row(&mut self, at: usize) -> GridDelta {
        let at = at.min(self.row_count());
        let cols = self.col_count();
        self.rows
            .insert(at, (0..cols).map(|_| Cell::default()).collect());
        GridDelta::RowInserted { at }
    }

    fn delete_row(&mut self, at: usize) -> GridResult<GridDelta> {
        if at >= self.row_count() {
            return Err(GridError::RowOutOfRange {
                index: at,
                rows: self.row_count(),
            });
        }
        if self.row_count() == 1 {
            return Err(GridError::StructuralLimit(Axis::Row));
        }
        self.rows.remove(at);
        Ok(GridDelta::RowDeleted { at })
    }

    fn insert_col(&mut self, at: usize) -> GridDelta {
        let at = at.min(self.col_count());
        for row in &mut self.rows {
            row.insert(at, Cell::default());
        }
        GridDelta::ColInserted { at }
    }

    fn delete_col(&mut self, at: usize) -> GridResult<GridDelta> {
        if at >= self.col_count() {
            return Err(GridError::ColOutOfRange {
                index: at,
                cols: self.col_count(),
            });
        }
        if self.col_count() == 1 {
            return Err(GridError::StructuralLimit(Axis::Column));
        }
        for row in &mut self.rows {
            row.remove(at);
        }
        Ok(GridDelta::ColDeleted { at })
    }

    /// Verify structural invariants: at least one row and column, and every
    /// row the same width. A failure here means the grid can no longer be
    /// trusted and the owning session must shut down.
    pub fn check_invariants(&self) -> GridResult<()> {
        if self.rows.is_empty() {
            return Err(GridError::InvariantViolation("no rows".to_string()));
        }
        let width = self.rows[0].len();
        if width == 0 {
            return Err(GridError::InvariantViolation("no columns".to_string()));
        }
        for (i, row) in self.rows.iter().enumerate() {
            if row.len() != width {
                return Err(GridError::InvariantViolation(format!(
                    "row {} has width {} but row 0 has width {}",
                    i,
                    row.len(),
                    width
                )));
            }
        }
        Ok(())
    }
}

impl Default for Grid {
    fn default() -> Self {
        Self::new(1, 1)
    }
}
