//! Serialized grid snapshots.
//!
//! A [`GridSnapshot`] is the only representation exchanged with the schema
//! format services (XML/JSON/YAML converters live outside this workspace)
//! and the payload a joining client renders from, so it carries the full
//! cell matrix including write attribution.

use crate::cell::Cell;
use serde::{Deserialize, Serialize};

/// Full serialized content of a grid.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Row-major cell matrix.
    pub cells: Vec<Vec<Cell>>,
}

impl GridSnapshot {
    /// Build a snapshot from plain values, without write attribution.
    /// This is the ingestion form produced by schema parsers.
    pub fn from_values<R, V>(values: R) -> Self
    where
        R: IntoIterator<Item = V>,
        V: IntoIterator<Item = String>,
    {
        Self {
            cells: values
                .into_iter()
                .map(|row| row.into_iter().map(Cell::with_value).collect())
                .collect(),
        }
    }

    /// Number of rows in the snapshot.
    pub fn row_count(&self) -> usize {
        self.cells.len()
    }

    /// Width of the widest row.
    pub fn col_count(&self) -> usize {
        self.cells.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    /// Plain values, row-major, dropping attribution. This is the export
    /// form consumed by schema generators.
    pub fn values(&self) -> Vec<Vec<String>> {
        self.cells
            .iter()
            .map(|row| row.iter().map(|cell| cell.value.clone()).collect())
            .collect()
    }
}
