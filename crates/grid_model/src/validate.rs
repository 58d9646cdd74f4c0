//! Schema-dialect validation of grid content.
//!
//! Each grid row describes one schema field with the conventional column
//! layout `name | type | cardinality | structure`. Validation is a pure
//! read over a [`Grid`]: a dialect tag selects extra rules on top of the
//! generic checks, and every dialect answers the same
//! `validate(&Grid) -> Vec<ValidationIssue>` contract. The collaboration
//! engine never calls this; export boundaries do.

use crate::cell::CellRef;
use crate::grid::Grid;
use regex_lite::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Column holding the field name.
pub const FIELD_NAME_COL: usize = 0;
/// Column holding the field type.
pub const FIELD_TYPE_COL: usize = 1;
/// Column holding the field cardinality.
pub const CARDINALITY_COL: usize = 2;

/// Cardinality tokens accepted in the cardinality column. Empty means
/// "unspecified" and is always accepted.
const CARDINALITY_TOKENS: &[&str] = &["1", "0..1", "0..n", "1..n", "n"];

/// Target schema dialect selecting the validation rules.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDialect {
    /// Structural checks only.
    #[default]
    Generic,
    /// Field names must be valid XML element names (NCName, no colon).
    Xml,
    /// Field names must be usable JSON member names.
    Json,
}

/// One problem found in the grid content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Cell the issue anchors to.
    pub cell: CellRef,
    pub message: String,
}

impl ValidationIssue {
    fn new(row: usize, col: usize, message: impl Into<String>) -> Self {
        Self {
            cell: CellRef::new(row, col),
            message: message.into(),
        }
    }
}

fn ncname_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").unwrap())
}

impl SchemaDialect {
    /// Validate the grid content for this dialect. Returns every issue
    /// found, in row order; an empty result means the grid is exportable.
    pub fn validate(&self, grid: &Grid) -> Vec<ValidationIssue> {
        let mut issues = generic_issues(grid);
        match self {
            SchemaDialect::Generic => {}
            SchemaDialect::Xml => issues.extend(xml_issues(grid)),
            SchemaDialect::Json => issues.extend(json_issues(grid)),
        }
        issues.sort_by_key(|issue| (issue.cell.row, issue.cell.col));
        issues
    }
}

/// Checks shared by every dialect: non-empty field names, unique field
/// names, and known cardinality tokens.
fn generic_issues(grid: &Grid) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mut first_seen: HashMap<String, usize> = HashMap::new();

    for (row_index, row) in grid.iter_rows().enumerate() {
        let name = row
            .get(FIELD_NAME_COL)
            .map(|cell| cell.value.trim())
            .unwrap_or("");
        if name.is_empty() {
            issues.push(ValidationIssue::new(
                row_index,
                FIELD_NAME_COL,
                "field name is empty",
            ));
        } else if let Some(&prior) = first_seen.get(name) {
            issues.push(ValidationIssue::new(
                row_index,
                FIELD_NAME_COL,
                format!("duplicate field name '{}' (first used in row {})", name, prior),
            ));
        } else {
            first_seen.insert(name.to_string(), row_index);
        }

        if let Some(cardinality) = row.get(CARDINALITY_COL) {
            let token = cardinality.value.trim();
            if !token.is_empty() && !CARDINALITY_TOKENS.contains(&token.to_lowercase().as_str()) {
                issues.push(ValidationIssue::new(
                    row_index,
                    CARDINALITY_COL,
                    format!("unknown cardinality '{}'", token),
                ));
            }
        }
    }
    issues
}

fn xml_issues(grid: &Grid) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (row_index, row) in grid.iter_rows().enumerate() {
        let name = row
            .get(FIELD_NAME_COL)
            .map(|cell| cell.value.trim())
            .unwrap_or("");
        if !name.is_empty() && !ncname_pattern().is_match(name) {
            issues.push(ValidationIssue::new(
                row_index,
                FIELD_NAME_COL,
                format!("'{}' is not a valid XML element name", name),
            ));
        }
    }
    issues
}

fn json_issues(grid: &Grid) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    for (row_index, row) in grid.iter_rows().enumerate() {
        let raw = row
            .get(FIELD_NAME_COL)
            .map(|cell| cell.value.as_str())
            .unwrap_or("");
        if raw != raw.trim() {
            issues.push(ValidationIssue::new(
                row_index,
                FIELD_NAME_COL,
                "JSON member name has leading or trailing whitespace",
            ));
        }
        if raw.chars().any(|c| c.is_control()) {
            issues.push(ValidationIssue::new(
                row_index,
                FIELD_NAME_COL,
                "JSON member name contains control characters",
            ));
        }
    }
    issues
}
