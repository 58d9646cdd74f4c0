//! Schema grid data model.
//!
//! This crate holds the pure data layer of the collaborative schema
//! editor: the cell matrix, the operations that mutate it, snapshot
//! serialization, and schema-dialect validation. It has no knowledge of
//! sessions, users beyond an attribution string, or transports; the
//! `collab` crate builds the real-time engine on top of it.
//!
//! # Modules
//!
//! - `cell`: cell content, cell references, and selection ranges
//! - `op`: the closed set of grid mutations
//! - `grid`: the authoritative matrix and its apply/delta logic
//! - `snapshot`: the serialized exchange format for schema services
//! - `validate`: per-dialect content validation
//! - `error`: error types for the grid model

pub mod cell;
pub mod error;
pub mod grid;
pub mod op;
pub mod snapshot;
pub mod validate;

pub use cell::{Cell, CellRange, CellRef};
pub use error::{Axis, GridError, GridResult};
pub use grid::{Grid, GridDelta};
pub use op::{GridOp, GridOpKind};
pub use snapshot::GridSnapshot;
pub use validate::{SchemaDialect, ValidationIssue};
