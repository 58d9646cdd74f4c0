//! Schema lookup at the session-creation boundary.
//!
//! Sessions can start from an existing schema definition. The converters
//! that produce those definitions live outside this workspace, so the
//! engine only sees them through the [`SchemaStore`] capability and the
//! snapshot exchange format.

use grid_model::GridSnapshot;
use std::collections::HashMap;
use std::sync::RwLock;

/// Source of schema snapshots referenced at session creation.
pub trait SchemaStore: Send + Sync {
    /// Look up a schema by id. `None` makes session creation fail with
    /// a not-found error.
    fn load(&self, schema_id: &str) -> Option<GridSnapshot>;
}

/// In-memory schema store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemorySchemaStore {
    schemas: RwLock<HashMap<String, GridSnapshot>>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a schema.
    pub fn insert(&self, schema_id: impl Into<String>, snapshot: GridSnapshot) {
        self.schemas
            .write()
            .expect("schema store lock poisoned")
            .insert(schema_id.into(), snapshot);
    }
}

impl SchemaStore for InMemorySchemaStore {
    fn load(&self, schema_id: &str) -> Option<GridSnapshot> {
        self.schemas
            .read()
            .expect("schema store lock poisoned")
            .get(schema_id)
            .cloned()
    }
}
