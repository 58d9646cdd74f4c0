//! Real-time collaborative session engine for the schema grid.
//!
//! Multiple users edit a shared schema-definition grid inside a named
//! session, seeing each other's edits, cursors, and structural changes in
//! near real time. This crate guarantees a single consistent view across
//! independently connected clients: every mutating intent for a session
//! is ordered through one serialization point, conflicts inside the
//! write window are surfaced to the losing writer instead of silently
//! merged, and history can be reverted without diverging per-client
//! views.
//!
//! # Modules
//!
//! - `ids`: session and user identifier newtypes
//! - `permissions`: roles and the pure authorization check
//! - `operation`: client intents and the sequenced operation envelope
//! - `history`: append-only history with replay-based revert
//! - `conflict`: the write-window conflict policy
//! - `presence`: ephemeral cursors and selections
//! - `member`: membership records that survive transport loss
//! - `broadcast`: fan-out of engine events to member channels
//! - `session`: one session and everything it owns
//! - `manager`: the session registry and per-session serialization
//! - `schema`: the schema lookup boundary for session creation
//! - `error`: the typed outcome taxonomy
//!
//! # Example
//!
//! ```
//! use collab::manager::{CreateSessionOptions, ManagerConfig, SessionManager};
//! use collab::operation::Intent;
//! use collab::ids::UserId;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let manager = SessionManager::new(ManagerConfig::default());
//! let (tx, _rx) = mpsc::unbounded_channel();
//!
//! let join = manager
//!     .create_session(
//!         UserId::from("alice"),
//!         "Alice".to_string(),
//!         "orders schema".to_string(),
//!         CreateSessionOptions::default(),
//!         tx,
//!     )
//!     .await
//!     .unwrap();
//!
//! let outcome = manager
//!     .submit(
//!         &join.session_id,
//!         &UserId::from("alice"),
//!         Intent::SetCell { row: 0, col: 0, value: "id".to_string() },
//!         0,
//!     )
//!     .await
//!     .unwrap();
//! # let _ = outcome;
//! # }
//! ```

pub mod broadcast;
pub mod conflict;
pub mod error;
pub mod history;
pub mod ids;
pub mod manager;
pub mod member;
pub mod operation;
pub mod permissions;
pub mod presence;
pub mod schema;
pub mod session;

/// WebSocket transport module.
///
/// Only available when the `server` feature is enabled.
#[cfg(feature = "server")]
pub mod server;

// Re-export commonly used types
pub use broadcast::{Broadcaster, ServerMessage};
pub use conflict::{
    ConflictCandidate, ConflictChoice, ConflictRecord, ConflictResolver, ConflictStatus,
    DEFAULT_CONFLICT_WINDOW_MS,
};
pub use error::{SessionError, SessionResult};
pub use history::{HistoryEntry, HistoryKind, HistoryManager, PreImage, ReplayFault};
pub use ids::{SessionId, UserId};
pub use manager::{CreateSessionOptions, ManagerConfig, SessionManager};
pub use member::{ConnectionState, Member, MemberInfo};
pub use operation::Intent;
pub use permissions::{authorize, ActionKind, Role};
pub use presence::{Presence, PresenceTracker};
pub use schema::{InMemorySchemaStore, SchemaStore};
pub use session::{
    JoinInfo, Session, SessionConfig, SessionInfo, SessionStatus, SubmitOutcome,
};
