//! Error types for the collaboration engine.
//!
//! Every variant here is returned as a typed outcome to the calling
//! boundary, never thrown across the session-serialization path, so one
//! user's invalid request cannot stall processing for the rest of the
//! session. Note that a detected conflict is *not* an error: it is the
//! [`SubmitOutcome::ConflictPending`](crate::session::SubmitOutcome)
//! variant.

use crate::ids::{SessionId, UserId};
use crate::permissions::{ActionKind, Role};
use grid_model::GridError;
use thiserror::Error;

/// Result type alias for collaboration operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors that can occur during session operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No session registered under this id.
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    /// A schema referenced at session creation does not exist.
    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    /// The session has been closed and accepts no further requests.
    #[error("session {0} is closed")]
    SessionClosed(SessionId),

    /// The configured member cap would be exceeded.
    #[error("session is full (max {0} members)")]
    SessionFull(usize),

    /// The process-wide session cap would be exceeded.
    #[error("session limit reached (max {0} sessions)")]
    SessionLimitReached(usize),

    /// The user is not a member of the session.
    #[error("user {0} is not a member of this session")]
    NotAMember(UserId),

    /// A management action reserved for the owner.
    #[error("only the session owner may {0}")]
    Forbidden(ActionKind),

    /// A grid mutation denied to the member's role. Carries both sides
    /// so the client can render an exact explanation.
    #[error("the {role} role does not permit the request to {action}")]
    PermissionDenied { action: ActionKind, role: Role },

    /// Cell addressing or structural-minimum failure from the grid.
    #[error(transparent)]
    Grid(#[from] GridError),

    /// No pending conflict at the cell involves the calling user.
    #[error("no pending conflict at ({row}, {col}) involves this user")]
    ConflictUnresolvable { row: usize, col: usize },

    /// The revert target is not on the active history timeline.
    #[error("history entry {0} is not on the active timeline")]
    RevertTargetNotFound(u64),

    /// An internal invariant was violated. The session has been closed
    /// and all members notified; nothing can be salvaged in-process.
    #[error("session fault: {0}")]
    SessionFault(String),
}

impl SessionError {
    /// Stable machine-readable code for transports and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionNotFound(_) => "not_found",
            SessionError::SchemaNotFound(_) => "not_found",
            SessionError::SessionClosed(_) => "session_closed",
            SessionError::SessionFull(_) => "session_full",
            SessionError::SessionLimitReached(_) => "session_limit_reached",
            SessionError::NotAMember(_) => "not_found",
            SessionError::Forbidden(_) => "forbidden",
            SessionError::PermissionDenied { .. } => "permission_denied",
            SessionError::Grid(err) if err.is_out_of_range() => "out_of_range",
            SessionError::Grid(GridError::StructuralLimit(_)) => "structural_limit",
            SessionError::Grid(_) => "session_fault",
            SessionError::ConflictUnresolvable { .. } => "conflict_unresolvable",
            SessionError::RevertTargetNotFound(_) => "not_found",
            SessionError::SessionFault(_) => "session_fault",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_model::Axis;

    #[test]
    fn test_grid_error_conversion() {
        let err: SessionError = GridError::StructuralLimit(Axis::Row).into();
        assert_eq!(err.code(), "structural_limit");
        assert_eq!(err.to_string(), "the grid must keep at least one row");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            SessionError::SessionNotFound(SessionId::from("s")).code(),
            "not_found"
        );
        assert_eq!(
            SessionError::PermissionDenied {
                action: ActionKind::SetCell,
                role: Role::ReadOnly
            }
            .code(),
            "permission_denied"
        );
        assert_eq!(
            SessionError::Grid(GridError::CellOutOfRange {
                row: 9,
                col: 0,
                rows: 1,
                cols: 1
            })
            .code(),
            "out_of_range"
        );
    }
}
