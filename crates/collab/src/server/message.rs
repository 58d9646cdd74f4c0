//! Wire protocol for the WebSocket transport.
//!
//! Messages are JSON with an internally tagged `type` field, camelCase
//! keys, matching the browser client. Every client request is decoded
//! exactly once, here at the boundary, into the closed envelope union;
//! anything else is rejected with an error response and never reaches
//! the engine.

use crate::broadcast::ServerMessage;
use crate::conflict::ConflictChoice;
use crate::ids::UserId;
use crate::operation::Intent;
use crate::permissions::Role;
use crate::session::JoinInfo;
use serde::{Deserialize, Serialize};

/// Messages from client to server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ClientEnvelope {
    /// Must be the first message on a fresh socket.
    Hello {
        user_id: String,
        display_name: String,
    },
    /// Create a session and join it as owner.
    CreateSession {
        name: String,
        #[serde(default)]
        rows: Option<usize>,
        #[serde(default)]
        cols: Option<usize>,
        /// Start from a stored schema instead of an empty grid.
        #[serde(default)]
        schema: Option<String>,
    },
    /// Join an existing session.
    Join {
        session_id: String,
        requested_role: Role,
    },
    /// Leave a session, dropping membership.
    Leave { session_id: String },
    /// Submit a mutating intent.
    Submit {
        session_id: String,
        intent: Intent,
        client_timestamp_ms: u64,
    },
    /// Move the cursor.
    Cursor {
        session_id: String,
        #[serde(default)]
        cursor: Option<grid_model::CellRef>,
    },
    /// Replace the selection.
    Selection {
        session_id: String,
        #[serde(default)]
        selection: Option<grid_model::CellRange>,
    },
    /// Answer a conflict prompt.
    ResolveConflict {
        session_id: String,
        row: usize,
        col: usize,
        choice: ConflictChoice,
    },
    /// Change a member's role (owner only).
    SetRole {
        session_id: String,
        target: String,
        role: Role,
    },
    /// Remove a member (owner only).
    Kick { session_id: String, target: String },
    /// Close a session (owner only).
    CloseSession { session_id: String },
    /// Keepalive.
    Ping { timestamp: u64 },
}

/// Messages from server to client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerEnvelope {
    /// Response to `Hello`.
    Welcome { user_id: String },
    /// Response to `CreateSession` and `Join`.
    Joined { join: JoinInfo },
    /// Response to an applied `Submit`.
    Accepted { session_id: String, seq: u64 },
    /// Generic success response for requests with no payload.
    Ok,
    /// Keepalive response.
    Pong { timestamp: u64 },
    /// A pushed engine event (deltas, presence, conflicts, membership).
    Event(ServerMessage),
    /// A request failed; `code` matches the engine error taxonomy.
    Error { code: String, message: String },
}

impl ServerEnvelope {
    /// Wrap an engine error for the originating connection.
    pub fn from_error(err: &crate::error::SessionError) -> Self {
        ServerEnvelope::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Identity established by a `Hello` handshake.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity {
    pub user_id: UserId,
    pub display_name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_envelope_decodes() {
        let json = r#"{
            "type": "submit",
            "sessionId": "s-1",
            "intent": {"type": "set_cell", "row": 0, "col": 1, "value": "int"},
            "clientTimestampMs": 42
        }"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(
            envelope,
            ClientEnvelope::Submit {
                session_id: "s-1".to_string(),
                intent: Intent::SetCell {
                    row: 0,
                    col: 1,
                    value: "int".to_string()
                },
                client_timestamp_ms: 42,
            }
        );
    }

    #[test]
    fn test_unknown_envelope_rejected() {
        let json = r#"{"type": "formatHardDrive"}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }

    #[test]
    fn test_event_envelope_nests_engine_messages() {
        let envelope = ServerEnvelope::Event(ServerMessage::MemberLeft {
            user_id: UserId::from("bob"),
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["event"], "memberLeft");

        let back: ServerEnvelope = serde_json::from_value(json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn test_error_envelope_carries_engine_code() {
        let err = crate::error::SessionError::SessionFull(4);
        let envelope = ServerEnvelope::from_error(&err);
        match envelope {
            ServerEnvelope::Error { code, message } => {
                assert_eq!(code, "session_full");
                assert!(message.contains('4'));
            }
            other => panic!("expected error envelope, got {:?}", other),
        }
    }
}
