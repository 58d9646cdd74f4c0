//! Session membership records.

use crate::ids::UserId;
use crate::permissions::Role;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection state of a member's transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

/// A participant in a session.
///
/// The record (and its role) survives transport loss: a reconnecting
/// user keeps their permissions. It is removed only on explicit leave,
/// kick, or session close.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub connection: ConnectionState,
    /// Presence display color, assigned at first join.
    pub color: String,
    /// Join time (ms since epoch).
    pub joined_at_ms: u64,
    /// Last request from this member (ms since epoch).
    pub last_activity_ms: u64,
}

impl Member {
    pub fn new(user_id: UserId, display_name: String, role: Role, color: String) -> Self {
        let now = current_timestamp_ms();
        Self {
            user_id,
            display_name,
            role,
            connection: ConnectionState::Connected,
            color,
            joined_at_ms: now,
            last_activity_ms: now,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    pub fn touch(&mut self) {
        self.last_activity_ms = current_timestamp_ms();
    }
}

/// Read-only view of a member, sent to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub user_id: UserId,
    pub display_name: String,
    pub role: Role,
    pub connection: ConnectionState,
    pub color: String,
}

impl From<&Member> for MemberInfo {
    fn from(member: &Member) -> Self {
        Self {
            user_id: member.user_id.clone(),
            display_name: member.display_name.clone(),
            role: member.role,
            connection: member.connection,
            color: member.color.clone(),
        }
    }
}

/// Get the current timestamp in milliseconds since epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
