//! Permission tiers and the pure authorization check.
//!
//! Roles are ordered: `ReadOnly < Editor < Owner`. The check itself is a
//! pure function consulted synchronously inside the session's serialized
//! apply path; presence updates and conflict resolution never pass through
//! it because they are allowed for every role.

use crate::error::SessionError;
use serde::{Deserialize, Serialize};

/// Permission tier of a session member.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May watch the grid and move a cursor, never mutate.
    ReadOnly,
    /// May mutate the grid, not manage members.
    Editor,
    /// May do everything, including role changes and closing the session.
    Owner,
}

impl Role {
    /// Whether this role may mutate grid content and history.
    pub fn can_edit(&self) -> bool {
        *self >= Role::Editor
    }

    /// Whether this role may manage members and the session lifecycle.
    pub fn can_manage(&self) -> bool {
        *self == Role::Owner
    }
}

impl Default for Role {
    fn default() -> Self {
        Role::ReadOnly
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Role::ReadOnly => "read-only",
            Role::Editor => "editor",
            Role::Owner => "owner",
        };
        write!(f, "{}", name)
    }
}

/// Everything a member can ask the engine to do that is subject to a
/// permission check. Carried inside denial errors so the UI can explain
/// exactly what was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SetCell,
    InsertRow,
    DeleteRow,
    InsertCol,
    DeleteCol,
    Revert,
    SetRole,
    Kick,
    CloseSession,
}

impl ActionKind {
    /// Whether this action mutates shared grid state (as opposed to
    /// managing members or the session lifecycle).
    pub fn is_grid_mutation(&self) -> bool {
        matches!(
            self,
            ActionKind::SetCell
                | ActionKind::InsertRow
                | ActionKind::DeleteRow
                | ActionKind::InsertCol
                | ActionKind::DeleteCol
                | ActionKind::Revert
        )
    }
}

impl From<grid_model::GridOpKind> for ActionKind {
    fn from(kind: grid_model::GridOpKind) -> Self {
        match kind {
            grid_model::GridOpKind::SetCell => ActionKind::SetCell,
            grid_model::GridOpKind::InsertRow => ActionKind::InsertRow,
            grid_model::GridOpKind::DeleteRow => ActionKind::DeleteRow,
            grid_model::GridOpKind::InsertCol => ActionKind::InsertCol,
            grid_model::GridOpKind::DeleteCol => ActionKind::DeleteCol,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ActionKind::SetCell => "set a cell",
            ActionKind::InsertRow => "insert a row",
            ActionKind::DeleteRow => "delete a row",
            ActionKind::InsertCol => "insert a column",
            ActionKind::DeleteCol => "delete a column",
            ActionKind::Revert => "revert history",
            ActionKind::SetRole => "change roles",
            ActionKind::Kick => "remove members",
            ActionKind::CloseSession => "close the session",
        };
        write!(f, "{}", name)
    }
}

/// Decide whether `role` permits `action`.
///
/// Grid mutations denied to a role come back as
/// [`SessionError::PermissionDenied`] carrying the attempted action and
/// the holder's role for UI display; management actions denied to
/// non-owners come back as [`SessionError::Forbidden`].
pub fn authorize(role: Role, action: ActionKind) -> Result<(), SessionError> {
    if action.is_grid_mutation() {
        if role.can_edit() {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied { action, role })
        }
    } else if role.can_manage() {
        Ok(())
    } else {
        Err(SessionError::Forbidden(action))
    }
}
