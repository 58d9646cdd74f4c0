//! Fan-out of server messages to connected members.
//!
//! Each connected member supplies an unbounded channel sender at join
//! time; the broadcaster pushes accepted deltas, presence updates, and
//! notices into those channels fire-and-forget. Delivery is at-most-once:
//! a send into a closed channel marks it dead and drops the message, and
//! a disconnected member gets a fresh snapshot on rejoin instead of a
//! replayed backlog.

use crate::conflict::ConflictRecord;
use crate::ids::{SessionId, UserId};
use crate::member::MemberInfo;
use crate::permissions::{ActionKind, Role};
use grid_model::{CellRange, CellRef, GridDelta};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc;

/// Messages pushed to connected clients.
///
/// The `event` tag keeps this enum nestable inside transport envelopes
/// that already use a `type` tag.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// An accepted operation changed the grid.
    StateDelta {
        seq: u64,
        origin: UserId,
        delta: GridDelta,
    },
    /// A member's cursor or selection moved.
    PresenceUpdate {
        user_id: UserId,
        cursor: Option<CellRef>,
        selection: Option<CellRange>,
    },
    /// A cell is contested; sent to the losing writer only.
    ConflictDetected { record: ConflictRecord },
    /// A pending conflict was settled.
    ConflictResolved {
        row: usize,
        col: usize,
        /// The value the cell holds after resolution.
        value: String,
        resolved_by: UserId,
    },
    /// A member joined or reconnected.
    MemberJoined { member: MemberInfo },
    /// A member left or was removed.
    MemberLeft { user_id: UserId },
    /// A member's role changed.
    RoleChanged { user_id: UserId, role: Role },
    /// A request was denied; sent to the originator only.
    PermissionDenied { action: ActionKind, role: Role },
    /// The session is gone; no further messages will follow.
    SessionClosed { session_id: SessionId },
}

/// Per-session fan-out over member transport channels.
#[derive(Debug, Default)]
pub struct Broadcaster {
    channels: HashMap<UserId, mpsc::UnboundedSender<ServerMessage>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach (or replace) a member's transport channel.
    pub fn attach(&mut self, user: UserId, sender: mpsc::UnboundedSender<ServerMessage>) {
        self.channels.insert(user, sender);
    }

    /// Detach a member's channel. Queued messages in the channel are the
    /// receiver's to drain or drop.
    pub fn detach(&mut self, user: &UserId) -> bool {
        self.channels.remove(user).is_some()
    }

    pub fn is_attached(&self, user: &UserId) -> bool {
        self.channels.contains_key(user)
    }

    pub fn connected_count(&self) -> usize {
        self.channels.len()
    }

    /// Send to one member. Returns `false` (and drops the dead channel)
    /// if the member's receiver is gone.
    pub fn emit_to(&mut self, user: &UserId, message: ServerMessage) -> bool {
        match self.channels.get(user) {
            Some(sender) => {
                if sender.send(message).is_err() {
                    self.channels.remove(user);
                    false
                } else {
                    true
                }
            }
            None => false,
        }
    }

    /// Send to every connected member. Returns the members whose channel
    /// turned out dead; they are pruned.
    pub fn emit_all(&mut self, message: ServerMessage) -> Vec<UserId> {
        self.emit_filtered(|_| true, message)
    }

    /// Send to every connected member except `except`.
    pub fn emit_others(&mut self, except: &UserId, message: ServerMessage) -> Vec<UserId> {
        self.emit_filtered(|user| user != except, message)
    }

    fn emit_filtered(
        &mut self,
        keep: impl Fn(&UserId) -> bool,
        message: ServerMessage,
    ) -> Vec<UserId> {
        let mut dead = Vec::new();
        for (user, sender) in &self.channels {
            if keep(user) && sender.send(message.clone()).is_err() {
                dead.push(user.clone());
            }
        }
        for user in &dead {
            self.channels.remove(user);
        }
        dead
    }

    /// Drop every channel, e.g. when the session closes.
    pub fn detach_all(&mut self) {
        self.channels.clear();
    }
}
