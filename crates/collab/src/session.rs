//! A single collaborative editing session.
//!
//! A `Session` owns the authoritative grid, the operation history, the
//! conflict resolver, presence, the member set, and the broadcaster for
//! one named collaboration context. All methods here run inside the
//! session manager's per-session serialization point, so every mutation
//! observes and produces a consistent total order; `sessionSeq` numbers
//! are assigned from that order.
//!
//! Methods with an `_at` suffix take the server receipt time explicitly
//! so conflict-window behavior is deterministic under test; the plain
//! variants use the wall clock.

use crate::broadcast::{Broadcaster, ServerMessage};
use crate::conflict::{
    ConflictChoice, ConflictRecord, ConflictResolver, WriteDecision,
};
use crate::error::{SessionError, SessionResult};
use crate::history::{HistoryEntry, HistoryKind, HistoryManager, PreImage};
use crate::ids::{SessionId, UserId};
use crate::member::{ConnectionState, Member, MemberInfo};
use crate::operation::Intent;
use crate::permissions::{self, ActionKind, Role};
use crate::presence::PresenceTracker;
use chrono::{DateTime, Utc};
use grid_model::{CellRange, CellRef, Grid, GridDelta, GridError, GridOp, GridSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;

/// Configuration for a collaboration session.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum number of member records, connected or not.
    pub max_members: usize,
    /// Trailing conflict window in milliseconds (§ conflict policy).
    pub conflict_window_ms: u64,
    /// How long a session with zero connected members lives before the
    /// manager reaps it.
    pub empty_session_ttl_ms: u64,
    /// Grid dimensions when no schema snapshot is supplied.
    pub default_rows: usize,
    pub default_cols: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_members: 100,
            conflict_window_ms: crate::conflict::DEFAULT_CONFLICT_WINDOW_MS,
            empty_session_ttl_ms: 300_000, // 5 minutes
            default_rows: 8,
            default_cols: 4,
        }
    }
}

/// Lifecycle status of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
}

/// Everything a joining client needs to render without replaying
/// history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinInfo {
    pub session_id: SessionId,
    /// The role actually granted (a rejoin keeps the recorded role).
    pub role: Role,
    pub snapshot: GridSnapshot,
    pub members: Vec<MemberInfo>,
    /// Length of the active history timeline.
    pub history_len: usize,
    /// Highest sequence number assigned so far.
    pub last_seq: u64,
}

/// Outcome of a mutating submit.
#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// The intent was ordered, applied, and broadcast.
    Applied { seq: u64, delta: GridDelta },
    /// The target cell is contested; nothing was applied. The caller
    /// must resolve the carried record.
    ConflictPending { record: ConflictRecord },
}

/// Read-only session metadata for listings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub name: String,
    pub owner: UserId,
    pub status: SessionStatus,
    pub member_count: usize,
    pub connected_count: usize,
    pub created_at: DateTime<Utc>,
    pub last_seq: u64,
}

/// One collaborative editing session and everything it owns.
pub struct Session {
    id: SessionId,
    name: String,
    owner: UserId,
    created_at: DateTime<Utc>,
    status: SessionStatus,
    config: SessionConfig,
    grid: Grid,
    history: HistoryManager,
    conflicts: ConflictResolver,
    presence: PresenceTracker,
    members: HashMap<UserId, Member>,
    broadcaster: Broadcaster,
    /// Highest sequence number assigned. The next accepted operation
    /// gets `next_seq + 1`.
    next_seq: u64,
    last_activity_ms: u64,
}

impl Session {
    /// Create a session around the given initial grid content. The
    /// snapshot is normalized (padded rectangular) before anything else
    /// sees it, so history replays start from exactly the grid the
    /// session starts from.
    pub fn new(
        id: SessionId,
        name: String,
        owner: UserId,
        initial: &GridSnapshot,
        config: SessionConfig,
    ) -> Self {
        let grid = Grid::from_snapshot(initial);
        let history = HistoryManager::new(grid.snapshot());
        let conflicts = ConflictResolver::new(config.conflict_window_ms);
        Self {
            id,
            name,
            owner,
            created_at: Utc::now(),
            status: SessionStatus::Active,
            config,
            grid,
            history,
            conflicts,
            presence: PresenceTracker::new(),
            members: HashMap::new(),
            broadcaster: Broadcaster::new(),
            next_seq: 0,
            last_activity_ms: current_timestamp_ms(),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The authoritative grid. Read-only; all mutation goes through
    /// [`submit`](Self::submit).
    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    /// The session's history. Read-only for listings and resync.
    pub fn history(&self) -> &HistoryManager {
        &self.history
    }

    pub fn member(&self, user: &UserId) -> Option<&Member> {
        self.members.get(user)
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn connected_count(&self) -> usize {
        self.members.values().filter(|m| m.is_connected()).count()
    }

    /// Pending conflict record for a cell, if any.
    pub fn pending_conflict(&self, row: usize, col: usize) -> Option<&ConflictRecord> {
        self.conflicts.pending_at(row, col)
    }

    /// Metadata view for session listings. Read-only consumers get this
    /// and never touch the grid directly.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            status: self.status,
            member_count: self.members.len(),
            connected_count: self.connected_count(),
            created_at: self.created_at,
            last_seq: self.next_seq,
        }
    }

    // ========== Membership ==========

    /// Join (or rejoin) the session.
    ///
    /// A known member reattaches their transport and keeps the recorded
    /// role; a new member is admitted against the member cap. Requesting
    /// `Owner` grants it only to the recorded session owner, anyone else
    /// is downgraded to `Editor`.
    pub fn join(
        &mut self,
        user: UserId,
        display_name: String,
        requested_role: Role,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionResult<JoinInfo> {
        self.ensure_active()?;

        let role = if let Some(member) = self.members.get_mut(&user) {
            member.connection = ConnectionState::Connected;
            member.display_name = display_name;
            member.touch();
            member.role
        } else {
            if self.members.len() >= self.config.max_members {
                return Err(SessionError::SessionFull(self.config.max_members));
            }
            let role = if user == self.owner {
                Role::Owner
            } else if requested_role == Role::Owner {
                Role::Editor
            } else {
                requested_role
            };
            let color = self.presence.assign_color(&user);
            self.members
                .insert(user.clone(), Member::new(user.clone(), display_name, role, color));
            role
        };

        self.presence.ensure(&user);
        self.broadcaster.attach(user.clone(), sender);

        if let Some(member) = self.members.get(&user) {
            let info = MemberInfo::from(member);
            self.broadcaster
                .emit_others(&user, ServerMessage::MemberJoined { member: info });
        }
        self.touch();

        Ok(JoinInfo {
            session_id: self.id.clone(),
            role,
            snapshot: self.grid.snapshot(),
            members: self.member_infos(),
            history_len: self.history.active_len(),
            last_seq: self.next_seq,
        })
    }

    /// Explicitly leave the session, dropping the member record.
    pub fn leave(&mut self, user: &UserId) -> SessionResult<()> {
        if self.members.remove(user).is_none() {
            return Err(SessionError::NotAMember(user.clone()));
        }
        self.presence.remove(user);
        self.broadcaster.detach(user);
        self.broadcaster.emit_all(ServerMessage::MemberLeft {
            user_id: user.clone(),
        });
        self.touch();
        Ok(())
    }

    /// Transport loss: the member record and role persist for
    /// reconnection, but presence is cleared and queued messages are
    /// dropped rather than buffered.
    pub fn disconnect(&mut self, user: &UserId) -> SessionResult<()> {
        let member = self
            .members
            .get_mut(user)
            .ok_or_else(|| SessionError::NotAMember(user.clone()))?;
        member.connection = ConnectionState::Disconnected;
        self.presence.clear(user);
        self.broadcaster.detach(user);
        self.broadcaster.emit_all(ServerMessage::PresenceUpdate {
            user_id: user.clone(),
            cursor: None,
            selection: None,
        });
        self.touch();
        Ok(())
    }

    fn member_infos(&self) -> Vec<MemberInfo> {
        let mut infos: Vec<MemberInfo> = self.members.values().map(MemberInfo::from).collect();
        infos.sort_by(|a, b| a.user_id.0.cmp(&b.user_id.0));
        infos
    }

    // ========== Mutation ==========

    /// Submit a mutating intent. The single entry point for everything
    /// that changes grid content or history.
    pub fn submit(
        &mut self,
        user: &UserId,
        intent: Intent,
        client_timestamp_ms: u64,
    ) -> SessionResult<SubmitOutcome> {
        self.submit_at(user, intent, client_timestamp_ms, current_timestamp_ms())
    }

    /// [`submit`](Self::submit) with an explicit server receipt time.
    pub fn submit_at(
        &mut self,
        user: &UserId,
        intent: Intent,
        client_timestamp_ms: u64,
        now_ms: u64,
    ) -> SessionResult<SubmitOutcome> {
        self.ensure_active()?;
        let role = self.member_role(user)?;
        permissions::authorize(role, intent.action())?;
        if let Some(member) = self.members.get_mut(user) {
            member.touch();
        }

        let op = match intent {
            Intent::Revert { seq } => {
                return self.apply_revert(user, seq, client_timestamp_ms)
            }
            Intent::SetCell { row, col, value } => GridOp::SetCell { row, col, value },
            Intent::InsertRow { at } => GridOp::InsertRow { at },
            Intent::DeleteRow { at } => GridOp::DeleteRow { at },
            Intent::InsertCol { at } => GridOp::InsertCol { at },
            Intent::DeleteCol { at } => GridOp::DeleteCol { at },
        };

        // Content writes go through the conflict window. Bounds are
        // checked first so an out-of-range write can neither open a
        // window nor queue as a candidate.
        if let GridOp::SetCell { row, col, value } = &op {
            if !self.grid.contains(*row, *col) {
                return Err(GridError::CellOutOfRange {
                    row: *row,
                    col: *col,
                    rows: self.grid.row_count(),
                    cols: self.grid.col_count(),
                }
                .into());
            }
            match self
                .conflicts
                .offer_write(user, *row, *col, value, client_timestamp_ms, now_ms)
            {
                WriteDecision::Conflict(record) => {
                    // The losing writer alone learns of the conflict;
                    // other members see no error and the winner's value
                    // stays current.
                    return Ok(SubmitOutcome::ConflictPending { record });
                }
                WriteDecision::Accept => {}
            }
        }

        let pre_image = self.pre_image_of(&op);
        let seq = self.next_seq + 1;
        let delta = self.grid.apply(&op, &user.0, seq)?;
        if let Err(violation) = self.grid.check_invariants() {
            return Err(self.fault(violation.to_string()));
        }
        self.next_seq = seq;

        match &op {
            GridOp::SetCell { row, col, value } => {
                self.conflicts
                    .record_write(user, *row, *col, value, client_timestamp_ms, now_ms);
            }
            _ => {
                // Keep window tracking and pending records pointing at
                // the cells they described; conflicts whose row/column
                // vanished are settled by the structural edit.
                for record in self.conflicts.remap_structural(&op) {
                    self.emit_conflict_resolved(&record, user);
                }
            }
        }

        self.history.append(HistoryEntry {
            seq,
            user_id: user.clone(),
            client_timestamp_ms,
            applied_at: Utc::now(),
            kind: HistoryKind::Op { op, pre_image },
        });
        self.broadcaster.emit_all(ServerMessage::StateDelta {
            seq,
            origin: user.clone(),
            delta: delta.clone(),
        });
        self.touch();

        Ok(SubmitOutcome::Applied { seq, delta })
    }

    /// Resolve a pending conflict the calling user is a challenger of.
    pub fn resolve_conflict(
        &mut self,
        user: &UserId,
        row: usize,
        col: usize,
        choice: ConflictChoice,
    ) -> SessionResult<ConflictRecord> {
        self.resolve_conflict_at(user, row, col, choice, current_timestamp_ms())
    }

    /// [`resolve_conflict`](Self::resolve_conflict) with an explicit
    /// server receipt time for the possible re-submission.
    pub fn resolve_conflict_at(
        &mut self,
        user: &UserId,
        row: usize,
        col: usize,
        choice: ConflictChoice,
        now_ms: u64,
    ) -> SessionResult<ConflictRecord> {
        self.ensure_active()?;
        self.member_role(user)?;

        let resolved = self.conflicts.resolve(user, row, col, choice)?;

        if let Some(candidate) = &resolved.reapply {
            // `KeepMine` becomes a fresh, ordinary, sequenced write —
            // outside any window against the resolved cell.
            let op = GridOp::SetCell {
                row,
                col,
                value: candidate.value.clone(),
            };
            let pre_image = self.pre_image_of(&op);
            let seq = self.next_seq + 1;
            let delta = self.grid.apply(&op, &user.0, seq)?;
            self.next_seq = seq;
            self.conflicts.record_write(
                user,
                row,
                col,
                &candidate.value,
                candidate.client_timestamp_ms,
                now_ms,
            );
            self.history.append(HistoryEntry {
                seq,
                user_id: user.clone(),
                client_timestamp_ms: candidate.client_timestamp_ms,
                applied_at: Utc::now(),
                kind: HistoryKind::Op { op, pre_image },
            });
            self.broadcaster.emit_all(ServerMessage::StateDelta {
                seq,
                origin: user.clone(),
                delta,
            });
        }

        self.emit_conflict_resolved(&resolved.record, user);
        self.touch();
        Ok(resolved.record)
    }

    fn apply_revert(
        &mut self,
        user: &UserId,
        target_seq: u64,
        client_timestamp_ms: u64,
    ) -> SessionResult<SubmitOutcome> {
        let seq = self.next_seq + 1;
        self.grid = self.history.revert_to(target_seq)?;
        self.next_seq = seq;
        self.history.append(HistoryEntry {
            seq,
            user_id: user.clone(),
            client_timestamp_ms,
            applied_at: Utc::now(),
            kind: HistoryKind::Revert { target_seq },
        });

        // The grid was rebuilt wholesale; stale windows and pending
        // records describe cells that may no longer exist.
        for record in self.conflicts.clear() {
            self.emit_conflict_resolved(&record, user);
        }

        let delta = GridDelta::Reverted {
            target_seq,
            snapshot: self.grid.snapshot(),
        };
        self.broadcaster.emit_all(ServerMessage::StateDelta {
            seq,
            origin: user.clone(),
            delta: delta.clone(),
        });
        self.touch();
        Ok(SubmitOutcome::Applied { seq, delta })
    }

    fn emit_conflict_resolved(&mut self, record: &ConflictRecord, resolved_by: &UserId) {
        let value = self
            .grid
            .cell(record.row, record.col)
            .map(|cell| cell.value.clone())
            .unwrap_or_else(|| record.current().value.clone());
        self.broadcaster.emit_all(ServerMessage::ConflictResolved {
            row: record.row,
            col: record.col,
            value,
            resolved_by: resolved_by.clone(),
        });
    }

    fn pre_image_of(&self, op: &GridOp) -> PreImage {
        match op {
            GridOp::SetCell { row, col, .. } => self
                .grid
                .cell(*row, *col)
                .map(|cell| PreImage::Cell {
                    value: cell.value.clone(),
                })
                .unwrap_or(PreImage::None),
            GridOp::DeleteRow { at } => self
                .grid
                .row(*at)
                .map(|cells| PreImage::Row {
                    cells: cells.to_vec(),
                })
                .unwrap_or(PreImage::None),
            GridOp::DeleteCol { at } => self
                .grid
                .column(*at)
                .map(|cells| PreImage::Column { cells })
                .unwrap_or(PreImage::None),
            GridOp::InsertRow { .. } | GridOp::InsertCol { .. } => PreImage::None,
        }
    }

    // ========== Presence ==========

    /// Move a member's cursor. Allowed for every role, not historied.
    pub fn update_cursor(&mut self, user: &UserId, cursor: Option<CellRef>) -> SessionResult<()> {
        self.ensure_active()?;
        self.member_role(user)?;
        self.presence.update_cursor(user, cursor);
        self.emit_presence(user);
        Ok(())
    }

    /// Replace a member's selection. Allowed for every role.
    pub fn update_selection(
        &mut self,
        user: &UserId,
        selection: Option<CellRange>,
    ) -> SessionResult<()> {
        self.ensure_active()?;
        self.member_role(user)?;
        self.presence.update_selection(user, selection);
        self.emit_presence(user);
        Ok(())
    }

    fn emit_presence(&mut self, user: &UserId) {
        let (cursor, selection) = self
            .presence
            .get(user)
            .map(|p| (p.cursor, p.selection))
            .unwrap_or((None, None));
        self.broadcaster.emit_others(
            user,
            ServerMessage::PresenceUpdate {
                user_id: user.clone(),
                cursor,
                selection,
            },
        );
        if let Some(member) = self.members.get_mut(user) {
            member.touch();
        }
    }

    // ========== Management ==========

    /// Change a member's role. Owner only; the owner cannot change their
    /// own role (that would orphan the session).
    pub fn set_role(
        &mut self,
        requester: &UserId,
        target: &UserId,
        role: Role,
    ) -> SessionResult<()> {
        self.ensure_active()?;
        let requester_role = self.member_role(requester)?;
        permissions::authorize(requester_role, ActionKind::SetRole)?;
        if requester == target {
            return Err(SessionError::Forbidden(ActionKind::SetRole));
        }
        let member = self
            .members
            .get_mut(target)
            .ok_or_else(|| SessionError::NotAMember(target.clone()))?;
        member.role = role;
        self.broadcaster.emit_all(ServerMessage::RoleChanged {
            user_id: target.clone(),
            role,
        });
        self.touch();
        Ok(())
    }

    /// Remove a member. Owner only.
    pub fn kick(&mut self, requester: &UserId, target: &UserId) -> SessionResult<()> {
        self.ensure_active()?;
        let requester_role = self.member_role(requester)?;
        permissions::authorize(requester_role, ActionKind::Kick)?;
        if requester == target {
            return Err(SessionError::Forbidden(ActionKind::Kick));
        }
        if self.members.remove(target).is_none() {
            return Err(SessionError::NotAMember(target.clone()));
        }
        self.presence.remove(target);
        // Tell everyone, including the kicked member, before dropping
        // their channel.
        self.broadcaster.emit_all(ServerMessage::MemberLeft {
            user_id: target.clone(),
        });
        self.broadcaster.detach(target);
        self.touch();
        Ok(())
    }

    /// Close the session. Owner only. Members are notified and every
    /// channel dropped; the manager reaps the record afterwards.
    pub fn close(&mut self, requester: &UserId) -> SessionResult<()> {
        self.ensure_active()?;
        let requester_role = self.member_role(requester)?;
        permissions::authorize(requester_role, ActionKind::CloseSession)?;
        self.close_now();
        Ok(())
    }

    fn close_now(&mut self) {
        self.status = SessionStatus::Closed;
        self.broadcaster.emit_all(ServerMessage::SessionClosed {
            session_id: self.id.clone(),
        });
        self.broadcaster.detach_all();
    }

    /// Record an unrecoverable invariant violation: close the session,
    /// notify everyone, and hand back the fault for the originator.
    fn fault(&mut self, reason: String) -> SessionError {
        self.close_now();
        SessionError::SessionFault(reason)
    }

    /// Whether the manager should reap this session: closed, or idle
    /// past the TTL with zero connected members.
    pub fn should_reap(&self, now_ms: u64) -> bool {
        if self.status == SessionStatus::Closed {
            return true;
        }
        let all_disconnected = self.members.values().all(|m| !m.is_connected());
        all_disconnected
            && now_ms.saturating_sub(self.last_activity_ms) > self.config.empty_session_ttl_ms
    }

    fn ensure_active(&self) -> SessionResult<()> {
        if self.status == SessionStatus::Closed {
            return Err(SessionError::SessionClosed(self.id.clone()));
        }
        Ok(())
    }

    fn member_role(&self, user: &UserId) -> SessionResult<Role> {
        self.members
            .get(user)
            .map(|member| member.role)
            .ok_or_else(|| SessionError::NotAMember(user.clone()))
    }

    fn touch(&mut self) {
        self.last_activity_ms = current_timestamp_ms();
    }
}

/// Get the current timestamp in milliseconds since epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
