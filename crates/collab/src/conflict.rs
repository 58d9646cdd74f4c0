//! Conflict detection and resolution for near-simultaneous cell writes.
//!
//! The policy is first-writer-wins inside a trailing time window: the
//! first `SetCell` accepted for a cell applies immediately, and a second
//! writer arriving while the first is still inside the window is flagged
//! with a [`ConflictRecord`] instead of silently overwriting. The window
//! is measured from server receipt of the previous accepted write, never
//! from client clocks, so clock skew cannot fabricate or mask conflicts.

use crate::error::{SessionError, SessionResult};
use crate::ids::UserId;
use grid_model::GridOp;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default trailing conflict window in milliseconds.
pub const DEFAULT_CONFLICT_WINDOW_MS: u64 = 300;

/// How a losing writer answers a conflict prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    /// Keep the other writer's value; the grid already holds it.
    AcceptOther,
    /// Re-submit my value as a fresh ordinary write.
    KeepMine,
}

/// One value proposed for a contested cell.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCandidate {
    pub user_id: UserId,
    pub value: String,
    pub client_timestamp_ms: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStatus {
    Pending,
    Resolved,
}

/// A contested cell and every value proposed for it inside the window.
///
/// `candidates[0]` is always the writer whose value currently sits in the
/// grid; later entries are the challengers awaiting a choice.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub row: usize,
    pub col: usize,
    pub candidates: Vec<ConflictCandidate>,
    pub status: ConflictStatus,
    /// Server receipt time of the write that opened the conflict.
    pub detected_at_ms: u64,
}

impl ConflictRecord {
    /// The candidate whose value the grid currently holds.
    pub fn current(&self) -> &ConflictCandidate {
        &self.candidates[0]
    }

    /// The challenger candidate belonging to `user`, if any.
    pub fn challenger(&self, user: &UserId) -> Option<&ConflictCandidate> {
        self.candidates
            .iter()
            .skip(1)
            .find(|candidate| &candidate.user_id == user)
    }

    /// The candidate values in proposal order, for UI prompts.
    pub fn values(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .map(|candidate| candidate.value.as_str())
            .collect()
    }
}

/// Decision on a single offered write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteDecision {
    /// No concurrent writer inside the window; the caller should apply
    /// the write and then record it.
    Accept,
    /// The cell is contested. The write was captured as a candidate and
    /// must not touch the grid; the carried record is the notice for the
    /// losing writer.
    Conflict(ConflictRecord),
}

/// Outcome of resolving a pending conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedConflict {
    /// The record, now marked resolved and removed from tracking.
    pub record: ConflictRecord,
    /// For `KeepMine`: the value and client timestamp to re-submit as a
    /// fresh ordinary write. `None` for `AcceptOther`.
    pub reapply: Option<ConflictCandidate>,
}

#[derive(Clone, Debug)]
struct LastWrite {
    user_id: UserId,
    value: String,
    client_timestamp_ms: u64,
    received_at_ms: u64,
}

/// Tracks recent accepted writes and pending conflicts for one session.
///
/// Consulted synchronously inside the session's serialized apply path,
/// never concurrently with another mutation of the same session.
#[derive(Clone, Debug)]
pub struct ConflictResolver {
    window_ms: u64,
    /// Last accepted write per cell, by server receipt time.
    last_writes: HashMap<(usize, usize), LastWrite>,
    /// At most one pending record per cell.
    pending: HashMap<(usize, usize), ConflictRecord>,
}

impl ConflictResolver {
    pub fn new(window_ms: u64) -> Self {
        Self {
            window_ms,
            last_writes: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Decide whether a `SetCell` from `user`, received at `now_ms`, may
    /// apply to `(row, col)`.
    ///
    /// Does not record anything on `Accept`; the caller applies the write
    /// and then calls [`record_write`](Self::record_write), so a write the
    /// grid rejects never starts a window.
    pub fn offer_write(
        &mut self,
        user: &UserId,
        row: usize,
        col: usize,
        value: &str,
        client_timestamp_ms: u64,
        now_ms: u64,
    ) -> WriteDecision {
        let key = (row, col);

        // A pending record dominates the window check: while the cell is
        // contested, every further writer queues as a candidate.
        if let Some(record) = self.pending.get_mut(&key) {
            if record.candidates.iter().all(|c| &c.user_id != user) {
                record.candidates.push(ConflictCandidate {
                    user_id: user.clone(),
                    value: value.to_string(),
                    client_timestamp_ms,
                });
            }
            return WriteDecision::Conflict(record.clone());
        }

        match self.last_writes.get(&key) {
            Some(last)
                if last.user_id != *user
                    && now_ms.saturating_sub(last.received_at_ms) <= self.window_ms =>
            {
                let record = ConflictRecord {
                    row,
                    col,
                    candidates: vec![
                        ConflictCandidate {
                            user_id: last.user_id.clone(),
                            value: last.value.clone(),
                            client_timestamp_ms: last.client_timestamp_ms,
                        },
                        ConflictCandidate {
                            user_id: user.clone(),
                            value: value.to_string(),
                            client_timestamp_ms,
                        },
                    ],
                    status: ConflictStatus::Pending,
                    detected_at_ms: now_ms,
                };
                self.pending.insert(key, record.clone());
                WriteDecision::Conflict(record)
            }
            _ => WriteDecision::Accept,
        }
    }

    /// Record an accepted write so later writes can be checked against
    /// its window. Called after the grid accepted the operation.
    pub fn record_write(
        &mut self,
        user: &UserId,
        row: usize,
        col: usize,
        value: &str,
        client_timestamp_ms: u64,
        now_ms: u64,
    ) {
        self.last_writes.insert(
            (row, col),
            LastWrite {
                user_id: user.clone(),
                value: value.to_string(),
                client_timestamp_ms,
                received_at_ms: now_ms,
            },
        );
    }

    /// Resolve the pending conflict at `(row, col)`.
    ///
    /// Only a challenger (a non-first candidate) may resolve; the record
    /// is destroyed either way. `KeepMine` hands the challenger's value
    /// back to the caller for re-submission as a fresh write.
    pub fn resolve(
        &mut self,
        user: &UserId,
        row: usize,
        col: usize,
        choice: ConflictChoice,
    ) -> SessionResult<ResolvedConflict> {
        let key = (row, col);
        let mut record = match self.pending.remove(&key) {
            Some(record) if record.challenger(user).is_some() => record,
            Some(record) => {
                // Not this user's conflict; put it back untouched.
                self.pending.insert(key, record);
                return Err(SessionError::ConflictUnresolvable { row, col });
            }
            None => return Err(SessionError::ConflictUnresolvable { row, col }),
        };
        record.status = ConflictStatus::Resolved;
        let reapply = match choice {
            ConflictChoice::AcceptOther => None,
            ConflictChoice::KeepMine => record.challenger(user).cloned(),
        };
        if choice == ConflictChoice::KeepMine {
            // The re-submitted value starts a fresh window of its own;
            // the old write must not shadow it.
            self.last_writes.remove(&key);
        }
        Ok(ResolvedConflict { record, reapply })
    }

    /// Pending record for a cell, if any.
    pub fn pending_at(&self, row: usize, col: usize) -> Option<&ConflictRecord> {
        self.pending.get(&(row, col))
    }

    /// Number of pending records.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Shift tracked coordinates across a structural operation so window
    /// tracking and pending records keep describing the same cells.
    /// Returns the pending records whose row/column was deleted; the
    /// caller notifies their candidates that the conflict is gone.
    pub fn remap_structural(&mut self, op: &GridOp) -> Vec<ConflictRecord> {
        match op {
            GridOp::SetCell { .. } => Vec::new(),
            GridOp::InsertRow { at } => {
                self.remap(|row, _| Some(if row >= *at { row + 1 } else { row }), |_, col| Some(col))
            }
            GridOp::DeleteRow { at } => self.remap(
                |row, _| match row.cmp(at) {
                    std::cmp::Ordering::Less => Some(row),
                    std::cmp::Ordering::Equal => None,
                    std::cmp::Ordering::Greater => Some(row - 1),
                },
                |_, col| Some(col),
            ),
            GridOp::InsertCol { at } => {
                self.remap(|row, _| Some(row), move |_, col| Some(if col >= *at { col + 1 } else { col }))
            }
            GridOp::DeleteCol { at } => self.remap(
                |row, _| Some(row),
                |_, col| match col.cmp(at) {
                    std::cmp::Ordering::Less => Some(col),
                    std::cmp::Ordering::Equal => None,
                    std::cmp::Ordering::Greater => Some(col - 1),
                },
            ),
        }
    }

    /// Drop all tracking. Used after a revert rebuilds the grid wholesale.
    /// Returns the pending records that were dropped.
    pub fn clear(&mut self) -> Vec<ConflictRecord> {
        self.last_writes.clear();
        self.pending.drain().map(|(_, record)| record).collect()
    }

    fn remap(
        &mut self,
        map_row: impl Fn(usize, usize) -> Option<usize>,
        map_col: impl Fn(usize, usize) -> Option<usize>,
    ) -> Vec<ConflictRecord> {
        let mut dropped = Vec::new();

        let last_writes = std::mem::take(&mut self.last_writes);
        self.last_writes = last_writes
            .into_iter()
            .filter_map(|((row, col), write)| {
                let new_row = map_row(row, col)?;
                let new_col = map_col(row, col)?;
                Some(((new_row, new_col), write))
            })
            .collect();

        let pending = std::mem::take(&mut self.pending);
        self.pending = pending
            .into_iter()
            .filter_map(|((row, col), mut record)| {
                match (map_row(row, col), map_col(row, col)) {
                    (Some(new_row), Some(new_col)) => {
                        record.row = new_row;
                        record.col = new_col;
                        Some(((new_row, new_col), record))
                    }
                    _ => {
                        dropped.push(record);
                        None
                    }
                }
            })
            .collect();

        dropped
    }
}

impl Default for ConflictResolver {
    fn default() -> Self {
        Self::new(DEFAULT_CONFLICT_WINDOW_MS)
    }
}
