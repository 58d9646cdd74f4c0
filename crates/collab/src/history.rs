//! Append-only operation history with point-in-time revert.
//!
//! History is never mutated in place: entries are appended, and a revert
//! truncates the *active* timeline while the full audit sequence is kept.
//! Reverting reconstructs grid content by a full replay from the initial
//! snapshot rather than by applying inverses, so structural operations
//! cannot drift the indices out of their contiguity invariant.

use crate::error::{SessionError, SessionResult};
use crate::ids::UserId;
use chrono::{DateTime, Utc};
use grid_model::{Grid, GridError, GridOp, GridSnapshot};
use serde::{Deserialize, Serialize};

/// Content displaced by an operation, recorded so every history entry can
/// explain what it overwrote or removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreImage {
    /// Prior value of the cell a `SetCell` overwrote.
    Cell { value: String },
    /// The row a `DeleteRow` removed.
    Row { cells: Vec<grid_model::Cell> },
    /// The column a `DeleteCol` removed, top to bottom.
    Column { cells: Vec<grid_model::Cell> },
    /// Inserts displace nothing.
    None,
}

/// What a history entry records.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryKind {
    /// A grid mutation together with what it displaced.
    Op { op: GridOp, pre_image: PreImage },
    /// A rewind of the active timeline to `target_seq`.
    Revert { target_seq: u64 },
}

/// One immutable record in a session's history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Position in the session's total order. Starts at 1; strictly
    /// monotonic across every accepted operation of the session.
    pub seq: u64,
    /// Member the operation came from.
    pub user_id: UserId,
    /// Client-reported wall clock in epoch milliseconds. Display only;
    /// ordering and conflict windows never consult it.
    pub client_timestamp_ms: u64,
    /// Server wall clock when the operation was applied.
    pub applied_at: DateTime<Utc>,
    pub kind: HistoryKind,
}

/// A history entry that could not be re-applied during replay because the
/// rows or columns it targeted no longer exist at that point of the
/// timeline. Reported, never silently dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayFault {
    pub seq: u64,
    pub error: GridError,
}

/// Rebuild a grid by applying `entries` in order on top of `initial`.
///
/// Revert markers carry no grid change of their own (the truncation they
/// describe already shaped the entry sequence) and are skipped. Entries
/// that no longer apply are reported as [`ReplayFault`]s.
pub fn replay<'a>(
    initial: &GridSnapshot,
    entries: impl IntoIterator<Item = &'a HistoryEntry>,
) -> (Grid, Vec<ReplayFault>) {
    let mut grid = Grid::from_snapshot(initial);
    let mut faults = Vec::new();
    for entry in entries {
        if let HistoryKind::Op { op, .. } = &entry.kind {
            if let Err(error) = grid.apply(op, &entry.user_id.0, entry.seq) {
                faults.push(ReplayFault {
                    seq: entry.seq,
                    error,
                });
            }
        }
    }
    (grid, faults)
}

/// Ordered record of every operation applied to one session's grid.
#[derive(Clone, Debug)]
pub struct HistoryManager {
    /// Grid content at session creation; every replay starts here.
    initial: GridSnapshot,
    /// Every entry ever appended, in append order. The audit view.
    entries: Vec<HistoryEntry>,
    /// Indices into `entries` forming the active timeline. Truncated by
    /// reverts; the audit view never is.
    active: Vec<usize>,
}

impl HistoryManager {
    /// Create an empty history over the given initial grid content.
    pub fn new(initial: GridSnapshot) -> Self {
        Self {
            initial,
            entries: Vec::new(),
            active: Vec::new(),
        }
    }

    /// The snapshot replays start from.
    pub fn initial(&self) -> &GridSnapshot {
        &self.initial
    }

    /// Append an entry to both the audit sequence and the active timeline.
    pub fn append(&mut self, entry: HistoryEntry) {
        self.active.push(self.entries.len());
        self.entries.push(entry);
    }

    /// Number of entries on the active timeline.
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Number of entries ever appended, including those a revert made
    /// unreachable.
    pub fn audit_len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Entries on the active timeline, oldest first.
    pub fn active_entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.active.iter().map(|&index| &self.entries[index])
    }

    /// Every entry ever appended, oldest first.
    pub fn audit_entries(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Active entries with a sequence number greater than `seq`, for
    /// client resync.
    pub fn list_since(&self, seq: u64) -> Vec<&HistoryEntry> {
        self.active_entries()
            .filter(|entry| entry.seq > seq)
            .collect()
    }

    /// Whether `seq` names an entry on the active timeline. Zero names
    /// the initial state and is always reachable.
    pub fn is_active(&self, seq: u64) -> bool {
        seq == 0 || self.active_entries().any(|entry| entry.seq == seq)
    }

    /// Rewind the active timeline to `seq` and rebuild the grid content
    /// at that point by full replay. `seq == 0` rewinds to the initial
    /// grid. Entries after `seq` leave the active timeline (they stay in
    /// the audit view) and can no longer be revert targets unless new
    /// entries are appended past them.
    ///
    /// The caller records the revert itself as a fresh [`HistoryEntry`]
    /// so that late joiners see an explainable timeline.
    pub fn revert_to(&mut self, seq: u64) -> SessionResult<Grid> {
        if seq == 0 {
            self.active.clear();
            return Ok(Grid::from_snapshot(&self.initial));
        }
        let position = self
            .active
            .iter()
            .position(|&index| self.entries[index].seq == seq)
            .ok_or(SessionError::RevertTargetNotFound(seq))?;
        self.active.truncate(position + 1);

        let (grid, faults) = replay(&self.initial, self.active_entries());
        // Entries on the active timeline were applied in exactly this
        // order before, so replaying them cannot fault.
        debug_assert!(faults.is_empty());
        Ok(grid)
    }
}
