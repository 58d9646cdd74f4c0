//! Presence tracking for cursors and selections.
//!
//! Presence is ephemeral per-member state: it bypasses history entirely,
//! is overwritten wholesale on every update (most recent wins, never
//! merged), and does not outlive the member.

use crate::ids::UserId;
use grid_model::{CellRange, CellRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

/// One member's cursor and selection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Cell the member's cursor sits on, if any.
    pub cursor: Option<CellRef>,
    /// Rectangular selection, if any.
    pub selection: Option<CellRange>,
    /// Last presence activity (ms since epoch).
    pub last_active_ms: u64,
}

impl Presence {
    pub fn new() -> Self {
        Self {
            cursor: None,
            selection: None,
            last_active_ms: current_timestamp_ms(),
        }
    }

    /// Replace the cursor position.
    pub fn set_cursor(&mut self, cursor: Option<CellRef>) {
        self.cursor = cursor;
        self.touch();
    }

    /// Replace the selection.
    pub fn set_selection(&mut self, selection: Option<CellRange>) {
        self.selection = selection;
        self.touch();
    }

    /// Drop cursor and selection, e.g. on disconnect.
    pub fn clear(&mut self) {
        self.cursor = None;
        self.selection = None;
        self.touch();
    }

    pub fn touch(&mut self) {
        self.last_active_ms = current_timestamp_ms();
    }
}

/// Tracks presence for every member of one session.
#[derive(Clone, Debug, Default)]
pub struct PresenceTracker {
    states: HashMap<UserId, Presence>,
    /// Sticky color assignment so a member keeps their color across
    /// reconnects.
    color_assignments: HashMap<UserId, String>,
    next_color_index: usize,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make sure a state exists for the member.
    pub fn ensure(&mut self, user: &UserId) {
        self.states.entry(user.clone()).or_insert_with(Presence::new);
    }

    /// Assign a display color, round-robin over the palette. A member
    /// who already has one keeps it.
    pub fn assign_color(&mut self, user: &UserId) -> String {
        if let Some(color) = self.color_assignments.get(user) {
            return color.clone();
        }
        let palette = default_colors();
        let color = palette[self.next_color_index % palette.len()].clone();
        self.next_color_index += 1;
        self.color_assignments.insert(user.clone(), color.clone());
        color
    }

    /// Overwrite a member's cursor. Returns `false` for unknown members.
    pub fn update_cursor(&mut self, user: &UserId, cursor: Option<CellRef>) -> bool {
        match self.states.get_mut(user) {
            Some(state) => {
                state.set_cursor(cursor);
                true
            }
            None => false,
        }
    }

    /// Overwrite a member's selection. Returns `false` for unknown members.
    pub fn update_selection(&mut self, user: &UserId, selection: Option<CellRange>) -> bool {
        match self.states.get_mut(user) {
            Some(state) => {
                state.set_selection(selection);
                true
            }
            None => false,
        }
    }

    /// Clear a member's cursor and selection, keeping the state record.
    pub fn clear(&mut self, user: &UserId) {
        if let Some(state) = self.states.get_mut(user) {
            state.clear();
        }
    }

    /// Remove a member's state entirely. Color assignment is kept so a
    /// rejoining member looks the same to everyone.
    pub fn remove(&mut self, user: &UserId) {
        self.states.remove(user);
    }

    pub fn get(&self, user: &UserId) -> Option<&Presence> {
        self.states.get(user)
    }

    pub fn user_count(&self) -> usize {
        self.states.len()
    }

    /// Presence of everyone except `exclude`, for rendering remote
    /// cursors.
    pub fn remote_of(&self, exclude: &UserId) -> Vec<(&UserId, &Presence)> {
        self.states
            .iter()
            .filter(|(user, _)| *user != exclude)
            .collect()
    }
}

/// Default color palette for member cursors.
pub fn default_colors() -> Vec<String> {
    vec![
        "#E91E63".into(), // Pink
        "#9C27B0".into(), // Purple
        "#3F51B5".into(), // Indigo
        "#2196F3".into(), // Blue
        "#00BCD4".into(), // Cyan
        "#4CAF50".into(), // Green
        "#FF9800".into(), // Orange
        "#795548".into(), // Brown
    ]
}

/// Get the current timestamp in milliseconds since epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
