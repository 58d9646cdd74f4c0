//! Integration tests for the collaborative session engine.
//!
//! These tests drive the public `SessionManager` surface the way a
//! transport would: every member holds a real channel, and assertions
//! cover both the returned outcomes and the broadcast traffic.

use collab::broadcast::ServerMessage;
use collab::conflict::ConflictChoice;
use collab::error::SessionError;
use collab::history::replay;
use collab::ids::{SessionId, UserId};
use collab::manager::{CreateSessionOptions, ManagerConfig, SessionManager};
use collab::operation::Intent;
use collab::permissions::Role;
use collab::session::{SessionConfig, SubmitOutcome};
use grid_model::{Grid, GridDelta};
use tokio::sync::mpsc;

/// One simulated connected member.
struct TestClient {
    user: UserId,
    rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl TestClient {
    fn drain(&mut self) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            messages.push(message);
        }
        messages
    }
}

async fn create_session(manager: &SessionManager, owner: &str) -> (SessionId, TestClient) {
    let (tx, rx) = mpsc::unbounded_channel();
    let join = manager
        .create_session(
            UserId::from(owner),
            owner.to_string(),
            "schema session".to_string(),
            CreateSessionOptions {
                rows: Some(4),
                cols: Some(4),
                ..Default::default()
            },
            tx,
        )
        .await
        .unwrap();
    assert_eq!(join.role, Role::Owner);
    (
        join.session_id,
        TestClient {
            user: UserId::from(owner),
            rx,
        },
    )
}

async fn join_session(
    manager: &SessionManager,
    session_id: &SessionId,
    user: &str,
    role: Role,
) -> TestClient {
    let (tx, rx) = mpsc::unbounded_channel();
    let join = manager
        .join_session(session_id, UserId::from(user), user.to_string(), role, tx)
        .await
        .unwrap();
    assert_eq!(join.role, role);
    TestClient {
        user: UserId::from(user),
        rx,
    }
}

fn set_cell(row: usize, col: usize, value: &str) -> Intent {
    Intent::SetCell {
        row,
        col,
        value: value.to_string(),
    }
}

async fn cell_value(manager: &SessionManager, session_id: &SessionId, row: usize, col: usize) -> String {
    manager
        .with_session(session_id, |session| {
            session
                .grid()
                .cell(row, col)
                .map(|cell| cell.value.clone())
                .unwrap_or_default()
        })
        .await
        .unwrap()
}

// ========== Scenario A ==========

#[tokio::test]
async fn scenario_a_owner_edit_is_visible_and_historied() {
    let manager = SessionManager::default();
    let (session_id, mut alice) = create_session(&manager, "alice").await;
    let mut bob = join_session(&manager, &session_id, "bob", Role::Editor).await;
    alice.drain();

    let outcome = manager
        .submit(&session_id, &alice.user, set_cell(0, 0, "X"), 0)
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::Applied { seq: 1, .. }));

    let (value, writer, history_len, first_seq) = manager
        .with_session(&session_id, |session| {
            let cell = session.grid().cell(0, 0).unwrap();
            (
                cell.value.clone(),
                cell.last_writer.clone(),
                session.history().active_len(),
                session.history().active_entries().next().unwrap().seq,
            )
        })
        .await
        .unwrap();
    assert_eq!(value, "X");
    assert_eq!(writer.as_deref(), Some("alice"));
    assert_eq!(history_len, 1);
    assert_eq!(first_seq, 1);

    // Both members, including the originator, see the delta.
    for client in [&mut alice, &mut bob] {
        let messages = client.drain();
        assert!(
            messages.iter().any(|message| matches!(
                message,
                ServerMessage::StateDelta {
                    seq: 1,
                    delta: GridDelta::CellSet { row: 0, col: 0, .. },
                    ..
                }
            )),
            "missing delta for {:?}",
            client.user
        );
    }
}

// ========== Scenario B ==========

#[tokio::test]
async fn scenario_b_conflict_detected_and_accept_other() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;

    // Both writes land well inside the 300ms window.
    manager
        .submit(&session_id, &UserId::from("alice"), set_cell(1, 1, "First Edit"), 0)
        .await
        .unwrap();
    let outcome = manager
        .submit(&session_id, &bob.user, set_cell(1, 1, "Second Edit"), 50)
        .await
        .unwrap();

    let record = match outcome {
        SubmitOutcome::ConflictPending { record } => record,
        other => panic!("expected conflict, got {:?}", other),
    };
    assert_eq!(record.values(), vec!["First Edit", "Second Edit"]);

    // The first writer's value holds while the conflict is pending.
    assert_eq!(cell_value(&manager, &session_id, 1, 1).await, "First Edit");

    manager
        .resolve_conflict(&session_id, &bob.user, 1, 1, ConflictChoice::AcceptOther)
        .await
        .unwrap();
    assert_eq!(cell_value(&manager, &session_id, 1, 1).await, "First Edit");

    // Exactly one operation was sequenced.
    let history_len = manager
        .with_session(&session_id, |s| s.history().active_len())
        .await
        .unwrap();
    assert_eq!(history_len, 1);
}

#[tokio::test]
async fn conflict_keep_mine_wins_as_fresh_write() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;

    manager
        .submit(&session_id, &UserId::from("alice"), set_cell(1, 1, "First Edit"), 0)
        .await
        .unwrap();
    manager
        .submit(&session_id, &bob.user, set_cell(1, 1, "Second Edit"), 50)
        .await
        .unwrap();
    manager
        .resolve_conflict(&session_id, &bob.user, 1, 1, ConflictChoice::KeepMine)
        .await
        .unwrap();

    assert_eq!(cell_value(&manager, &session_id, 1, 1).await, "Second Edit");
    let history_len = manager
        .with_session(&session_id, |s| s.history().active_len())
        .await
        .unwrap();
    assert_eq!(history_len, 2);
}

#[tokio::test]
async fn concurrent_same_cell_writes_yield_exactly_one_conflict_record() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;
    let carol = join_session(&manager, &session_id, "carol", Role::Editor).await;

    manager
        .submit(&session_id, &UserId::from("alice"), set_cell(2, 2, "a"), 0)
        .await
        .unwrap();
    let second = manager
        .submit(&session_id, &bob.user, set_cell(2, 2, "b"), 1)
        .await
        .unwrap();
    let third = manager
        .submit(&session_id, &carol.user, set_cell(2, 2, "c"), 2)
        .await
        .unwrap();

    assert!(matches!(second, SubmitOutcome::ConflictPending { .. }));
    let record = match third {
        SubmitOutcome::ConflictPending { record } => record,
        other => panic!("expected conflict, got {:?}", other),
    };
    // The third writer joined the existing record instead of opening a
    // second one.
    assert_eq!(record.candidates.len(), 3);

    let pending = manager
        .with_session(&session_id, |s| s.pending_conflict(2, 2).cloned())
        .await
        .unwrap();
    assert!(pending.is_some());
}

// ========== Scenario C ==========

#[tokio::test]
async fn scenario_c_read_only_mutations_denied() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::ReadOnly).await;

    let before = manager
        .with_session(&session_id, |s| s.grid().clone())
        .await
        .unwrap();

    for intent in [
        set_cell(0, 0, "hack"),
        Intent::InsertRow { at: 0 },
        Intent::DeleteRow { at: 0 },
        Intent::InsertCol { at: 0 },
        Intent::DeleteCol { at: 0 },
        Intent::Revert { seq: 0 },
    ] {
        let err = manager
            .submit(&session_id, &bob.user, intent, 0)
            .await
            .unwrap_err();
        assert!(
            matches!(err, SessionError::PermissionDenied { role: Role::ReadOnly, .. }),
            "unexpected error: {:?}",
            err
        );
    }

    let after = manager
        .with_session(&session_id, |s| s.grid().clone())
        .await
        .unwrap();
    assert_eq!(before, after);

    // Presence is still allowed for read-only members.
    manager
        .update_cursor(&session_id, &bob.user, Some(grid_model::CellRef::new(0, 0)))
        .await
        .unwrap();
}

// ========== Scenario D ==========

#[tokio::test]
async fn scenario_d_deleting_sole_row_rejected() {
    let manager = SessionManager::new(ManagerConfig {
        session: SessionConfig {
            default_rows: 1,
            default_cols: 3,
            ..Default::default()
        },
        ..Default::default()
    });
    let (tx, _rx) = mpsc::unbounded_channel();
    let join = manager
        .create_session(
            UserId::from("alice"),
            "alice".to_string(),
            "single row".to_string(),
            CreateSessionOptions::default(),
            tx,
        )
        .await
        .unwrap();

    let err = manager
        .submit(
            &join.session_id,
            &UserId::from("alice"),
            Intent::DeleteRow { at: 0 },
            0,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "structural_limit");

    let rows = manager
        .with_session(&join.session_id, |s| s.grid().row_count())
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

// ========== Replay and revert laws ==========

#[tokio::test]
async fn replay_in_seq_order_reproduces_grid() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;
    let alice = UserId::from("alice");

    // Distinct cells, so no write lands inside another's window.
    let edits: Vec<(UserId, Intent)> = vec![
        (alice.clone(), set_cell(0, 0, "id")),
        (bob.user.clone(), set_cell(0, 1, "int")),
        (alice.clone(), Intent::InsertRow { at: 1 }),
        (bob.user.clone(), set_cell(1, 0, "name")),
        (alice.clone(), Intent::DeleteCol { at: 3 }),
        (bob.user.clone(), set_cell(1, 1, "string")),
        (alice.clone(), Intent::InsertCol { at: 0 }),
    ];
    for (user, intent) in edits {
        manager
            .submit(&session_id, &user, intent, 0)
            .await
            .unwrap();
    }

    let (grid, initial, entries) = manager
        .with_session(&session_id, |session| {
            (
                session.grid().clone(),
                session.history().initial().clone(),
                session
                    .history()
                    .active_entries()
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .unwrap();

    let (replayed, faults) = replay(&initial, entries.iter());
    assert!(faults.is_empty());
    assert_eq!(replayed, grid);
}

#[tokio::test]
async fn revert_then_tail_replay_round_trips() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let alice = UserId::from("alice");

    for (i, intent) in [
        set_cell(0, 0, "id"),
        set_cell(0, 1, "int"),
        Intent::InsertRow { at: 1 },
        set_cell(1, 0, "name"),
    ]
    .into_iter()
    .enumerate()
    {
        let outcome = manager
            .submit(&session_id, &alice, intent, i as u64)
            .await
            .unwrap();
        assert!(matches!(outcome, SubmitOutcome::Applied { .. }));
    }

    let (pre_revert_grid, tail) = manager
        .with_session(&session_id, |session| {
            (
                session.grid().clone(),
                session
                    .history()
                    .active_entries()
                    .filter(|entry| entry.seq > 2)
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .unwrap();

    let outcome = manager
        .submit(&session_id, &alice, Intent::Revert { seq: 2 }, 99)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        SubmitOutcome::Applied {
            delta: GridDelta::Reverted { target_seq: 2, .. },
            ..
        }
    ));

    let reverted_snapshot = manager
        .with_session(&session_id, |session| session.grid().snapshot())
        .await
        .unwrap();

    // Replaying the discarded tail over the reverted state reproduces
    // the pre-revert grid exactly.
    let (round_tripped, faults) = replay(&reverted_snapshot, tail.iter());
    assert!(faults.is_empty());
    assert_eq!(round_tripped, pre_revert_grid);
}

#[tokio::test]
async fn tail_replay_over_shrunken_grid_reports_faults() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let alice = UserId::from("alice");

    // Row 4 exists only after the insert; the write to it is the tail.
    manager
        .submit(&session_id, &alice, Intent::InsertRow { at: 4 }, 0)
        .await
        .unwrap();
    manager
        .submit(&session_id, &alice, set_cell(4, 0, "ghost"), 1)
        .await
        .unwrap();

    let tail = manager
        .with_session(&session_id, |session| {
            session
                .history()
                .active_entries()
                .filter(|entry| entry.seq >= 2)
                .cloned()
                .collect::<Vec<_>>()
        })
        .await
        .unwrap();

    // Rewind everything, then shrink the grid below the tail's target.
    manager
        .submit(&session_id, &alice, Intent::Revert { seq: 0 }, 2)
        .await
        .unwrap();
    let shrunken = manager
        .with_session(&session_id, |session| session.grid().snapshot())
        .await
        .unwrap();

    let (_grid, faults) = replay(&shrunken, tail.iter());
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].seq, 2);
    assert!(faults[0].error.is_out_of_range());
}

#[tokio::test]
async fn revert_target_in_discarded_tail_not_found() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let alice = UserId::from("alice");

    manager
        .submit(&session_id, &alice, set_cell(0, 0, "a"), 0)
        .await
        .unwrap();
    manager
        .submit(&session_id, &alice, set_cell(0, 0, "b"), 1)
        .await
        .unwrap();
    manager
        .submit(&session_id, &alice, Intent::Revert { seq: 1 }, 2)
        .await
        .unwrap();

    let err = manager
        .submit(&session_id, &alice, Intent::Revert { seq: 2 }, 3)
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::RevertTargetNotFound(2));
}

// ========== Presence and membership ==========

#[tokio::test]
async fn presence_updates_reach_other_members_only() {
    let manager = SessionManager::default();
    let (session_id, mut alice) = create_session(&manager, "alice").await;
    let mut bob = join_session(&manager, &session_id, "bob", Role::Editor).await;
    alice.drain();
    bob.drain();

    manager
        .update_cursor(&session_id, &alice.user, Some(grid_model::CellRef::new(2, 3)))
        .await
        .unwrap();

    let bob_messages = bob.drain();
    assert!(bob_messages.iter().any(|message| matches!(
        message,
        ServerMessage::PresenceUpdate {
            cursor: Some(cursor),
            ..
        } if cursor.row == 2 && cursor.col == 3
    )));
    // The originator does not hear their own cursor echoed back.
    assert!(alice.drain().is_empty());
}

#[tokio::test]
async fn disconnect_then_rejoin_keeps_role() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    join_session(&manager, &session_id, "bob", Role::Editor).await;

    manager
        .disconnect(&session_id, &UserId::from("bob"))
        .await
        .unwrap();

    // Rejoin requesting read-only: the recorded editor role wins.
    let (tx, _rx) = mpsc::unbounded_channel();
    let join = manager
        .join_session(
            &session_id,
            UserId::from("bob"),
            "bob".to_string(),
            Role::ReadOnly,
            tx,
        )
        .await
        .unwrap();
    assert_eq!(join.role, Role::Editor);
}

#[tokio::test]
async fn membership_and_role_broadcasts() {
    let manager = SessionManager::default();
    let (session_id, mut alice) = create_session(&manager, "alice").await;
    let mut bob = join_session(&manager, &session_id, "bob", Role::ReadOnly).await;

    let joined = alice.drain();
    assert!(joined.iter().any(|message| matches!(
        message,
        ServerMessage::MemberJoined { member } if member.user_id == UserId::from("bob")
    )));

    manager
        .set_role(&session_id, &alice.user, &bob.user, Role::Editor)
        .await
        .unwrap();
    assert!(bob.drain().iter().any(|message| matches!(
        message,
        ServerMessage::RoleChanged { role: Role::Editor, .. }
    )));

    manager
        .leave_session(&session_id, &bob.user)
        .await
        .unwrap();
    assert!(alice.drain().iter().any(|message| matches!(
        message,
        ServerMessage::MemberLeft { user_id } if *user_id == UserId::from("bob")
    )));
}

#[tokio::test]
async fn non_owner_cannot_manage() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;

    assert!(matches!(
        manager
            .set_role(&session_id, &bob.user, &UserId::from("alice"), Role::ReadOnly)
            .await,
        Err(SessionError::Forbidden(_))
    ));
    assert!(matches!(
        manager
            .kick(&session_id, &bob.user, &UserId::from("alice"))
            .await,
        Err(SessionError::Forbidden(_))
    ));
    assert!(matches!(
        manager.close_session(&session_id, &bob.user).await,
        Err(SessionError::Forbidden(_))
    ));
}

#[tokio::test]
async fn close_notifies_members_and_unregisters() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let mut bob = join_session(&manager, &session_id, "bob", Role::Editor).await;
    bob.drain();

    manager
        .close_session(&session_id, &UserId::from("alice"))
        .await
        .unwrap();

    assert!(bob.drain().iter().any(|message| matches!(
        message,
        ServerMessage::SessionClosed { .. }
    )));
    assert!(matches!(
        manager
            .submit(&session_id, &bob.user, set_cell(0, 0, "x"), 0)
            .await,
        Err(SessionError::SessionNotFound(_))
    ));
}

// ========== Cross-session independence ==========

#[tokio::test]
async fn sessions_progress_independently() {
    let manager = std::sync::Arc::new(SessionManager::default());
    let (first, _a) = create_session(&manager, "alice").await;
    let (second, _b) = create_session(&manager, "bob").await;

    // Mutations to distinct sessions run concurrently and neither
    // blocks nor sees the other.
    let m1 = std::sync::Arc::clone(&manager);
    let m2 = std::sync::Arc::clone(&manager);
    let first_clone = first.clone();
    let second_clone = second.clone();
    let (r1, r2) = tokio::join!(
        tokio::spawn(async move {
            m1.submit(
                &first_clone,
                &UserId::from("alice"),
                set_cell(0, 0, "left"),
                0,
            )
            .await
        }),
        tokio::spawn(async move {
            m2.submit(
                &second_clone,
                &UserId::from("bob"),
                set_cell(0, 0, "right"),
                0,
            )
            .await
        }),
    );
    assert!(matches!(r1.unwrap().unwrap(), SubmitOutcome::Applied { seq: 1, .. }));
    assert!(matches!(r2.unwrap().unwrap(), SubmitOutcome::Applied { seq: 1, .. }));

    assert_eq!(cell_value(&manager, &first, 0, 0).await, "left");
    assert_eq!(cell_value(&manager, &second, 0, 0).await, "right");
}

// ========== Ordering under contention ==========

#[tokio::test]
async fn submits_to_one_session_are_totally_ordered() {
    let manager = std::sync::Arc::new(SessionManager::default());
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let bob = join_session(&manager, &session_id, "bob", Role::Editor).await;

    // Hammer different cells from two tasks; sequence numbers must come
    // out dense and unique.
    let m1 = std::sync::Arc::clone(&manager);
    let m2 = std::sync::Arc::clone(&manager);
    let s1 = session_id.clone();
    let s2 = session_id.clone();
    let bob_user = bob.user.clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move {
            let mut seqs = Vec::new();
            for i in 0..10 {
                if let SubmitOutcome::Applied { seq, .. } = m1
                    .submit(&s1, &UserId::from("alice"), set_cell(0, i % 4, "a"), i as u64)
                    .await
                    .unwrap()
                {
                    seqs.push(seq);
                }
            }
            seqs
        }),
        tokio::spawn(async move {
            let mut seqs = Vec::new();
            for i in 0..10 {
                if let SubmitOutcome::Applied { seq, .. } = m2
                    .submit(&s2, &bob_user, set_cell(1, i % 4, "b"), i as u64)
                    .await
                    .unwrap()
                {
                    seqs.push(seq);
                }
            }
            seqs
        }),
    );

    let mut all: Vec<u64> = a.unwrap().into_iter().chain(b.unwrap()).collect();
    all.sort_unstable();
    assert_eq!(all, (1..=20).collect::<Vec<u64>>());

    // And replay of that order reproduces the final grid.
    let (grid, initial, entries) = manager
        .with_session(&session_id, |session| {
            (
                session.grid().clone(),
                session.history().initial().clone(),
                session
                    .history()
                    .active_entries()
                    .cloned()
                    .collect::<Vec<_>>(),
            )
        })
        .await
        .unwrap();
    let (replayed, faults) = replay(&initial, entries.iter());
    assert!(faults.is_empty());
    assert_eq!(replayed, grid);
}

// ========== Snapshot boundary ==========

#[tokio::test]
async fn join_snapshot_matches_grid_without_replay() {
    let manager = SessionManager::default();
    let (session_id, _alice) = create_session(&manager, "alice").await;
    let alice = UserId::from("alice");

    manager
        .submit(&session_id, &alice, set_cell(0, 0, "id"), 0)
        .await
        .unwrap();
    manager
        .submit(&session_id, &alice, Intent::InsertRow { at: 1 }, 1)
        .await
        .unwrap();

    let (tx, _rx) = mpsc::unbounded_channel();
    let join = manager
        .join_session(
            &session_id,
            UserId::from("carol"),
            "carol".to_string(),
            Role::ReadOnly,
            tx,
        )
        .await
        .unwrap();

    assert_eq!(join.history_len, 2);
    assert_eq!(join.last_seq, 2);
    assert_eq!(join.members.len(), 2);
    let from_snapshot = Grid::from_snapshot(&join.snapshot);
    let grid = manager
        .with_session(&session_id, |session| session.grid().clone())
        .await
        .unwrap();
    assert_eq!(from_snapshot, grid);
}
