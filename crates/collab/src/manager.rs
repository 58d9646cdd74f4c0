//! The session registry and request router.
//!
//! `SessionManager` owns every live session. It is an explicit instance
//! constructed once at process start and passed by handle to every
//! caller; there is no ambient global registry. Each session sits behind
//! its own `tokio::sync::Mutex`, which is the single serialization point
//! the concurrency model requires: all mutating intents for one session
//! execute strictly one at a time, while intents for different sessions
//! proceed independently and in parallel. A `submit` holds the lock only
//! until its own intent is ordered and applied; broadcast delivery is
//! fire-and-forget through the member channels and is never awaited.

use crate::broadcast::ServerMessage;
use crate::conflict::ConflictChoice;
use crate::error::{SessionError, SessionResult};
use crate::ids::{SessionId, UserId};
use crate::operation::Intent;
use crate::permissions::Role;
use crate::schema::{InMemorySchemaStore, SchemaStore};
use crate::session::{JoinInfo, Session, SessionConfig, SessionInfo, SubmitOutcome};
use grid_model::{CellRange, CellRef, Grid, GridSnapshot};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};

/// Configuration for the session manager.
#[derive(Clone, Debug)]
pub struct ManagerConfig {
    /// Defaults applied to every new session.
    pub session: SessionConfig,
    /// Maximum number of live sessions.
    pub max_sessions: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            max_sessions: 1000,
        }
    }
}

/// Options for creating a session.
#[derive(Clone, Debug, Default)]
pub struct CreateSessionOptions {
    /// Start from a stored schema instead of an empty grid. Creation
    /// fails with a not-found error when the id is unknown.
    pub schema: Option<String>,
    /// Dimensions for the empty grid when no schema is given; the
    /// session config defaults apply when unset.
    pub rows: Option<usize>,
    pub cols: Option<usize>,
}

/// Owns the set of live sessions and routes every client request to the
/// right one.
pub struct SessionManager {
    config: ManagerConfig,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
    schemas: Arc<dyn SchemaStore>,
}

impl SessionManager {
    /// Create a manager with an empty in-memory schema store.
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_schema_store(config, Arc::new(InMemorySchemaStore::new()))
    }

    /// Create a manager over an external schema source.
    pub fn with_schema_store(config: ManagerConfig, schemas: Arc<dyn SchemaStore>) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            schemas,
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Create a session and join its creator as the owner.
    ///
    /// The creator's transport channel is attached immediately so the
    /// first broadcasts are not lost.
    pub async fn create_session(
        &self,
        owner: UserId,
        display_name: String,
        name: String,
        options: CreateSessionOptions,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionResult<JoinInfo> {
        let initial = self.initial_snapshot(&options)?;

        let mut sessions = self.sessions.write().await;
        if sessions.len() >= self.config.max_sessions {
            warn!(max = self.config.max_sessions, "session limit reached");
            return Err(SessionError::SessionLimitReached(self.config.max_sessions));
        }

        let session_id = SessionId::generate();
        let mut session = Session::new(
            session_id.clone(),
            name.clone(),
            owner.clone(),
            &initial,
            self.config.session.clone(),
        );
        let join = session.join(owner.clone(), display_name, Role::Owner, sender)?;
        sessions.insert(session_id.clone(), Arc::new(Mutex::new(session)));

        info!(%session_id, %owner, %name, "session created");
        Ok(join)
    }

    fn initial_snapshot(&self, options: &CreateSessionOptions) -> SessionResult<GridSnapshot> {
        if let Some(schema_id) = &options.schema {
            return self
                .schemas
                .load(schema_id)
                .ok_or_else(|| SessionError::SchemaNotFound(schema_id.clone()));
        }
        let rows = options.rows.unwrap_or(self.config.session.default_rows);
        let cols = options.cols.unwrap_or(self.config.session.default_cols);
        Ok(Grid::new(rows, cols).snapshot())
    }

    /// Join a user into a session, attaching their transport channel.
    pub async fn join_session(
        &self,
        session_id: &SessionId,
        user: UserId,
        display_name: String,
        requested_role: Role,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> SessionResult<JoinInfo> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        debug!(%session_id, %user, "join");
        session.join(user, display_name, requested_role, sender)
    }

    /// Explicitly leave a session, dropping the member record.
    pub async fn leave_session(&self, session_id: &SessionId, user: &UserId) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        debug!(%session_id, %user, "leave");
        session.leave(user)
    }

    /// Report a transport loss. The member record persists for
    /// reconnection.
    pub async fn disconnect(&self, session_id: &SessionId, user: &UserId) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        debug!(%session_id, %user, "disconnect");
        session.disconnect(user)
    }

    /// Submit a mutating intent. The single mutation entry point.
    pub async fn submit(
        &self,
        session_id: &SessionId,
        user: &UserId,
        intent: Intent,
        client_timestamp_ms: u64,
    ) -> SessionResult<SubmitOutcome> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.submit(user, intent, client_timestamp_ms)
    }

    /// Resolve a pending conflict.
    pub async fn resolve_conflict(
        &self,
        session_id: &SessionId,
        user: &UserId,
        row: usize,
        col: usize,
        choice: ConflictChoice,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.resolve_conflict(user, row, col, choice).map(|_| ())
    }

    /// Move a member's cursor. Applied immediately; presence does not
    /// contend with the mutation order.
    pub async fn update_cursor(
        &self,
        session_id: &SessionId,
        user: &UserId,
        cursor: Option<CellRef>,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.update_cursor(user, cursor)
    }

    /// Replace a member's selection.
    pub async fn update_selection(
        &self,
        session_id: &SessionId,
        user: &UserId,
        selection: Option<CellRange>,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.update_selection(user, selection)
    }

    /// Change a member's role. Owner only.
    pub async fn set_role(
        &self,
        session_id: &SessionId,
        requester: &UserId,
        target: &UserId,
        role: Role,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.set_role(requester, target, role)
    }

    /// Remove a member. Owner only.
    pub async fn kick(
        &self,
        session_id: &SessionId,
        requester: &UserId,
        target: &UserId,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        let mut session = session.lock().await;
        session.kick(requester, target)
    }

    /// Close a session. Owner only. The record is removed from the
    /// registry right away.
    pub async fn close_session(
        &self,
        session_id: &SessionId,
        requester: &UserId,
    ) -> SessionResult<()> {
        let session = self.session(session_id).await?;
        {
            let mut session = session.lock().await;
            session.close(requester)?;
        }
        self.sessions.write().await.remove(session_id);
        info!(%session_id, %requester, "session closed");
        Ok(())
    }

    /// Metadata for every live session, for read-only listings.
    pub async fn list_sessions(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos = Vec::with_capacity(sessions.len());
        for session in sessions.values() {
            infos.push(session.lock().await.info());
        }
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        infos
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Reap sessions that are closed or have sat without a single
    /// connected member past their TTL. Returns the reaped ids.
    pub async fn cleanup_sessions(&self) -> Vec<SessionId> {
        let now = current_timestamp_ms();
        let mut sessions = self.sessions.write().await;
        let mut reaped = Vec::new();
        for (id, session) in sessions.iter() {
            if session.lock().await.should_reap(now) {
                reaped.push(id.clone());
            }
        }
        for id in &reaped {
            sessions.remove(id);
            info!(session_id = %id, "session reaped");
        }
        reaped
    }

    /// Run `f` under a session's lock. This is the escape hatch for
    /// read-only consumers that need more than [`SessionInfo`]; they must
    /// not mutate the grid through it.
    pub async fn with_session<T>(
        &self,
        session_id: &SessionId,
        f: impl FnOnce(&Session) -> T,
    ) -> SessionResult<T> {
        let session = self.session(session_id).await?;
        let session = session.lock().await;
        Ok(f(&session))
    }

    async fn session(&self, session_id: &SessionId) -> SessionResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| SessionError::SessionNotFound(session_id.clone()))
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

/// Get the current timestamp in milliseconds since epoch.
fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel() -> (
        mpsc::UnboundedSender<ServerMessage>,
        mpsc::UnboundedReceiver<ServerMessage>,
    ) {
        mpsc::unbounded_channel()
    }

    async fn create(manager: &SessionManager, owner: &str) -> SessionId {
        let (tx, _rx) = channel();
        manager
            .create_session(
                UserId::from(owner),
                owner.to_string(),
                "schema".to_string(),
                CreateSessionOptions::default(),
                tx,
            )
            .await
            .unwrap()
            .session_id
    }

    #[tokio::test]
    async fn test_create_assigns_owner_role() {
        let manager = SessionManager::default();
        let (tx, _rx) = channel();
        let info = manager
            .create_session(
                UserId::from("alice"),
                "alice".to_string(),
                "orders".to_string(),
                CreateSessionOptions::default(),
                tx,
            )
            .await
            .unwrap();
        assert_eq!(info.role, Role::Owner);
        assert_eq!(manager.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_from_missing_schema_fails() {
        let manager = SessionManager::default();
        let (tx, _rx) = channel();
        let err = manager
            .create_session(
                UserId::from("alice"),
                "alice".to_string(),
                "orders".to_string(),
                CreateSessionOptions {
                    schema: Some("no-such-schema".to_string()),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SchemaNotFound("no-such-schema".to_string()));
        assert_eq!(manager.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_from_stored_schema() {
        let store = Arc::new(InMemorySchemaStore::new());
        store.insert(
            "customer",
            GridSnapshot::from_values(vec![vec!["id".to_string(), "int".to_string()]]),
        );
        let manager = SessionManager::with_schema_store(ManagerConfig::default(), store);

        let (tx, _rx) = channel();
        let info = manager
            .create_session(
                UserId::from("alice"),
                "alice".to_string(),
                "customer".to_string(),
                CreateSessionOptions {
                    schema: Some("customer".to_string()),
                    ..Default::default()
                },
                tx,
            )
            .await
            .unwrap();
        assert_eq!(info.snapshot.cells[0][0].value, "id");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let manager = SessionManager::default();
        let err = manager
            .submit(
                &SessionId::from("missing"),
                &UserId::from("alice"),
                Intent::InsertRow { at: 0 },
                0,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_session_limit() {
        let manager = SessionManager::new(ManagerConfig {
            max_sessions: 1,
            ..Default::default()
        });
        create(&manager, "alice").await;

        let (tx, _rx) = channel();
        let err = manager
            .create_session(
                UserId::from("bob"),
                "bob".to_string(),
                "another".to_string(),
                CreateSessionOptions::default(),
                tx,
            )
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SessionLimitReached(1));
    }

    #[tokio::test]
    async fn test_submit_routes_to_right_session() {
        let manager = SessionManager::default();
        let first = create(&manager, "alice").await;
        let second = create(&manager, "bob").await;

        manager
            .submit(
                &first,
                &UserId::from("alice"),
                Intent::SetCell {
                    row: 0,
                    col: 0,
                    value: "only-here".to_string(),
                },
                0,
            )
            .await
            .unwrap();

        let first_value = manager
            .with_session(&first, |s| s.grid().cell(0, 0).unwrap().value.clone())
            .await
            .unwrap();
        let second_value = manager
            .with_session(&second, |s| s.grid().cell(0, 0).unwrap().value.clone())
            .await
            .unwrap();
        assert_eq!(first_value, "only-here");
        assert_eq!(second_value, "");
    }

    #[tokio::test]
    async fn test_close_session_removes_registration() {
        let manager = SessionManager::default();
        let id = create(&manager, "alice").await;

        manager
            .close_session(&id, &UserId::from("alice"))
            .await
            .unwrap();
        assert_eq!(manager.session_count().await, 0);
        assert!(matches!(
            manager.join_session(
                &id,
                UserId::from("bob"),
                "bob".to_string(),
                Role::Editor,
                channel().0
            )
            .await,
            Err(SessionError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_cleanup_reaps_only_idle_empty_sessions() {
        let manager = SessionManager::new(ManagerConfig {
            session: SessionConfig {
                empty_session_ttl_ms: 0,
                ..Default::default()
            },
            ..Default::default()
        });
        let idle = create(&manager, "alice").await;
        let busy = create(&manager, "bob").await;

        manager
            .disconnect(&idle, &UserId::from("alice"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let reaped = manager.cleanup_sessions().await;
        assert_eq!(reaped, vec![idle]);
        assert_eq!(manager.session_count().await, 1);
        assert!(manager.with_session(&busy, |_| ()).await.is_ok());
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let manager = SessionManager::default();
        create(&manager, "alice").await;
        create(&manager, "bob").await;

        let infos = manager.list_sessions().await;
        assert_eq!(infos.len(), 2);
        assert!(infos.iter().all(|info| info.member_count == 1));
    }
}
