//! Per-socket connection handling.
//!
//! Each accepted socket runs in its own task: a handshake establishes
//! the client identity, then a read loop decodes wire envelopes into
//! engine calls while a writer task drains pushed engine events and
//! request replies into the socket. Transport loss flips the member to
//! disconnected in every session the connection had joined; it never
//! rolls back operations that were already ordered.

use crate::broadcast::ServerMessage;
use crate::error::SessionError;
use crate::ids::{SessionId, UserId};
use crate::manager::{CreateSessionOptions, SessionManager};
use crate::server::message::{ClientEnvelope, ClientIdentity, ServerEnvelope};
use crate::server::ServerError;
use crate::session::SubmitOutcome;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, warn};

fn encode(envelope: &ServerEnvelope) -> Option<String> {
    match serde_json::to_string(envelope) {
        Ok(text) => Some(text),
        Err(err) => {
            warn!(error = %err, "failed to encode server envelope");
            None
        }
    }
}

/// Drive one client socket to completion.
pub async fn handle_connection(
    stream: TcpStream,
    manager: Arc<SessionManager>,
    hello_timeout: Duration,
) -> Result<(), ServerError> {
    let mut ws = accept_async(stream).await?;

    // The first message must identify the client; everything else is
    // rejected at the boundary.
    let first = tokio::time::timeout(hello_timeout, ws.next()).await;
    let identity = match first {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<ClientEnvelope>(&text) {
            Ok(ClientEnvelope::Hello {
                user_id,
                display_name,
            }) => ClientIdentity {
                user_id: UserId(user_id),
                display_name,
            },
            _ => {
                if let Some(text) = encode(&ServerEnvelope::Error {
                    code: "invalid_message".to_string(),
                    message: "expected hello".to_string(),
                }) {
                    let _ = ws.send(Message::Text(text)).await;
                }
                return Ok(());
            }
        },
        _ => {
            debug!("connection dropped before hello");
            return Ok(());
        }
    };
    if let Some(text) = encode(&ServerEnvelope::Welcome {
        user_id: identity.user_id.0.clone(),
    }) {
        ws.send(Message::Text(text)).await?;
    }
    debug!(user = %identity.user_id, "client identified");

    let (mut sink, mut stream) = ws.split();

    // Engine events fan in here from every session this connection
    // joins; replies answer the client's own requests.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerEnvelope>();

    let writer = tokio::spawn(async move {
        loop {
            let envelope = tokio::select! {
                event = event_rx.recv() => match event {
                    Some(message) => ServerEnvelope::Event(message),
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            let Some(text) = encode(&envelope) else { continue };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let mut joined: HashSet<SessionId> = HashSet::new();

    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                debug!(user = %identity.user_id, error = %err, "socket error");
                break;
            }
        };
        match message {
            Message::Text(text) => {
                let reply = match serde_json::from_str::<ClientEnvelope>(&text) {
                    Ok(envelope) => {
                        dispatch(&manager, &identity, &event_tx, &mut joined, envelope).await
                    }
                    Err(err) => ServerEnvelope::Error {
                        code: "invalid_message".to_string(),
                        message: err.to_string(),
                    },
                };
                if reply_tx.send(reply).is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            // Pings are answered by the protocol layer; binary frames
            // are not part of this protocol.
            _ => {}
        }
    }

    // Transport loss: membership and roles persist for reconnection.
    for session_id in &joined {
        let _ = manager.disconnect(session_id, &identity.user_id).await;
    }
    drop(reply_tx);
    drop(event_tx);
    let _ = writer.await;
    debug!(user = %identity.user_id, "connection closed");
    Ok(())
}

/// Translate one decoded client request into an engine call and its
/// reply envelope. Denials and conflicts go to the originator only, as
/// the reply; accepted mutations reach everyone through the broadcaster.
async fn dispatch(
    manager: &SessionManager,
    identity: &ClientIdentity,
    event_tx: &mpsc::UnboundedSender<ServerMessage>,
    joined: &mut HashSet<SessionId>,
    envelope: ClientEnvelope,
) -> ServerEnvelope {
    match envelope {
        ClientEnvelope::Hello { .. } => ServerEnvelope::Error {
            code: "invalid_message".to_string(),
            message: "already identified".to_string(),
        },
        ClientEnvelope::CreateSession {
            name,
            rows,
            cols,
            schema,
        } => {
            let result = manager
                .create_session(
                    identity.user_id.clone(),
                    identity.display_name.clone(),
                    name,
                    CreateSessionOptions { schema, rows, cols },
                    event_tx.clone(),
                )
                .await;
            match result {
                Ok(join) => {
                    joined.insert(join.session_id.clone());
                    ServerEnvelope::Joined { join }
                }
                Err(err) => error_reply(err),
            }
        }
        ClientEnvelope::Join {
            session_id,
            requested_role,
        } => {
            let session_id = SessionId(session_id);
            let result = manager
                .join_session(
                    &session_id,
                    identity.user_id.clone(),
                    identity.display_name.clone(),
                    requested_role,
                    event_tx.clone(),
                )
                .await;
            match result {
                Ok(join) => {
                    joined.insert(session_id);
                    ServerEnvelope::Joined { join }
                }
                Err(err) => error_reply(err),
            }
        }
        ClientEnvelope::Leave { session_id } => {
            let session_id = SessionId(session_id);
            let result = manager.leave_session(&session_id, &identity.user_id).await;
            joined.remove(&session_id);
            reply_unit(result)
        }
        ClientEnvelope::Submit {
            session_id,
            intent,
            client_timestamp_ms,
        } => {
            let session_id = SessionId(session_id);
            match manager
                .submit(&session_id, &identity.user_id, intent, client_timestamp_ms)
                .await
            {
                Ok(SubmitOutcome::Applied { seq, .. }) => ServerEnvelope::Accepted {
                    session_id: session_id.0,
                    seq,
                },
                // The losing writer alone is prompted to resolve.
                Ok(SubmitOutcome::ConflictPending { record }) => {
                    ServerEnvelope::Event(ServerMessage::ConflictDetected { record })
                }
                Err(err) => error_reply(err),
            }
        }
        ClientEnvelope::Cursor { session_id, cursor } => reply_unit(
            manager
                .update_cursor(&SessionId(session_id), &identity.user_id, cursor)
                .await,
        ),
        ClientEnvelope::Selection {
            session_id,
            selection,
        } => reply_unit(
            manager
                .update_selection(&SessionId(session_id), &identity.user_id, selection)
                .await,
        ),
        ClientEnvelope::ResolveConflict {
            session_id,
            row,
            col,
            choice,
        } => reply_unit(
            manager
                .resolve_conflict(&SessionId(session_id), &identity.user_id, row, col, choice)
                .await,
        ),
        ClientEnvelope::SetRole {
            session_id,
            target,
            role,
        } => reply_unit(
            manager
                .set_role(
                    &SessionId(session_id),
                    &identity.user_id,
                    &UserId(target),
                    role,
                )
                .await,
        ),
        ClientEnvelope::Kick { session_id, target } => reply_unit(
            manager
                .kick(&SessionId(session_id), &identity.user_id, &UserId(target))
                .await,
        ),
        ClientEnvelope::CloseSession { session_id } => {
            let session_id = SessionId(session_id);
            let result = manager
                .close_session(&session_id, &identity.user_id)
                .await;
            if result.is_ok() {
                joined.remove(&session_id);
            }
            reply_unit(result)
        }
        ClientEnvelope::Ping { timestamp } => ServerEnvelope::Pong { timestamp },
    }
}

fn reply_unit(result: Result<(), SessionError>) -> ServerEnvelope {
    match result {
        Ok(()) => ServerEnvelope::Ok,
        Err(err) => error_reply(err),
    }
}

/// Permission denials are surfaced as their dedicated message kind so
/// clients render them inline; everything else is a plain error reply.
fn error_reply(err: SessionError) -> ServerEnvelope {
    match err {
        SessionError::PermissionDenied { action, role } => {
            ServerEnvelope::Event(ServerMessage::PermissionDenied { action, role })
        }
        other => ServerEnvelope::from_error(&other),
    }
}
