//! The terminal WebSocket endpoint.
//!
//! One socket is one client. Frames are handled sequentially per socket;
//! outbound frames flow through the client's bounded queue so fan-out from
//! the session manager never blocks on a slow socket. The server emits a
//! `pong` heartbeat every 30 seconds and drops clients that stay silent
//! across two of them.

use crate::app::{ensure_session_workdir, AppState, VerifiedUser};
use crate::http::identify_request;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use gateway_config::AuditEvent;
use session_core::{CreateSessionParams, SessionError, CLIENT_QUEUE_CAPACITY};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use terminal_proto::{close_code, ClientFrame, ServerFrame, MAX_FRAME_BYTES};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Connection context established before the upgrade completes.
struct SocketContext {
    user: VerifiedUser,
    repo_id: String,
    repo_root: PathBuf,
}

enum FrameOutcome {
    Continue,
    Close(u16, &'static str),
}

/// `GET /ws/claude?repoId=…` (upgrade).
pub async fn ws_terminal(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    // Resolve identity and repo before accepting; failures still upgrade so
    // the browser receives a protocol close code instead of an HTTP error.
    let setup = match identify_request(&state, &headers, query.get("email").map(String::as_str))
        .await
    {
        Err(_) => Err((close_code::UNAUTHORIZED, "unauthorized")),
        Ok(user) => match query.get("repoId") {
            None => Err((close_code::BAD_REQUEST, "missing repoId")),
            Some(repo_id) => match state.registry.resolve(repo_id) {
                Err(_) => Err((close_code::NOT_FOUND, "unknown repoId")),
                Ok(repo_root) => Ok(SocketContext {
                    user,
                    repo_id: repo_id.clone(),
                    repo_root,
                }),
            },
        },
    };

    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| handle_socket(socket, setup, state))
}

async fn handle_socket(
    socket: WebSocket,
    setup: Result<SocketContext, (u16, &'static str)>,
    state: AppState,
) {
    let context = match setup {
        Ok(context) => context,
        Err((code, reason)) => {
            close_with(socket, code, reason).await;
            return;
        }
    };

    let client_id = Uuid::new_v4().to_string();
    let (frame_tx, mut frame_rx) = mpsc::channel::<ServerFrame>(CLIENT_QUEUE_CAPACITY);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let mut session_id: Option<String> = None;
    let mut saw_client_frame = true;
    let mut missed_heartbeats = 0u32;
    let mut close: Option<(u16, &'static str)> = None;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await; // the immediate first tick

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        saw_client_frame = true;
                        let outcome = handle_client_frame(
                            &state,
                            &context,
                            &client_id,
                            &frame_tx,
                            &mut session_id,
                            &text,
                        )
                        .await;
                        if let FrameOutcome::Close(code, reason) = outcome {
                            close = Some((code, reason));
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        saw_client_frame = true;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        saw_client_frame = true;
                        let _ = frame_tx.try_send(ServerFrame::error("binary frames not accepted"));
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                }
            }

            outgoing = frame_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        let Ok(json) = frame.to_json() else { continue };
                        if ws_tx.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    // The manager dropped our sender (stalled-queue detach).
                    None => break,
                }
            }

            _ = heartbeat.tick() => {
                if saw_client_frame {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        close = Some((close_code::PING_TIMEOUT, "ping timeout"));
                        break;
                    }
                }
                saw_client_frame = false;
                if ws_tx.send(Message::Text(ServerFrame::Pong.to_json().unwrap_or_default())).await.is_err() {
                    break;
                }
            }
        }
    }

    // Detach exactly once; the reap timer takes over from here.
    if let Some(session_id) = &session_id {
        state.sessions.detach(session_id, &client_id);
    }

    if let Some((code, reason)) = close {
        let _ = ws_tx
            .send(Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })))
            .await;
    }

    debug!(client_id = %client_id, "Terminal socket closed");
}

/// Handle one client frame. Malformed frames produce a single `error`
/// response and leave the socket open.
async fn handle_client_frame(
    state: &AppState,
    context: &SocketContext,
    client_id: &str,
    frame_tx: &mpsc::Sender<ServerFrame>,
    session_id: &mut Option<String>,
    text: &str,
) -> FrameOutcome {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(_) => {
            let _ = frame_tx.try_send(ServerFrame::error("malformed frame"));
            return FrameOutcome::Continue;
        }
    };
    if let Err(err) = frame.validate() {
        let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
        return FrameOutcome::Continue;
    }

    match frame {
        ClientFrame::Attach {
            session_id: requested,
            cols,
            rows,
            branch,
        } => {
            if session_id.is_some() {
                let _ = frame_tx.try_send(ServerFrame::error("already attached"));
                return FrameOutcome::Continue;
            }

            match requested {
                Some(requested_id) => {
                    let dims = cols.zip(rows);
                    match state.sessions.attach(
                        &requested_id,
                        &context.user.email,
                        &context.repo_id,
                        client_id,
                        frame_tx.clone(),
                        dims,
                    ) {
                        Ok(session) => {
                            *session_id = Some(session.id.clone());
                            FrameOutcome::Continue
                        }
                        Err(SessionError::SessionNotFound(_) | SessionError::NotOwner) => {
                            FrameOutcome::Close(close_code::NOT_FOUND, "unknown sessionId")
                        }
                        Err(err) => {
                            let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
                            FrameOutcome::Continue
                        }
                    }
                }
                None => {
                    let workdir = match ensure_session_workdir(
                        &state.repo_locks,
                        &context.repo_root,
                        &context.user.email,
                        branch.as_deref(),
                    )
                    .await
                    {
                        Ok(workdir) => workdir,
                        Err(err) => {
                            let _ = frame_tx.try_send(ServerFrame::error(err.message));
                            return FrameOutcome::Continue;
                        }
                    };

                    let params = CreateSessionParams {
                        user_email: context.user.email.clone(),
                        repo_id: context.repo_id.clone(),
                        branch,
                        workdir,
                        name: None,
                        cols,
                        rows,
                    };

                    match state
                        .sessions
                        .attach_new(params, client_id, frame_tx.clone())
                    {
                        Ok(session) => {
                            state.audit.record(
                                AuditEvent::new(&context.user.email, "session.create")
                                    .repo(&context.repo_id)
                                    .detail(session.id.clone()),
                            );
                            *session_id = Some(session.id.clone());
                            FrameOutcome::Continue
                        }
                        Err(err) => {
                            warn!(error = %err, "Session creation over WS failed");
                            let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
                            FrameOutcome::Continue
                        }
                    }
                }
            }
        }

        ClientFrame::Input { data } => {
            let Some(session_id) = session_id.as_deref() else {
                let _ = frame_tx.try_send(ServerFrame::error("Not attached"));
                return FrameOutcome::Continue;
            };
            if let Err(err) = state.sessions.input(session_id, data.into_bytes()).await {
                let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
            }
            FrameOutcome::Continue
        }

        ClientFrame::Resize { cols, rows } => {
            let Some(session_id) = session_id.as_deref() else {
                let _ = frame_tx.try_send(ServerFrame::error("Not attached"));
                return FrameOutcome::Continue;
            };
            if let Err(err) = state.sessions.resize(session_id, cols, rows) {
                let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
            }
            FrameOutcome::Continue
        }

        ClientFrame::Restart => {
            let Some(session_id) = session_id.as_deref() else {
                let _ = frame_tx.try_send(ServerFrame::error("Not attached"));
                return FrameOutcome::Continue;
            };
            if let Err(err) = state.sessions.restart(session_id) {
                let _ = frame_tx.try_send(ServerFrame::error(err.to_string()));
            }
            FrameOutcome::Continue
        }

        ClientFrame::Ping => {
            let _ = frame_tx.try_send(ServerFrame::Pong);
            FrameOutcome::Continue
        }
    }
}

async fn close_with(mut socket: WebSocket, code: u16, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
