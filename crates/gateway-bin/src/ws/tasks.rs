//! Read-only task-run streaming.
//!
//! `GET /ws/tasks?runId=…` streams a run's buffered output followed by live
//! events; the socket closes once the run finishes. Client frames are
//! ignored apart from close.

use crate::app::AppState;
use crate::http::identify_request;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use task_runner::{RunState, TaskEvent};
use terminal_proto::close_code;
use tokio::sync::broadcast;
use tracing::debug;

/// `GET /ws/tasks?runId=…` (upgrade).
pub async fn ws_tasks(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let setup = match identify_request(&state, &headers, query.get("email").map(String::as_str))
        .await
    {
        Err(_) => Err((close_code::UNAUTHORIZED, "unauthorized")),
        Ok(_user) => match query.get("runId") {
            None => Err((close_code::BAD_REQUEST, "missing runId")),
            Some(run_id) => Ok(run_id.clone()),
        },
    };

    ws.on_upgrade(move |socket| handle_socket(socket, setup, state))
}

async fn handle_socket(
    socket: WebSocket,
    setup: Result<String, (u16, &'static str)>,
    state: AppState,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let run_id = match setup {
        Ok(run_id) => run_id,
        Err((code, reason)) => {
            close(&mut ws_tx, code, reason).await;
            return;
        }
    };

    let (snapshot, mut events) = match state.tasks.subscribe(&run_id) {
        Ok(subscription) => subscription,
        Err(_) => {
            close(&mut ws_tx, close_code::NOT_FOUND, "unknown runId").await;
            return;
        }
    };

    // Backfill the buffered output, then live-stream until the run ends.
    if !snapshot.output.is_empty() {
        let frame = json!({ "type": "output", "data": snapshot.output }).to_string();
        if ws_tx.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }
    if snapshot.state != RunState::Running {
        let _ = ws_tx
            .send(Message::Text(status_frame(snapshot.state, snapshot.exit_code)))
            .await;
        close(&mut ws_tx, 1000, "run finished").await;
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(TaskEvent::Output(data)) => {
                        let frame = json!({ "type": "output", "data": data }).to_string();
                        if ws_tx.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    Ok(TaskEvent::Status { state: run_state, exit_code }) => {
                        let _ = ws_tx
                            .send(Message::Text(status_frame(run_state, exit_code)))
                            .await;
                        close(&mut ws_tx, 1000, "run finished").await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(run_id = %run_id, skipped, "Task stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Read-only stream: everything else is ignored.
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

fn status_frame(state: RunState, exit_code: Option<i32>) -> String {
    json!({
        "type": "status",
        "state": state,
        "exitCode": exit_code,
    })
    .to_string()
}

async fn close(ws_tx: &mut SplitSink<WebSocket, Message>, code: u16, reason: &'static str) {
    let _ = ws_tx
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: reason.into(),
        })))
        .await;
}
