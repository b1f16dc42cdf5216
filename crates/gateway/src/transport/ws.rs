// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Viewer WebSocket: JSON-framed subscribe/unsubscribe plus live pushes.
//!
//! Backfill is HTTP-first — a viewer fetches `/api/runs/{id}/events?after=`
//! and then subscribes for the live tail; the hub never replays.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::GatewayError;
use crate::hub::ViewerPush;
use crate::state::GatewayState;

/// Server ping cadence; two unanswered pings terminate the socket.
const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_MISSED_PONGS: u8 = 2;

/// Client → gateway frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe {
        #[serde(rename = "runId")]
        run_id: String,
    },
    Unsubscribe {},
    Ping {},
}

/// Gateway → client frames.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Subscribed {
        #[serde(rename = "runId")]
        run_id: String,
    },
    Unsubscribed {},
    Pong {},
    Error {
        code: String,
        message: String,
    },
    Event {
        #[serde(rename = "eventId")]
        event_id: i64,
        #[serde(rename = "eventType")]
        event_type: String,
        data: String,
        timestamp: i64,
        #[serde(rename = "producerSeq", skip_serializing_if = "Option::is_none")]
        producer_seq: Option<i64>,
    },
    CommandCompleted {
        #[serde(rename = "runId")]
        run_id: String,
        #[serde(rename = "commandId")]
        command_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl From<ViewerPush> for ServerMessage {
    fn from(push: ViewerPush) -> Self {
        match push {
            ViewerPush::Event { event_id, kind, data, timestamp, producer_seq } => Self::Event {
                event_id,
                event_type: kind.as_str().to_owned(),
                data,
                timestamp,
                producer_seq,
            },
            ViewerPush::CommandCompleted { run_id, command_id, success, result, error } => {
                Self::CommandCompleted { run_id, command_id, success, result, error }
            }
        }
    }
}

/// `GET /ws` — viewer WebSocket upgrade.
pub async fn ws_handler(
    State(state): State<Arc<GatewayState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_viewer(state, socket))
}

/// Per-connection event loop.
async fn handle_viewer(state: Arc<GatewayState>, socket: WebSocket) {
    state.ws_viewer_count.fetch_add(1, Ordering::Relaxed);

    let (mut ws_tx, mut ws_rx) = socket.split();

    // An idle channel whose sender we hold keeps the select arm pending
    // until the first subscribe swaps in a real hub channel.
    let (idle_tx, idle_rx) = mpsc::channel::<ViewerPush>(1);
    let mut _idle_tx = Some(idle_tx);
    let mut push_rx = idle_rx;
    let mut subscription: Option<(String, u64)> = None;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ping_interval.tick().await; // consume the immediate first tick
    let mut pending_pongs: u8 = 0;

    loop {
        tokio::select! {
            push = push_rx.recv() => {
                match push {
                    Some(push) => {
                        if send_json(&mut ws_tx, &ServerMessage::from(push)).await.is_err() {
                            break;
                        }
                    }
                    // The hub dropped us as a slow subscriber.
                    None => {
                        let _ = send_json(&mut ws_tx, &ServerMessage::Error {
                            code: GatewayError::Internal.as_str().to_owned(),
                            message: "subscription dropped (viewer too slow)".to_owned(),
                        }).await;
                        subscription = None;
                        break;
                    }
                }
            }
            _ = ping_interval.tick() => {
                if pending_pongs >= MAX_MISSED_PONGS {
                    tracing::debug!("viewer missed {MAX_MISSED_PONGS} pongs, terminating");
                    break;
                }
                pending_pongs += 1;
                if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) | None => break,
                };
                match msg {
                    Message::Pong(_) => pending_pongs = 0,
                    Message::Close(_) => break,
                    Message::Text(text) => {
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let err = ServerMessage::Error {
                                    code: GatewayError::BadShape.as_str().to_owned(),
                                    message: "invalid message".to_owned(),
                                };
                                if send_json(&mut ws_tx, &err).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };
                        match client_msg {
                            ClientMessage::Subscribe { run_id } => {
                                match state.store.get_run(&run_id).await {
                                    Ok(Some(_)) => {}
                                    _ => {
                                        let err = ServerMessage::Error {
                                            code: GatewayError::RunNotFound.as_str().to_owned(),
                                            message: "no such run".to_owned(),
                                        };
                                        if send_json(&mut ws_tx, &err).await.is_err() {
                                            break;
                                        }
                                        continue;
                                    }
                                }
                                if let Some((old_run, old_id)) = subscription.take() {
                                    state.hub.unsubscribe(&old_run, old_id);
                                }
                                let (sub_id, rx) = state.hub.subscribe(&run_id);
                                push_rx = rx;
                                subscription = Some((run_id.clone(), sub_id));
                                if send_json(&mut ws_tx, &ServerMessage::Subscribed { run_id })
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            ClientMessage::Unsubscribe {} => {
                                if let Some((run_id, sub_id)) = subscription.take() {
                                    state.hub.unsubscribe(&run_id, sub_id);
                                }
                                let (tx, rx) = mpsc::channel(1);
                                _idle_tx = Some(tx);
                                push_rx = rx;
                                if send_json(&mut ws_tx, &ServerMessage::Unsubscribed {})
                                    .await
                                    .is_err()
                                {
                                    break;
                                }
                            }
                            ClientMessage::Ping {} => {
                                if send_json(&mut ws_tx, &ServerMessage::Pong {}).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    if let Some((run_id, sub_id)) = subscription {
        state.hub.unsubscribe(&run_id, sub_id);
    }
    state.ws_viewer_count.fetch_sub(1, Ordering::Relaxed);
}

/// Send a JSON-serialized message over the WebSocket.
async fn send_json<S>(tx: &mut S, msg: &ServerMessage) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match serde_json::to_string(msg) {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
