// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Binary framebuffer tunnel endpoint: `/ws/vnc/{runId}`.
//!
//! The runner side announces itself with `X-VNC-Client: true` (or a python
//! User-Agent); everything else attaches as the viewer side. Frames are
//! opaque and forwarded verbatim by the broker.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};

use crate::state::{now_secs, GatewayState};
use crate::tunnel::{TunnelAttachment, TunnelSide};

/// `GET /ws/vnc/{runId}` — attach one side of a run's tunnel.
pub async fn vnc_handler(
    State(state): State<Arc<GatewayState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let side = detect_side(&headers);
    ws.on_upgrade(move |socket| handle_tunnel(state, run_id, side, socket))
}

/// The runner side is disambiguated by header or user agent.
fn detect_side(headers: &HeaderMap) -> TunnelSide {
    let is_runner = headers
        .get("x-vnc-client")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        || headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ua| ua.to_ascii_lowercase().contains("python"));
    if is_runner {
        TunnelSide::Runner
    } else {
        TunnelSide::Viewer
    }
}

async fn handle_tunnel(
    state: Arc<GatewayState>,
    run_id: String,
    side: TunnelSide,
    socket: WebSocket,
) {
    let attachment = match state.tunnels.attach(&run_id, side, now_secs()) {
        Ok(a) => a,
        Err(code) => {
            tracing::warn!(run_id = %run_id, side = side.as_str(), code = %code, "tunnel attach rejected");
            let mut socket = socket;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };
    tracing::info!(run_id = %run_id, side = side.as_str(), "tunnel channel attached");

    let TunnelAttachment { backlog, mut rx, closed, .. } = attachment;
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Frames buffered before we attached go out first, in arrival order.
    for frame in backlog {
        if ws_tx.send(Message::Binary(frame)).await.is_err() {
            state.tunnels.detach(&run_id, side);
            return;
        }
    }

    loop {
        tokio::select! {
            _ = closed.cancelled() => break,
            frame = rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Binary(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        if state.tunnels.forward(&run_id, side, data).is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {} // text/ping frames are ignored
                }
            }
        }
    }

    state.tunnels.detach(&run_id, side);
    tracing::info!(run_id = %run_id, side = side.as_str(), "tunnel channel detached");
}

#[cfg(test)]
#[path = "vnc_tests.rs"]
mod tests;
