// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed runner-side API: command polling, acks, state checkpoints,
//! heartbeats.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;

use tether_wire::types::{CommandAck, Heartbeat, PendingCommand, StateCheckpoint, MAX_ACK_RESULT_BYTES};

use crate::error::{bad_shape_response, GatewayError};
use crate::hub::ViewerPush;
use crate::state::{now_secs, GatewayState};
use crate::store::AckOutcome;
use crate::transport::auth::verify_signed_run;

/// Pending commands returned per poll.
const COMMAND_FETCH_LIMIT: usize = 32;

/// `GET /api/runs/{id}/commands` — the pending tail, FIFO. The same set is
/// returned until acked; the runner deduplicates.
pub async fn fetch_commands(
    State(s): State<Arc<GatewayState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let path = format!("/api/runs/{run_id}/commands");
    if let Err(code) = verify_signed_run(&s, &Method::GET, &path, &headers, b"", &run_id).await {
        return code.to_http_response("rejected").into_response();
    }

    let pending = match s.store.next_pending_commands(&run_id, COMMAND_FETCH_LIMIT).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(run_id = %run_id, err = %e, "pending command fetch failed");
            return GatewayError::Internal.to_http_response("store failure").into_response();
        }
    };

    let ids: Vec<String> = pending.iter().map(|c| c.id.clone()).collect();
    if !ids.is_empty() {
        if let Err(e) = s.store.mark_commands_delivered(&ids, now_secs()).await {
            tracing::warn!(run_id = %run_id, err = %e, "delivered stamp failed");
        }
    }

    let commands: Vec<PendingCommand> = pending
        .into_iter()
        .map(|c| PendingCommand { id: c.id, command: c.command, created_at: c.created_at })
        .collect();
    Json(serde_json::json!({ "commands": commands })).into_response()
}

/// `POST /api/runs/{id}/commands/{cmdId}/ack` — idempotent command ack.
pub async fn ack_command(
    State(s): State<Arc<GatewayState>>,
    Path((run_id, cmd_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/runs/{run_id}/commands/{cmd_id}/ack");
    if let Err(code) = verify_signed_run(&s, &Method::POST, &path, &headers, &body, &run_id).await {
        return code.to_http_response("rejected").into_response();
    }

    let ack: CommandAck = match serde_json::from_slice(&body) {
        Ok(a) => a,
        Err(_) => return bad_shape_response("invalid ack body", vec!["body".to_owned()]).into_response(),
    };
    if ack.result.as_ref().is_some_and(|r| r.len() > MAX_ACK_RESULT_BYTES) {
        return GatewayError::PayloadTooLarge
            .to_http_response(format!("ack result exceeds {MAX_ACK_RESULT_BYTES} bytes"))
            .into_response();
    }

    // The command must belong to the signing run.
    match s.store.get_command(&cmd_id).await {
        Ok(Some(cmd)) if cmd.run_id == run_id => {}
        Ok(_) => {
            return GatewayError::CommandNotFound
                .to_http_response("no such command for this run")
                .into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "command lookup failed");
            return GatewayError::Internal.to_http_response("store failure").into_response();
        }
    }

    let outcome =
        match s.store.ack_command(&cmd_id, ack.result.as_deref(), ack.error.as_deref(), now_secs()).await
        {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(cmd_id = %cmd_id, err = %e, "ack failed");
                return GatewayError::Internal.to_http_response("store failure").into_response();
            }
        };

    match outcome {
        AckOutcome::Acked => {
            s.hub.publish(
                &run_id,
                ViewerPush::CommandCompleted {
                    run_id: run_id.clone(),
                    command_id: cmd_id.clone(),
                    success: ack.error.is_none(),
                    result: ack.result,
                    error: ack.error,
                },
            );
            Json(serde_json::json!({ "acked": true, "alreadyAcked": false })).into_response()
        }
        // Idempotent: the first recorded outcome stands.
        AckOutcome::AlreadyAcked => {
            Json(serde_json::json!({ "acked": true, "alreadyAcked": true })).into_response()
        }
        AckOutcome::NotFound => {
            GatewayError::CommandNotFound.to_http_response("no such command").into_response()
        }
    }
}

/// `POST /api/runs/{id}/state` — persist the runner's checkpoint.
pub async fn post_state(
    State(s): State<Arc<GatewayState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/runs/{run_id}/state");
    if let Err(code) = verify_signed_run(&s, &Method::POST, &path, &headers, &body, &run_id).await {
        return code.to_http_response("rejected").into_response();
    }

    let checkpoint: StateCheckpoint = match serde_json::from_slice(&body) {
        Ok(c) => c,
        Err(_) => {
            return bad_shape_response("invalid state checkpoint", vec!["body".to_owned()])
                .into_response()
        }
    };
    if checkpoint.run_id != run_id {
        return bad_shape_response("checkpoint runId does not match path", vec!["runId".to_owned()])
            .into_response();
    }

    let dir = s.config.run_dir(&run_id);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(run_id = %run_id, err = %e, "run dir create failed");
        return GatewayError::Internal.to_http_response("storage failure").into_response();
    }
    let path = dir.join("state.json");
    let serialized = match serde_json::to_vec_pretty(&checkpoint) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(err = %e, "checkpoint serialize failed");
            return GatewayError::Internal.to_http_response("serialize failure").into_response();
        }
    };
    if let Err(e) = tokio::fs::write(&path, serialized).await {
        tracing::error!(run_id = %run_id, err = %e, "checkpoint write failed");
        return GatewayError::Internal.to_http_response("storage failure").into_response();
    }

    Json(serde_json::json!({ "saved": true })).into_response()
}

/// `POST /api/runs/{id}/heartbeat` — refresh the runner host's liveness.
pub async fn heartbeat(
    State(s): State<Arc<GatewayState>>,
    Path(run_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = format!("/api/runs/{run_id}/heartbeat");
    if let Err(code) = verify_signed_run(&s, &Method::POST, &path, &headers, &body, &run_id).await {
        return code.to_http_response("rejected").into_response();
    }

    let beat: Heartbeat = match serde_json::from_slice(&body) {
        Ok(b) => b,
        Err(_) => {
            return bad_shape_response("invalid heartbeat", vec!["body".to_owned()]).into_response()
        }
    };

    if let Err(e) = s
        .store
        .upsert_client(
            &beat.client_id,
            beat.name.as_deref(),
            beat.agent_id.as_deref(),
            &beat.capabilities,
            now_secs(),
        )
        .await
    {
        tracing::error!(client_id = %beat.client_id, err = %e, "client upsert failed");
        return GatewayError::Internal.to_http_response("store failure").into_response();
    }

    Json(serde_json::json!({ "ok": true })).into_response()
}
