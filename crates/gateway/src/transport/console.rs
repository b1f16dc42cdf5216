// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-console API: run CRUD, event reads, and command insertion.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use tether_wire::sign::{self, generate_capability_token, HEADER_CAPABILITY_TOKEN};
use tether_wire::types::{
    ControlCommand, RunStatus, WorkerType, ESCAPE_COMMAND, HALT_COMMAND, INPUT_PREFIX,
    STOP_COMMAND,
};

use crate::error::{bad_shape_response, GatewayError};
use crate::state::{now_secs, GatewayState};
use crate::store::{ArtifactRow, ClientRow, CommandRow, EventRow, NewRun, RunRow};

/// Byte injected before escaped input (Ctrl-C).
const CANCEL_BYTE: char = '\u{3}';

// -- Request/response types ---------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunRequest {
    pub worker: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub initial_command: Option<String>,
    #[serde(default)]
    pub working_dir: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub id: String,
    pub status: RunStatus,
    pub worker: WorkerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// Only present in the creation response — the operator hands it to the
    /// runner and it is never shown again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability_token: Option<String>,
    pub metadata: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
}

impl RunView {
    fn from_row(row: RunRow, include_token: bool) -> Self {
        Self {
            id: row.id,
            status: row.status,
            worker: row.worker,
            model: row.model,
            initial_command: row.initial_command,
            working_dir: row.working_dir,
            client_id: row.client_id,
            capability_token: include_token.then_some(row.capability_token),
            metadata: row.metadata,
            exit_code: row.exit_code,
            error: row.error,
            created_at: row.created_at,
            started_at: row.started_at,
            finished_at: row.finished_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventView {
    pub id: i64,
    pub event_type: String,
    pub data: String,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_seq: Option<i64>,
}

impl From<EventRow> for EventView {
    fn from(row: EventRow) -> Self {
        Self {
            id: row.id,
            event_type: row.kind.as_str().to_owned(),
            data: row.data,
            timestamp: row.created_at,
            producer_seq: row.producer_seq,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandView {
    pub id: String,
    pub command: String,
    pub acked: bool,
    pub created_at: i64,
}

impl From<CommandRow> for CommandView {
    fn from(row: CommandRow) -> Self {
        Self { id: row.id, command: row.command, acked: row.acked, created_at: row.created_at }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default)]
    pub after: i64,
    #[serde(default = "default_event_limit")]
    pub limit: usize,
}

fn default_event_limit() -> usize {
    500
}

#[derive(Debug, Deserialize)]
pub struct InsertCommandRequest {
    pub command: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InputRequest {
    pub text: String,
    /// Prefix the input with a cancel byte (Ctrl-C) first.
    #[serde(default)]
    pub escape_first: bool,
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/health` — liveness plus connection counters.
pub async fn health(State(s): State<Arc<GatewayState>>) -> Response {
    let runs = s.store.run_counts().await.unwrap_or_default();
    Json(serde_json::json!({
        "status": "running",
        "uptimeSecs": s.started_at.elapsed().as_secs(),
        "runs": runs,
        "viewers": s.ws_viewer_count.load(Ordering::Relaxed),
        "subscriptions": s.hub.subscriber_count(),
        "tunnels": s.tunnels.tunnel_count(),
    }))
    .into_response()
}

/// `POST /api/runs` — create a run and mint its capability token.
pub async fn create_run(
    State(s): State<Arc<GatewayState>>,
    Json(req): Json<CreateRunRequest>,
) -> Response {
    let Some(worker) = WorkerType::parse(&req.worker) else {
        return bad_shape_response(
            format!("unknown worker type: {}", req.worker),
            vec!["worker".to_owned()],
        )
        .into_response();
    };

    let run = NewRun {
        id: uuid::Uuid::new_v4().to_string(),
        worker,
        model: req.model,
        initial_command: req.initial_command,
        working_dir: req.working_dir,
        client_id: req.client_id,
        capability_token: generate_capability_token(),
        metadata: req.metadata.unwrap_or(serde_json::Value::Null),
    };

    match s.store.insert_run(&run, now_secs()).await {
        Ok(row) => {
            tracing::info!(run_id = %row.id, worker = %row.worker, "run created");
            Json(RunView::from_row(row, true)).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "run insert failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

/// `GET /api/runs` — most recent runs.
pub async fn list_runs(State(s): State<Arc<GatewayState>>) -> Response {
    match s.store.list_runs(200).await {
        Ok(rows) => {
            let runs: Vec<RunView> =
                rows.into_iter().map(|r| RunView::from_row(r, false)).collect();
            Json(serde_json::json!({ "runs": runs })).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "run list failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

/// `GET /api/runs/{id}`.
pub async fn get_run(State(s): State<Arc<GatewayState>>, Path(id): Path<String>) -> Response {
    match s.store.get_run(&id).await {
        Ok(Some(row)) => Json(RunView::from_row(row, false)).into_response(),
        Ok(None) => GatewayError::RunNotFound.to_http_response("no such run").into_response(),
        Err(e) => {
            tracing::error!(err = %e, "run fetch failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

/// `GET /api/runs/{id}/events?after=&limit=` — backfill read for viewers.
pub async fn run_events(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Response {
    if let Err(resp) = require_run(&s, &id).await {
        return resp;
    }
    let limit = query.limit.min(5_000);
    match s.store.list_events(&id, query.after, limit).await {
        Ok(rows) => {
            let events: Vec<EventView> = rows.into_iter().map(EventView::from).collect();
            Json(serde_json::json!({ "events": events })).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "event list failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

/// `GET /api/runs/{id}/artifacts`.
pub async fn run_artifacts(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_run(&s, &id).await {
        return resp;
    }
    match s.store.list_artifacts(&id).await {
        Ok(rows) => {
            let artifacts: Vec<serde_json::Value> = rows.iter().map(artifact_view).collect();
            Json(serde_json::json!({ "artifacts": artifacts })).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "artifact list failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

fn artifact_view(row: &ArtifactRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "name": row.name,
        "mime": row.mime,
        "size": row.size,
        "createdAt": row.created_at,
    })
}

/// `GET /api/clients` — runner hosts and their liveness tiers.
pub async fn list_clients(State(s): State<Arc<GatewayState>>) -> Response {
    match s.store.list_clients().await {
        Ok(rows) => {
            let clients: Vec<serde_json::Value> = rows.iter().map(client_view).collect();
            Json(serde_json::json!({ "clients": clients })).into_response()
        }
        Err(e) => {
            tracing::error!(err = %e, "client list failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

fn client_view(row: &ClientRow) -> serde_json::Value {
    serde_json::json!({
        "id": row.id,
        "name": row.name,
        "agentId": row.agent_id,
        "lastSeen": row.last_seen,
        "status": row.status.as_str(),
        "enabled": row.enabled,
        "capabilities": row.capabilities,
    })
}

/// `GET /api/tunnels` — tunnel broker stats.
pub async fn tunnel_stats(State(s): State<Arc<GatewayState>>) -> Response {
    Json(s.tunnels.stats()).into_response()
}

/// `POST /api/runs/{id}/commands` — insert an operator command.
///
/// Reserved control tokens pass; anything else must clear the allowlist.
pub async fn insert_command(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InsertCommandRequest>,
) -> Response {
    if let Err(resp) = require_run_token(&s, &id, &headers).await {
        return resp;
    }
    let is_control = ControlCommand::parse(&req.command).is_some();
    if !is_control && !s.allowlist.is_allowed(&req.command) {
        return bad_shape_response(
            "command is not allowlisted or contains forbidden syntax",
            vec!["command".to_owned()],
        )
        .into_response();
    }
    enqueue_command(&s, &id, &req.command).await
}

/// `POST /api/runs/{id}/stop` — cooperative termination.
pub async fn stop_run(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_run_token(&s, &id, &headers).await {
        return resp;
    }
    enqueue_command(&s, &id, STOP_COMMAND).await
}

/// `POST /api/runs/{id}/halt` — immediate forced termination.
pub async fn halt_run(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_run_token(&s, &id, &headers).await {
        return resp;
    }
    enqueue_command(&s, &id, HALT_COMMAND).await
}

/// `POST /api/runs/{id}/escape` — inject a cancel byte.
pub async fn send_escape(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if let Err(resp) = require_run_token(&s, &id, &headers).await {
        return resp;
    }
    enqueue_command(&s, &id, ESCAPE_COMMAND).await
}

/// `POST /api/runs/{id}/input` — append text to the child's stdin.
pub async fn send_input(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<InputRequest>,
) -> Response {
    if let Err(resp) = require_run_token(&s, &id, &headers).await {
        return resp;
    }
    let command = if req.escape_first {
        format!("{INPUT_PREFIX}{CANCEL_BYTE}{}", req.text)
    } else {
        format!("{INPUT_PREFIX}{}", req.text)
    };
    enqueue_command(&s, &id, &command).await
}

/// `POST /api/runs/{id}/restart` — cancel the current turn and re-issue the
/// run's initial command.
pub async fn restart_run(
    State(s): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let run = match require_run_token(&s, &id, &headers).await {
        Ok(run) => run,
        Err(resp) => return resp,
    };
    let Some(initial) = run.initial_command else {
        return bad_shape_response(
            "run has no initial command to restart with",
            vec!["initialCommand".to_owned()],
        )
        .into_response();
    };
    let command = format!("{INPUT_PREFIX}{CANCEL_BYTE}{initial}");
    enqueue_command(&s, &id, &command).await
}

async fn enqueue_command(s: &GatewayState, run_id: &str, command: &str) -> Response {
    let id = uuid::Uuid::new_v4().to_string();
    match s.store.insert_command(&id, run_id, command, now_secs()).await {
        Ok(row) => {
            tracing::info!(run_id = %run_id, cmd_id = %row.id, "command enqueued");
            Json(CommandView::from(row)).into_response()
        }
        Err(e) => {
            tracing::error!(run_id = %run_id, err = %e, "command insert failed");
            GatewayError::Internal.to_http_response("store failure").into_response()
        }
    }
}

async fn require_run(s: &GatewayState, run_id: &str) -> Result<RunRow, Response> {
    match s.store.get_run(run_id).await {
        Ok(Some(run)) => Ok(run),
        Ok(None) => {
            Err(GatewayError::RunNotFound.to_http_response("no such run").into_response())
        }
        Err(e) => {
            tracing::error!(err = %e, "run fetch failed");
            Err(GatewayError::Internal.to_http_response("store failure").into_response())
        }
    }
}

/// Run-scoped console writes prove authority over the run by presenting its
/// capability token — the same credential scheme the core uses for runners.
async fn require_run_token(
    s: &GatewayState,
    run_id: &str,
    headers: &HeaderMap,
) -> Result<RunRow, Response> {
    let run = require_run(s, run_id).await?;
    let token = headers
        .get(HEADER_CAPABILITY_TOKEN)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !sign::constant_time_eq(run.capability_token.as_bytes(), token.as_bytes()) {
        return Err(GatewayError::RunTokenMismatch
            .to_http_response("capability token required for run writes")
            .into_response());
    }
    Ok(run)
}
