// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the gateway.

pub mod auth;
pub mod console;
pub mod ingest;
pub mod runner_api;
pub mod vnc;
pub mod ws;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use tether_wire::types::{MAX_ACK_RESULT_BYTES, MAX_ARTIFACT_BYTES};

use crate::state::GatewayState;

/// Headroom over the artifact cap for multipart framing.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Headroom over the ack-result cap for the JSON envelope.
const ACK_OVERHEAD: usize = 64 * 1024;

/// Build the axum `Router` with all gateway routes.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/health", get(console::health))
        // Runner ingest (signed)
        .route("/api/ingest/event", post(ingest::ingest_event))
        .route(
            "/api/ingest/artifact",
            post(ingest::ingest_artifact)
                .layer(DefaultBodyLimit::max(MAX_ARTIFACT_BYTES + MULTIPART_OVERHEAD)),
        )
        // Runner command loop (signed)
        .route(
            "/api/runs/{id}/commands",
            get(runner_api::fetch_commands).post(console::insert_command),
        )
        .route(
            "/api/runs/{id}/commands/{cmd_id}/ack",
            post(runner_api::ack_command)
                .layer(DefaultBodyLimit::max(MAX_ACK_RESULT_BYTES + ACK_OVERHEAD)),
        )
        .route("/api/runs/{id}/state", post(runner_api::post_state))
        .route("/api/runs/{id}/heartbeat", post(runner_api::heartbeat))
        // Console reads
        .route("/api/runs", get(console::list_runs).post(console::create_run))
        .route("/api/runs/{id}", get(console::get_run))
        .route("/api/runs/{id}/events", get(console::run_events))
        .route("/api/runs/{id}/artifacts", get(console::run_artifacts))
        .route("/api/clients", get(console::list_clients))
        .route("/api/tunnels", get(console::tunnel_stats))
        // Console writes (each enqueues a command)
        .route("/api/runs/{id}/stop", post(console::stop_run))
        .route("/api/runs/{id}/halt", post(console::halt_run))
        .route("/api/runs/{id}/restart", post(console::restart_run))
        .route("/api/runs/{id}/input", post(console::send_input))
        .route("/api/runs/{id}/escape", post(console::send_escape))
        // WebSocket
        .route("/ws", get(ws::ws_handler))
        .route("/ws/vnc/{run_id}", get(vnc::vnc_handler))
        // Middleware
        .layer(middleware::from_fn_with_state(state.clone(), auth::console_auth_layer))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
