// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed-request verification for runner traffic and optional bearer auth
//! for the operator console.
//!
//! Verification order: header shape → signature → clock skew → nonce →
//! run/token match. Nothing before the nonce step touches the store, and a
//! request that fails any step never reaches the event log.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use tether_wire::sign::{
    self, SignedRequest, HEADER_CAPABILITY_TOKEN, HEADER_NONCE, HEADER_RUN_ID, HEADER_SIGNATURE,
    HEADER_TIMESTAMP,
};

use crate::error::GatewayError;
use crate::state::{now_secs, GatewayState};
use crate::store::{NonceOutcome, RunRow};

/// Verify a signed runner request scoped to the run named in the path.
///
/// Returns the run row on success so handlers skip a second lookup.
pub async fn verify_signed_run(
    state: &GatewayState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    expected_run_id: &str,
) -> Result<RunRow, GatewayError> {
    let run = verify_signed(state, method, path, headers, body).await?;
    match run {
        Some(run) if run.id == expected_run_id => Ok(run),
        // Signed for a different run than the path targets, or not
        // run-scoped at all.
        _ => Err(GatewayError::RunTokenMismatch),
    }
}

/// Verify a signed request. When the `X-Run-Id` header is present, the
/// capability token must match the stored run and the row is returned.
pub async fn verify_signed(
    state: &GatewayState,
    method: &Method,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<Option<RunRow>, GatewayError> {
    let timestamp = header_str(headers, HEADER_TIMESTAMP)
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or(GatewayError::SignatureInvalid)?;
    let nonce = header_str(headers, HEADER_NONCE).ok_or(GatewayError::SignatureInvalid)?;
    let signature = header_str(headers, HEADER_SIGNATURE).ok_or(GatewayError::SignatureInvalid)?;
    let run_id = header_str(headers, HEADER_RUN_ID).unwrap_or("");
    let token = header_str(headers, HEADER_CAPABILITY_TOKEN).unwrap_or("");

    let req = SignedRequest {
        method: method.as_str(),
        path,
        body,
        timestamp,
        nonce,
        run_id,
        capability_token: token,
    };
    if !sign::verify(&state.secret, &req, signature) {
        return Err(GatewayError::SignatureInvalid);
    }

    let now = now_secs();
    if !sign::timestamp_in_window(timestamp, now, state.config.clock_skew_secs) {
        return Err(GatewayError::ClockSkew);
    }

    match state.store.consume_nonce(nonce, now).await.map_err(|e| {
        tracing::error!(err = %e, "nonce consume failed");
        GatewayError::Internal
    })? {
        NonceOutcome::Accepted => {}
        NonceOutcome::Replay => return Err(GatewayError::NonceReplay),
    }

    if run_id.is_empty() {
        return Ok(None);
    }
    let run = state
        .store
        .get_run(run_id)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, "run lookup failed");
            GatewayError::Internal
        })?
        .ok_or(GatewayError::RunTokenMismatch)?;
    if !sign::constant_time_eq(run.capability_token.as_bytes(), token.as_bytes()) {
        return Err(GatewayError::RunTokenMismatch);
    }
    Ok(Some(run))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).filter(|s| !s.is_empty())
}

/// Validate a Bearer token from HTTP headers.
pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), GatewayError> {
    let expected = match expected {
        Some(tok) => tok,
        None => return Ok(()),
    };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(GatewayError::Unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or(GatewayError::Unauthorized)?;
    if sign::constant_time_eq(token.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        Err(GatewayError::Unauthorized)
    }
}

/// Axum middleware enforcing console bearer auth when configured.
///
/// Exempt: health, WebSocket upgrades, and every signed runner endpoint —
/// those authenticate via the request signature instead.
pub async fn console_auth_layer(
    state: State<Arc<GatewayState>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let path = req.uri().path();
    if is_signature_authenticated(req.method(), path) {
        return next.run(req).await;
    }

    if let Err(code) = validate_bearer(req.headers(), state.config.console_token.as_deref()) {
        let body = crate::error::ErrorResponse { error: code.to_error_body("unauthorized") };
        return (
            StatusCode::from_u16(code.http_status()).unwrap_or(StatusCode::UNAUTHORIZED),
            axum::Json(body),
        )
            .into_response();
    }

    next.run(req).await
}

/// Paths whose auth is the request signature (or that are deliberately
/// open, like health and the WS upgrade which authenticates per-message).
fn is_signature_authenticated(method: &Method, path: &str) -> bool {
    if path == "/api/health" || path == "/ws" || path.starts_with("/ws/") {
        return true;
    }
    if path.starts_with("/api/ingest/") {
        return true;
    }
    if let Some(rest) = path.strip_prefix("/api/runs/") {
        let parts: Vec<&str> = rest.split('/').collect();
        return match parts.as_slice() {
            [_, "commands"] => *method == Method::GET,
            [_, "commands", _, "ack"] => *method == Method::POST,
            [_, "state"] | [_, "heartbeat"] => *method == Method::POST,
            _ => false,
        };
    }
    false
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
