// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::http::{HeaderMap, HeaderValue, Method};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use tether_wire::sign::{self, SignedRequest};
use tether_wire::types::WorkerType;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::state::{now_secs, GatewayState};
use crate::store::{NewRun, Store};

use super::{is_signature_authenticated, validate_bearer, verify_signed, verify_signed_run};

const SECRET: &str = "0123456789abcdef0123456789abcdef";

fn test_state() -> Arc<GatewayState> {
    let config = match GatewayConfig::try_parse_from(["tether-gateway", "--hmac-secret", SECRET]) {
        Ok(c) => c,
        Err(e) => panic!("config parse failed: {e}"),
    };
    let store = match Store::open_in_memory() {
        Ok(s) => s,
        Err(e) => panic!("store open failed: {e}"),
    };
    Arc::new(GatewayState::new(config, store, CancellationToken::new()))
}

async fn seed_run(state: &GatewayState, id: &str, token: &str) {
    let run = NewRun {
        id: id.to_owned(),
        worker: WorkerType::Codex,
        model: None,
        initial_command: None,
        working_dir: None,
        client_id: None,
        capability_token: token.to_owned(),
        metadata: serde_json::Value::Null,
    };
    if let Err(e) = state.store.insert_run(&run, now_secs()).await {
        panic!("seed run failed: {e}");
    }
}

fn signed_headers(
    method: &str,
    path: &str,
    body: &[u8],
    timestamp: i64,
    nonce: &str,
    run_id: &str,
    token: &str,
) -> HeaderMap {
    let req = SignedRequest {
        method,
        path,
        body,
        timestamp,
        nonce,
        run_id,
        capability_token: token,
    };
    let signature = sign::sign(SECRET.as_bytes(), &req);

    let mut headers = HeaderMap::new();
    let mut put = |name: &'static str, value: &str| {
        if let Ok(v) = HeaderValue::from_str(value) {
            headers.insert(name, v);
        }
    };
    put("x-timestamp", &timestamp.to_string());
    put("x-nonce", nonce);
    put("x-signature", &signature);
    if !run_id.is_empty() {
        put("x-run-id", run_id);
    }
    if !token.is_empty() {
        put("x-capability-token", token);
    }
    headers
}

#[tokio::test]
async fn happy_path_returns_run() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = br#"{"type":"stdout","data":"hello\n"}"#;
    let headers = signed_headers("POST", "/api/ingest/event", body, now_secs(), "n1", "r1", "t1");
    let run = verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, body).await;
    match run {
        Ok(Some(run)) => assert_eq!(run.id, "r1"),
        other => panic!("expected run, got {other:?}"),
    }
}

#[tokio::test]
async fn replay_is_rejected_and_log_untouched() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = b"{}";
    let headers = signed_headers("POST", "/api/ingest/event", body, now_secs(), "n1", "r1", "t1");
    assert!(verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, body)
        .await
        .is_ok());

    // The exact same request again: nonce already consumed.
    match verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, body).await {
        Err(GatewayError::NonceReplay) => {}
        other => panic!("expected NonceReplay, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_timestamp_rejected_before_nonce_consumed() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let stale = now_secs() - 3600;
    let headers = signed_headers("POST", "/api/ingest/event", b"{}", stale, "n-skew", "r1", "t1");
    match verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, b"{}").await {
        Err(GatewayError::ClockSkew) => {}
        other => panic!("expected ClockSkew, got {other:?}"),
    }

    // The nonce was not burned by the failed attempt.
    let fresh = signed_headers("POST", "/api/ingest/event", b"{}", now_secs(), "n-skew", "r1", "t1");
    assert!(verify_signed(&state, &Method::POST, "/api/ingest/event", &fresh, b"{}").await.is_ok());
}

#[tokio::test]
async fn tampered_body_rejected() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let headers =
        signed_headers("POST", "/api/ingest/event", b"original", now_secs(), "n1", "r1", "t1");
    match verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, b"tampered").await {
        Err(GatewayError::SignatureInvalid) => {}
        other => panic!("expected SignatureInvalid, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_headers_rejected() {
    let state = test_state();
    let headers = HeaderMap::new();
    match verify_signed(&state, &Method::GET, "/api/runs/r1/commands", &headers, b"").await {
        Err(GatewayError::SignatureInvalid) => {}
        other => panic!("expected SignatureInvalid, got {other:?}"),
    }
}

#[tokio::test]
async fn wrong_token_is_forbidden() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let headers =
        signed_headers("POST", "/api/ingest/event", b"{}", now_secs(), "n1", "r1", "wrong");
    match verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, b"{}").await {
        Err(GatewayError::RunTokenMismatch) => {}
        other => panic!("expected RunTokenMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_run_is_forbidden() {
    let state = test_state();
    let headers =
        signed_headers("POST", "/api/ingest/event", b"{}", now_secs(), "n1", "ghost", "t1");
    match verify_signed(&state, &Method::POST, "/api/ingest/event", &headers, b"{}").await {
        Err(GatewayError::RunTokenMismatch) => {}
        other => panic!("expected RunTokenMismatch, got {other:?}"),
    }
}

#[tokio::test]
async fn signed_run_must_match_path_run() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;
    seed_run(&state, "r2", "t2").await;

    // Signed for r1, but the path targets r2.
    let path = "/api/runs/r2/commands";
    let headers = signed_headers("GET", path, b"", now_secs(), "n1", "r1", "t1");
    match verify_signed_run(&state, &Method::GET, path, &headers, b"", "r2").await {
        Err(GatewayError::RunTokenMismatch) => {}
        other => panic!("expected RunTokenMismatch, got {other:?}"),
    }
}

#[test]
fn bearer_validation() {
    let mut headers = HeaderMap::new();
    assert!(validate_bearer(&headers, None).is_ok());
    assert!(validate_bearer(&headers, Some("tok")).is_err());

    headers.insert("authorization", HeaderValue::from_static("Bearer tok"));
    assert!(validate_bearer(&headers, Some("tok")).is_ok());
    assert!(validate_bearer(&headers, Some("other")).is_err());

    headers.insert("authorization", HeaderValue::from_static("Basic tok"));
    assert!(validate_bearer(&headers, Some("tok")).is_err());
}

#[test]
fn signature_authenticated_paths() {
    assert!(is_signature_authenticated(&Method::GET, "/api/health"));
    assert!(is_signature_authenticated(&Method::GET, "/ws"));
    assert!(is_signature_authenticated(&Method::GET, "/ws/vnc/r1"));
    assert!(is_signature_authenticated(&Method::POST, "/api/ingest/event"));
    assert!(is_signature_authenticated(&Method::POST, "/api/ingest/artifact"));
    assert!(is_signature_authenticated(&Method::GET, "/api/runs/r1/commands"));
    assert!(is_signature_authenticated(&Method::POST, "/api/runs/r1/commands/c1/ack"));
    assert!(is_signature_authenticated(&Method::POST, "/api/runs/r1/state"));
    assert!(is_signature_authenticated(&Method::POST, "/api/runs/r1/heartbeat"));

    // Console surfaces stay behind the bearer check; run-scoped writes
    // additionally demand the run's capability token in the handler.
    assert!(!is_signature_authenticated(&Method::POST, "/api/runs/r1/commands"));
    assert!(!is_signature_authenticated(&Method::GET, "/api/runs"));
    assert!(!is_signature_authenticated(&Method::POST, "/api/runs/r1/stop"));
    assert!(!is_signature_authenticated(&Method::GET, "/api/runs/r1/events"));
}
