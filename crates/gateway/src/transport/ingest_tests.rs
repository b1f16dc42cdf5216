// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use bytes::Bytes;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use tether_wire::sign::{self, SignedRequest};
use tether_wire::types::{EventKind, FinishedMarker, RunStatus, WorkerType};

use crate::config::GatewayConfig;
use crate::state::{now_secs, GatewayState};
use crate::store::{NewRun, Store};

use super::{ingest_event, parse_submission, sanitize_name, EVENT_PATH};

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
        worker: WorkerType::Claude,
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

fn event_headers(body: &[u8], nonce: &str, run_id: &str, token: &str) -> HeaderMap {
    let timestamp = now_secs();
    let req = SignedRequest {
        method: "POST",
        path: EVENT_PATH,
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
    put("x-run-id", run_id);
    put("x-capability-token", token);
    headers
}

async fn submit(state: &Arc<GatewayState>, body: &[u8], nonce: &str) -> StatusCode {
    let headers = event_headers(body, nonce, "r1", "t1");
    let resp =
        ingest_event(State(Arc::clone(state)), headers, Bytes::copy_from_slice(body)).await;
    resp.status()
}

#[tokio::test]
async fn happy_ingest_appends_and_marks_running() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = br#"{"type":"stdout","data":"hello\n"}"#;
    assert_eq!(submit(&state, body, "n1").await, StatusCode::OK);

    let events = match state.store.list_events("r1", 0, 10).await {
        Ok(e) => e,
        Err(e) => panic!("list failed: {e}"),
    };
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, EventKind::Stdout);
    assert_eq!(events[0].data, "hello\n");

    // First ingest flipped the run to running.
    let run = match state.store.get_run("r1").await {
        Ok(Some(r)) => r,
        other => panic!("run missing: {other:?}"),
    };
    assert_eq!(run.status, RunStatus::Running);
}

#[tokio::test]
async fn replayed_request_leaves_log_unchanged() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = br#"{"type":"stdout","data":"hello\n"}"#;
    assert_eq!(submit(&state, body, "n1").await, StatusCode::OK);
    assert_eq!(submit(&state, body, "n1").await, StatusCode::UNAUTHORIZED);

    let events = match state.store.list_events("r1", 0, 10).await {
        Ok(e) => e,
        Err(e) => panic!("list failed: {e}"),
    };
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn skewed_timestamp_rejected() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = br#"{"type":"stdout","data":"x"}"#;
    let timestamp = now_secs() - 3600;
    let req = SignedRequest {
        method: "POST",
        path: EVENT_PATH,
        body,
        timestamp,
        nonce: "n1",
        run_id: "r1",
        capability_token: "t1",
    };
    let signature = sign::sign(SECRET.as_bytes(), &req);
    let mut headers = HeaderMap::new();
    for (name, value) in [
        ("x-timestamp", timestamp.to_string()),
        ("x-nonce", "n1".to_owned()),
        ("x-signature", signature),
        ("x-run-id", "r1".to_owned()),
        ("x-capability-token", "t1".to_owned()),
    ] {
        if let Ok(v) = HeaderValue::from_str(&value) {
            headers.insert(name, v);
        }
    }
    let resp = ingest_event(State(Arc::clone(&state)), headers, Bytes::from_static(body)).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn bad_shape_names_offending_fields() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let body = br#"{"type":"screenshot","sequence":"nope"}"#;
    assert_eq!(submit(&state, body, "n1").await, StatusCode::BAD_REQUEST);
    assert!(state.store.list_events("r1", 0, 10).await.is_ok_and(|e| e.is_empty()));
}

#[tokio::test]
async fn finished_marker_ends_the_run() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let marker = match serde_json::to_string(&FinishedMarker::new(Some(0), None)) {
        Ok(m) => m,
        Err(e) => panic!("serialize: {e}"),
    };
    let body = match serde_json::to_vec(&serde_json::json!({"type": "marker", "data": marker})) {
        Ok(b) => b,
        Err(e) => panic!("serialize: {e}"),
    };
    assert_eq!(submit(&state, &body, "n1").await, StatusCode::OK);

    let run = match state.store.get_run("r1").await {
        Ok(Some(r)) => r,
        other => panic!("run missing: {other:?}"),
    };
    assert_eq!(run.status, RunStatus::Done);
    assert_eq!(run.exit_code, Some(0));
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn nonzero_exit_fails_the_run() {
    let state = test_state();
    seed_run(&state, "r1", "t1").await;

    let marker = match serde_json::to_string(&FinishedMarker::new(Some(2), None)) {
        Ok(m) => m,
        Err(e) => panic!("serialize: {e}"),
    };
    let body = match serde_json::to_vec(&serde_json::json!({"type": "marker", "data": marker})) {
        Ok(b) => b,
        Err(e) => panic!("serialize: {e}"),
    };
    assert_eq!(submit(&state, &body, "n1").await, StatusCode::OK);

    let run = match state.store.get_run("r1").await {
        Ok(Some(r)) => r,
        other => panic!("run missing: {other:?}"),
    };
    assert_eq!(run.status, RunStatus::Failed);
    assert_eq!(run.error.as_deref(), Some("exited with code 2"));
}

#[test]
fn submission_parsing_collects_fields() {
    match parse_submission(br#"{"type":"stdout","data":"ok","sequence":7}"#) {
        Ok(sub) => {
            assert_eq!(sub.kind, EventKind::Stdout);
            assert_eq!(sub.sequence, Some(7));
        }
        Err(fields) => panic!("unexpected reject: {fields:?}"),
    }

    match parse_submission(br#"{"data": 42}"#) {
        Err(fields) => {
            assert!(fields.contains(&"type".to_owned()));
            assert!(fields.contains(&"data".to_owned()));
        }
        Ok(_) => panic!("accepted malformed submission"),
    }

    match parse_submission(b"not json") {
        Err(fields) => assert_eq!(fields, ["body"]),
        Ok(_) => panic!("accepted non-json"),
    }
}

#[test]
fn artifact_names_cannot_traverse() {
    assert_eq!(sanitize_name("../../etc/passwd"), ".._.._etc_passwd");
    assert_eq!(sanitize_name("report.txt"), "report.txt");
    assert_eq!(sanitize_name(""), "artifact.bin");
}
