// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed runner ingest: event submissions and artifact uploads.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use tokio::io::AsyncWriteExt;

use tether_wire::types::{
    EventKind, EventSubmission, FinishedMarker, RunStatus, MAX_ARTIFACT_BYTES, MAX_EVENT_BYTES,
};

use crate::error::{bad_shape_response, GatewayError};
use crate::hub::ViewerPush;
use crate::state::{now_secs, GatewayState};
use crate::store::RunRow;
use crate::transport::auth::verify_signed;

pub const EVENT_PATH: &str = "/api/ingest/event";
pub const ARTIFACT_PATH: &str = "/api/ingest/artifact";

/// `POST /api/ingest/event` — append one event to a run's log.
pub async fn ingest_event(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let run = match verify_signed(&s, &Method::POST, EVENT_PATH, &headers, &body).await {
        Ok(Some(run)) => run,
        Ok(None) => {
            return GatewayError::RunTokenMismatch
                .to_http_response("event ingest requires a run scope")
                .into_response()
        }
        Err(code) => return code.to_http_response("rejected").into_response(),
    };

    if body.len() > MAX_EVENT_BYTES {
        return GatewayError::PayloadTooLarge
            .to_http_response(format!("event payload exceeds {MAX_EVENT_BYTES} bytes"))
            .into_response();
    }

    let submission = match parse_submission(&body) {
        Ok(sub) => sub,
        Err(fields) => return bad_shape_response("invalid event submission", fields).into_response(),
    };

    let now = now_secs();

    // First traffic from the runner flips a pending run to running.
    if run.status == RunStatus::Pending {
        if let Err(e) = s.store.update_run_status(&run.id, RunStatus::Running, None, None, now).await
        {
            tracing::error!(run_id = %run.id, err = %e, "failed to mark run running");
        }
    }

    let event_id = match s
        .store
        .append_event(
            &run.id,
            submission.kind,
            &submission.data,
            submission.sequence.map(|v| v as i64),
            now,
        )
        .await
    {
        Ok(id) => id,
        Err(e) => {
            tracing::error!(run_id = %run.id, err = %e, "event append failed");
            return GatewayError::Internal.to_http_response("store failure").into_response();
        }
    };

    // A finished marker ends the run.
    if submission.kind == EventKind::Marker {
        if let Some(marker) = FinishedMarker::parse(&submission.data) {
            apply_finished_marker(&s, &run, &marker, now).await;
        }
    }

    s.hub.publish(
        &run.id,
        ViewerPush::Event {
            event_id,
            kind: submission.kind,
            data: submission.data,
            timestamp: now,
            producer_seq: submission.sequence.map(|v| v as i64),
        },
    );

    Json(serde_json::json!({ "eventId": event_id })).into_response()
}

async fn apply_finished_marker(
    s: &GatewayState,
    run: &RunRow,
    marker: &FinishedMarker,
    now: i64,
) {
    let status = if marker.exit_code == Some(0) { RunStatus::Done } else { RunStatus::Failed };
    let error = match (status, marker.signal) {
        (RunStatus::Failed, Some(sig)) => Some(format!("terminated by signal {sig}")),
        (RunStatus::Failed, None) => {
            marker.exit_code.map(|code| format!("exited with code {code}"))
        }
        _ => None,
    };
    match s.store.update_run_status(&run.id, status, marker.exit_code, error, now).await {
        Ok(true) => {
            tracing::info!(run_id = %run.id, status = %status, "run finished");
        }
        Ok(false) => {
            tracing::debug!(run_id = %run.id, "finished marker for already-terminal run");
        }
        Err(e) => tracing::error!(run_id = %run.id, err = %e, "failed to finish run"),
    }
}

/// Parse and shape-check the submission body, collecting offending fields.
fn parse_submission(body: &[u8]) -> Result<EventSubmission, Vec<String>> {
    let value: serde_json::Value =
        serde_json::from_slice(body).map_err(|_| vec!["body".to_owned()])?;
    let mut fields = Vec::new();

    let kind = value.get("type").and_then(|v| v.as_str()).and_then(EventKind::parse);
    if kind.is_none() {
        fields.push("type".to_owned());
    }
    let data = value.get("data").and_then(|v| v.as_str());
    if data.is_none() {
        fields.push("data".to_owned());
    }
    let sequence = match value.get("sequence") {
        None | Some(serde_json::Value::Null) => None,
        Some(v) => match v.as_u64() {
            Some(n) => Some(n),
            None => {
                fields.push("sequence".to_owned());
                None
            }
        },
    };

    match (kind, data) {
        (Some(kind), Some(data)) if fields.is_empty() => {
            if data.len() > MAX_EVENT_BYTES {
                // Caught again by the caller's size check; report as shape
                // here only when the envelope itself was within bounds.
                return Err(vec!["data".to_owned()]);
            }
            Ok(EventSubmission { kind, data: data.to_owned(), sequence })
        }
        _ => Err(fields),
    }
}

/// `POST /api/ingest/artifact` — streamed multipart upload.
///
/// Multipart bodies cannot be pre-hashed by the signer, so artifact
/// signatures cover an empty body hash; integrity rides on TLS plus the
/// signed header tuple.
pub async fn ingest_artifact(
    State(s): State<Arc<GatewayState>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    let run = match verify_signed(&s, &Method::POST, ARTIFACT_PATH, &headers, b"").await {
        Ok(Some(run)) => run,
        Ok(None) => {
            return GatewayError::RunTokenMismatch
                .to_http_response("artifact ingest requires a run scope")
                .into_response()
        }
        Err(code) => return code.to_http_response("rejected").into_response(),
    };

    let dir = s.config.artifacts_dir(&run.id);
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        tracing::error!(run_id = %run.id, err = %e, "artifact dir create failed");
        return GatewayError::Internal.to_http_response("storage failure").into_response();
    }

    while let Ok(Some(mut field)) = multipart.next_field().await {
        if field.name() != Some("file") {
            continue;
        }
        let name = sanitize_name(field.file_name().unwrap_or("artifact.bin"));
        let mime = field.content_type().unwrap_or("application/octet-stream").to_owned();
        let artifact_id = uuid::Uuid::new_v4().to_string();
        let path = dir.join(format!("{artifact_id}-{name}"));

        let mut file = match tokio::fs::File::create(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(run_id = %run.id, err = %e, "artifact create failed");
                return GatewayError::Internal.to_http_response("storage failure").into_response();
            }
        };
        let mut size: usize = 0;
        loop {
            match field.chunk().await {
                Ok(Some(chunk)) => {
                    size += chunk.len();
                    if size > MAX_ARTIFACT_BYTES {
                        drop(file);
                        let _ = tokio::fs::remove_file(&path).await;
                        return GatewayError::PayloadTooLarge
                            .to_http_response(format!(
                                "artifact exceeds {MAX_ARTIFACT_BYTES} bytes"
                            ))
                            .into_response();
                    }
                    if let Err(e) = file.write_all(&chunk).await {
                        tracing::error!(run_id = %run.id, err = %e, "artifact write failed");
                        let _ = tokio::fs::remove_file(&path).await;
                        return GatewayError::Internal
                            .to_http_response("storage failure")
                            .into_response();
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    let _ = tokio::fs::remove_file(&path).await;
                    return bad_shape_response("malformed multipart body", vec!["file".to_owned()])
                        .into_response();
                }
            }
        }
        if let Err(e) = file.flush().await {
            tracing::error!(run_id = %run.id, err = %e, "artifact flush failed");
            return GatewayError::Internal.to_http_response("storage failure").into_response();
        }

        let now = now_secs();
        if let Err(e) = s
            .store
            .insert_artifact(
                &artifact_id,
                &run.id,
                &name,
                &mime,
                size as i64,
                &path.to_string_lossy(),
                now,
            )
            .await
        {
            tracing::error!(run_id = %run.id, err = %e, "artifact row insert failed");
            let _ = tokio::fs::remove_file(&path).await;
            return GatewayError::Internal.to_http_response("store failure").into_response();
        }

        tracing::info!(run_id = %run.id, artifact_id = %artifact_id, size, "artifact stored");
        return Json(serde_json::json!({
            "artifactId": artifact_id,
            "name": name,
            "mime": mime,
            "size": size,
        }))
        .into_response();
    }

    bad_shape_response("multipart body missing a `file` field", vec!["file".to_owned()])
        .into_response()
}

/// Strip path separators so uploads cannot escape the artifact directory.
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect();
    if cleaned.is_empty() {
        "artifact.bin".to_owned()
    } else {
        cleaned
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
