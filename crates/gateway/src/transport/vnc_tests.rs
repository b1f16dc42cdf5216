// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::{HeaderMap, HeaderValue};

use crate::tunnel::TunnelSide;

use super::detect_side;

#[test]
fn explicit_header_marks_the_runner_side() {
    let mut headers = HeaderMap::new();
    headers.insert("x-vnc-client", HeaderValue::from_static("true"));
    assert_eq!(detect_side(&headers), TunnelSide::Runner);

    let mut headers = HeaderMap::new();
    headers.insert("x-vnc-client", HeaderValue::from_static("TRUE"));
    assert_eq!(detect_side(&headers), TunnelSide::Runner);
}

#[test]
fn python_user_agent_marks_the_runner_side() {
    let mut headers = HeaderMap::new();
    headers.insert("user-agent", HeaderValue::from_static("Python-websockets/12.0"));
    assert_eq!(detect_side(&headers), TunnelSide::Runner);
}

#[test]
fn browsers_attach_as_viewers() {
    let mut headers = HeaderMap::new();
    headers.insert("user-agent", HeaderValue::from_static("Mozilla/5.0 (X11; Linux x86_64)"));
    assert_eq!(detect_side(&headers), TunnelSide::Viewer);

    assert_eq!(detect_side(&HeaderMap::new()), TunnelSide::Viewer);

    let mut headers = HeaderMap::new();
    headers.insert("x-vnc-client", HeaderValue::from_static("false"));
    assert_eq!(detect_side(&headers), TunnelSide::Viewer);
}
