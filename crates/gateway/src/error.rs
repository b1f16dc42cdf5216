// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes surfaced by the gateway API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatewayError {
    SignatureInvalid,
    ClockSkew,
    NonceReplay,
    RunTokenMismatch,
    Unauthorized,
    PayloadTooLarge,
    BadShape,
    RunNotFound,
    CommandNotFound,
    ArtifactNotFound,
    ClientNotFound,
    TunnelBusy,
    FrameOversize,
    Internal,
}

impl GatewayError {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::SignatureInvalid | Self::ClockSkew | Self::NonceReplay | Self::Unauthorized => {
                401
            }
            Self::RunTokenMismatch => 403,
            Self::PayloadTooLarge | Self::FrameOversize => 413,
            Self::BadShape => 400,
            Self::RunNotFound
            | Self::CommandNotFound
            | Self::ArtifactNotFound
            | Self::ClientNotFound => 404,
            Self::TunnelBusy => 409,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SignatureInvalid => "auth.signature_invalid",
            Self::ClockSkew => "auth.clock_skew",
            Self::NonceReplay => "auth.nonce_replay",
            Self::RunTokenMismatch => "auth.run_token_mismatch",
            Self::Unauthorized => "auth.unauthorized",
            Self::PayloadTooLarge => "request.payload_too_large",
            Self::BadShape => "validation.bad_shape",
            Self::RunNotFound => "not_found.run",
            Self::CommandNotFound => "not_found.command",
            Self::ArtifactNotFound => "not_found.artifact",
            Self::ClientNotFound => "not_found.client",
            Self::TunnelBusy => "conflict.tunnel_busy",
            Self::FrameOversize => "tunnel.frame_oversize",
            Self::Internal => "internal",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into(), fields: None }
    }

    pub fn to_http_response(
        &self,
        message: impl Into<String>,
    ) -> (StatusCode, Json<ErrorResponse>) {
        let status =
            StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorResponse { error: self.to_error_body(message) };
        (status, Json(body))
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
/// Shape errors also carry the offending field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

/// A 400 `validation.bad_shape` response naming the offending fields.
pub fn bad_shape_response(
    message: impl Into<String>,
    fields: Vec<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    let body = ErrorResponse {
        error: ErrorBody {
            code: GatewayError::BadShape.as_str().to_owned(),
            message: message.into(),
            fields: Some(fields),
        },
    };
    (StatusCode::BAD_REQUEST, Json(body))
}
