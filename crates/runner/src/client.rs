// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signed HTTP client for runner → gateway traffic.
//!
//! Every call carries the signed-header tuple; event posts are retried with
//! backoff on 5xx and transport errors (at-least-once — the gateway
//! deduplicates on nonce only, and viewers collapse duplicates via the
//! producer sequence).

use std::time::Duration;

use tether_wire::sign::{
    self, SignedRequest, HEADER_CAPABILITY_TOKEN, HEADER_NONCE, HEADER_RUN_ID, HEADER_SIGNATURE,
    HEADER_TIMESTAMP,
};
use tether_wire::types::{CommandAck, EventKind, EventSubmission, Heartbeat, PendingCommand, StateCheckpoint};

use crate::config::RunnerConfig;

/// Attempts for an event post before giving up.
const EVENT_POST_ATTEMPTS: u32 = 3;

/// Initial retry backoff; doubles per attempt.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct GatewayClient {
    http: reqwest::Client,
    base: String,
    run_id: String,
    capability_token: String,
    secret: Vec<u8>,
}

#[derive(Debug, serde::Deserialize)]
struct CommandsResponse {
    commands: Vec<PendingCommand>,
}

impl GatewayClient {
    pub fn new(config: &RunnerConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder().timeout(Duration::from_secs(30));
        if config.allow_self_signed {
            tracing::warn!("accepting self-signed gateway certificates (dev only)");
            builder = builder.danger_accept_invalid_certs(true);
        }
        Ok(Self {
            http: builder.build()?,
            base: config.gateway_url.trim_end_matches('/').to_owned(),
            run_id: config.run_id.clone(),
            capability_token: config.capability_token.clone(),
            secret: config.hmac_secret.clone().into_bytes(),
        })
    }

    fn signed(
        &self,
        builder: reqwest::RequestBuilder,
        method: &str,
        path: &str,
        body: &[u8],
    ) -> reqwest::RequestBuilder {
        let nonce = sign::generate_nonce();
        let timestamp = crate::now_secs();
        let req = SignedRequest {
            method,
            path,
            body,
            timestamp,
            nonce: &nonce,
            run_id: &self.run_id,
            capability_token: &self.capability_token,
        };
        let signature = sign::sign(&self.secret, &req);
        builder
            .header(HEADER_TIMESTAMP, timestamp.to_string())
            .header(HEADER_NONCE, nonce)
            .header(HEADER_SIGNATURE, signature)
            .header(HEADER_RUN_ID, &self.run_id)
            .header(HEADER_CAPABILITY_TOKEN, &self.capability_token)
    }

    async fn post_signed_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> anyhow::Result<reqwest::Response> {
        let bytes = serde_json::to_vec(body)?;
        let url = format!("{}{path}", self.base);
        let builder = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(bytes.clone());
        let resp = self.signed(builder, "POST", path, &bytes).send().await?;
        Ok(resp)
    }

    /// Post one event, retrying on 5xx/transport failures.
    pub async fn post_event(
        &self,
        kind: EventKind,
        data: &str,
        sequence: Option<u64>,
    ) -> anyhow::Result<()> {
        let submission = EventSubmission { kind, data: data.to_owned(), sequence };
        let body = serde_json::to_value(&submission)?;

        let mut backoff = RETRY_BACKOFF;
        let mut last_err: Option<anyhow::Error> = None;
        for attempt in 0..EVENT_POST_ATTEMPTS {
            match self.post_signed_json("/api/ingest/event", &body).await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) if resp.status().is_server_error() => {
                    last_err = Some(anyhow::anyhow!("gateway returned {}", resp.status()));
                }
                Ok(resp) => {
                    // 4xx is not retryable — the request itself is wrong.
                    let status = resp.status();
                    let text = resp.text().await.unwrap_or_default();
                    anyhow::bail!("event rejected ({status}): {text}");
                }
                Err(e) => last_err = Some(e),
            }
            if attempt + 1 < EVENT_POST_ATTEMPTS {
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("event post failed")))
    }

    /// Fetch the pending command tail.
    pub async fn fetch_commands(&self) -> anyhow::Result<Vec<PendingCommand>> {
        let path = format!("/api/runs/{}/commands", self.run_id);
        let url = format!("{}{path}", self.base);
        let resp = self.signed(self.http.get(&url), "GET", &path, b"").send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("command poll failed ({status}): {text}");
        }
        let parsed: CommandsResponse = resp.json().await?;
        Ok(parsed.commands)
    }

    /// Ack one command with its result or error.
    pub async fn ack_command(&self, command_id: &str, ack: &CommandAck) -> anyhow::Result<()> {
        let path = format!("/api/runs/{}/commands/{command_id}/ack", self.run_id);
        let body = serde_json::to_value(ack)?;
        let resp = self.post_signed_json(&path, &body).await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("ack failed ({status}): {text}");
        }
        Ok(())
    }

    /// Mirror the resume checkpoint to the gateway.
    pub async fn post_state(&self, checkpoint: &StateCheckpoint) -> anyhow::Result<()> {
        let path = format!("/api/runs/{}/state", self.run_id);
        let body = serde_json::to_value(checkpoint)?;
        let resp = self.post_signed_json(&path, &body).await?;
        if !resp.status().is_success() {
            anyhow::bail!("state post failed ({})", resp.status());
        }
        Ok(())
    }

    /// Signed liveness heartbeat.
    pub async fn heartbeat(&self, beat: &Heartbeat) -> anyhow::Result<()> {
        let path = format!("/api/runs/{}/heartbeat", self.run_id);
        let body = serde_json::to_value(beat)?;
        let resp = self.post_signed_json(&path, &body).await?;
        if !resp.status().is_success() {
            anyhow::bail!("heartbeat failed ({})", resp.status());
        }
        Ok(())
    }

    /// Upload an artifact. Multipart bodies sign over an empty body hash,
    /// mirroring the gateway's verifier.
    pub async fn upload_artifact(
        &self,
        name: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> anyhow::Result<()> {
        let path = "/api/ingest/artifact";
        let url = format!("{}{path}", self.base);
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(name.to_owned())
            .mime_str(mime)?;
        let form = reqwest::multipart::Form::new().part("file", part);
        let builder = self.http.post(&url).multipart(form);
        let resp = self.signed(builder, "POST", path, b"").send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("artifact upload failed ({status}): {text}");
        }
        Ok(())
    }

    /// WebSocket URL for the run's framebuffer tunnel.
    pub fn vnc_tunnel_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base)
        };
        format!("{ws_base}/ws/vnc/{}", self.run_id)
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
