// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `tether-gateway` and `tether` binaries as subprocesses
//! and exercises them over HTTP.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::{Duration, Instant};

/// Shared HMAC secret used across the harness.
pub const TEST_SECRET: &str = "0123456789abcdef0123456789abcdef";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to a compiled workspace binary.
pub fn workspace_binary(name: &str) -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join(name)
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A running `tether-gateway` process, killed on drop.
pub struct GatewayProcess {
    child: Child,
    pub port: u16,
    pub data_dir: tempfile::TempDir,
}

impl GatewayProcess {
    /// Spawn the gateway on a free port with a temp data dir and wait for
    /// its health endpoint.
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let port = free_port()?;
        let data_dir = tempfile::tempdir()?;

        let child = Command::new(workspace_binary("tether-gateway"))
            .args([
                "--port",
                &port.to_string(),
                "--host",
                "127.0.0.1",
                "--data-dir",
                &data_dir.path().to_string_lossy(),
                "--hmac-secret",
                TEST_SECRET,
            ])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let gateway = Self { child, port, data_dir };
        gateway.wait_healthy(Duration::from_secs(15)).await?;
        Ok(gateway)
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll `/api/health` until it answers or the deadline passes.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.base_url());
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        anyhow::bail!("gateway did not become healthy within {timeout:?}")
    }

    /// Create a run, returning `(run_id, capability_token)`.
    pub async fn create_run(
        &self,
        worker: &str,
        initial_command: Option<&str>,
    ) -> anyhow::Result<(String, String)> {
        let client = reqwest::Client::new();
        let mut body = serde_json::json!({ "worker": worker });
        if let Some(cmd) = initial_command {
            body["initialCommand"] = serde_json::Value::String(cmd.to_owned());
        }
        let resp =
            client.post(format!("{}/api/runs", self.base_url())).json(&body).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("run create failed: {}", resp.status());
        }
        let parsed: serde_json::Value = resp.json().await?;
        let id = parsed["id"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing run id"))?
            .to_owned();
        let token = parsed["capabilityToken"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("missing capability token"))?
            .to_owned();
        Ok((id, token))
    }

    /// Fetch a run's event log.
    pub async fn list_events(&self, run_id: &str) -> anyhow::Result<Vec<serde_json::Value>> {
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{}/api/runs/{run_id}/events?after=0&limit=500", self.base_url()))
            .send()
            .await?;
        let parsed: serde_json::Value = resp.json().await?;
        Ok(parsed["events"].as_array().cloned().unwrap_or_default())
    }

    /// Fetch the run row.
    pub async fn get_run(&self, run_id: &str) -> anyhow::Result<serde_json::Value> {
        let client = reqwest::Client::new();
        let resp = client.get(format!("{}/api/runs/{run_id}", self.base_url())).send().await?;
        Ok(resp.json().await?)
    }

    /// Enqueue a command through the console API. Run-scoped writes prove
    /// authority with the run's capability token.
    pub async fn insert_command(
        &self,
        run_id: &str,
        token: &str,
        command: &str,
    ) -> anyhow::Result<serde_json::Value> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/api/runs/{run_id}/commands", self.base_url()))
            .header("x-capability-token", token)
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    /// Request cooperative termination of a run.
    pub async fn stop_run(&self, run_id: &str, token: &str) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}/api/runs/{run_id}/stop", self.base_url()))
            .header("x-capability-token", token)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("stop failed: {}", resp.status());
        }
        Ok(())
    }
}

impl Drop for GatewayProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A running `tether` runner process, killed on drop.
pub struct RunnerProcess {
    child: Child,
    pub state_dir: tempfile::TempDir,
}

impl RunnerProcess {
    /// Spawn a rev-worker runner wrapping the given passthrough command.
    pub fn start_rev(
        gateway: &GatewayProcess,
        run_id: &str,
        token: &str,
        passthrough: &[&str],
    ) -> anyhow::Result<Self> {
        let state_dir = tempfile::tempdir()?;
        let mut args = vec![
            "--gateway-url".to_owned(),
            gateway.base_url(),
            "--run-id".to_owned(),
            run_id.to_owned(),
            "--capability-token".to_owned(),
            token.to_owned(),
            "--hmac-secret".to_owned(),
            TEST_SECRET.to_owned(),
            "--worker".to_owned(),
            "rev".to_owned(),
            "--state-dir".to_owned(),
            state_dir.path().to_string_lossy().into_owned(),
            "--poll-interval-secs".to_owned(),
            "1".to_owned(),
            "--".to_owned(),
        ];
        args.extend(passthrough.iter().map(|s| (*s).to_owned()));

        let child = Command::new(workspace_binary("tether"))
            .args(&args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        Ok(Self { child, state_dir })
    }

    /// Wait for the runner to exit on its own.
    pub fn wait(&mut self, timeout: Duration) -> anyhow::Result<i32> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status.code().unwrap_or(-1));
            }
            if Instant::now() >= deadline {
                anyhow::bail!("runner did not exit within {timeout:?}");
            }
            std::thread::sleep(Duration::from_millis(100));
        }
    }
}

impl Drop for RunnerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
