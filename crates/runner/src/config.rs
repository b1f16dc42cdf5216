// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use tether_wire::sign;
use tether_wire::types::WorkerType;

/// Host-side supervisor wrapping a single agent invocation.
#[derive(Debug, Clone, Parser)]
#[command(name = "tether", version, about)]
pub struct RunnerConfig {
    /// Gateway base URL.
    #[arg(long, env = "TETHER_GATEWAY_URL", default_value = "http://127.0.0.1:8443")]
    pub gateway_url: String,

    /// Run identifier assigned by the operator console.
    #[arg(long, env = "TETHER_RUN_ID")]
    pub run_id: String,

    /// Per-run capability token.
    #[arg(long, env = "TETHER_CAPABILITY_TOKEN")]
    pub capability_token: String,

    /// Shared HMAC signing secret (must match the gateway).
    #[arg(long, env = "HMAC_SECRET")]
    pub hmac_secret: String,

    /// Worker type (claude, codex, gemini, ollama-launch, rev, vnc, hands-on).
    #[arg(long, env = "TETHER_WORKER")]
    pub worker: String,

    /// Model tag passed to the agent CLI.
    #[arg(long, env = "TETHER_MODEL")]
    pub model: Option<String>,

    /// Autonomous mode: full-color TERM, no cooperative prompt handling.
    #[arg(long, env = "TETHER_AUTONOMOUS")]
    pub autonomous: bool,

    /// Working directory for the agent and operator commands.
    #[arg(long, env = "TETHER_WORKDIR", default_value = ".")]
    pub workdir: PathBuf,

    /// Stable identifier for this runner host.
    #[arg(long, env = "TETHER_CLIENT_ID")]
    pub client_id: Option<String>,

    /// Display name for this runner host.
    #[arg(long, env = "TETHER_CLIENT_NAME")]
    pub client_name: Option<String>,

    /// Command poll cadence, in seconds.
    #[arg(long, env = "COMMAND_POLL_INTERVAL", default_value = "2")]
    pub poll_interval_secs: u64,

    /// Heartbeat cadence, in seconds.
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value = "30")]
    pub heartbeat_interval_secs: u64,

    /// Accept self-signed gateway certificates (dev only).
    #[arg(long, env = "ALLOW_SELF_SIGNED")]
    pub allow_self_signed: bool,

    /// Directory for the run log and the resume checkpoint.
    #[arg(long, env = "TETHER_STATE_DIR", default_value = "./.tether")]
    pub state_dir: PathBuf,

    /// First prompt handed to the agent on start.
    #[arg(long, env = "TETHER_INITIAL_COMMAND")]
    pub initial_command: Option<String>,

    /// Resume from the persisted checkpoint in the state directory.
    #[arg(long, env = "TETHER_RESUME")]
    pub resume: bool,

    /// Grace window between SIGINT and forced kill, in seconds.
    #[arg(long, env = "TETHER_STOP_GRACE", default_value = "10")]
    pub stop_grace_secs: u64,

    /// Command to run (after --), used by the rev passthrough worker.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl RunnerConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.worker_enum()?;
        if self.hmac_secret.len() < sign::MIN_SECRET_LEN {
            anyhow::bail!(
                "HMAC_SECRET must be at least {} bytes, got {}",
                sign::MIN_SECRET_LEN,
                self.hmac_secret.len()
            );
        }
        if self.worker_enum()? == WorkerType::Rev && self.command.is_empty() {
            anyhow::bail!("the rev worker requires a passthrough command after --");
        }
        if self.poll_interval_secs == 0 {
            anyhow::bail!("poll interval must be at least 1 second");
        }
        Ok(())
    }

    /// Parse the worker string (`ollama` aliases `ollama-launch`).
    pub fn worker_enum(&self) -> anyhow::Result<WorkerType> {
        WorkerType::parse(&self.worker)
            .ok_or_else(|| anyhow::anyhow!("invalid worker type: {}", self.worker))
    }

    /// Stable client id, defaulting to the hostname.
    pub fn effective_client_id(&self) -> String {
        if let Some(ref id) = self.client_id {
            return id.clone();
        }
        nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "runner".to_owned())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    /// Per-run on-disk log path: `{state_dir}/{worker}.log`.
    pub fn log_path(&self) -> PathBuf {
        self.state_dir.join(format!("{}.log", self.worker))
    }

    /// Resume checkpoint path: `{state_dir}/state.json`.
    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join("state.json")
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
