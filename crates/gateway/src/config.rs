// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;

use clap::Parser;

use tether_wire::sign;

/// Central gateway brokering runners and viewers.
#[derive(Debug, Clone, Parser)]
#[command(name = "tether-gateway", version, about)]
pub struct GatewayConfig {
    /// Port to listen on.
    #[arg(long, env = "GATEWAY_PORT", default_value = "8443")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "GATEWAY_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Data directory (database, artifacts, run logs).
    #[arg(long, env = "GATEWAY_DATA_DIR", default_value = "./data")]
    pub data_dir: PathBuf,

    /// Shared HMAC signing secret (≥32 bytes). Generated ephemerally when
    /// absent unless --strict-secret is set.
    #[arg(long, env = "HMAC_SECRET")]
    pub hmac_secret: Option<String>,

    /// Refuse to start without a configured HMAC secret.
    #[arg(long, env = "HMAC_STRICT")]
    pub strict_secret: bool,

    /// Optional bearer token for the operator console API.
    #[arg(long, env = "GATEWAY_CONSOLE_TOKEN")]
    pub console_token: Option<String>,

    /// Days to keep finished runs before the sweep deletes them.
    #[arg(long, env = "RUN_RETENTION_DAYS", default_value = "30")]
    pub retention_days: u32,

    /// Extra allowlisted operator commands, comma-separated.
    #[arg(long, env = "EXTRA_ALLOWED_COMMANDS", value_delimiter = ',')]
    pub extra_allowed_commands: Vec<String>,

    /// Accepted clock skew for signed requests, in seconds.
    #[arg(long, env = "GATEWAY_CLOCK_SKEW_SECS", default_value = "300")]
    pub clock_skew_secs: i64,

    /// Nonce retention window, in seconds.
    #[arg(long, env = "GATEWAY_NONCE_EXPIRY_SECS", default_value = "600")]
    pub nonce_expiry_secs: i64,

    /// Log format (text or json).
    #[arg(long, env = "GATEWAY_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "GATEWAY_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Some(ref secret) = self.hmac_secret {
            if secret.len() < sign::MIN_SECRET_LEN {
                anyhow::bail!(
                    "HMAC_SECRET must be at least {} bytes, got {}",
                    sign::MIN_SECRET_LEN,
                    secret.len()
                );
            }
        } else if self.strict_secret {
            anyhow::bail!("--strict-secret is set but no HMAC_SECRET is configured");
        }
        if self.nonce_expiry_secs < self.clock_skew_secs {
            anyhow::bail!("nonce expiry must be at least the clock-skew window");
        }
        if self.log_format != "text" && self.log_format != "json" {
            anyhow::bail!("invalid log format: {} (expected text or json)", self.log_format);
        }
        Ok(())
    }

    /// Resolve the signing secret, generating an ephemeral one if permitted.
    pub fn resolve_secret(&self) -> Vec<u8> {
        match self.hmac_secret {
            Some(ref s) => s.clone().into_bytes(),
            None => {
                let generated = sign::generate_secret();
                tracing::warn!(
                    "no HMAC_SECRET configured; using an ephemeral secret — \
                     runners must be launched with this value"
                );
                generated.into_bytes()
            }
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("db.sqlite")
    }

    pub fn artifacts_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("artifacts").join(run_id)
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.data_dir.join("runs").join(run_id)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
