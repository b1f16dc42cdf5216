// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use tether::config::RunnerConfig;

#[tokio::main]
async fn main() {
    let config = RunnerConfig::parse();

    // reqwest is built against rustls with no default provider; install ring
    // before any TLS connection is attempted.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = config.validate() {
        error!("invalid configuration: {e:#}");
        std::process::exit(1);
    }

    match tether::run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}
