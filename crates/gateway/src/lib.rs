// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tether gateway: authenticated runner ingest, per-run event log, command
//! outbox, viewer fan-out, and the binary framebuffer tunnel.

pub mod config;
pub mod error;
pub mod hub;
pub mod state;
pub mod store;
pub mod sweep;
pub mod transport;
pub mod tunnel;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::GatewayConfig;
use crate::state::GatewayState;
use crate::store::Store;
use crate::sweep::spawn_sweeper;
use crate::transport::build_router;

/// Run the gateway until shutdown.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(config.data_dir.join("artifacts"))?;
    std::fs::create_dir_all(config.data_dir.join("runs"))?;

    let store = Store::open(&config.db_path())?;
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let state = Arc::new(GatewayState::new(config, store, shutdown.clone()));
    spawn_sweeper(Arc::clone(&state));

    let router = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("tether-gateway listening on {addr}");
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(err = %e, "failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        tracing::info!("shutdown signal received");
        shutdown.cancel();
    });
}
