// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic maintenance: nonce expiry, client liveness tiers, run retention.
//!
//! All cleanup runs on this one timer task — request handlers never do it.

use std::sync::Arc;
use std::time::Duration;

use crate::state::{now_secs, GatewayState};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const SECS_PER_DAY: i64 = 86_400;

/// Spawn the once-per-minute sweeper. Exits on shutdown.
pub fn spawn_sweeper(state: Arc<GatewayState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            sweep_once(&state).await;
        }
    });
}

/// One sweep pass. Failures are logged, never fatal — the next tick retries.
pub async fn sweep_once(state: &GatewayState) {
    let now = now_secs();

    match state.store.sweep_nonces(now - state.config.nonce_expiry_secs).await {
        Ok(removed) if removed > 0 => tracing::debug!(removed, "swept expired nonces"),
        Ok(_) => {}
        Err(e) => tracing::warn!(err = %e, "nonce sweep failed"),
    }

    if let Err(e) = state.store.sweep_client_status(now).await {
        tracing::warn!(err = %e, "client status sweep failed");
    }

    let cutoff = now - i64::from(state.config.retention_days) * SECS_PER_DAY;
    match state.store.delete_expired_runs(cutoff).await {
        Ok(ids) => {
            for run_id in ids {
                for dir in
                    [state.config.artifacts_dir(&run_id), state.config.run_dir(&run_id)]
                {
                    if dir.exists() {
                        if let Err(e) = std::fs::remove_dir_all(&dir) {
                            tracing::warn!(run_id = %run_id, err = %e, "failed to remove run dir");
                        }
                    }
                }
                tracing::info!(run_id = %run_id, "expired run removed by retention sweep");
            }
        }
        Err(e) => tracing::warn!(err = %e, "run retention sweep failed"),
    }
}
