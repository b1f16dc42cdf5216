// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Periodic signed heartbeat — the gateway derives client liveness tiers
//! from its cadence.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use tether_wire::types::Heartbeat;

use crate::client::GatewayClient;

/// Spawn the heartbeat loop. The first beat goes out immediately so the
/// client row exists before the first sweep.
pub fn spawn_heartbeat(
    client: Arc<GatewayClient>,
    beat: Heartbeat,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            if let Err(e) = client.heartbeat(&beat).await {
                tracing::warn!(err = %e, "heartbeat failed");
            }
        }
    });
}
