// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::AtomicUsize;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use tether_wire::allowlist::CommandAllowlist;

use crate::config::GatewayConfig;
use crate::hub::SubscriptionHub;
use crate::store::Store;
use crate::tunnel::TunnelBroker;

/// Shared gateway state.
pub struct GatewayState {
    pub config: GatewayConfig,
    pub store: Store,
    pub hub: SubscriptionHub,
    pub tunnels: TunnelBroker,
    pub allowlist: CommandAllowlist,
    /// Shared HMAC secret for signed runner traffic.
    pub secret: Vec<u8>,
    pub shutdown: CancellationToken,
    pub started_at: Instant,
    /// Live viewer WebSocket connections (health counter).
    pub ws_viewer_count: AtomicUsize,
}

impl GatewayState {
    pub fn new(config: GatewayConfig, store: Store, shutdown: CancellationToken) -> Self {
        let secret = config.resolve_secret();
        let allowlist = CommandAllowlist::new(&config.extra_allowed_commands);
        Self {
            config,
            store,
            hub: SubscriptionHub::new(),
            tunnels: TunnelBroker::new(),
            allowlist,
            secret,
            shutdown,
            started_at: Instant::now(),
            ws_viewer_count: AtomicUsize::new(0),
        }
    }
}

/// Current epoch seconds.
pub fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
