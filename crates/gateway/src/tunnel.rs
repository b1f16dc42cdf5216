// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel broker — pairs one runner-side and one viewer-side binary channel
//! per run and relays opaque frames between them.
//!
//! Frames arriving before the peer attaches are buffered and flushed the
//! instant it does. Either side detaching tears the whole tunnel down; a
//! frame over the cap or a peer that stops draining does the same.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use tether_wire::types::MAX_FRAME_BYTES;

use crate::error::GatewayError;

/// Outbound queue depth per attached side.
const SIDE_CHANNEL_CAPACITY: usize = 256;

/// Cap on bytes buffered for a side that has not attached yet.
const MAX_QUEUED_BYTES: usize = 8 * 1024 * 1024;

/// Which end of a tunnel a channel serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelSide {
    Runner,
    Viewer,
}

impl TunnelSide {
    pub fn peer(self) -> Self {
        match self {
            Self::Runner => Self::Viewer,
            Self::Viewer => Self::Runner,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Runner => "runner",
            Self::Viewer => "viewer",
        }
    }
}

struct SideState {
    attached: Option<mpsc::Sender<Bytes>>,
    connected_at: Option<i64>,
    /// Frames waiting for this side to attach.
    queued: VecDeque<Bytes>,
    queued_bytes: usize,
}

impl SideState {
    fn new() -> Self {
        Self { attached: None, connected_at: None, queued: VecDeque::new(), queued_bytes: 0 }
    }
}

struct Tunnel {
    run_id: String,
    created_at: i64,
    cancel: CancellationToken,
    runner: Mutex<SideState>,
    viewer: Mutex<SideState>,
    bytes_from_runner: AtomicU64,
    bytes_from_viewer: AtomicU64,
}

impl Tunnel {
    fn side(&self, side: TunnelSide) -> &Mutex<SideState> {
        match side {
            TunnelSide::Runner => &self.runner,
            TunnelSide::Viewer => &self.viewer,
        }
    }

    fn from_counter(&self, side: TunnelSide) -> &AtomicU64 {
        match side {
            TunnelSide::Runner => &self.bytes_from_runner,
            TunnelSide::Viewer => &self.bytes_from_viewer,
        }
    }
}

/// Handle returned to an attached channel's task.
#[derive(Debug)]
pub struct TunnelAttachment {
    pub run_id: String,
    pub side: TunnelSide,
    /// Frames buffered before this side attached, in arrival order. Write
    /// these to the socket before draining `rx`.
    pub backlog: Vec<Bytes>,
    /// Frames to write to the attached socket.
    pub rx: mpsc::Receiver<Bytes>,
    /// Fires when the tunnel is torn down (peer closed, oversize frame).
    pub closed: CancellationToken,
}

/// Stats for one tunnel.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStat {
    pub run_id: String,
    pub created_at: i64,
    pub runner_connected: bool,
    pub viewer_connected: bool,
    pub runner_connected_at: Option<i64>,
    pub viewer_connected_at: Option<i64>,
    pub bytes_from_runner: u64,
    pub bytes_from_viewer: u64,
}

/// Stats across the broker.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelStats {
    pub total: usize,
    pub tunnels: Vec<TunnelStat>,
}

pub struct TunnelBroker {
    tunnels: Mutex<HashMap<String, Arc<Tunnel>>>,
}

impl TunnelBroker {
    pub fn new() -> Self {
        Self { tunnels: Mutex::new(HashMap::new()) }
    }

    /// Attach a channel to one side of a run's tunnel, creating the tunnel
    /// on first attach. At most one channel per side; a second attach on an
    /// occupied side is rejected.
    pub fn attach(
        &self,
        run_id: &str,
        side: TunnelSide,
        now: i64,
    ) -> Result<TunnelAttachment, GatewayError> {
        let tunnel = {
            let mut tunnels = self.tunnels.lock();
            Arc::clone(tunnels.entry(run_id.to_owned()).or_insert_with(|| {
                Arc::new(Tunnel {
                    run_id: run_id.to_owned(),
                    created_at: now,
                    cancel: CancellationToken::new(),
                    runner: Mutex::new(SideState::new()),
                    viewer: Mutex::new(SideState::new()),
                    bytes_from_runner: AtomicU64::new(0),
                    bytes_from_viewer: AtomicU64::new(0),
                })
            }))
        };

        let (tx, rx) = mpsc::channel(SIDE_CHANNEL_CAPACITY);
        let backlog = {
            let mut state = tunnel.side(side).lock();
            if state.attached.is_some() {
                return Err(GatewayError::TunnelBusy);
            }
            state.attached = Some(tx);
            state.connected_at = Some(now);
            state.queued_bytes = 0;
            // Hand buffered frames to the caller; anything forwarded from
            // here on goes through the channel, so per-direction order holds.
            std::mem::take(&mut state.queued).into()
        };

        tracing::debug!(run_id = %run_id, side = side.as_str(), "tunnel side attached");
        Ok(TunnelAttachment {
            run_id: run_id.to_owned(),
            side,
            backlog,
            rx,
            closed: tunnel.cancel.clone(),
        })
    }

    /// Relay one frame from `side` toward its peer. Oversize frames and
    /// undrained peers tear the tunnel down.
    pub fn forward(
        &self,
        run_id: &str,
        side: TunnelSide,
        frame: Bytes,
    ) -> Result<(), GatewayError> {
        if frame.len() > MAX_FRAME_BYTES {
            self.teardown(run_id);
            return Err(GatewayError::FrameOversize);
        }
        let tunnel = {
            let tunnels = self.tunnels.lock();
            match tunnels.get(run_id) {
                Some(t) => Arc::clone(t),
                None => return Ok(()), // already torn down
            }
        };

        tunnel.from_counter(side).fetch_add(frame.len() as u64, Ordering::Relaxed);

        let peer = side.peer();
        let mut state = tunnel.side(peer).lock();
        match state.attached {
            Some(ref tx) => {
                if tx.try_send(frame).is_err() {
                    drop(state);
                    self.teardown(run_id);
                }
            }
            None => {
                if state.queued_bytes + frame.len() > MAX_QUEUED_BYTES {
                    drop(state);
                    self.teardown(run_id);
                    return Err(GatewayError::PayloadTooLarge);
                }
                state.queued_bytes += frame.len();
                state.queued.push_back(frame);
            }
        }
        Ok(())
    }

    /// Detach one side. Closing either side closes both and removes the
    /// tunnel.
    pub fn detach(&self, run_id: &str, side: TunnelSide) {
        tracing::debug!(run_id = %run_id, side = side.as_str(), "tunnel side detached");
        self.teardown(run_id);
    }

    fn teardown(&self, run_id: &str) {
        let removed = self.tunnels.lock().remove(run_id);
        if let Some(tunnel) = removed {
            tunnel.cancel.cancel();
        }
    }

    /// Bytes delivered into the tunnel from each side, for one run.
    pub fn stat(&self, run_id: &str) -> Option<TunnelStat> {
        let tunnels = self.tunnels.lock();
        tunnels.get(run_id).map(|t| stat_of(t))
    }

    pub fn stats(&self) -> TunnelStats {
        let tunnels = self.tunnels.lock();
        let list: Vec<TunnelStat> = tunnels.values().map(|t| stat_of(t)).collect();
        TunnelStats { total: list.len(), tunnels: list }
    }

    pub fn tunnel_count(&self) -> usize {
        self.tunnels.lock().len()
    }
}

impl Default for TunnelBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn stat_of(t: &Tunnel) -> TunnelStat {
    let runner = t.runner.lock();
    let viewer = t.viewer.lock();
    TunnelStat {
        run_id: t.run_id.clone(),
        created_at: t.created_at,
        runner_connected: runner.attached.is_some(),
        viewer_connected: viewer.attached.is_some(),
        runner_connected_at: runner.connected_at,
        viewer_connected_at: viewer.connected_at,
        bytes_from_runner: t.bytes_from_runner.load(Ordering::Relaxed),
        bytes_from_viewer: t.bytes_from_viewer.load(Ordering::Relaxed),
    }
}

#[cfg(test)]
#[path = "tunnel_tests.rs"]
mod tests;
