// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription hub — fans event-log additions and control messages out to
//! live viewer channels.
//!
//! One mutex around the `run → subscribers` map. Publishing snapshots the
//! subscriber list under the lock, then enqueues outside it; a subscriber
//! whose channel is full or closed is dropped rather than backpressuring
//! the ingest path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_wire::types::EventKind;

/// Queue depth per viewer channel before it counts as slow.
const VIEWER_CHANNEL_CAPACITY: usize = 256;

/// Messages pushed to subscribed viewers.
#[derive(Debug, Clone)]
pub enum ViewerPush {
    Event {
        event_id: i64,
        kind: EventKind,
        data: String,
        timestamp: i64,
        producer_seq: Option<i64>,
    },
    CommandCompleted {
        run_id: String,
        command_id: String,
        success: bool,
        result: Option<String>,
        error: Option<String>,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<ViewerPush>,
}

pub struct SubscriptionHub {
    inner: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()), next_id: AtomicU64::new(1) }
    }

    /// Create a viewer channel for a run. Returns the subscription id (for
    /// unsubscribe) and the receiving end.
    pub fn subscribe(&self, run_id: &str) -> (u64, mpsc::Receiver<ViewerPush>) {
        let (tx, rx) = mpsc::channel(VIEWER_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.lock().entry(run_id.to_owned()).or_default().push(Subscriber { id, tx });
        (id, rx)
    }

    /// Remove one subscription. A missing id is a no-op (the hub may have
    /// already dropped a slow subscriber).
    pub fn unsubscribe(&self, run_id: &str, subscription_id: u64) {
        let mut inner = self.inner.lock();
        if let Some(subs) = inner.get_mut(run_id) {
            subs.retain(|s| s.id != subscription_id);
            if subs.is_empty() {
                inner.remove(run_id);
            }
        }
    }

    /// Push a message to every subscriber of one run. Slow or closed
    /// subscribers are removed.
    pub fn publish(&self, run_id: &str, push: ViewerPush) {
        let snapshot: Vec<(u64, mpsc::Sender<ViewerPush>)> = {
            let inner = self.inner.lock();
            match inner.get(run_id) {
                Some(subs) => subs.iter().map(|s| (s.id, s.tx.clone())).collect(),
                None => return,
            }
        };

        let mut dead = Vec::new();
        for (id, tx) in snapshot {
            if tx.try_send(push.clone()).is_err() {
                dead.push(id);
            }
        }
        if !dead.is_empty() {
            let mut inner = self.inner.lock();
            if let Some(subs) = inner.get_mut(run_id) {
                subs.retain(|s| !dead.contains(&s.id));
                if subs.is_empty() {
                    inner.remove(run_id);
                }
            }
            tracing::debug!(run_id = %run_id, dropped = dead.len(), "dropped slow viewers");
        }
    }

    /// Number of live subscriptions across all runs.
    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }
}

impl Default for SubscriptionHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "hub_tests.rs"]
mod tests;
