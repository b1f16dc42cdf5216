// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resume checkpoint persisted beside the run log.
//!
//! Written on every significant event (best-effort) and loaded on
//! `--resume`, so a restarted runner continues its producer sequence
//! instead of starting over.

use std::path::Path;

use tether_wire::types::StateCheckpoint;

/// Write the checkpoint. Failures are logged, never fatal — losing a
/// checkpoint costs a resume, not the run.
pub fn save(path: &Path, checkpoint: &StateCheckpoint) {
    let serialized = match serde_json::to_vec_pretty(checkpoint) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(err = %e, "checkpoint serialize failed");
            return;
        }
    };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let tmp = path.with_extension("json.tmp");
    if let Err(e) = std::fs::write(&tmp, &serialized).and_then(|()| std::fs::rename(&tmp, path)) {
        tracing::warn!(err = %e, path = %path.display(), "checkpoint write failed");
    }
}

/// Load a checkpoint if one exists and parses.
pub fn load(path: &Path) -> Option<StateCheckpoint> {
    let contents = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(checkpoint) => Some(checkpoint),
        Err(e) => {
            tracing::warn!(err = %e, path = %path.display(), "checkpoint parse failed");
            None
        }
    }
}

#[cfg(test)]
#[path = "state_file_tests.rs"]
mod tests;
