// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-poll helpers: the dedup window, result truncation, and the
//! short-lived subprocess path for plain allowlisted commands.
//!
//! The gateway returns the same pending set until acked, so re-execution
//! suppression is the runner's job: a processed id is remembered for the
//! dedup window and re-admitted only if its ack could not be delivered.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};

use tether_wire::types::{CommandAck, MAX_ACK_RESULT_BYTES, TRUNCATED_SUFFIX};

/// How long a processed command id suppresses re-execution.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Ack delivery attempts before the command is re-admitted for polling.
pub const ACK_ATTEMPTS: u32 = 3;

/// In-memory processed-command set with expiry.
pub struct DedupSet {
    seen: HashMap<String, Instant>,
    window: Duration,
}

impl DedupSet {
    pub fn new(window: Duration) -> Self {
        Self { seen: HashMap::new(), window }
    }

    /// Record an id; returns `false` if it was already inside the window.
    pub fn insert(&mut self, id: &str) -> bool {
        self.sweep();
        if self.seen.contains_key(id) {
            return false;
        }
        self.seen.insert(id.to_owned(), Instant::now());
        true
    }

    /// Forget an id (failed ack — let the next poll retry it).
    pub fn remove(&mut self, id: &str) {
        self.seen.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.seen.get(id).is_some_and(|at| at.elapsed() < self.window)
    }

    fn sweep(&mut self) {
        let window = self.window;
        self.seen.retain(|_, at| at.elapsed() < window);
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new(DEDUP_WINDOW)
    }
}

/// Cap an ack result at the wire limit, marking the cut.
pub fn truncate_result(mut result: String) -> String {
    let cap = MAX_ACK_RESULT_BYTES - TRUNCATED_SUFFIX.len();
    if result.len() <= cap {
        return result;
    }
    // Cut on a char boundary at or below the cap.
    let mut cut = cap;
    while cut > 0 && !result.is_char_boundary(cut) {
        cut -= 1;
    }
    result.truncate(cut);
    result.push_str(TRUNCATED_SUFFIX);
    result
}

/// Run a plain allowlisted command as a short-lived subprocess in the
/// working directory and shape the outcome as an ack.
///
/// The command was already vetted by the gateway's allowlist; it is split
/// on whitespace and executed directly, never through a shell.
pub async fn run_allowlisted(command: &str, workdir: &Path) -> CommandAck {
    let mut parts = command.split_whitespace();
    let Some(program) = parts.next() else {
        return CommandAck { result: None, error: Some("empty command".to_owned()) };
    };
    let args: Vec<&str> = parts.collect();

    let output = tokio::process::Command::new(program)
        .args(&args)
        .current_dir(workdir)
        .stdin(std::process::Stdio::null())
        .output()
        .await;

    match output {
        Ok(output) => {
            let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
            if !output.stderr.is_empty() {
                combined.push_str(&String::from_utf8_lossy(&output.stderr));
            }
            let combined = truncate_result(combined);
            if output.status.success() {
                CommandAck { result: Some(combined), error: None }
            } else {
                CommandAck {
                    result: Some(combined),
                    error: Some(format!("exited with {}", output.status)),
                }
            }
        }
        Err(e) => CommandAck { result: None, error: Some(format!("spawn failed: {e}")) },
    }
}

#[cfg(test)]
#[path = "poll_tests.rs"]
mod tests;
