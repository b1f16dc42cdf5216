// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run, event, and command vocabulary shared across the wire.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum accepted event payload, in bytes.
pub const MAX_EVENT_BYTES: usize = 1024 * 1024;

/// Maximum accepted tunnel frame, in bytes.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Maximum accepted command-ack result, in bytes. Runners truncate with a
/// `[TRUNCATED]` suffix rather than dropping the ack.
pub const MAX_ACK_RESULT_BYTES: usize = 10 * 1024 * 1024;

/// Maximum accepted artifact upload, in bytes.
pub const MAX_ARTIFACT_BYTES: usize = 50 * 1024 * 1024;

/// Suffix appended to an ack result that was cut at [`MAX_ACK_RESULT_BYTES`].
pub const TRUNCATED_SUFFIX: &str = "[TRUNCATED]";

/// Run lifecycle status. Transitions are monotonic:
/// `pending → running → done | failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Whether `next` is a legal forward transition from `self`.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running) => true,
            (Self::Pending | Self::Running, Self::Done | Self::Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event-log record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Stdout,
    Stderr,
    Marker,
    Info,
    Error,
    Assist,
    PromptWaiting,
    PromptResolved,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Marker => "marker",
            Self::Info => "info",
            Self::Error => "error",
            Self::Assist => "assist",
            Self::PromptWaiting => "prompt_waiting",
            Self::PromptResolved => "prompt_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "marker" => Some(Self::Marker),
            "info" => Some(Self::Info),
            "error" => Some(Self::Error),
            "assist" => Some(Self::Assist),
            "prompt_waiting" => Some(Self::PromptWaiting),
            "prompt_resolved" => Some(Self::PromptResolved),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker families a runner can wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkerType {
    Claude,
    Codex,
    Gemini,
    OllamaLaunch,
    Rev,
    Vnc,
    HandsOn,
}

impl WorkerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::OllamaLaunch => "ollama-launch",
            Self::Rev => "rev",
            Self::Vnc => "vnc",
            Self::HandsOn => "hands-on",
        }
    }

    /// Parse a worker name. `ollama` is accepted as an alias for
    /// `ollama-launch`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "claude" => Some(Self::Claude),
            "codex" => Some(Self::Codex),
            "gemini" => Some(Self::Gemini),
            "ollama-launch" | "ollama" => Some(Self::OllamaLaunch),
            "rev" => Some(Self::Rev),
            "vnc" => Some(Self::Vnc),
            "hands-on" => Some(Self::HandsOn),
            _ => None,
        }
    }
}

impl fmt::Display for WorkerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reserved command payloads interpreted by the runner itself rather than
/// executed as shell strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// Cooperative termination: SIGINT, then forced kill after a grace window.
    Stop,
    /// Immediate forced termination.
    Halt,
    /// Inject a cancel byte (0x03) into the child's stdin.
    Escape,
    /// Append text verbatim to the child's stdin.
    Input { text: String },
    /// Ack, then exit with a hand-off marker so a hands-on runner can start.
    LaunchHandsOn { reason: String },
}

pub const STOP_COMMAND: &str = "__STOP__";
pub const HALT_COMMAND: &str = "__HALT__";
pub const ESCAPE_COMMAND: &str = "__ESCAPE__";
pub const INPUT_PREFIX: &str = "__INPUT__:";
pub const LAUNCH_HANDS_ON_PREFIX: &str = "__LAUNCH_HANDS_ON__:";

impl ControlCommand {
    /// Parse a command payload; `None` means the payload is a plain shell
    /// string subject to the allowlist.
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            STOP_COMMAND => return Some(Self::Stop),
            HALT_COMMAND => return Some(Self::Halt),
            ESCAPE_COMMAND => return Some(Self::Escape),
            _ => {}
        }
        if let Some(text) = command.strip_prefix(INPUT_PREFIX) {
            return Some(Self::Input { text: text.to_owned() });
        }
        if let Some(reason) = command.strip_prefix(LAUNCH_HANDS_ON_PREFIX) {
            return Some(Self::LaunchHandsOn { reason: reason.to_owned() });
        }
        None
    }
}

/// Body of `POST /api/ingest/event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubmission {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub data: String,
    /// Runner-local sequence, advisory only (end-to-end loss/dup detection).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// One pending command as returned to the polling runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCommand {
    pub id: String,
    pub command: String,
    pub created_at: i64,
}

/// Body of `POST /api/runs/{id}/commands/{cmdId}/ack`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Runner checkpoint persisted beside the run log and mirrored to the
/// gateway via `POST /api/runs/{id}/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateCheckpoint {
    pub run_id: String,
    /// Last producer sequence emitted; the next event carries `sequence + 1`.
    pub sequence: u64,
    pub working_dir: String,
    pub autonomous: bool,
    pub worker_type: WorkerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub saved_at: i64,
}

/// Body of the signed runner heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Opaque per-process identifier of the runner instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Payload of a `marker` event that ends a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedMarker {
    pub marker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
}

pub const MARKER_FINISHED: &str = "finished";
pub const MARKER_HANDS_ON: &str = "hands_on_requested";

impl FinishedMarker {
    pub fn new(exit_code: Option<i32>, signal: Option<i32>) -> Self {
        Self { marker: MARKER_FINISHED.to_owned(), exit_code, signal }
    }

    /// Parse marker-event data; `None` when the payload is some other marker.
    pub fn parse(data: &str) -> Option<Self> {
        let parsed: FinishedMarker = serde_json::from_str(data).ok()?;
        (parsed.marker == MARKER_FINISHED).then_some(parsed)
    }
}

#[cfg(test)]
#[path = "types_tests.rs"]
mod tests;
