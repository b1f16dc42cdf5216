// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-worker command builders.
//!
//! `build` is a pure function of its inputs — no I/O, no environment reads.
//! The supervisor owns env curation and working-directory placement; the
//! builder only decides argv shape.

use tether_wire::types::WorkerType;

/// How the supervisor feeds input to a worker's child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    /// A fresh process per operator input, stdin ignored (claude).
    PerInput,
    /// One long-running process; input goes to its stdin.
    LongRunning,
}

/// Inputs a builder may consider.
#[derive(Debug, Clone, Default)]
pub struct BuildInput<'a> {
    /// Operator text for this invocation (initial command or `__INPUT__`).
    pub input: Option<&'a str>,
    /// Model tag, where the worker supports one.
    pub model: Option<&'a str>,
    /// Resume a previous session rather than starting fresh (codex).
    pub resume: bool,
    /// Passthrough argv for the rev worker; shell program for hands-on.
    pub passthrough: &'a [String],
}

/// A concrete command the supervisor can spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Human-readable form for events and the run log.
    pub display: String,
}

impl CommandSpec {
    fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let display = if args.is_empty() {
            program.clone()
        } else {
            format!("{program} {}", args.join(" "))
        };
        Self { program, args, display }
    }
}

/// Spawn discipline for a worker family.
pub fn spawn_mode(worker: WorkerType) -> SpawnMode {
    match worker {
        WorkerType::Claude => SpawnMode::PerInput,
        _ => SpawnMode::LongRunning,
    }
}

/// Build the argv for one worker invocation.
pub fn build(worker: WorkerType, input: &BuildInput<'_>, autonomous: bool) -> CommandSpec {
    match worker {
        WorkerType::Claude => build_claude(input),
        WorkerType::Codex => build_codex(input),
        WorkerType::Gemini => build_gemini(input, autonomous),
        WorkerType::OllamaLaunch => build_ollama_launch(input),
        WorkerType::Rev => build_rev(input),
        WorkerType::Vnc => build_vnc(),
        WorkerType::HandsOn => build_hands_on(input),
    }
}

fn build_claude(input: &BuildInput<'_>) -> CommandSpec {
    let mut args =
        vec!["--print".to_owned(), "--permission-mode".to_owned(), "acceptEdits".to_owned()];
    if let Some(model) = input.model {
        args.push("--model".to_owned());
        args.push(model.to_owned());
    }
    if let Some(text) = input.input {
        args.push(text.to_owned());
    }
    CommandSpec::new("claude", args)
}

fn build_codex(input: &BuildInput<'_>) -> CommandSpec {
    let mut args = if input.resume {
        vec!["resume".to_owned(), "--last".to_owned()]
    } else {
        vec!["exec".to_owned()]
    };
    if let Some(text) = input.input {
        args.push(text.to_owned());
    }
    CommandSpec::new("codex", args)
}

fn build_gemini(input: &BuildInput<'_>, autonomous: bool) -> CommandSpec {
    let mut args = vec!["--output-format".to_owned(), "text".to_owned()];
    if let Some(model) = input.model {
        args.push("--model".to_owned());
        args.push(model.to_owned());
    }
    if let Some(text) = input.input {
        args.push("--prompt".to_owned());
        args.push(text.to_owned());
    }
    args.push("--approval-mode".to_owned());
    args.push(if autonomous { "yolo".to_owned() } else { "default".to_owned() });
    CommandSpec::new("gemini", args)
}

/// Integrations the ollama launcher knows how to wrap.
const OLLAMA_INTEGRATIONS: &[&str] = &["claude", "opencode", "codex", "droid"];

fn build_ollama_launch(input: &BuildInput<'_>) -> CommandSpec {
    let integration = input
        .model
        .filter(|m| OLLAMA_INTEGRATIONS.contains(m))
        .unwrap_or(OLLAMA_INTEGRATIONS[0]);
    let mut args = vec!["launch".to_owned(), integration.to_owned()];
    if let Some(text) = input.input {
        args.push(text.to_owned());
    }
    CommandSpec::new("ollama", args)
}

fn build_rev(input: &BuildInput<'_>) -> CommandSpec {
    match input.passthrough.split_first() {
        Some((program, rest)) => CommandSpec::new(program.clone(), rest.to_vec()),
        None => CommandSpec::new("rev", vec![]),
    }
}

fn build_vnc() -> CommandSpec {
    // x11vnc preferred; the vnc module falls back to vncserver if the spawn
    // fails. No stdin — frames flow through the tunnel.
    CommandSpec::new(
        "x11vnc",
        vec![
            "-forever".to_owned(),
            "-shared".to_owned(),
            "-localhost".to_owned(),
            "-rfbport".to_owned(),
            "5900".to_owned(),
        ],
    )
}

/// Fallback spec when `x11vnc` is unavailable.
pub fn build_vnc_fallback() -> CommandSpec {
    CommandSpec::new("vncserver", vec!["-fg".to_owned(), "-localhost".to_owned(), "yes".to_owned()])
}

fn build_hands_on(input: &BuildInput<'_>) -> CommandSpec {
    // The supervisor resolves $SHELL and passes it through; stdin is
    // inherited from the runner's controlling terminal.
    let shell = input
        .passthrough
        .first()
        .cloned()
        .unwrap_or_else(|| "/bin/sh".to_owned());
    CommandSpec::new(shell, vec!["-i".to_owned()])
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
