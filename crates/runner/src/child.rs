// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child-process lifecycle: spawn with a curated environment, stream
//! capture, cooperative and forced termination.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use tether_wire::types::EventKind;

use crate::worker::CommandSpec;

/// Byte injected for `__ESCAPE__` (Ctrl-C).
pub const CANCEL_BYTE: u8 = 0x03;

/// Capture read size per chunk.
const CHUNK_SIZE: usize = 8 * 1024;

/// API-key variables blanked in the child environment so accidentally
/// inherited secrets do not leak into agent output.
const BLANKED_ENV_KEYS: &[&str] =
    &["ANTHROPIC_API_KEY", "CLAUDE_CODE_OAUTH_TOKEN", "OPENAI_API_KEY", "GEMINI_API_KEY"];

/// How the child's stdin is wired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdinMode {
    /// Piped; operator input is written through the supervisor.
    Piped,
    /// Ignored (per-input workers and vnc).
    Ignored,
    /// Inherited from the runner's terminal (hands-on).
    Inherited,
}

/// One captured output chunk, already decoded.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub kind: EventKind,
    pub data: String,
}

/// A spawned agent child with its capture plumbed in.
pub struct AgentChild {
    child: Child,
    stdin: Option<ChildStdin>,
    pub pid: Option<u32>,
}

/// Exit code and signal from a wait status.
pub fn exit_parts(status: std::process::ExitStatus) -> (Option<i32>, Option<i32>) {
    use std::os::unix::process::ExitStatusExt;
    (status.code(), status.signal())
}

/// Environment curation per the supervisor contract: the OS environment,
/// TERM by autonomy mode, unbuffered python, blanked API keys.
pub fn curated_env(autonomous: bool) -> Vec<(String, String)> {
    let mut env = vec![
        ("TERM".to_owned(), if autonomous { "xterm-256color" } else { "dumb" }.to_owned()),
        ("PYTHONUNBUFFERED".to_owned(), "1".to_owned()),
    ];
    for key in BLANKED_ENV_KEYS {
        env.push(((*key).to_owned(), String::new()));
    }
    env
}

impl AgentChild {
    /// Spawn `spec` in `workdir`, capturing stdout/stderr into `chunk_tx`.
    pub fn spawn(
        spec: &CommandSpec,
        workdir: &Path,
        autonomous: bool,
        stdin_mode: StdinMode,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> anyhow::Result<Self> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args);
        cmd.current_dir(workdir);
        for (key, value) in curated_env(autonomous) {
            cmd.env(key, value);
        }
        match stdin_mode {
            StdinMode::Piped => cmd.stdin(Stdio::piped()),
            StdinMode::Ignored => cmd.stdin(Stdio::null()),
            StdinMode::Inherited => cmd.stdin(Stdio::inherit()),
        };
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn {}: {e}", spec.program))?;
        let pid = child.id();

        if let Some(stdout) = child.stdout.take() {
            spawn_capture(stdout, EventKind::Stdout, chunk_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_capture(stderr, EventKind::Stderr, chunk_tx);
        }
        let stdin = child.stdin.take();

        tracing::info!(program = %spec.program, pid = ?pid, "child spawned");
        Ok(Self { child, stdin, pid })
    }

    /// Write operator input to the child's stdin.
    pub async fn write_stdin(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("child has no stdin pipe"))?;
        stdin.write_all(bytes).await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Deliver a signal to the child.
    pub fn signal(&self, sig: Signal) -> anyhow::Result<()> {
        let pid = self.pid.ok_or_else(|| anyhow::anyhow!("child already reaped"))?;
        let pid = i32::try_from(pid)?;
        signal::kill(Pid::from_raw(pid), sig)?;
        Ok(())
    }

    /// Wait for exit.
    pub async fn wait(&mut self) -> anyhow::Result<std::process::ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Cooperative stop: SIGINT, then a forced kill after the grace window.
    /// Returns the exit status.
    pub async fn stop_with_grace(
        &mut self,
        grace: Duration,
    ) -> anyhow::Result<std::process::ExitStatus> {
        if let Err(e) = self.signal(Signal::SIGINT) {
            tracing::debug!(err = %e, "SIGINT delivery failed, child may have exited");
        }
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => {
                tracing::warn!(pid = ?self.pid, "grace window elapsed, force-killing child");
                self.child.start_kill()?;
                Ok(self.child.wait().await?)
            }
        }
    }

    /// Immediate forced termination.
    pub async fn halt(&mut self) -> anyhow::Result<std::process::ExitStatus> {
        self.child.start_kill()?;
        Ok(self.child.wait().await?)
    }

    /// Begin a forced kill without waiting; the exit surfaces through the
    /// supervisor's liveness monitor.
    pub fn force_kill(&mut self) -> anyhow::Result<()> {
        self.child.start_kill()?;
        Ok(())
    }

    /// Non-blocking exit probe.
    pub fn try_exit(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    /// Whether the process is still alive (non-blocking).
    pub fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

/// Read one stream to EOF in chunks, decoding lossily.
fn spawn_capture(
    mut stream: impl AsyncReadExt + Unpin + Send + 'static,
    kind: EventKind,
    tx: mpsc::Sender<StreamChunk>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                    if tx.send(StreamChunk { kind, data }).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
}

#[cfg(test)]
#[path = "child_tests.rs"]
mod tests;
