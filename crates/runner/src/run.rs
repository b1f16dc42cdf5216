// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level runner orchestration: child lifecycle, capture → ingest,
//! prompt detection, the poll/ack loop, heartbeat, and graceful drain.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tether_wire::types::{
    CommandAck, ControlCommand, EventKind, FinishedMarker, Heartbeat, StateCheckpoint, WorkerType,
    MARKER_HANDS_ON,
};

use crate::child::{AgentChild, StdinMode, StreamChunk, CANCEL_BYTE};
use crate::client::GatewayClient;
use crate::config::RunnerConfig;
use crate::poll::{run_allowlisted, DedupSet, ACK_ATTEMPTS};
use crate::prompt::PromptDetector;
use crate::redact::Redactor;
use crate::state_file;
use crate::worker::{self, BuildInput, SpawnMode};

/// Supervisor phases per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Liveness-probe cadence for the supervised child.
const EXIT_POLL: Duration = Duration::from_millis(500);

/// Checkpoint every N captured chunks.
const CHECKPOINT_EVERY: u64 = 20;

/// How long to drain capture channels after the child exits.
const DRAIN_WINDOW: Duration = Duration::from_secs(2);

pub struct RunnerContext {
    pub config: RunnerConfig,
    pub worker: WorkerType,
    pub client: Arc<GatewayClient>,
    pub redactor: Redactor,
    pub prompts: PromptDetector,
    /// Producer sequence; the next event carries `fetch_add(1) + 1`.
    pub sequence: AtomicU64,
    pub shutdown: CancellationToken,
    pub agent: Mutex<Option<AgentChild>>,
    pub phase: parking_lot::Mutex<Phase>,
    pub chunk_tx: mpsc::Sender<StreamChunk>,
    log_file: std::sync::Mutex<std::fs::File>,
}

impl RunnerContext {
    pub fn phase(&self) -> Phase {
        *self.phase.lock()
    }

    pub fn set_phase(&self, phase: Phase) {
        *self.phase.lock() = phase;
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Post one event with the next producer sequence.
    async fn post_event(&self, kind: EventKind, data: &str) {
        let seq = self.next_seq();
        if let Err(e) = self.client.post_event(kind, data, Some(seq)).await {
            warn!(err = %e, kind = %kind, "event post failed");
        }
    }

    fn append_log(&self, data: &str) {
        if let Ok(mut file) = self.log_file.lock() {
            let _ = file.write_all(data.as_bytes());
        }
    }

    fn checkpoint(&self) -> StateCheckpoint {
        StateCheckpoint {
            run_id: self.config.run_id.clone(),
            sequence: self.sequence.load(Ordering::Relaxed),
            working_dir: self.config.workdir.to_string_lossy().into_owned(),
            autonomous: self.config.autonomous,
            worker_type: self.worker,
            model: self.config.model.clone(),
            saved_at: crate::now_secs(),
        }
    }

    /// Persist the checkpoint locally and mirror it to the gateway.
    fn save_checkpoint(self: &Arc<Self>) {
        let checkpoint = self.checkpoint();
        state_file::save(&self.config.state_path(), &checkpoint);
        let ctx = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = ctx.client.post_state(&checkpoint).await {
                warn!(err = %e, "state mirror failed");
            }
        });
    }

    fn build_input<'a>(&'a self, input: Option<&'a str>) -> BuildInput<'a> {
        BuildInput {
            input,
            model: self.config.model.as_deref(),
            resume: self.config.resume,
            passthrough: &self.config.command,
        }
    }

    /// Spawn a child for this worker with the given input text.
    async fn spawn_child(&self, input: Option<&str>) -> anyhow::Result<()> {
        let input = if self.worker == WorkerType::Vnc { None } else { input };
        let spec = worker::build(self.worker, &self.build_input(input), self.config.autonomous);
        let stdin_mode = match (self.worker, worker::spawn_mode(self.worker)) {
            (WorkerType::HandsOn, _) => StdinMode::Inherited,
            (WorkerType::Vnc, _) => StdinMode::Ignored,
            (_, SpawnMode::PerInput) => StdinMode::Ignored,
            (_, SpawnMode::LongRunning) => StdinMode::Piped,
        };

        let spawned = AgentChild::spawn(
            &spec,
            &self.config.workdir,
            self.config.autonomous,
            stdin_mode,
            self.chunk_tx.clone(),
        );
        let child = match spawned {
            Ok(child) => child,
            Err(e) if self.worker == WorkerType::Vnc => {
                // x11vnc missing — fall back to vncserver.
                warn!(err = %e, "x11vnc spawn failed, trying vncserver");
                AgentChild::spawn(
                    &worker::build_vnc_fallback(),
                    &self.config.workdir,
                    self.config.autonomous,
                    StdinMode::Ignored,
                    self.chunk_tx.clone(),
                )?
            }
            Err(e) => return Err(e),
        };

        self.post_event(EventKind::Info, &format!("spawned: {}", spec.display)).await;
        *self.agent.lock().await = Some(child);
        self.set_phase(Phase::Running);
        Ok(())
    }
}

/// Run the configured worker to completion. Returns the process exit code.
pub async fn run(config: RunnerConfig) -> anyhow::Result<i32> {
    let worker = config.worker_enum()?;
    let client = Arc::new(GatewayClient::new(&config)?);
    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    std::fs::create_dir_all(&config.state_dir)?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(config.log_path())?;

    // Resume continues the producer sequence from the checkpoint.
    let start_seq = if config.resume {
        match state_file::load(&config.state_path()) {
            Some(cp) if cp.run_id == config.run_id => {
                info!(sequence = cp.sequence, "resuming from checkpoint");
                cp.sequence
            }
            Some(_) => {
                warn!("checkpoint belongs to another run, starting fresh");
                0
            }
            None => 0,
        }
    } else {
        0
    };

    let (chunk_tx, chunk_rx) = mpsc::channel(256);
    let ctx = Arc::new(RunnerContext {
        worker,
        client: Arc::clone(&client),
        redactor: Redactor::new()?,
        prompts: PromptDetector::new()?,
        sequence: AtomicU64::new(start_seq),
        shutdown: shutdown.clone(),
        agent: Mutex::new(None),
        phase: parking_lot::Mutex::new(Phase::Starting),
        chunk_tx,
        log_file: std::sync::Mutex::new(log_file),
        config,
    });

    // Heartbeat from the start so the client row exists before first sweep.
    crate::heartbeat::spawn_heartbeat(
        Arc::clone(&client),
        Heartbeat {
            client_id: ctx.config.effective_client_id(),
            name: ctx.config.client_name.clone(),
            agent_id: Some(format!("{}-{}", worker.as_str(), std::process::id())),
            capabilities: vec![worker.as_str().to_owned()],
        },
        ctx.config.heartbeat_interval(),
        shutdown.clone(),
    );

    // Initial child. A spawn failure is surfaced as an error event plus a
    // finished marker rather than a silent exit.
    let spawned = match worker::spawn_mode(worker) {
        SpawnMode::PerInput => match ctx.config.initial_command.clone() {
            Some(initial) => ctx.spawn_child(Some(&initial)).await,
            None => {
                info!("per-input worker idle, waiting for __INPUT__ commands");
                ctx.set_phase(Phase::Running);
                Ok(())
            }
        },
        SpawnMode::LongRunning => {
            let initial = ctx.config.initial_command.clone();
            ctx.spawn_child(initial.as_deref()).await
        }
    };
    if let Err(e) = spawned {
        error!(err = %e, "child spawn failed");
        ctx.post_event(EventKind::Error, &format!("child spawn failed: {e}")).await;
        let marker = FinishedMarker::new(Some(1), None);
        let data = serde_json::to_string(&marker).unwrap_or_else(|_| "{}".to_owned());
        ctx.post_event(EventKind::Marker, &data).await;
        shutdown.cancel();
        return Ok(1);
    }
    if worker == WorkerType::Vnc {
        crate::vnc::spawn_tunnel_bridge(client.vnc_tunnel_url(), shutdown.clone());
    }
    ctx.save_checkpoint();

    spawn_poll_loop(Arc::clone(&ctx));

    let exit = event_loop(Arc::clone(&ctx), chunk_rx).await;

    // Finished marker, final checkpoint, drained shutdown.
    let (code, signal) = exit;
    let marker = FinishedMarker::new(code, signal);
    let data = serde_json::to_string(&marker).unwrap_or_else(|_| "{}".to_owned());
    ctx.post_event(EventKind::Marker, &data).await;
    ctx.save_checkpoint();

    // Best-effort: hand the raw run log to the gateway as an artifact.
    if let Ok(bytes) = std::fs::read(ctx.config.log_path()) {
        if !bytes.is_empty() {
            let name = format!("{}.log", worker.as_str());
            if let Err(e) = ctx.client.upload_artifact(&name, "text/plain", bytes).await {
                warn!(err = %e, "run log artifact upload failed");
            }
        }
    }

    ctx.set_phase(Phase::Stopped);
    shutdown.cancel();

    info!(code = ?code, signal = ?signal, "runner finished");
    Ok(match (code, signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 0,
    })
}

/// Main event loop: capture chunks, child exit, shutdown.
/// Returns `(exit_code, signal)` for the finished marker.
async fn event_loop(
    ctx: Arc<RunnerContext>,
    mut chunk_rx: mpsc::Receiver<StreamChunk>,
) -> (Option<i32>, Option<i32>) {
    let mut exit_probe = tokio::time::interval(EXIT_POLL);
    exit_probe.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut chunk_count: u64 = 0;

    let exit = loop {
        tokio::select! {
            chunk = chunk_rx.recv() => {
                let Some(chunk) = chunk else { break (None, None) };
                chunk_count += 1;
                process_chunk(&ctx, chunk, chunk_count).await;
            }
            _ = exit_probe.tick() => {
                let status = {
                    let mut guard = ctx.agent.lock().await;
                    match guard.as_mut().and_then(AgentChild::try_exit) {
                        Some(status) => {
                            *guard = None;
                            Some(status)
                        }
                        None => None,
                    }
                };
                if let Some(status) = status {
                    let (code, signal) = crate::child::exit_parts(status);
                    // Per-input workers outlive each turn's child unless a
                    // stop is in flight.
                    if worker::spawn_mode(ctx.worker) == SpawnMode::PerInput
                        && ctx.phase() == Phase::Running
                    {
                        info!(code = ?code, "turn complete, awaiting next input");
                        ctx.post_event(EventKind::Info, "turn complete").await;
                        ctx.save_checkpoint();
                        continue;
                    }
                    break (code, signal);
                }
                // A per-input worker with no child and a pending stop is done.
                if ctx.phase() == Phase::Stopping && ctx.agent.lock().await.is_none() {
                    break (Some(0), None);
                }
            }
            _ = ctx.shutdown.cancelled() => {
                ctx.set_phase(Phase::Stopping);
                let status = {
                    let mut guard = ctx.agent.lock().await;
                    match guard.take() {
                        Some(mut child) => child.stop_with_grace(ctx.config.stop_grace()).await.ok(),
                        None => None,
                    }
                };
                match status {
                    Some(status) => {
                        let (code, signal) = crate::child::exit_parts(status);
                        break (code, signal);
                    }
                    None => break (None, Some(libc_sigterm())),
                }
            }
        }
    };

    // Drain remaining capture output so late chunks still reach the log.
    let deadline = tokio::time::Instant::now() + DRAIN_WINDOW;
    loop {
        match tokio::time::timeout_at(deadline, chunk_rx.recv()).await {
            Ok(Some(chunk)) => {
                chunk_count += 1;
                process_chunk(&ctx, chunk, chunk_count).await;
            }
            Ok(None) | Err(_) => break,
        }
    }

    exit
}

fn libc_sigterm() -> i32 {
    Signal::SIGTERM as i32
}

/// Redact, detect prompts, ship the event, append the raw log.
async fn process_chunk(ctx: &Arc<RunnerContext>, chunk: StreamChunk, count: u64) {
    ctx.append_log(&chunk.data);
    let redacted = ctx.redactor.redact(&chunk.data);
    ctx.post_event(chunk.kind, &redacted).await;

    if let Some(kind) = ctx.prompts.detect(&redacted) {
        info!(prompt = kind.as_str(), "blocking prompt detected");
        ctx.post_event(EventKind::PromptWaiting, kind.as_str()).await;
        ctx.save_checkpoint();
    } else if count % CHECKPOINT_EVERY == 0 {
        ctx.save_checkpoint();
    }
}

/// Spawn the poll/dedup/dispatch/ack loop.
fn spawn_poll_loop(ctx: Arc<RunnerContext>) {
    tokio::spawn(async move {
        let mut dedup = DedupSet::default();
        let mut timer = tokio::time::interval(ctx.config.poll_interval());
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => break,
                _ = timer.tick() => {}
            }
            let commands = match ctx.client.fetch_commands().await {
                Ok(commands) => commands,
                Err(e) => {
                    warn!(err = %e, "command poll failed");
                    continue;
                }
            };
            for cmd in commands {
                if !dedup.insert(&cmd.id) {
                    continue;
                }
                let ack = dispatch(&ctx, &cmd.command).await;
                if !deliver_ack(&ctx, &cmd.id, &ack).await {
                    // Re-admit so the next poll retries the ack path.
                    dedup.remove(&cmd.id);
                }
            }
        }
    });
}

/// Deliver an ack with bounded retries.
async fn deliver_ack(ctx: &RunnerContext, command_id: &str, ack: &CommandAck) -> bool {
    let mut backoff = Duration::from_millis(500);
    for attempt in 0..ACK_ATTEMPTS {
        match ctx.client.ack_command(command_id, ack).await {
            Ok(()) => return true,
            Err(e) => {
                warn!(cmd_id = %command_id, attempt, err = %e, "ack delivery failed");
                if attempt + 1 < ACK_ATTEMPTS {
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
            }
        }
    }
    error!(cmd_id = %command_id, "ack abandoned after retries");
    false
}

/// Execute one command and shape its ack.
async fn dispatch(ctx: &Arc<RunnerContext>, command: &str) -> CommandAck {
    match ControlCommand::parse(command) {
        Some(ControlCommand::Stop) => {
            info!("__STOP__ received, signalling child");
            ctx.set_phase(Phase::Stopping);
            let grace = ctx.config.stop_grace();
            {
                let guard = ctx.agent.lock().await;
                if let Some(child) = guard.as_ref() {
                    if let Err(e) = child.signal(Signal::SIGINT) {
                        warn!(err = %e, "SIGINT delivery failed");
                    }
                }
            }
            // Force-kill after the grace window if it is still up; the exit
            // probe in the main loop reports the final status.
            let ctx_grace = Arc::clone(ctx);
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                let mut guard = ctx_grace.agent.lock().await;
                if let Some(child) = guard.as_mut() {
                    if child.is_running() {
                        warn!("grace window elapsed, force-killing child");
                        let _ = child.force_kill();
                    }
                }
            });
            CommandAck { result: Some("stopping".to_owned()), error: None }
        }
        Some(ControlCommand::Halt) => {
            info!("__HALT__ received, force-killing child");
            ctx.set_phase(Phase::Stopping);
            let mut guard = ctx.agent.lock().await;
            match guard.as_mut() {
                Some(child) => match child.force_kill() {
                    Ok(()) => CommandAck { result: Some("halted".to_owned()), error: None },
                    Err(e) => CommandAck { result: None, error: Some(format!("halt failed: {e}")) },
                },
                None => CommandAck { result: Some("no child running".to_owned()), error: None },
            }
        }
        Some(ControlCommand::Escape) => {
            let mut guard = ctx.agent.lock().await;
            match guard.as_mut() {
                Some(child) => match child.write_stdin(&[CANCEL_BYTE]).await {
                    Ok(()) => CommandAck { result: Some("escape sent".to_owned()), error: None },
                    Err(e) => {
                        CommandAck { result: None, error: Some(format!("stdin write failed: {e}")) }
                    }
                },
                None => CommandAck { result: None, error: Some("no child running".to_owned()) },
            }
        }
        Some(ControlCommand::Input { text }) => dispatch_input(ctx, &text).await,
        Some(ControlCommand::LaunchHandsOn { reason }) => {
            info!(reason = %reason, "hand-off requested, exiting for hands-on takeover");
            let data = serde_json::json!({ "marker": MARKER_HANDS_ON, "reason": reason });
            ctx.post_event(EventKind::Marker, &data.to_string()).await;
            // Ack first (returned here), then wind down.
            ctx.set_phase(Phase::Stopping);
            ctx.shutdown.cancel();
            CommandAck { result: Some("handing off".to_owned()), error: None }
        }
        None => run_allowlisted(command, &ctx.config.workdir).await,
    }
}

/// `__INPUT__` dispatch: per-input workers get a fresh child, long-running
/// workers get a stdin write.
async fn dispatch_input(ctx: &Arc<RunnerContext>, text: &str) -> CommandAck {
    match worker::spawn_mode(ctx.worker) {
        SpawnMode::PerInput => {
            {
                let mut guard = ctx.agent.lock().await;
                let busy = match guard.as_mut() {
                    Some(child) => child.try_exit().is_none(),
                    None => false,
                };
                if busy {
                    return CommandAck {
                        result: None,
                        error: Some("agent is still processing the previous input".to_owned()),
                    };
                }
                *guard = None;
            }
            let stripped = text.trim_start_matches(char::from(CANCEL_BYTE));
            match ctx.spawn_child(Some(stripped)).await {
                Ok(()) => {
                    ctx.post_event(EventKind::PromptResolved, "input dispatched").await;
                    CommandAck { result: Some("input dispatched".to_owned()), error: None }
                }
                Err(e) => {
                    ctx.post_event(EventKind::Error, &format!("child spawn failed: {e}")).await;
                    CommandAck { result: None, error: Some(format!("spawn failed: {e}")) }
                }
            }
        }
        SpawnMode::LongRunning => {
            let write = {
                let mut guard = ctx.agent.lock().await;
                match guard.as_mut() {
                    Some(child) => child.write_stdin(text.as_bytes()).await,
                    None => Err(anyhow::anyhow!("no child running")),
                }
            };
            match write {
                Ok(()) => {
                    ctx.post_event(EventKind::PromptResolved, "input dispatched").await;
                    CommandAck { result: Some("input written".to_owned()), error: None }
                }
                Err(e) => {
                    CommandAck { result: None, error: Some(format!("stdin write failed: {e}")) }
                }
            }
        }
    }
}

/// Cancel the shutdown token on SIGINT or SIGTERM.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    warn!(err = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
        info!("shutdown signal received, draining");
        shutdown.cancel();
    });
}
