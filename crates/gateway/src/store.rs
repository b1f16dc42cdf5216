// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store for runs, events, commands, artifacts, nonces, and clients.
//!
//! Backed by a single SQLite connection in WAL mode behind an async mutex —
//! one writer at a time inside one gateway process. Every mutation is a
//! single statement or an explicit transaction; event ids come from the
//! global `AUTOINCREMENT` counter, so per-run event order is the insertion
//! order the gateway accepted.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

use tether_wire::types::{EventKind, RunStatus, WorkerType};

const BUSY_TIMEOUT_MS: u64 = 5_000;
const SCHEMA_VERSION: i64 = 1;

/// Seconds of last-seen age below which a client counts as online.
pub const CLIENT_ONLINE_SECS: i64 = 30;
/// Seconds of last-seen age below which a client counts as degraded.
pub const CLIENT_DEGRADED_SECS: i64 = 60;

pub struct Store {
    conn: Mutex<Connection>,
}

/// One run row.
#[derive(Debug, Clone)]
pub struct RunRow {
    pub id: String,
    pub status: RunStatus,
    pub worker: WorkerType,
    pub model: Option<String>,
    pub initial_command: Option<String>,
    pub working_dir: Option<String>,
    pub client_id: Option<String>,
    pub capability_token: String,
    pub metadata: serde_json::Value,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
}

/// Fields supplied when creating a run.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub id: String,
    pub worker: WorkerType,
    pub model: Option<String>,
    pub initial_command: Option<String>,
    pub working_dir: Option<String>,
    pub client_id: Option<String>,
    pub capability_token: String,
    pub metadata: serde_json::Value,
}

/// One event-log row.
#[derive(Debug, Clone)]
pub struct EventRow {
    pub id: i64,
    pub run_id: String,
    pub kind: EventKind,
    pub data: String,
    pub producer_seq: Option<i64>,
    pub created_at: i64,
}

/// One command-outbox row.
#[derive(Debug, Clone)]
pub struct CommandRow {
    pub id: String,
    pub run_id: String,
    pub command: String,
    pub acked: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub delivered_at: Option<i64>,
    pub acked_at: Option<i64>,
}

/// One uploaded-artifact row.
#[derive(Debug, Clone)]
pub struct ArtifactRow {
    pub id: String,
    pub run_id: String,
    pub name: String,
    pub mime: String,
    pub size: i64,
    pub path: String,
    pub created_at: i64,
}

/// Derived liveness tier of a runner host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    Online,
    Degraded,
    Offline,
}

impl ClientStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Degraded => "degraded",
            Self::Offline => "offline",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "online" => Self::Online,
            "degraded" => Self::Degraded,
            _ => Self::Offline,
        }
    }

    /// Tier for a given last-seen age.
    pub fn from_age(age_secs: i64) -> Self {
        if age_secs < CLIENT_ONLINE_SECS {
            Self::Online
        } else if age_secs < CLIENT_DEGRADED_SECS {
            Self::Degraded
        } else {
            Self::Offline
        }
    }
}

/// One registered runner host.
#[derive(Debug, Clone)]
pub struct ClientRow {
    pub id: String,
    pub name: Option<String>,
    pub agent_id: Option<String>,
    pub last_seen: i64,
    pub status: ClientStatus,
    pub enabled: bool,
    pub capabilities: Vec<String>,
}

/// Outcome of presenting a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceOutcome {
    Accepted,
    Replay,
}

/// Outcome of acking a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    Acked,
    AlreadyAcked,
    NotFound,
}

impl Store {
    /// Open (or create) the store at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (tests).
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> anyhow::Result<Self> {
        conn.busy_timeout(std::time::Duration::from_millis(BUSY_TIMEOUT_MS))?;
        conn.execute_batch(
            "PRAGMA journal_mode = wal; \
             PRAGMA synchronous = normal; \
             PRAGMA foreign_keys = on;",
        )?;
        init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    // -- Runs -----------------------------------------------------------------

    pub async fn insert_run(&self, run: &NewRun, now: i64) -> anyhow::Result<RunRow> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO runs (id, status, worker, model, initial_command, working_dir, \
             client_id, capability_token, metadata, created_at) \
             VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                run.id,
                run.worker.as_str(),
                run.model,
                run.initial_command,
                run.working_dir,
                run.client_id,
                run.capability_token,
                run.metadata.to_string(),
                now,
            ],
        )?;
        drop(conn);
        self.get_run(&run.id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("run vanished after insert: {}", run.id))
    }

    pub async fn get_run(&self, id: &str) -> anyhow::Result<Option<RunRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row("SELECT * FROM runs WHERE id = ?1", params![id], run_from_row)
            .optional()?;
        Ok(row)
    }

    pub async fn list_runs(&self, limit: usize) -> anyhow::Result<Vec<RunRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM runs ORDER BY created_at DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], run_from_row)?;
        collect(rows)
    }

    /// Apply a status transition. Returns `false` (and changes nothing) when
    /// the transition would move backwards — status is monotonic.
    pub async fn update_run_status(
        &self,
        id: &str,
        status: RunStatus,
        exit_code: Option<i32>,
        error: Option<String>,
        now: i64,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().await;
        let current: Option<String> = conn
            .query_row("SELECT status FROM runs WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        let Some(current) = current.and_then(|s| RunStatus::parse(&s)) else {
            return Ok(false);
        };
        if !current.can_transition_to(status) {
            return Ok(false);
        }
        let started_at = (status == RunStatus::Running).then_some(now);
        let finished_at = status.is_terminal().then_some(now);
        conn.execute(
            "UPDATE runs SET status = ?2, \
             exit_code = COALESCE(?3, exit_code), \
             error = COALESCE(?4, error), \
             started_at = COALESCE(?5, started_at), \
             finished_at = COALESCE(?6, finished_at) \
             WHERE id = ?1",
            params![id, status.as_str(), exit_code, error, started_at, finished_at],
        )?;
        Ok(true)
    }

    /// Delete terminal runs that finished before `cutoff`. Events, commands,
    /// and artifact rows cascade; returns the deleted ids so the caller can
    /// remove on-disk directories.
    pub async fn delete_expired_runs(&self, cutoff: i64) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id FROM runs WHERE status IN ('done', 'failed') AND finished_at < ?1",
        )?;
        let ids: Vec<String> =
            stmt.query_map(params![cutoff], |r| r.get(0))?.collect::<Result<_, _>>()?;
        drop(stmt);
        for id in &ids {
            conn.execute("DELETE FROM runs WHERE id = ?1", params![id])?;
        }
        Ok(ids)
    }

    // -- Events ---------------------------------------------------------------

    /// Append one event; the returned id is globally monotone in insertion
    /// order.
    pub async fn append_event(
        &self,
        run_id: &str,
        kind: EventKind,
        data: &str,
        producer_seq: Option<i64>,
        now: i64,
    ) -> anyhow::Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO events (run_id, kind, data, producer_seq, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, kind.as_str(), data, producer_seq, now],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Events for one run with id > `after_id`, ascending.
    pub async fn list_events(
        &self,
        run_id: &str,
        after_id: i64,
        limit: usize,
    ) -> anyhow::Result<Vec<EventRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, kind, data, producer_seq, created_at FROM events \
             WHERE run_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![run_id, after_id, limit as i64], |r| {
            Ok(EventRow {
                id: r.get(0)?,
                run_id: r.get(1)?,
                kind: parse_event_kind(r.get_ref(2)?.as_str()?)?,
                data: r.get(3)?,
                producer_seq: r.get(4)?,
                created_at: r.get(5)?,
            })
        })?;
        collect(rows)
    }

    // -- Commands -------------------------------------------------------------

    pub async fn insert_command(
        &self,
        id: &str,
        run_id: &str,
        command: &str,
        now: i64,
    ) -> anyhow::Result<CommandRow> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO commands (id, run_id, command, acked, created_at) \
             VALUES (?1, ?2, ?3, 0, ?4)",
            params![id, run_id, command, now],
        )?;
        drop(conn);
        self.get_command(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("command vanished after insert: {id}"))
    }

    pub async fn get_command(&self, id: &str) -> anyhow::Result<Option<CommandRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row("SELECT * FROM commands WHERE id = ?1", params![id], command_from_row)
            .optional()?;
        Ok(row)
    }

    /// Unacked commands for a run, FIFO by creation. The pending set is
    /// returned unchanged until acked — deduplication is the runner's job.
    pub async fn next_pending_commands(
        &self,
        run_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<CommandRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT * FROM commands WHERE run_id = ?1 AND acked = 0 \
             ORDER BY created_at ASC, id ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![run_id, limit as i64], command_from_row)?;
        collect(rows)
    }

    /// Stamp first delivery. Observability only; rows stay pending until
    /// acked.
    pub async fn mark_commands_delivered(&self, ids: &[String], now: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        for id in ids {
            conn.execute(
                "UPDATE commands SET delivered_at = ?2 WHERE id = ?1 AND delivered_at IS NULL",
                params![id, now],
            )?;
        }
        Ok(())
    }

    /// Ack a command. Idempotent: a second ack leaves the first recorded
    /// outcome untouched.
    pub async fn ack_command(
        &self,
        id: &str,
        result: Option<&str>,
        error: Option<&str>,
        now: i64,
    ) -> anyhow::Result<AckOutcome> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE commands SET acked = 1, result = ?2, error = ?3, acked_at = ?4 \
             WHERE id = ?1 AND acked = 0",
            params![id, result, error, now],
        )?;
        if changed == 1 {
            return Ok(AckOutcome::Acked);
        }
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM commands WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?;
        Ok(if exists.is_some() { AckOutcome::AlreadyAcked } else { AckOutcome::NotFound })
    }

    // -- Artifacts ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_artifact(
        &self,
        id: &str,
        run_id: &str,
        name: &str,
        mime: &str,
        size: i64,
        path: &str,
        now: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO artifacts (id, run_id, name, mime, size, path, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id, run_id, name, mime, size, path, now],
        )?;
        Ok(())
    }

    pub async fn list_artifacts(&self, run_id: &str) -> anyhow::Result<Vec<ArtifactRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT * FROM artifacts WHERE run_id = ?1 ORDER BY created_at ASC, id ASC")?;
        let rows = stmt.query_map(params![run_id], |r| {
            Ok(ArtifactRow {
                id: r.get("id")?,
                run_id: r.get("run_id")?,
                name: r.get("name")?,
                mime: r.get("mime")?,
                size: r.get("size")?,
                path: r.get("path")?,
                created_at: r.get("created_at")?,
            })
        })?;
        collect(rows)
    }

    // -- Nonces ---------------------------------------------------------------

    /// Consume a nonce: first presentation inserts and accepts, any repeat
    /// within the retention window is a replay.
    pub async fn consume_nonce(&self, nonce: &str, now: i64) -> anyhow::Result<NonceOutcome> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "INSERT OR IGNORE INTO nonces (nonce, created_at) VALUES (?1, ?2)",
            params![nonce, now],
        )?;
        Ok(if changed == 1 { NonceOutcome::Accepted } else { NonceOutcome::Replay })
    }

    /// Drop nonces created before `cutoff`. Returns the number removed.
    pub async fn sweep_nonces(&self, cutoff: i64) -> anyhow::Result<usize> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM nonces WHERE created_at < ?1", params![cutoff])?;
        Ok(removed)
    }

    // -- Clients --------------------------------------------------------------

    pub async fn upsert_client(
        &self,
        id: &str,
        name: Option<&str>,
        agent_id: Option<&str>,
        capabilities: &[String],
        now: i64,
    ) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        let caps = serde_json::to_string(capabilities)?;
        conn.execute(
            "INSERT INTO clients (id, name, agent_id, last_seen, status, enabled, capabilities) \
             VALUES (?1, ?2, ?3, ?4, 'online', 1, ?5) \
             ON CONFLICT(id) DO UPDATE SET \
             name = COALESCE(excluded.name, clients.name), \
             agent_id = COALESCE(excluded.agent_id, clients.agent_id), \
             last_seen = excluded.last_seen, \
             status = 'online', \
             capabilities = excluded.capabilities",
            params![id, name, agent_id, now, caps],
        )?;
        Ok(())
    }

    pub async fn touch_client(&self, id: &str, now: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE clients SET last_seen = ?2, status = 'online' WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    pub async fn get_client(&self, id: &str) -> anyhow::Result<Option<ClientRow>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row("SELECT * FROM clients WHERE id = ?1", params![id], client_from_row)
            .optional()?;
        Ok(row)
    }

    pub async fn list_clients(&self) -> anyhow::Result<Vec<ClientRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT * FROM clients ORDER BY id ASC")?;
        let rows = stmt.query_map([], client_from_row)?;
        collect(rows)
    }

    /// Recompute every client's liveness tier from its last-seen age.
    pub async fn sweep_client_status(&self, now: i64) -> anyhow::Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            "UPDATE clients SET status = CASE \
             WHEN ?1 - last_seen < ?2 THEN 'online' \
             WHEN ?1 - last_seen < ?3 THEN 'degraded' \
             ELSE 'offline' END",
            params![now, CLIENT_ONLINE_SECS, CLIENT_DEGRADED_SECS],
        )?;
        Ok(())
    }

    // -- Health ---------------------------------------------------------------

    /// Run counts by status, for the health view.
    pub async fn run_counts(&self) -> anyhow::Result<HashMap<String, i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM runs GROUP BY status")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        let mut counts = HashMap::new();
        for row in rows {
            let (status, count) = row?;
            counts.insert(status, count);
        }
        Ok(counts)
    }
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            worker TEXT NOT NULL,
            model TEXT,
            initial_command TEXT,
            working_dir TEXT,
            client_id TEXT,
            capability_token TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            exit_code INTEGER,
            error TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            finished_at INTEGER
        );
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            kind TEXT NOT NULL,
            data TEXT NOT NULL,
            producer_seq INTEGER,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_events_run ON events(run_id, id);
        CREATE TABLE IF NOT EXISTS commands (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            command TEXT NOT NULL,
            acked INTEGER NOT NULL DEFAULT 0,
            result TEXT,
            error TEXT,
            created_at INTEGER NOT NULL,
            delivered_at INTEGER,
            acked_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_commands_pending ON commands(run_id, acked, created_at);
        CREATE TABLE IF NOT EXISTS artifacts (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            mime TEXT NOT NULL,
            size INTEGER NOT NULL,
            path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS nonces (
            nonce TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS clients (
            id TEXT PRIMARY KEY,
            name TEXT,
            agent_id TEXT,
            last_seen INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            enabled INTEGER NOT NULL DEFAULT 1,
            capabilities TEXT NOT NULL DEFAULT '[]'
        );",
    )?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}

fn collect<T>(
    rows: impl Iterator<Item = Result<T, rusqlite::Error>>,
) -> anyhow::Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn parse_event_kind(s: &str) -> Result<EventKind, rusqlite::Error> {
    EventKind::parse(s).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown event kind: {s}").into(),
        )
    })
}

fn run_from_row(r: &rusqlite::Row<'_>) -> Result<RunRow, rusqlite::Error> {
    let status: String = r.get("status")?;
    let worker: String = r.get("worker")?;
    let metadata: String = r.get("metadata")?;
    Ok(RunRow {
        id: r.get("id")?,
        status: RunStatus::parse(&status).unwrap_or(RunStatus::Failed),
        worker: WorkerType::parse(&worker).unwrap_or(WorkerType::Rev),
        model: r.get("model")?,
        initial_command: r.get("initial_command")?,
        working_dir: r.get("working_dir")?,
        client_id: r.get("client_id")?,
        capability_token: r.get("capability_token")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        exit_code: r.get("exit_code")?,
        error: r.get("error")?,
        created_at: r.get("created_at")?,
        started_at: r.get("started_at")?,
        finished_at: r.get("finished_at")?,
    })
}

fn command_from_row(r: &rusqlite::Row<'_>) -> Result<CommandRow, rusqlite::Error> {
    let acked: i64 = r.get("acked")?;
    Ok(CommandRow {
        id: r.get("id")?,
        run_id: r.get("run_id")?,
        command: r.get("command")?,
        acked: acked != 0,
        result: r.get("result")?,
        error: r.get("error")?,
        created_at: r.get("created_at")?,
        delivered_at: r.get("delivered_at")?,
        acked_at: r.get("acked_at")?,
    })
}

fn client_from_row(r: &rusqlite::Row<'_>) -> Result<ClientRow, rusqlite::Error> {
    let status: String = r.get("status")?;
    let enabled: i64 = r.get("enabled")?;
    let caps: String = r.get("capabilities")?;
    Ok(ClientRow {
        id: r.get("id")?,
        name: r.get("name")?,
        agent_id: r.get("agent_id")?,
        last_seen: r.get("last_seen")?,
        status: ClientStatus::parse(&status),
        enabled: enabled != 0,
        capabilities: serde_json::from_str(&caps).unwrap_or_default(),
    })
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
