// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use tether_wire::types::{EventKind, RunStatus, WorkerType};

use super::{AckOutcome, ClientStatus, NewRun, NonceOutcome, Store};

fn new_run(id: &str) -> NewRun {
    NewRun {
        id: id.to_owned(),
        worker: WorkerType::Codex,
        model: None,
        initial_command: Some("fix the tests".to_owned()),
        working_dir: Some("/work".to_owned()),
        client_id: Some("host-1".to_owned()),
        capability_token: "t1".to_owned(),
        metadata: serde_json::json!({"branch": "main"}),
    }
}

#[tokio::test]
async fn run_round_trip() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    let inserted = store.insert_run(&new_run("r1"), 100).await?;
    assert_eq!(inserted.status, RunStatus::Pending);
    assert_eq!(inserted.capability_token, "t1");
    assert_eq!(inserted.created_at, 100);

    let fetched = store.get_run("r1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(fetched.worker, WorkerType::Codex);
    assert_eq!(fetched.metadata["branch"], "main");
    assert!(store.get_run("nope").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn status_transitions_are_monotonic() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;

    assert!(store.update_run_status("r1", RunStatus::Running, None, None, 110).await?);
    let run = store.get_run("r1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.started_at, Some(110));
    assert_eq!(run.finished_at, None);

    assert!(store.update_run_status("r1", RunStatus::Done, Some(0), None, 120).await?);
    let run = store.get_run("r1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(run.finished_at, Some(120));
    assert_eq!(run.exit_code, Some(0));

    // Terminal state never moves again.
    assert!(!store.update_run_status("r1", RunStatus::Running, None, None, 130).await?);
    assert!(!store.update_run_status("r1", RunStatus::Failed, Some(1), None, 130).await?);
    let run = store.get_run("r1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(run.status, RunStatus::Done);
    Ok(())
}

#[tokio::test]
async fn event_ids_are_monotone_and_stable() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;
    store.insert_run(&new_run("r2"), 100).await?;

    let mut ids = Vec::new();
    for i in 0..5 {
        let run = if i % 2 == 0 { "r1" } else { "r2" };
        ids.push(store.append_event(run, EventKind::Stdout, &format!("line {i}"), None, 100).await?);
    }
    // Global counter: strictly increasing, gap-free in insertion order.
    for pair in ids.windows(2) {
        assert_eq!(pair[1], pair[0] + 1);
    }

    let r1_events = store.list_events("r1", 0, 100).await?;
    assert_eq!(r1_events.len(), 3);
    assert!(r1_events.windows(2).all(|w| w[0].id < w[1].id));

    // Identical across repeated calls.
    let again = store.list_events("r1", 0, 100).await?;
    assert_eq!(again.len(), r1_events.len());
    assert!(again.iter().zip(&r1_events).all(|(a, b)| a.id == b.id && a.data == b.data));

    // Cursor + limit.
    let tail = store.list_events("r1", r1_events[0].id, 1).await?;
    assert_eq!(tail.len(), 1);
    assert_eq!(tail[0].id, r1_events[1].id);
    Ok(())
}

#[tokio::test]
async fn commands_are_fifo_and_pending_until_acked() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;

    store.insert_command("c1", "r1", "git status", 100).await?;
    store.insert_command("c2", "r1", "ls -la", 101).await?;

    let pending = store.next_pending_commands("r1", 10).await?;
    assert_eq!(pending.iter().map(|c| c.id.as_str()).collect::<Vec<_>>(), ["c1", "c2"]);

    // Delivered stamping does not shrink the pending set.
    store.mark_commands_delivered(&["c1".to_owned()], 102).await?;
    let pending = store.next_pending_commands("r1", 10).await?;
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].delivered_at, Some(102));

    assert_eq!(
        store.ack_command("c1", Some("On branch main\n"), None, 103).await?,
        AckOutcome::Acked
    );
    let pending = store.next_pending_commands("r1", 10).await?;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, "c2");
    Ok(())
}

#[tokio::test]
async fn ack_is_idempotent() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;
    store.insert_command("c1", "r1", "git status", 100).await?;

    assert_eq!(store.ack_command("c1", Some("first"), None, 110).await?, AckOutcome::Acked);
    assert_eq!(
        store.ack_command("c1", Some("second"), Some("boom"), 120).await?,
        AckOutcome::AlreadyAcked
    );

    let cmd = store.get_command("c1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(cmd.result.as_deref(), Some("first"));
    assert_eq!(cmd.error, None);
    assert_eq!(cmd.acked_at, Some(110));

    assert_eq!(store.ack_command("nope", None, None, 130).await?, AckOutcome::NotFound);
    Ok(())
}

#[tokio::test]
async fn nonce_is_single_use_until_swept() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    assert_eq!(store.consume_nonce("n1", 100).await?, NonceOutcome::Accepted);
    assert_eq!(store.consume_nonce("n1", 101).await?, NonceOutcome::Replay);
    assert_eq!(store.consume_nonce("n2", 101).await?, NonceOutcome::Accepted);

    // Sweep at a cutoff past both creation times frees the values.
    assert_eq!(store.sweep_nonces(200).await?, 2);
    assert_eq!(store.consume_nonce("n1", 201).await?, NonceOutcome::Accepted);
    Ok(())
}

#[tokio::test]
async fn expired_runs_cascade() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;
    store.append_event("r1", EventKind::Stdout, "bye", None, 100).await?;
    store.insert_command("c1", "r1", "ls", 100).await?;
    store.insert_artifact("a1", "r1", "out.txt", "text/plain", 3, "/data/a1", 100).await?;
    store.update_run_status("r1", RunStatus::Running, None, None, 100).await?;
    store.update_run_status("r1", RunStatus::Done, Some(0), None, 110).await?;

    // Still inside retention: nothing happens.
    assert!(store.delete_expired_runs(110).await?.is_empty());

    let deleted = store.delete_expired_runs(111).await?;
    assert_eq!(deleted, ["r1"]);
    assert!(store.get_run("r1").await?.is_none());
    assert!(store.list_events("r1", 0, 10).await?.is_empty());
    assert!(store.get_command("c1").await?.is_none());
    assert!(store.list_artifacts("r1").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn client_tiers_follow_last_seen_age() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store
        .upsert_client("host-1", Some("workbench"), Some("codex-991"), &["claude".to_owned()], 1000)
        .await?;
    store.upsert_client("host-2", None, None, &[], 1000).await?;
    store.touch_client("host-2", 1040).await?;

    store.sweep_client_status(1055).await?;
    let c1 = store.get_client("host-1").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    let c2 = store.get_client("host-2").await?.ok_or_else(|| anyhow::anyhow!("missing"))?;
    assert_eq!(c1.status, ClientStatus::Degraded); // 55s old
    assert_eq!(c2.status, ClientStatus::Online); // 15s old

    store.sweep_client_status(1200).await?;
    let clients = store.list_clients().await?;
    assert!(clients.iter().all(|c| c.status == ClientStatus::Offline));
    assert_eq!(c1.capabilities, ["claude"]);
    assert_eq!(c1.agent_id.as_deref(), Some("codex-991"));
    Ok(())
}

#[test]
fn tier_boundaries() {
    assert_eq!(ClientStatus::from_age(0), ClientStatus::Online);
    assert_eq!(ClientStatus::from_age(29), ClientStatus::Online);
    assert_eq!(ClientStatus::from_age(30), ClientStatus::Degraded);
    assert_eq!(ClientStatus::from_age(59), ClientStatus::Degraded);
    assert_eq!(ClientStatus::from_age(60), ClientStatus::Offline);
}

#[tokio::test]
async fn run_counts_group_by_status() -> anyhow::Result<()> {
    let store = Store::open_in_memory()?;
    store.insert_run(&new_run("r1"), 100).await?;
    store.insert_run(&new_run("r2"), 100).await?;
    store.update_run_status("r2", RunStatus::Running, None, None, 110).await?;

    let counts = store.run_counts().await?;
    assert_eq!(counts.get("pending"), Some(&1));
    assert_eq!(counts.get("running"), Some(&1));
    Ok(())
}
