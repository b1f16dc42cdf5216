// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `tether-gateway` and
//! `tether` binaries and exercise the run lifecycle over HTTP.

use std::time::Duration;

use serial_test::serial;

use tether_specs::{GatewayProcess, RunnerProcess};

const TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::test]
#[serial]
async fn gateway_boots_and_reports_health() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start().await?;

    let resp: serde_json::Value =
        reqwest::get(format!("{}/api/health", gateway.base_url())).await?.json().await?;

    assert_eq!(resp["status"], "running");
    assert_eq!(resp["viewers"], 0);
    assert_eq!(resp["tunnels"], 0);
    Ok(())
}

#[tokio::test]
#[serial]
async fn rev_run_flows_end_to_end() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start().await?;
    let (run_id, token) = gateway.create_run("rev", None).await?;

    let mut runner =
        RunnerProcess::start_rev(&gateway, &run_id, &token, &["/bin/echo", "smoke-marker"])?;
    let code = runner.wait(TIMEOUT)?;
    assert_eq!(code, 0);

    // The event log carries the captured stdout and the finished marker.
    let events = gateway.list_events(&run_id).await?;
    let stdout_joined: String = events
        .iter()
        .filter(|e| e["eventType"] == "stdout")
        .filter_map(|e| e["data"].as_str())
        .collect();
    assert!(stdout_joined.contains("smoke-marker"), "stdout missing: {events:?}");
    assert!(events.iter().any(|e| e["eventType"] == "marker"), "no marker: {events:?}");

    // Event ids are strictly increasing.
    let ids: Vec<i64> = events.iter().filter_map(|e| e["id"].as_i64()).collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    // And the run settled as done with exit code 0.
    let run = gateway.get_run(&run_id).await?;
    assert_eq!(run["status"], "done");
    assert_eq!(run["exitCode"], 0);
    Ok(())
}

#[tokio::test]
#[serial]
async fn stop_command_terminates_a_long_run() -> anyhow::Result<()> {
    let gateway = GatewayProcess::start().await?;
    let (run_id, token) = gateway.create_run("rev", None).await?;

    let mut runner =
        RunnerProcess::start_rev(&gateway, &run_id, &token, &["/bin/sleep", "120"])?;

    // Give the runner a moment to spawn and start polling, then stop it.
    tokio::time::sleep(Duration::from_secs(2)).await;
    gateway.stop_run(&run_id, &token).await?;

    let _code = runner.wait(TIMEOUT)?;

    let run = gateway.get_run(&run_id).await?;
    assert!(
        run["status"] == "done" || run["status"] == "failed",
        "run not terminal: {run:?}"
    );
    Ok(())
}
