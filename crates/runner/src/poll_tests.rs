// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tether_wire::types::{MAX_ACK_RESULT_BYTES, TRUNCATED_SUFFIX};

use super::{run_allowlisted, truncate_result, DedupSet};

#[test]
fn dedup_suppresses_within_window() {
    let mut set = DedupSet::new(Duration::from_secs(60));
    assert!(set.insert("c1"));
    assert!(!set.insert("c1"));
    assert!(set.contains("c1"));
    assert!(set.insert("c2"));
    assert_eq!(set.len(), 2);
}

#[test]
fn removed_ids_are_re_admitted() {
    let mut set = DedupSet::new(Duration::from_secs(60));
    assert!(set.insert("c1"));
    set.remove("c1");
    assert!(!set.contains("c1"));
    assert!(set.insert("c1"));
}

#[test]
fn expired_ids_fall_out_of_the_window() {
    let mut set = DedupSet::new(Duration::from_millis(10));
    assert!(set.insert("c1"));
    std::thread::sleep(Duration::from_millis(30));
    assert!(!set.contains("c1"));
    // The sweep on insert clears it and re-admits.
    assert!(set.insert("c1"));
    assert_eq!(set.len(), 1);
}

#[test]
fn short_results_pass_untouched() {
    assert_eq!(truncate_result("On branch main\n".to_owned()), "On branch main\n");
}

#[test]
fn oversize_results_are_cut_with_suffix() {
    let big = "x".repeat(MAX_ACK_RESULT_BYTES + 100);
    let out = truncate_result(big);
    assert_eq!(out.len(), MAX_ACK_RESULT_BYTES);
    assert!(out.ends_with(TRUNCATED_SUFFIX));
}

#[test]
fn truncation_respects_char_boundaries() {
    // Multi-byte chars across the cut must not split.
    let big = "é".repeat(MAX_ACK_RESULT_BYTES);
    let out = truncate_result(big);
    assert!(out.len() <= MAX_ACK_RESULT_BYTES);
    assert!(out.ends_with(TRUNCATED_SUFFIX));
}

#[tokio::test]
async fn allowlisted_command_captures_output() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    std::fs::write(tmp.path().join("hello.txt"), "contents\n")?;

    let ack = run_allowlisted("cat hello.txt", tmp.path()).await;
    assert_eq!(ack.result.as_deref(), Some("contents\n"));
    assert_eq!(ack.error, None);
    Ok(())
}

#[tokio::test]
async fn failing_command_reports_error_with_output() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let ack = run_allowlisted("cat missing-file.txt", tmp.path()).await;
    assert!(ack.error.is_some());
    // stderr is still delivered in the result.
    assert!(ack.result.is_some_and(|r| r.contains("missing-file.txt")));
    Ok(())
}

#[tokio::test]
async fn unknown_program_reports_spawn_failure() {
    let tmp = std::env::temp_dir();
    let ack = run_allowlisted("definitely-not-a-program-xyz", &tmp).await;
    assert!(ack.error.is_some_and(|e| e.contains("spawn failed")));
    assert_eq!(ack.result, None);
}
