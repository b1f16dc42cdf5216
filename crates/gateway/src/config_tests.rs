// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;

use super::GatewayConfig;

fn parse(args: &[&str]) -> GatewayConfig {
    let mut full = vec!["tether-gateway"];
    full.extend_from_slice(args);
    match GatewayConfig::try_parse_from(full) {
        Ok(c) => c,
        Err(e) => panic!("parse failed: {e}"),
    }
}

#[test]
fn defaults_validate() {
    let config = parse(&[]);
    assert_eq!(config.port, 8443);
    assert_eq!(config.retention_days, 30);
    assert_eq!(config.clock_skew_secs, 300);
    assert_eq!(config.nonce_expiry_secs, 600);
    assert_eq!(config.log_format, "text");
    assert!(config.validate().is_ok());
}

#[test]
fn log_format_is_text_or_json() {
    assert!(parse(&["--log-format", "json"]).validate().is_ok());
    assert!(parse(&["--log-format", "yaml"]).validate().is_err());
}

#[test]
fn short_secret_rejected() {
    let config = parse(&["--hmac-secret", "too-short"]);
    assert!(config.validate().is_err());
}

#[test]
fn long_secret_accepted() {
    let config = parse(&["--hmac-secret", "0123456789abcdef0123456789abcdef"]);
    assert!(config.validate().is_ok());
    assert_eq!(config.resolve_secret(), b"0123456789abcdef0123456789abcdef");
}

#[test]
fn strict_mode_requires_secret() {
    let config = parse(&["--strict-secret"]);
    assert!(config.validate().is_err());

    let config =
        parse(&["--strict-secret", "--hmac-secret", "0123456789abcdef0123456789abcdef"]);
    assert!(config.validate().is_ok());
}

#[test]
fn nonce_expiry_must_cover_skew() {
    let config = parse(&["--clock-skew-secs", "700"]);
    assert!(config.validate().is_err());
}

#[test]
fn ephemeral_secret_is_generated_when_absent() {
    let config = parse(&[]);
    let secret = config.resolve_secret();
    assert!(secret.len() >= tether_wire::sign::MIN_SECRET_LEN);
    // Each resolution generates a fresh value.
    assert_ne!(secret, config.resolve_secret());
}

#[test]
fn extra_allowed_commands_split_on_commas() {
    let config = parse(&["--extra-allowed-commands", "kubectl get,terraform plan"]);
    assert_eq!(config.extra_allowed_commands, ["kubectl get", "terraform plan"]);
}

#[test]
fn data_paths_nest_under_data_dir() {
    let config = parse(&["--data-dir", "/srv/tether"]);
    assert_eq!(config.db_path(), std::path::Path::new("/srv/tether/db.sqlite"));
    assert_eq!(config.artifacts_dir("r1"), std::path::Path::new("/srv/tether/artifacts/r1"));
    assert_eq!(config.run_dir("r1"), std::path::Path::new("/srv/tether/runs/r1"));
}
