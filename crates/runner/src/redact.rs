// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Secret redaction for captured agent output.
//!
//! Runs over every chunk before it leaves the host; the raw bytes still go
//! to the local run log. Patterns cover assignment-style secrets, known
//! provider token prefixes, and PEM private-key blocks.

use regex::Regex;

const REDACTED: &str = "[REDACTED]";

pub struct Redactor {
    /// `(pattern, replacement)` pairs applied in order.
    rules: Vec<(Regex, String)>,
}

impl Redactor {
    pub fn new() -> anyhow::Result<Self> {
        let rules = vec![
            // key=value / key: value assignments for sensitive key names.
            (
                Regex::new(
                    r#"(?i)\b(api[_-]?key|secret|password|token|auth|bearer|credential)(["']?\s*[:=]\s*)(["']?)[^\s"']+"#,
                )?,
                format!("$1$2$3{REDACTED}"),
            ),
            // Provider token prefixes.
            (Regex::new(r"\bsk-[A-Za-z0-9_-]{8,}")?, REDACTED.to_owned()),
            (Regex::new(r"\bghp_[A-Za-z0-9]{16,}")?, REDACTED.to_owned()),
            (Regex::new(r"\bghs_[A-Za-z0-9]{16,}")?, REDACTED.to_owned()),
            (Regex::new(r"\bnpm_[A-Za-z0-9]{16,}")?, REDACTED.to_owned()),
            // PEM private-key blocks, including the body.
            (
                Regex::new(
                    r"(?s)-----BEGIN [A-Z0-9 ]*PRIVATE KEY-----.*?-----END [A-Z0-9 ]*PRIVATE KEY-----",
                )?,
                REDACTED.to_owned(),
            ),
        ];
        Ok(Self { rules })
    }

    /// Redact secrets in one output chunk.
    pub fn redact(&self, input: &str) -> String {
        let mut out = input.to_owned();
        for (pattern, replacement) in &self.rules {
            out = pattern.replace_all(&out, replacement.as_str()).into_owned();
        }
        out
    }
}

#[cfg(test)]
#[path = "redact_tests.rs"]
mod tests;
