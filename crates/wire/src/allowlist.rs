// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator command allowlist.
//!
//! Commands that are not reserved control tokens must equal an allowlist
//! entry, or start with an entry followed by a space. Shell metacharacters
//! and parent-directory traversal are rejected unconditionally, even for
//! allowlisted prefixes.

/// Baseline commands operators may ask a runner to execute outside the
/// agent. Deployments extend this via `EXTRA_ALLOWED_COMMANDS`.
const BASE_ALLOWED: &[&str] = &[
    "git status",
    "git diff",
    "git log",
    "git branch",
    "git stash list",
    "ls",
    "pwd",
    "cat",
    "head",
    "tail",
    "wc",
    "df",
    "du",
    "ps",
    "uptime",
    "whoami",
    "cargo check",
    "cargo test",
    "npm test",
    "pytest",
];

/// Characters that disqualify a command outright.
const FORBIDDEN_CHARS: &[char] = &[';', '&', '|', '`', '$', '('];

/// Substring that disqualifies a command outright.
const FORBIDDEN_TRAVERSAL: &str = "../";

/// Allowlist of operator shell commands.
#[derive(Debug, Clone)]
pub struct CommandAllowlist {
    entries: Vec<String>,
}

impl CommandAllowlist {
    /// Build the allowlist from the baseline plus deployment extras.
    /// Empty or whitespace-only extras are ignored.
    pub fn new(extra: &[String]) -> Self {
        let mut entries: Vec<String> = BASE_ALLOWED.iter().map(|s| (*s).to_owned()).collect();
        for e in extra {
            let trimmed = e.trim();
            if !trimmed.is_empty() {
                entries.push(trimmed.to_owned());
            }
        }
        Self { entries }
    }

    /// Whether `command` may be handed to a runner for execution.
    pub fn is_allowed(&self, command: &str) -> bool {
        if has_forbidden_syntax(command) {
            return false;
        }
        self.entries
            .iter()
            .any(|entry| command == entry || command.starts_with(&format!("{entry} ")))
    }
}

impl Default for CommandAllowlist {
    fn default() -> Self {
        Self::new(&[])
    }
}

/// Whether a command contains shell metacharacters or `../`.
pub fn has_forbidden_syntax(command: &str) -> bool {
    command.contains(FORBIDDEN_CHARS) || command.contains(FORBIDDEN_TRAVERSAL)
}

#[cfg(test)]
#[path = "allowlist_tests.rs"]
mod tests;
