// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Blocking-prompt detection over captured output chunks.
//!
//! A positive match emits a `prompt_waiting` event naming the prompt type;
//! sending input emits `prompt_resolved`. Specific patterns win over the
//! generic trailing question mark.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Classified prompt types, in wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// `[y/n]` / `(y/N)` style confirmation.
    YesNo,
    /// `Continue?` style.
    Continue,
    /// `Press Enter to continue`.
    PressEnter,
    /// `Type 'yes' to continue`.
    TypeYes,
    /// `Are you sure` / `Confirm` / `Allow` / `Proceed with`.
    Confirmation,
    /// `Would you like` / `Should I` / trailing `?`.
    Question,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::YesNo => "yes_no",
            Self::Continue => "continue",
            Self::PressEnter => "press_enter",
            Self::TypeYes => "type_yes",
            Self::Confirmation => "confirmation",
            Self::Question => "question",
        }
    }
}

pub struct PromptDetector {
    patterns: Vec<(Regex, PromptKind)>,
}

impl PromptDetector {
    pub fn new() -> anyhow::Result<Self> {
        let patterns = vec![
            (Regex::new(r"\[[Yy]/[Nn]\]")?, PromptKind::YesNo),
            (Regex::new(r"\([yY]/[nN]\)")?, PromptKind::YesNo),
            (Regex::new(r"Press Enter to continue")?, PromptKind::PressEnter),
            (Regex::new(r"Type '?yes'? to continue")?, PromptKind::TypeYes),
            (Regex::new(r"Continue\?")?, PromptKind::Continue),
            (Regex::new(r"(Are you sure|Confirm |Allow |Proceed with)")?, PromptKind::Confirmation),
            (Regex::new(r"(Would you like|Should I|Do you want me to)")?, PromptKind::Question),
        ];
        Ok(Self { patterns })
    }

    /// Scan one output chunk for a blocking prompt.
    pub fn detect(&self, chunk: &str) -> Option<PromptKind> {
        for (pattern, kind) in &self.patterns {
            if pattern.is_match(chunk) {
                return Some(*kind);
            }
        }
        // Generic fallback: the chunk ends with an open question.
        let trimmed = chunk.trim_end_matches(['\n', '\r', ' ']);
        if trimmed.ends_with('?') {
            return Some(PromptKind::Question);
        }
        None
    }
}

#[cfg(test)]
#[path = "prompt_tests.rs"]
mod tests;
