// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Virtual-terminal model that classifies what the agent TUI is doing.
//!
//! The output pump feeds raw PTY bytes; after a quiet debounce window the
//! tracker re-reads its rendered screen and reports transitions between
//! working and waiting-for-input.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Coarse classification of the agent's terminal screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentActivity {
    Unknown,
    Working,
    WaitingInput,
}

const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(250);

/// Screen-state tracker backed by an avt virtual terminal.
pub struct StatusTracker {
    vt: avt::Vt,
    activity: AgentActivity,
    dirty: bool,
    last_feed: Option<Instant>,
    debounce: Duration,
    /// Incomplete UTF-8 tail carried between feeds.
    carry: Vec<u8>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("activity", &self.activity)
            .field("dirty", &self.dirty)
            .finish()
    }
}

impl StatusTracker {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            vt: avt::Vt::new(cols as usize, rows as usize),
            activity: AgentActivity::Unknown,
            dirty: false,
            last_feed: None,
            debounce: DEFAULT_DEBOUNCE,
            carry: Vec::new(),
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn activity(&self) -> AgentActivity {
        self.activity
    }

    /// Feed raw PTY bytes into the virtual terminal.
    pub fn feed(&mut self, data: &[u8]) {
        if data.is_empty() {
            return;
        }

        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(data);

        match std::str::from_utf8(&input) {
            Ok(text) => {
                let _ = self.vt.feed_str(text);
            }
            Err(e) if e.error_len().is_none() => {
                // Clean split inside a multi-byte sequence: feed the valid
                // prefix and carry the tail into the next call.
                let valid = e.valid_up_to();
                if valid > 0 {
                    let _ = self.vt.feed_str(&String::from_utf8_lossy(&input[..valid]));
                }
                self.carry = input[valid..].to_vec();
            }
            Err(_) => {
                // Garbage mid-stream: let lossy replacement handle it.
                let _ = self.vt.feed_str(&String::from_utf8_lossy(&input));
            }
        }

        self.dirty = true;
        self.last_feed = Some(Instant::now());
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        let _ = self.vt.resize(cols as usize, rows as usize);
    }

    /// When the debounced re-classification is due, if at all.
    pub fn poll_deadline(&self) -> Option<Instant> {
        if !self.dirty {
            return None;
        }
        self.last_feed.map(|at| at + self.debounce)
    }

    /// Re-classify the screen; returns the new activity when it changed.
    ///
    /// Callers invoke this once the [`poll_deadline`](Self::poll_deadline)
    /// has passed.
    pub fn poll(&mut self) -> Option<AgentActivity> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;

        let lines: Vec<String> = self.vt.view().map(|line| line.text()).collect();
        let next = classify_screen(&lines);
        if next != self.activity {
            self.activity = next;
            Some(next)
        } else {
            None
        }
    }
}

/// Glyphs agent TUIs use for activity spinners.
fn is_spinner_char(c: char) -> bool {
    ('\u{2800}'..='\u{28FF}').contains(&c) || matches!(c, '◐' | '◓' | '◑' | '◒' | '✻' | '✽')
}

/// Characters that commonly terminate an input-ready prompt line.
fn is_prompt_char(c: char) -> bool {
    matches!(c, '❯' | '>' | '$' | '%' | '#')
}

/// Classify a rendered screen into an [`AgentActivity`].
///
/// Working markers win over prompt markers: a TUI redraws its prompt box
/// while streaming, but the spinner only exists while it is busy.
pub fn classify_screen(lines: &[String]) -> AgentActivity {
    let recent: Vec<&str> = lines
        .iter()
        .map(|l| l.trim_end())
        .filter(|l| !l.trim().is_empty())
        .rev()
        .take(5)
        .collect();

    if recent.is_empty() {
        return AgentActivity::Unknown;
    }

    for line in &recent {
        if line.chars().any(is_spinner_char) || line.contains("esc to interrupt") {
            return AgentActivity::Working;
        }
    }

    for line in &recent {
        let trimmed = line.trim();
        let bare = trimmed.trim_end_matches(['│', ' ']).trim_end();
        let inner = trimmed.trim_start_matches(['│', ' ']);
        if bare.chars().last().is_some_and(is_prompt_char)
            || inner.starts_with('❯')
            || inner.starts_with("> ")
        {
            return AgentActivity::WaitingInput;
        }
    }

    AgentActivity::Unknown
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
