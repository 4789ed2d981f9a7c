// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ring of the agent's recent stderr lines, ANSI-stripped.

use std::collections::VecDeque;
use std::sync::OnceLock;

use parking_lot::Mutex;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;
use tokio_util::sync::CancellationToken;

use crate::adapter::RecentStderr;

/// Strip CSI escape sequences (`ESC [ params letter`) from a line.
pub fn strip_ansi(line: &str) -> String {
    static CSI_RE: OnceLock<Regex> = OnceLock::new();
    let re = CSI_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap();
        re
    });
    re.replace_all(line, "").into_owned()
}

/// Bounded line buffer; the oldest line is evicted on overflow.
pub struct StderrRing {
    lines: Mutex<VecDeque<String>>,
    capacity: usize,
}

impl StderrRing {
    pub fn new(capacity: usize) -> Self {
        Self { lines: Mutex::new(VecDeque::with_capacity(capacity)), capacity }
    }

    /// Append a raw line; stored ANSI-free.
    pub fn push(&self, line: &str) {
        let clean = strip_ansi(line.trim_end_matches('\r'));
        let mut lines = self.lines.lock();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(clean);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().iter().cloned().collect()
    }

    /// All retained lines joined with `"; "` for error messages.
    pub fn joined(&self) -> String {
        self.snapshot().join("; ")
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

impl RecentStderr for StderrRing {
    fn recent_stderr(&self) -> Vec<String> {
        self.snapshot()
    }
}

/// Read stderr line by line into the ring until EOF or stop.
pub(crate) async fn read_stderr(
    stderr: ChildStderr,
    ring: std::sync::Arc<StderrRing>,
    stop: CancellationToken,
) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => ring.push(&line),
                Ok(None) | Err(_) => break,
            },
        }
    }
}

#[cfg(test)]
#[path = "stderr_tests.rs"]
mod tests;
