// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Tunables shared by the supervisor, runners, and watcher.
///
/// The host loads and validates its own configuration surface; only the
/// resolved values relevant to the control core land here.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Interactive/background scrollback ring capacity in bytes.
    pub ring_size: usize,

    /// Lines retained in the agent stderr ring.
    pub stderr_lines: usize,

    /// Outbound event channel capacity.
    pub event_capacity: usize,

    /// How long the permission-request publish may block before the
    /// permission is auto-cancelled.
    pub permission_publish_timeout: Duration,

    /// Watcher debounce window between a filesystem event and the
    /// coalesced emission.
    pub debounce_window: Duration,

    /// Maximum individual notifications per batch; larger batches collapse
    /// into a single synthetic refresh.
    pub fanout_cap: usize,

    /// Idle period after which an interactive process fires turn-complete.
    /// Zero disables the idle timer.
    pub idle_timeout: Duration,

    /// PTY dimensions used when a process is started with `immediate_start`
    /// and no client has sent a resize yet.
    pub default_cols: u16,
    pub default_rows: u16,

    /// Grace period between SIGTERM and SIGKILL when stopping a process.
    pub stop_grace: Duration,

    /// Optional login shell spawned alongside the agent (argv).
    pub shell_command: Option<Vec<String>>,

    /// TERM value exported to PTY children.
    pub term: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            ring_size: 2 * 1024 * 1024,
            stderr_lines: 50,
            event_capacity: 100,
            permission_publish_timeout: Duration::from_secs(5),
            debounce_window: Duration::from_millis(300),
            fanout_cap: 50,
            idle_timeout: Duration::from_secs(2),
            default_cols: 120,
            default_rows: 40,
            stop_grace: Duration::from_secs(2),
            shell_command: None,
            term: "xterm-256color".to_owned(),
        }
    }
}

impl CoreConfig {
    pub fn with_ring_size(mut self, bytes: usize) -> Self {
        self.ring_size = bytes;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn with_shell_command(mut self, argv: Vec<String>) -> Self {
        self.shell_command = Some(argv);
        self
    }

    /// Validate resolved values before handing the config to a supervisor.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.ring_size == 0 {
            anyhow::bail!("ring size must be non-zero");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event capacity must be non-zero");
        }
        if self.default_cols == 0 || self.default_rows == 0 {
            anyhow::bail!("default PTY dimensions must be non-zero");
        }
        if let Some(ref shell) = self.shell_command {
            if shell.is_empty() {
                anyhow::bail!("shell command must not be empty when set");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
