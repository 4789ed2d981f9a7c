// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of a supervised agent subprocess.
///
/// Transitions are monotonic through `Starting → Running → Stopping →
/// Stopped`; `Error` is reachable from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorStatus {
    Stopped,
    Starting,
    Running,
    Paused,
    Stopping,
    Error,
}

impl SupervisorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }

    /// Whether a configure/start call must be rejected in this state.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for SupervisorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an interactive or background process.
///
/// Strictly monotonic: `Pending → Starting → Running → Exited | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    /// Record exists; the subprocess has not been spawned yet (lazy start).
    Pending,
    Starting,
    Running,
    Exited,
    Failed,
}

impl ProcessStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Exited => "exited",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Exited | Self::Failed)
    }
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound event published by a supervisor to its transport consumer.
///
/// Channel capacity is bounded; every send is non-blocking and may drop
/// (logged) except `PermissionRequest`, which blocks up to the configured
/// publish timeout and auto-cancels the permission on expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Supervisor lifecycle transition.
    Status { session_id: String, status: SupervisorStatus },
    /// Protocol payload decoded by the adapter, passed through opaquely.
    Data {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        data: Value,
    },
    /// The agent is asking a human for permission.
    PermissionRequest {
        session_id: String,
        pending_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        title: String,
        options: Vec<PermissionOption>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        action_details: Option<Value>,
    },
    /// A previously published permission request is no longer answerable.
    PermissionCancelled { session_id: String, pending_id: String },
    /// The agent believes its turn is over and awaits input.
    TurnComplete { session_id: String, reason: String },
    /// Reported once per asynchronous subprocess failure.
    Error { session_id: String, error: String },
}

impl AgentEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::Status { session_id, .. }
            | Self::Data { session_id, .. }
            | Self::PermissionRequest { session_id, .. }
            | Self::PermissionCancelled { session_id, .. }
            | Self::TurnComplete { session_id, .. }
            | Self::Error { session_id, .. } => session_id,
        }
    }
}

/// A permission request raised by an adapter on behalf of the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionRequest {
    /// Adapter-supplied pending id; minted by the supervisor when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_id: Option<String>,
    pub tool_call_id: String,
    pub title: String,
    pub options: Vec<PermissionOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_details: Option<Value>,
}

/// One selectable answer to a permission request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionOption {
    pub id: String,
    pub label: String,
    pub kind: PermissionOptionKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    AllowOnce,
    AllowAlways,
    RejectOnce,
    RejectAlways,
}

impl PermissionOptionKind {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::AllowOnce | Self::AllowAlways)
    }
}

/// The single response delivered for a pending permission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option_id: Option<String>,
    pub cancelled: bool,
}

impl PermissionResponse {
    pub fn selected(option_id: impl Into<String>) -> Self {
        Self { option_id: Some(option_id.into()), cancelled: false }
    }

    pub fn cancelled() -> Self {
        Self { option_id: None, cancelled: true }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
