// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Synchronous error families returned by control-plane operations.
///
/// Operational failures inside git operations are reported through
/// [`crate::git::GitOperationResult`] values instead; asynchronous subprocess
/// exits are reported once via the event channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpError {
    /// The operation is not valid in the current lifecycle state.
    InvalidState(String),
    /// A start is already live for this session.
    AlreadyRunning,
    /// No command has been configured, or the configured command is empty.
    EmptyCommand,
    /// The command string could not be tokenised.
    InvalidCommand(String),
    /// The referenced process or pending permission does not exist.
    NotFound,
    /// The rendezvous channel already holds an undelivered response.
    ChannelFull,
    /// The process record exists but its subprocess has not been spawned.
    NotStarted,
    /// The process was spawned but its PTY handle is gone.
    PtyUnavailable,
    /// Another version-control operation is running in this working directory.
    OperationInProgress,
    /// The branch name fails the validation grammar.
    InvalidBranchName(String),
    /// `abort` was called with something other than `merge` or `rebase`.
    UnknownAbortKind(String),
}

impl OpError {
    /// Stable machine-readable code for transport layers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidState(_) => "INVALID_STATE",
            Self::AlreadyRunning => "ALREADY_RUNNING",
            Self::EmptyCommand => "EMPTY_COMMAND",
            Self::InvalidCommand(_) => "INVALID_COMMAND",
            Self::NotFound => "NOT_FOUND",
            Self::ChannelFull => "CHANNEL_FULL",
            Self::NotStarted => "NOT_STARTED",
            Self::PtyUnavailable => "PTY_UNAVAILABLE",
            Self::OperationInProgress => "OPERATION_IN_PROGRESS",
            Self::InvalidBranchName(_) => "INVALID_BRANCH_NAME",
            Self::UnknownAbortKind(_) => "UNKNOWN_ABORT_KIND",
        }
    }
}

impl fmt::Display for OpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState(detail) => write!(f, "invalid state: {detail}"),
            Self::AlreadyRunning => f.write_str("already running"),
            Self::EmptyCommand => f.write_str("command is empty"),
            Self::InvalidCommand(detail) => write!(f, "invalid command: {detail}"),
            Self::NotFound => f.write_str("not found"),
            Self::ChannelFull => f.write_str("response channel is full"),
            Self::NotStarted => f.write_str("process not started"),
            Self::PtyUnavailable => f.write_str("pty unavailable"),
            Self::OperationInProgress => f.write_str("operation in progress"),
            Self::InvalidBranchName(name) => write!(f, "invalid branch name: {name}"),
            Self::UnknownAbortKind(kind) => write!(f, "unknown abort kind: {kind}"),
        }
    }
}

impl std::error::Error for OpError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
