// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    invalid_state = { OpError::InvalidState("configure while running".into()), "INVALID_STATE" },
    already_running = { OpError::AlreadyRunning, "ALREADY_RUNNING" },
    empty_command = { OpError::EmptyCommand, "EMPTY_COMMAND" },
    not_found = { OpError::NotFound, "NOT_FOUND" },
    channel_full = { OpError::ChannelFull, "CHANNEL_FULL" },
    not_started = { OpError::NotStarted, "NOT_STARTED" },
    pty_unavailable = { OpError::PtyUnavailable, "PTY_UNAVAILABLE" },
    op_in_progress = { OpError::OperationInProgress, "OPERATION_IN_PROGRESS" },
    bad_branch = { OpError::InvalidBranchName("a..b".into()), "INVALID_BRANCH_NAME" },
    bad_abort = { OpError::UnknownAbortKind("cherry-pick".into()), "UNKNOWN_ABORT_KIND" },
)]
fn code_is_stable(err: OpError, code: &str) {
    assert_eq!(err.code(), code);
}

#[test]
fn display_includes_detail() {
    let err = OpError::InvalidBranchName("bad name".into());
    assert_eq!(err.to_string(), "invalid branch name: bad name");

    let err = OpError::InvalidState("start while stopping".into());
    assert!(err.to_string().contains("start while stopping"));
}

#[test]
fn is_std_error() {
    fn takes_error(_: &dyn std::error::Error) {}
    takes_error(&OpError::NotFound);
}
