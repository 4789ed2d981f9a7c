// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-process output pump: PTY reads, inline terminal-query answers,
//! status tracking, scrollback, sink forwarding, and turn detection.

use std::sync::Arc;

use bytes::Bytes;
use tokio::process::Child;
use tracing::{debug, warn};

use super::{InteractiveRunner, Proc, RunnerEvent, TurnReason};
use crate::event::ProcessStatus;
use crate::pty::{is_pty_closed, Pty};
use crate::tracker::AgentActivity;
use crate::unix;

/// PTY read size per iteration.
const READ_CHUNK: usize = 32 * 1024;

/// Sliding window of recent output used for prompt-pattern matching.
const TAIL_CAP: usize = 1024;

/// Bytes of scrollback dumped to the log when a process fails.
const FAILURE_DUMP: usize = 2048;

/// Cursor-position report sent in answer to a DSR query.
const CPR_REPLY: &[u8] = b"\x1b[1;1R";

/// "VT100 with advanced video option" sent in answer to a DA1 query.
const DA1_REPLY: &[u8] = b"\x1b[?1;2c";

/// Run the pump until the PTY closes or the stop token fires, then reap
/// the child and publish the final status.
pub(crate) async fn run(
    runner: Arc<InteractiveRunner>,
    proc: Arc<Proc>,
    pty: Arc<Pty>,
    child: Child,
) {
    let mut buf = vec![0u8; READ_CHUNK];
    let mut tail: Vec<u8> = Vec::with_capacity(TAIL_CAP);
    let mut idle_fired = false;

    loop {
        let now = tokio::time::Instant::now();
        let idle_deadline = if proc.idle_timeout.is_zero() {
            None
        } else {
            let due = *proc.last_activity.lock() + proc.idle_timeout;
            // Once fired, stay quiet until new activity moves the deadline.
            if idle_fired && due <= now {
                None
            } else {
                Some(due.max(now))
            }
        };
        let tracker_deadline = proc.tracker.lock().as_ref().and_then(|t| t.poll_deadline());

        tokio::select! {
            _ = proc.stop_token.cancelled() => break,

            result = pty.read_chunk(&mut buf) => {
                match result {
                    Ok(0) => break,
                    Ok(n) => {
                        idle_fired = false;
                        let chunk = Bytes::copy_from_slice(&buf[..n]);
                        handle_chunk(&runner, &proc, &pty, chunk, &mut tail).await;
                    }
                    Err(e) if is_pty_closed(&e) => break,
                    Err(e) => {
                        warn!(process_id = %proc.id, "pty read failed: {e}");
                        break;
                    }
                }
            }

            _ = sleep_opt(idle_deadline), if idle_deadline.is_some() => {
                // Stdin writes move the deadline without waking this loop;
                // re-check before declaring the turn over.
                let due = *proc.last_activity.lock() + proc.idle_timeout;
                if tokio::time::Instant::now() >= due {
                    idle_fired = true;
                    runner.emit_turn_complete(&proc, TurnReason::Idle);
                } else {
                    idle_fired = false;
                }
            }

            _ = sleep_opt(tracker_deadline), if tracker_deadline.is_some() => {
                let change = proc.tracker.lock().as_mut().and_then(|t| t.poll());
                if change == Some(AgentActivity::WaitingInput) {
                    runner.emit_turn_complete(&proc, TurnReason::StatusTracker);
                }
            }
        }
    }

    // With the runner's slot cleared this drops the last master handle,
    // which is what delivers SIGHUP to the child's foreground group.
    drop(pty);
    finish(runner, proc, child).await;
}

async fn handle_chunk(
    runner: &Arc<InteractiveRunner>,
    proc: &Arc<Proc>,
    pty: &Arc<Pty>,
    chunk: Bytes,
    tail: &mut Vec<u8>,
) {
    let sink = proc.sink.read().await.clone();

    // With no client attached, answer the terminal probes agents send on
    // startup so they do not hang waiting for a reply.
    if sink.is_none() {
        for reply in terminal_query_replies(&chunk) {
            let _ = pty.write_all(reply).await;
        }
    }

    if let Some(tracker) = proc.tracker.lock().as_mut() {
        tracker.feed(&chunk);
    }

    proc.ring.lock().write(&chunk);

    match sink {
        Some(sink) => {
            let _ = sink.send(chunk.clone()).await;
        }
        None => {
            let event = RunnerEvent::Output {
                process_id: proc.id,
                session: proc.session.clone(),
                data: chunk.clone(),
            };
            if runner.events.try_send(event).is_err() {
                debug!(process_id = %proc.id, "runner output event dropped");
            }
        }
    }

    if let Some(ref pattern) = proc.prompt {
        push_tail(tail, &chunk, TAIL_CAP);
        if pattern.is_match(&String::from_utf8_lossy(tail)) {
            runner.emit_turn_complete(proc, TurnReason::PromptMatch);
            // Clearing prevents back-to-back matches on the same prompt.
            tail.clear();
        }
    }

    proc.touch_activity();
}

/// Reap the child, record the exit, publish the final status, and drop the
/// process from tracking.
async fn finish(runner: Arc<InteractiveRunner>, proc: Arc<Proc>, mut child: Child) {
    let status = child.wait().await;
    let exit_code = match &status {
        Ok(s) => unix::exit_code_of(s),
        Err(_) => -1,
    };
    let final_status =
        if exit_code == 0 { ProcessStatus::Exited } else { ProcessStatus::Failed };

    if final_status == ProcessStatus::Failed {
        let dump = proc.ring.lock().tail(FAILURE_DUMP);
        warn!(
            process_id = %proc.id,
            session = %proc.session,
            exit_code,
            "interactive process failed; recent output:\n{}",
            String::from_utf8_lossy(&dump)
        );
    }

    proc.set_status(final_status, Some(exit_code));
    *proc.pty_slot.lock() = None;
    runner.emit_status(&proc);
    runner.remove(&proc);
    proc.done.cancel();
}

async fn sleep_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Scan a chunk for DSR and DA1 terminal queries, returning the replies to
/// write back in order.
pub(crate) fn terminal_query_replies(chunk: &[u8]) -> Vec<&'static [u8]> {
    let mut replies = Vec::new();
    let mut i = 0;
    while i + 1 < chunk.len() {
        if chunk[i] == 0x1b && chunk[i + 1] == b'[' {
            let rest = &chunk[i + 2..];
            if rest.starts_with(b"6n") || rest.starts_with(b"?6n") {
                replies.push(CPR_REPLY);
            } else if rest.starts_with(b"c") || rest.starts_with(b"0c") {
                replies.push(DA1_REPLY);
            }
            i += 2;
        } else {
            i += 1;
        }
    }
    replies
}

/// Append a chunk to the sliding tail, keeping at most `cap` bytes.
pub(crate) fn push_tail(tail: &mut Vec<u8>, chunk: &[u8], cap: usize) {
    if chunk.len() >= cap {
        tail.clear();
        tail.extend_from_slice(&chunk[chunk.len() - cap..]);
        return;
    }
    tail.extend_from_slice(chunk);
    if tail.len() > cap {
        tail.drain(..tail.len() - cap);
    }
}

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;
