// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY-backed passthrough sessions.
//!
//! A start request only registers the process record; the subprocess is
//! spawned lazily on the first resize so the PTY is created at the client's
//! real dimensions and the agent TUI never has to repaint. Raw PTY bytes
//! stream to at most one direct sink per process; a session-level binding
//! survives process replacement so auto-restart keeps streaming.

pub mod pump;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::OpError;
use crate::event::ProcessStatus;
use crate::pty::Pty;
use crate::ring::RingBuffer;
use crate::tracker::StatusTracker;
use crate::unix;

/// Sink receiving raw PTY output, bypassing the structured event path.
pub type OutputSink = mpsc::Sender<Bytes>;

/// What triggered a turn-complete signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnReason {
    Idle,
    PromptMatch,
    StatusTracker,
}

impl TurnReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PromptMatch => "prompt_match",
            Self::StatusTracker => "status_tracker",
        }
    }
}

/// Event published by the runner when no direct sink is bound (output) or
/// on lifecycle edges (always).
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    Output { process_id: Uuid, session: String, data: Bytes },
    Status { info: ProcessInfo },
    TurnComplete { process_id: Uuid, session: String, reason: TurnReason },
}

/// Request to register (and possibly immediately spawn) a process.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub session: String,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub env: Vec<(String, String)>,
    /// Optional turn-complete pattern matched against recent output.
    pub prompt_pattern: Option<String>,
    /// Overrides the configured idle timeout when set.
    pub idle_timeout: Option<std::time::Duration>,
    /// Spawn now at the default dimensions instead of waiting for a resize.
    pub immediate_start: bool,
    /// Interactive login shell rather than an agent passthrough.
    pub user_shell: bool,
    /// Attach a virtual-terminal status tracker for turn detection.
    pub track_status: bool,
}

/// Point-in-time snapshot of one process record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub id: Uuid,
    pub session: String,
    pub command: Vec<String>,
    pub display_command: String,
    pub workdir: PathBuf,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub user_shell: bool,
    pub started: bool,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

struct ProcState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    started: bool,
    created_at: SystemTime,
    updated_at: SystemTime,
}

/// One passthrough process. Mutable state sits behind a per-process mutex;
/// the direct-output slot has its own async lock so swaps never block the
/// I/O pump mid-chunk.
pub(crate) struct Proc {
    pub(crate) id: Uuid,
    pub(crate) session: String,
    pub(crate) user_shell: bool,
    command: Vec<String>,
    display_command: String,
    workdir: PathBuf,
    env: Vec<(String, String)>,
    pub(crate) prompt: Option<Regex>,
    pub(crate) idle_timeout: std::time::Duration,
    track_status: bool,

    state: Mutex<ProcState>,
    pub(crate) ring: Mutex<RingBuffer>,
    pub(crate) pty_slot: Mutex<Option<Arc<Pty>>>,
    /// Exactly-once spawn guard; holds whether the spawn has happened.
    start_gate: Mutex<bool>,
    pub(crate) stop_token: CancellationToken,
    /// Cancelled by the pump once the subprocess has been reaped.
    pub(crate) done: CancellationToken,
    pub(crate) sink: tokio::sync::RwLock<Option<OutputSink>>,
    pub(crate) tracker: Mutex<Option<StatusTracker>>,
    /// Last input/output activity, driving the idle timer.
    pub(crate) last_activity: Mutex<tokio::time::Instant>,
    pub(crate) pid: AtomicI32,
}

impl Proc {
    pub(crate) fn info(&self) -> ProcessInfo {
        let state = self.state.lock();
        ProcessInfo {
            id: self.id,
            session: self.session.clone(),
            command: self.command.clone(),
            display_command: self.display_command.clone(),
            workdir: self.workdir.clone(),
            status: state.status,
            exit_code: state.exit_code,
            user_shell: self.user_shell,
            started: state.started,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }

    pub(crate) fn set_status(&self, status: ProcessStatus, exit_code: Option<i32>) {
        let mut state = self.state.lock();
        state.status = status;
        if exit_code.is_some() {
            state.exit_code = exit_code;
        }
        state.updated_at = SystemTime::now();
    }

    fn mark_started(&self) {
        let mut state = self.state.lock();
        state.started = true;
        state.status = ProcessStatus::Running;
        state.updated_at = SystemTime::now();
    }

    pub(crate) fn touch_activity(&self) {
        *self.last_activity.lock() = tokio::time::Instant::now();
    }
}

/// Host for PTY passthrough processes.
pub struct InteractiveRunner {
    config: CoreConfig,
    procs: RwLock<HashMap<Uuid, Arc<Proc>>>,
    /// Agent passthrough process per session (user shells excluded).
    by_session: RwLock<HashMap<String, Uuid>>,
    /// Session-level client registry, reserved for the agent role.
    /// Lock order: always acquired after any per-process lock.
    session_sinks: RwLock<HashMap<String, OutputSink>>,
    pub(crate) events: mpsc::Sender<RunnerEvent>,
}

impl InteractiveRunner {
    pub fn new(config: CoreConfig, events: mpsc::Sender<RunnerEvent>) -> Arc<Self> {
        Arc::new(Self {
            config,
            procs: RwLock::new(HashMap::new()),
            by_session: RwLock::new(HashMap::new()),
            session_sinks: RwLock::new(HashMap::new()),
            events,
        })
    }

    /// Register a process record; spawns only with `immediate_start`.
    pub async fn start(self: &Arc<Self>, req: StartRequest) -> Result<ProcessInfo, OpError> {
        if req.session.is_empty() {
            return Err(OpError::InvalidCommand("session must not be empty".to_owned()));
        }
        if req.command.is_empty() {
            return Err(OpError::EmptyCommand);
        }

        // An invalid pattern degrades to no pattern; it never fails the start.
        let prompt = req.prompt_pattern.as_deref().and_then(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!(pattern = p, "ignoring invalid prompt pattern: {e}");
                None
            }
        });

        let display_command = crate::command::flatten(&req.command);
        let now = SystemTime::now();
        let proc = Arc::new(Proc {
            id: Uuid::new_v4(),
            session: req.session.clone(),
            user_shell: req.user_shell,
            command: req.command,
            display_command,
            workdir: req.workdir,
            env: req.env,
            prompt,
            idle_timeout: req.idle_timeout.unwrap_or(self.config.idle_timeout),
            track_status: req.track_status,
            state: Mutex::new(ProcState {
                status: ProcessStatus::Pending,
                exit_code: None,
                started: false,
                created_at: now,
                updated_at: now,
            }),
            ring: Mutex::new(RingBuffer::new(self.config.ring_size)),
            pty_slot: Mutex::new(None),
            start_gate: Mutex::new(false),
            stop_token: CancellationToken::new(),
            done: CancellationToken::new(),
            sink: tokio::sync::RwLock::new(None),
            tracker: Mutex::new(None),
            last_activity: Mutex::new(tokio::time::Instant::now()),
            pid: AtomicI32::new(0),
        });

        // A surviving session binding keeps streaming across replacement.
        let adopted = if proc.user_shell {
            None
        } else {
            self.session_sinks.read().get(&proc.session).cloned()
        };
        if let Some(sink) = adopted {
            *proc.sink.write().await = Some(sink);
        }

        self.procs.write().insert(proc.id, Arc::clone(&proc));
        if !proc.user_shell {
            self.by_session.write().insert(proc.session.clone(), proc.id);
        }

        if req.immediate_start {
            self.spawn_proc(&proc, self.config.default_cols, self.config.default_rows)?;
        }

        Ok(proc.info())
    }

    /// First resize spawns the subprocess at exactly these dimensions;
    /// later calls resize the PTY (the kernel delivers SIGWINCH).
    pub fn resize(self: &Arc<Self>, process_id: Uuid, cols: u16, rows: u16) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;
        self.spawn_or_resize(&proc, cols, rows)
    }

    /// Resize the session's agent passthrough process.
    pub fn resize_by_session(
        self: &Arc<Self>,
        session: &str,
        cols: u16,
        rows: u16,
    ) -> Result<(), OpError> {
        let id = self.by_session.read().get(session).copied().ok_or(OpError::NotFound)?;
        self.resize(id, cols, rows)
    }

    fn spawn_or_resize(self: &Arc<Self>, proc: &Arc<Proc>, cols: u16, rows: u16) -> Result<(), OpError> {
        {
            let gate = proc.start_gate.lock();
            if !*gate {
                drop(gate);
                return self.spawn_proc(proc, cols, rows);
            }
        }

        let pty = proc.pty_slot.lock().clone().ok_or(OpError::PtyUnavailable)?;
        if let Err(e) = pty.resize(cols, rows) {
            warn!(process_id = %proc.id, "resize failed: {e}");
        }
        if let Some(tracker) = proc.tracker.lock().as_mut() {
            tracker.resize(cols, rows);
        }
        Ok(())
    }

    /// Spawn the subprocess exactly once at the given dimensions.
    fn spawn_proc(self: &Arc<Self>, proc: &Arc<Proc>, cols: u16, rows: u16) -> Result<(), OpError> {
        let mut gate = proc.start_gate.lock();
        if *gate {
            return Ok(());
        }

        proc.set_status(ProcessStatus::Starting, None);
        self.emit_status(proc);

        let (pty, child) = Pty::spawn(
            &proc.command,
            &proc.workdir,
            &proc.env,
            &self.config.term,
            cols,
            rows,
        )
        .map_err(|e| {
            proc.set_status(ProcessStatus::Failed, Some(-1));
            self.emit_status(proc);
            self.remove(proc);
            OpError::InvalidCommand(format!("spawn failed: {e}"))
        })?;

        *gate = true;
        drop(gate);

        proc.pid.store(pty.child_pid(), Ordering::Release);
        if proc.track_status {
            *proc.tracker.lock() = Some(StatusTracker::new(cols, rows));
        }
        let pty = Arc::new(pty);
        *proc.pty_slot.lock() = Some(Arc::clone(&pty));
        proc.mark_started();
        proc.touch_activity();
        self.emit_status(proc);

        debug!(
            process_id = %proc.id,
            session = %proc.session,
            command = %proc.display_command,
            cols, rows,
            "interactive process spawned"
        );

        tokio::spawn(pump::run(Arc::clone(self), Arc::clone(proc), pty, child));
        Ok(())
    }

    /// Write raw bytes to the PTY master.
    pub async fn write_stdin(&self, process_id: Uuid, data: &[u8]) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;
        if !proc.info().started {
            return Err(OpError::NotStarted);
        }
        let pty = proc.pty_slot.lock().clone().ok_or(OpError::PtyUnavailable)?;
        pty.write_all(data).await.map_err(|_| OpError::PtyUnavailable)?;
        proc.touch_activity();
        Ok(())
    }

    /// Stop a process: signal readers, close the PTY (SIGHUP), SIGTERM,
    /// then SIGKILL after the grace period or when `ctx` expires.
    pub async fn stop(&self, ctx: &CancellationToken, process_id: Uuid) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;

        proc.stop_token.cancel();

        // Closing the master delivers SIGHUP once the pump drops its clone.
        let pty = proc.pty_slot.lock().take();
        if let Some(pty) = pty {
            let _ = pty.signal(Signal::SIGTERM);
        } else {
            // Never spawned: finish the record here, the pump doesn't exist.
            proc.set_status(ProcessStatus::Exited, Some(-1));
            self.emit_status(&proc);
            self.remove(&proc);
            proc.done.cancel();
            return Ok(());
        }

        tokio::select! {
            _ = proc.done.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.config.stop_grace) => {}
            _ = ctx.cancelled() => {}
        }

        let pid = proc.pid.load(Ordering::Acquire);
        if pid != 0 {
            unix::signal_group(pid, Signal::SIGKILL);
        }
        proc.done.cancelled().await;
        Ok(())
    }

    /// Stop every tracked process.
    pub async fn stop_all(&self, ctx: &CancellationToken) {
        let ids: Vec<Uuid> = self.procs.read().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.stop(ctx, id).await {
                debug!(process_id = %id, "interactive stop skipped: {e}");
            }
        }
    }

    /// Bind the direct sink; agent processes also bind at session level.
    pub async fn set_direct_output(
        &self,
        process_id: Uuid,
        sink: OutputSink,
    ) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;
        *proc.sink.write().await = Some(sink.clone());
        // User shells never overwrite the agent's session binding.
        if !proc.user_shell {
            self.session_sinks.write().insert(proc.session.clone(), sink);
        }
        Ok(())
    }

    /// Unbind the direct sink (and the session binding for agents).
    pub async fn clear_direct_output(&self, process_id: Uuid) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;
        *proc.sink.write().await = None;
        if !proc.user_shell {
            self.session_sinks.write().remove(&proc.session);
        }
        Ok(())
    }

    /// Inject synthetic bytes (e.g. a restart banner) into a process sink.
    pub async fn write_to_direct_output(
        &self,
        process_id: Uuid,
        data: Bytes,
    ) -> Result<(), OpError> {
        let proc = self.lookup(process_id)?;
        let sink = proc.sink.read().await.clone().ok_or(OpError::NotFound)?;
        sink.send(data).await.map_err(|_| OpError::NotFound)
    }

    /// Inject synthetic bytes into the session-level sink.
    pub async fn write_to_direct_output_by_session(
        &self,
        session: &str,
        data: Bytes,
    ) -> Result<(), OpError> {
        let sink = self.session_sinks.read().get(session).cloned().ok_or(OpError::NotFound)?;
        sink.send(data).await.map_err(|_| OpError::NotFound)
    }

    pub async fn has_active_client(&self, process_id: Uuid) -> bool {
        match self.lookup(process_id) {
            Ok(proc) => proc.sink.read().await.is_some(),
            Err(_) => false,
        }
    }

    /// Whether a client sink is bound at the session level. Callers use
    /// this to decide whether respawning an exited passthrough is worth it;
    /// the runner itself never auto-restarts.
    pub fn has_active_client_by_session(&self, session: &str) -> bool {
        self.session_sinks.read().contains_key(session)
    }

    pub fn is_process_running(&self, process_id: Uuid) -> bool {
        self.lookup(process_id)
            .map(|proc| {
                let info = proc.info();
                info.started && info.status == ProcessStatus::Running
            })
            .unwrap_or(false)
    }

    /// True for live processes *and* deferred-start records that have not
    /// been spawned yet.
    pub fn is_process_ready_or_pending(&self, process_id: Uuid) -> bool {
        self.lookup(process_id)
            .map(|proc| !proc.info().status.is_terminal())
            .unwrap_or(false)
    }

    pub fn get(&self, process_id: Uuid) -> Option<ProcessInfo> {
        self.procs.read().get(&process_id).map(|p| p.info())
    }

    /// Process records for one session (all sessions when empty).
    pub fn list(&self, session: &str) -> Vec<ProcessInfo> {
        self.procs
            .read()
            .values()
            .filter(|p| session.is_empty() || p.session == session)
            .map(|p| p.info())
            .collect()
    }

    /// Scrollback from a global byte offset.
    pub fn read_output(&self, process_id: Uuid, offset: u64) -> Result<Vec<u8>, OpError> {
        let proc = self.lookup(process_id)?;
        let ring = proc.ring.lock();
        Ok(ring.read_from(offset).unwrap_or_else(|| ring.tail(ring.capacity())))
    }

    fn lookup(&self, process_id: Uuid) -> Result<Arc<Proc>, OpError> {
        self.procs.read().get(&process_id).cloned().ok_or(OpError::NotFound)
    }

    pub(crate) fn emit_status(&self, proc: &Proc) {
        if self.events.try_send(RunnerEvent::Status { info: proc.info() }).is_err() {
            warn!(process_id = %proc.id, "runner status event dropped");
        }
    }

    pub(crate) fn emit_turn_complete(&self, proc: &Proc, reason: TurnReason) {
        let event = RunnerEvent::TurnComplete {
            process_id: proc.id,
            session: proc.session.clone(),
            reason,
        };
        if self.events.try_send(event).is_err() {
            warn!(process_id = %proc.id, "turn-complete event dropped");
        }
    }

    /// Drop a finished process from tracking.
    pub(crate) fn remove(&self, proc: &Proc) {
        self.procs.write().remove(&proc.id);
        if !proc.user_shell {
            let mut by_session = self.by_session.write();
            if by_session.get(&proc.session) == Some(&proc.id) {
                by_session.remove(&proc.session);
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
