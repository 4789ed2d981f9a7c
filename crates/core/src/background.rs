// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Non-interactive subprocess runner for workspace scripts.
//!
//! Same lifecycle shape as the interactive runner but without a PTY:
//! stdout/stderr are piped, output is ring-buffered for scrollback and
//! published as chunked events to the workspace stream (or to a callback
//! when no stream is attached).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use nix::sys::signal::Signal;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::CoreConfig;
use crate::error::OpError;
use crate::event::ProcessStatus;
use crate::ring::RingBuffer;
use crate::unix;

/// Category of a workspace script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptKind {
    Setup,
    DevServer,
    Cleanup,
    Custom,
}

/// Event published for background process output and lifecycle.
#[derive(Debug, Clone)]
pub enum BackgroundEvent {
    Output { process_id: Uuid, session: String, data: Bytes },
    Status { process_id: Uuid, session: String, status: ProcessStatus, exit_code: Option<i32> },
}

/// Where background events are delivered.
#[derive(Clone)]
pub enum BackgroundSink {
    /// Workspace stream; sends are non-blocking and drop on overflow.
    Stream(tokio::sync::mpsc::Sender<BackgroundEvent>),
    /// Callback used when no workspace stream is attached.
    Callback(Arc<dyn Fn(BackgroundEvent) + Send + Sync>),
}

impl BackgroundSink {
    fn emit(&self, event: BackgroundEvent) {
        match self {
            Self::Stream(tx) => {
                if tx.try_send(event).is_err() {
                    warn!("background event dropped: stream full or closed");
                }
            }
            Self::Callback(cb) => cb(event),
        }
    }
}

/// Snapshot of one background process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundProcessInfo {
    pub id: Uuid,
    pub session: String,
    pub kind: ScriptKind,
    pub command: Vec<String>,
    pub workdir: PathBuf,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

struct BgState {
    status: ProcessStatus,
    exit_code: Option<i32>,
    created_at: SystemTime,
    updated_at: SystemTime,
}

struct BgProcess {
    id: Uuid,
    session: String,
    kind: ScriptKind,
    command: Vec<String>,
    workdir: PathBuf,
    state: Mutex<BgState>,
    ring: Mutex<RingBuffer>,
    pid: AtomicI32,
    /// Cancelled by the exit waiter once the subprocess is reaped.
    done: CancellationToken,
}

impl BgProcess {
    fn info(&self) -> BackgroundProcessInfo {
        let state = self.state.lock();
        BackgroundProcessInfo {
            id: self.id,
            session: self.session.clone(),
            kind: self.kind,
            command: self.command.clone(),
            workdir: self.workdir.clone(),
            status: state.status,
            exit_code: state.exit_code,
            created_at: state.created_at,
            updated_at: state.updated_at,
        }
    }
}

/// Runner for background workspace scripts.
pub struct BackgroundRunner {
    config: CoreConfig,
    procs: RwLock<HashMap<Uuid, Arc<BgProcess>>>,
    sink: BackgroundSink,
}

impl BackgroundRunner {
    pub fn new(config: CoreConfig, sink: BackgroundSink) -> Self {
        Self { config, procs: RwLock::new(HashMap::new()), sink }
    }

    /// Spawn a script and start pumping its output.
    pub async fn start(
        self: &Arc<Self>,
        session: &str,
        kind: ScriptKind,
        argv: Vec<String>,
        workdir: &Path,
        env: &[(String, String)],
    ) -> anyhow::Result<BackgroundProcessInfo> {
        if session.is_empty() || argv.is_empty() {
            return Err(OpError::EmptyCommand.into());
        }

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(workdir)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unix::own_process_group(&mut cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("spawn {}: {e}", argv[0]))?;

        let now = SystemTime::now();
        let proc = Arc::new(BgProcess {
            id: Uuid::new_v4(),
            session: session.to_owned(),
            kind,
            command: argv,
            workdir: workdir.to_owned(),
            state: Mutex::new(BgState {
                status: ProcessStatus::Running,
                exit_code: None,
                created_at: now,
                updated_at: now,
            }),
            ring: Mutex::new(RingBuffer::new(self.config.ring_size)),
            pid: AtomicI32::new(child.id().map(|id| id as i32).unwrap_or(0)),
            done: CancellationToken::new(),
        });
        self.procs.write().insert(proc.id, Arc::clone(&proc));

        self.sink.emit(BackgroundEvent::Status {
            process_id: proc.id,
            session: proc.session.clone(),
            status: ProcessStatus::Running,
            exit_code: None,
        });

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pump_stream(stdout, Arc::clone(&proc), self.sink.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stream(stderr, Arc::clone(&proc), self.sink.clone()));
        }

        let runner = Arc::clone(self);
        let waiter_proc = Arc::clone(&proc);
        tokio::spawn(async move {
            let status = child.wait().await;
            runner.finish(&waiter_proc, status).await;
        });

        Ok(proc.info())
    }

    /// Scrollback starting at a global byte offset.
    pub fn read_output(&self, process_id: Uuid, offset: u64) -> Result<Vec<u8>, OpError> {
        let proc = self.procs.read().get(&process_id).cloned().ok_or(OpError::NotFound)?;
        let ring = proc.ring.lock();
        Ok(ring.read_from(offset).unwrap_or_else(|| ring.tail(ring.capacity())))
    }

    pub fn get(&self, process_id: Uuid) -> Option<BackgroundProcessInfo> {
        self.procs.read().get(&process_id).map(|p| p.info())
    }

    /// All live processes for a session (all sessions when empty).
    pub fn list(&self, session: &str) -> Vec<BackgroundProcessInfo> {
        self.procs
            .read()
            .values()
            .filter(|p| session.is_empty() || p.session == session)
            .map(|p| p.info())
            .collect()
    }

    /// SIGTERM the process group, escalating to SIGKILL after the grace
    /// period or when `ctx` is cancelled.
    pub async fn stop(&self, process_id: Uuid, ctx: &CancellationToken) -> Result<(), OpError> {
        let proc = self.procs.read().get(&process_id).cloned().ok_or(OpError::NotFound)?;

        let pid = proc.pid.load(Ordering::Acquire);
        if pid != 0 {
            unix::signal_group(pid, Signal::SIGTERM);
        }

        tokio::select! {
            _ = proc.done.cancelled() => return Ok(()),
            _ = tokio::time::sleep(self.config.stop_grace) => {}
            _ = ctx.cancelled() => {}
        }

        if pid != 0 {
            unix::signal_group(pid, Signal::SIGKILL);
        }
        proc.done.cancelled().await;
        Ok(())
    }

    /// Stop every tracked process; used by the supervisor during shutdown.
    pub async fn stop_all(&self, ctx: &CancellationToken) {
        let ids: Vec<Uuid> = self.procs.read().keys().copied().collect();
        for id in ids {
            if let Err(e) = self.stop(id, ctx).await {
                debug!(process_id = %id, "background stop skipped: {e}");
            }
        }
    }

    async fn finish(&self, proc: &Arc<BgProcess>, status: std::io::Result<std::process::ExitStatus>) {
        let exit_code = match &status {
            Ok(s) => unix::exit_code_of(s),
            Err(_) => -1,
        };
        let final_status =
            if exit_code == 0 { ProcessStatus::Exited } else { ProcessStatus::Failed };

        {
            let mut state = proc.state.lock();
            state.status = final_status;
            state.exit_code = Some(exit_code);
            state.updated_at = SystemTime::now();
        }

        debug!(
            process_id = %proc.id,
            session = %proc.session,
            exit_code,
            "background process finished"
        );

        self.sink.emit(BackgroundEvent::Status {
            process_id: proc.id,
            session: proc.session.clone(),
            status: final_status,
            exit_code: Some(exit_code),
        });

        proc.done.cancel();
        self.procs.write().remove(&proc.id);
    }
}

/// Pump one piped stream into the ring buffer and the sink.
async fn pump_stream(
    mut stream: impl AsyncReadExt + Unpin,
    proc: Arc<BgProcess>,
    sink: BackgroundSink,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let chunk = Bytes::copy_from_slice(&buf[..n]);
                proc.ring.lock().write(&chunk);
                sink.emit(BackgroundEvent::Output {
                    process_id: proc.id,
                    session: proc.session.clone(),
                    data: chunk,
                });
            }
        }
    }
}

#[cfg(test)]
#[path = "background_tests.rs"]
mod tests;
