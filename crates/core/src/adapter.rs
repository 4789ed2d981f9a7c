// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Contract between the supervisor and the per-vendor protocol adapters.
//!
//! Adapters decode the agent's line-oriented protocol into [`AgentEvent`]s
//! and raise permission requests through the registered handler. The
//! supervisor never interprets protocol payloads itself.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::mpsc;

use crate::event::{AgentEvent, PermissionRequest, PermissionResponse};

/// Initial and continue argv tails for adapters that spawn a fresh
/// subprocess per prompt.
#[derive(Debug, Clone)]
pub struct OneShotSpec {
    pub initial_args: Vec<String>,
    pub continue_args: Vec<String>,
}

/// Everything the supervisor knows when instantiating an adapter.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub session: String,
    pub workdir: PathBuf,
    pub auto_approve: bool,
    pub approval_policy: Option<String>,
    pub mcp_servers: Vec<String>,
    pub agent_id: String,
    pub one_shot: Option<OneShotSpec>,
}

/// Shared write end of the agent's stdin.
///
/// The adapter writes protocol frames through it; the supervisor keeps a
/// clone so shutdown can deliver EOF without a back-pointer to the adapter.
#[derive(Clone)]
pub struct StdinPipe(Arc<tokio::sync::Mutex<Option<ChildStdin>>>);

impl StdinPipe {
    pub fn new(stdin: ChildStdin) -> Self {
        Self(Arc::new(tokio::sync::Mutex::new(Some(stdin))))
    }

    /// Write and flush a frame. Fails once the pipe has been closed.
    pub async fn write(&self, data: &[u8]) -> io::Result<()> {
        let mut slot = self.0.lock().await;
        let stdin = slot
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "stdin closed"))?;
        stdin.write_all(data).await?;
        stdin.flush().await
    }

    /// Drop the write end, delivering EOF to the agent.
    pub async fn close(&self) {
        self.0.lock().await.take();
    }
}

/// Capability exposing the supervisor's recent stderr lines to adapters
/// that surface structured errors. Breaks the supervisor↔adapter cycle:
/// adapters never see the concrete supervisor type.
pub trait RecentStderr: Send + Sync {
    fn recent_stderr(&self) -> Vec<String>;
}

pub type PermissionFuture = Pin<Box<dyn Future<Output = PermissionResponse> + Send>>;

/// Handler an adapter invokes when the agent asks for permission.
pub type PermissionHandler = Arc<dyn Fn(PermissionRequest) -> PermissionFuture + Send + Sync>;

/// Vendor protocol adapter driven by the supervisor.
pub trait Adapter: Send + Sync {
    /// Attach the adapter to the subprocess's standard streams.
    fn connect(&self, stdin: StdinPipe, stdout: ChildStdout) -> anyhow::Result<()>;

    /// Tear down protocol state; idempotent.
    fn close(&self);

    /// Extra environment merged into the subprocess env.
    fn prepare_environment(&self) -> Vec<(String, String)>;

    /// Extra argv appended after the user command.
    fn prepare_command_args(&self) -> Vec<String>;

    /// Whether stop must SIGKILL the process group (agents that ignore
    /// stdin EOF).
    fn requires_process_kill(&self) -> bool;

    /// The decoded event stream. Yields `Some` exactly once.
    fn updates(&self) -> Option<mpsc::Receiver<AgentEvent>>;

    fn set_permission_handler(&self, handler: PermissionHandler);

    fn session_id(&self) -> String;

    /// One-shot adapters spawn a fresh subprocess per prompt; the
    /// supervisor skips process creation for them.
    fn is_one_shot(&self) -> bool {
        false
    }

    /// Optional: receive the supervisor's recent-stderr capability.
    fn set_stderr_provider(&self, _provider: Arc<dyn RecentStderr>) {}
}

/// Constructor injected by the host, one per agent vendor.
pub type AdapterFactory =
    Arc<dyn Fn(AdapterConfig) -> anyhow::Result<Arc<dyn Adapter>> + Send + Sync>;
