// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared helpers for unit and workspace-level tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::ChildStdout;
use tokio::sync::mpsc;

use crate::adapter::{
    Adapter, AdapterConfig, AdapterFactory, PermissionHandler, RecentStderr, StdinPipe,
};
use crate::event::{AgentEvent, PermissionRequest, PermissionResponse};

/// Scripted adapter standing in for a vendor protocol implementation.
pub struct FakeAdapter {
    pub config: AdapterConfig,
    updates_tx: mpsc::Sender<AgentEvent>,
    updates_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    handler: Mutex<Option<PermissionHandler>>,
    stderr_provider: Mutex<Option<Arc<dyn RecentStderr>>>,
    stdin: Mutex<Option<StdinPipe>>,
    connected: AtomicBool,
    closed: AtomicBool,
    one_shot: bool,
    requires_kill: bool,
    extra_env: Vec<(String, String)>,
    extra_args: Vec<String>,
}

impl FakeAdapter {
    pub fn new(config: AdapterConfig) -> Arc<Self> {
        let (updates_tx, updates_rx) = mpsc::channel(64);
        Arc::new(Self {
            config,
            updates_tx,
            updates_rx: Mutex::new(Some(updates_rx)),
            handler: Mutex::new(None),
            stderr_provider: Mutex::new(None),
            stdin: Mutex::new(None),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            one_shot: false,
            requires_kill: false,
            extra_env: Vec::new(),
            extra_args: Vec::new(),
        })
    }

    /// Factory capturing every adapter it creates into `slot`.
    pub fn factory(
        slot: Arc<Mutex<Option<Arc<FakeAdapter>>>>,
        one_shot: bool,
        requires_kill: bool,
    ) -> AdapterFactory {
        Arc::new(move |config| {
            let (updates_tx, updates_rx) = mpsc::channel(64);
            let adapter = Arc::new(FakeAdapter {
                config,
                updates_tx,
                updates_rx: Mutex::new(Some(updates_rx)),
                handler: Mutex::new(None),
                stderr_provider: Mutex::new(None),
                stdin: Mutex::new(None),
                connected: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                one_shot,
                requires_kill,
                extra_env: Vec::new(),
                extra_args: Vec::new(),
            });
            *slot.lock() = Some(Arc::clone(&adapter));
            Ok(adapter)
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_stderr_provider(&self) -> bool {
        self.stderr_provider.lock().is_some()
    }

    pub fn stdin(&self) -> Option<StdinPipe> {
        self.stdin.lock().clone()
    }

    /// Push a decoded event as the vendor process would.
    pub async fn push_event(&self, event: AgentEvent) {
        let _ = self.updates_tx.send(event).await;
    }

    /// Raise a permission request through the registered handler.
    pub async fn raise_permission(&self, request: PermissionRequest) -> PermissionResponse {
        let handler = self.handler.lock().clone();
        match handler {
            Some(handler) => handler(request).await,
            None => PermissionResponse::cancelled(),
        }
    }
}

impl Adapter for FakeAdapter {
    fn connect(&self, stdin: StdinPipe, _stdout: ChildStdout) -> anyhow::Result<()> {
        *self.stdin.lock() = Some(stdin);
        self.connected.store(true, Ordering::Release);
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn prepare_environment(&self) -> Vec<(String, String)> {
        self.extra_env.clone()
    }

    fn prepare_command_args(&self) -> Vec<String> {
        self.extra_args.clone()
    }

    fn requires_process_kill(&self) -> bool {
        self.requires_kill
    }

    fn updates(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.updates_rx.lock().take()
    }

    fn set_permission_handler(&self, handler: PermissionHandler) {
        *self.handler.lock() = Some(handler);
    }

    fn session_id(&self) -> String {
        self.config.session.clone()
    }

    fn is_one_shot(&self) -> bool {
        self.one_shot
    }

    fn set_stderr_provider(&self, provider: Arc<dyn RecentStderr>) {
        *self.stderr_provider.lock() = Some(provider);
    }
}

/// Initialise a git repository with a committed identity, ready for use.
pub fn init_git_repo(dir: &std::path::Path) -> anyhow::Result<()> {
    for args in [
        &["init", "-b", "main"][..],
        &["config", "user.email", "dev@example.com"],
        &["config", "user.name", "Dev"],
    ] {
        let status = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()?;
        anyhow::ensure!(status.success(), "git {args:?} failed");
    }
    Ok(())
}

/// Run a git command in a repo, asserting success.
pub fn git_in(dir: &std::path::Path, args: &[&str]) -> anyhow::Result<String> {
    let output = std::process::Command::new("git").args(args).current_dir(dir).output()?;
    anyhow::ensure!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
