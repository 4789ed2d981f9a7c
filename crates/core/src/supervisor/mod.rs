// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Agent subprocess supervisor.
//!
//! One supervisor per session: spawns the long-lived agent subprocess,
//! connects its standard streams to the vendor adapter, forwards adapter
//! events to the bounded outbound channel, and mediates permission
//! requests between adapter and human. Also owns the session's workspace
//! watcher, git operator, optional user shell, and background scripts.

pub mod permission;
pub mod stderr;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;

use nix::sys::signal::Signal;
use parking_lot::Mutex;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter::{
    Adapter, AdapterConfig, AdapterFactory, OneShotSpec, RecentStderr, StdinPipe,
};
use crate::background::BackgroundRunner;
use crate::command::CommandSpec;
use crate::config::CoreConfig;
use crate::error::OpError;
use crate::event::{
    AgentEvent, PermissionRequest, PermissionResponse, SupervisorStatus,
};
use crate::git::GitOperator;
use crate::interactive::{InteractiveRunner, StartRequest};
use crate::unix;
use crate::watcher::{WatcherEvent, WorkspaceWatcher};

use permission::PendingPermissions;
use stderr::StderrRing;

/// Embedded helper service (e.g. the code-editor server) stopped first
/// during shutdown. Failures are logged, never propagated.
pub trait AuxService: Send + Sync {
    fn name(&self) -> &str;
    fn stop(&self) -> anyhow::Result<()>;
}

struct SupState {
    status: SupervisorStatus,
    command: Option<CommandSpec>,
    env: Vec<(String, String)>,
    approval_policy: Option<String>,
    continue_command: Option<CommandSpec>,
    auto_approve: bool,
    last_exit_code: i32,
    last_exit_error: Option<String>,
}

/// Supervisor for one session's agent subprocess.
pub struct Supervisor {
    session: String,
    workdir: PathBuf,
    config: CoreConfig,
    factory: AdapterFactory,
    agent_id: String,
    mcp_servers: Vec<String>,

    state: Mutex<SupState>,
    /// Serialises start attempts; `try_lock` failure means already running.
    start_lock: tokio::sync::Mutex<()>,
    events_tx: mpsc::Sender<AgentEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<AgentEvent>>>,
    stderr: Arc<StderrRing>,
    pending: PendingPermissions,

    adapter: Mutex<Option<Arc<dyn Adapter>>>,
    stdin: Mutex<Option<StdinPipe>>,
    child_pid: AtomicI32,
    /// Per-start token closing the readers; replaced on every start.
    stop_token: Mutex<CancellationToken>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    one_shot: AtomicBool,

    git: Arc<GitOperator>,
    interactive: Arc<InteractiveRunner>,
    background: Arc<BackgroundRunner>,
    watcher: Mutex<Option<WorkspaceWatcher>>,
    watcher_events: mpsc::Sender<WatcherEvent>,
    aux: Mutex<Option<Box<dyn AuxService>>>,
    shell_id: Mutex<Option<Uuid>>,
}

impl Supervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: impl Into<String>,
        workdir: &Path,
        config: CoreConfig,
        factory: AdapterFactory,
        agent_id: impl Into<String>,
        mcp_servers: Vec<String>,
        interactive: Arc<InteractiveRunner>,
        background: Arc<BackgroundRunner>,
        watcher_events: mpsc::Sender<WatcherEvent>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(config.event_capacity);
        let stderr = Arc::new(StderrRing::new(config.stderr_lines));

        Arc::new(Self {
            session: session.into(),
            workdir: workdir.to_owned(),
            git: Arc::new(GitOperator::new(workdir)),
            config,
            factory,
            agent_id: agent_id.into(),
            mcp_servers,
            state: Mutex::new(SupState {
                status: SupervisorStatus::Stopped,
                command: None,
                env: Vec::new(),
                approval_policy: None,
                continue_command: None,
                auto_approve: false,
                last_exit_code: -1,
                last_exit_error: None,
            }),
            start_lock: tokio::sync::Mutex::new(()),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            stderr,
            pending: PendingPermissions::new(),
            adapter: Mutex::new(None),
            stdin: Mutex::new(None),
            child_pid: AtomicI32::new(0),
            stop_token: Mutex::new(CancellationToken::new()),
            tasks: Mutex::new(Vec::new()),
            one_shot: AtomicBool::new(false),
            interactive,
            background,
            watcher: Mutex::new(None),
            watcher_events,
            aux: Mutex::new(None),
            shell_id: Mutex::new(None),
        })
    }

    // -- read-only accessors --------------------------------------------------

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn status(&self) -> SupervisorStatus {
        self.state.lock().status
    }

    pub fn git(&self) -> &Arc<GitOperator> {
        &self.git
    }

    pub fn interactive(&self) -> &Arc<InteractiveRunner> {
        &self.interactive
    }

    pub fn background(&self) -> &Arc<BackgroundRunner> {
        &self.background
    }

    pub fn recent_stderr(&self) -> Vec<String> {
        self.stderr.snapshot()
    }

    /// Interactive process records belonging to this session.
    pub fn processes(&self) -> Vec<crate::interactive::ProcessInfo> {
        self.interactive.list(&self.session)
    }

    pub fn last_exit_code(&self) -> i32 {
        self.state.lock().last_exit_code
    }

    pub fn last_exit_error(&self) -> Option<String> {
        self.state.lock().last_exit_error.clone()
    }

    pub fn watcher_running(&self) -> bool {
        self.watcher.lock().is_some()
    }

    /// The outbound event stream; yields `Some` exactly once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<AgentEvent>> {
        self.events_rx.lock().take()
    }

    pub fn set_aux_service(&self, aux: Box<dyn AuxService>) {
        *self.aux.lock() = Some(aux);
    }

    pub fn set_auto_approve(&self, on: bool) {
        self.state.lock().auto_approve = on;
    }

    // -- configuration --------------------------------------------------------

    /// Record the agent command and launch parameters.
    ///
    /// Rejected while a start is live; the recorded command keeps both the
    /// argv list and a flattened display string.
    pub fn configure(
        &self,
        command: &str,
        env: Vec<(String, String)>,
        approval_policy: Option<String>,
        continue_command: Option<&str>,
    ) -> Result<(), OpError> {
        let spec = CommandSpec::parse(command)?;
        let continue_spec = continue_command.map(CommandSpec::parse).transpose()?;

        let mut state = self.state.lock();
        if state.status.is_live() {
            return Err(OpError::InvalidState(format!("configure while {}", state.status)));
        }
        state.command = Some(spec);
        state.env = env;
        state.approval_policy = approval_policy;
        state.continue_command = continue_spec;
        Ok(())
    }

    // -- lifecycle ------------------------------------------------------------

    /// Start the agent subprocess (or the one-shot plumbing) plus the
    /// workspace watcher and optional user shell.
    pub async fn start(self: &Arc<Self>, ctx: &CancellationToken) -> anyhow::Result<()> {
        let Ok(_guard) = self.start_lock.try_lock() else {
            return Err(OpError::AlreadyRunning.into());
        };

        let (command, env, approval_policy, auto_approve, continue_command) = {
            let state = self.state.lock();
            if state.status.is_live() {
                return Err(OpError::AlreadyRunning.into());
            }
            let command = state.command.clone().ok_or(OpError::EmptyCommand)?;
            (
                command,
                state.env.clone(),
                state.approval_policy.clone(),
                state.auto_approve,
                state.continue_command.clone(),
            )
        };

        self.set_status(SupervisorStatus::Starting);
        self.stderr.clear();
        let stop_token = CancellationToken::new();
        *self.stop_token.lock() = stop_token.clone();

        let result = self
            .start_inner(ctx, &stop_token, command, env, approval_policy, auto_approve, continue_command)
            .await;
        if result.is_err() {
            // A failed attempt must not leave a live watcher behind.
            let watcher = self.watcher.lock().take();
            if let Some(watcher) = watcher {
                watcher.stop().await;
            }
            stop_token.cancel();
            self.set_status(SupervisorStatus::Error);
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_inner(
        self: &Arc<Self>,
        _ctx: &CancellationToken,
        stop_token: &CancellationToken,
        command: CommandSpec,
        env: Vec<(String, String)>,
        approval_policy: Option<String>,
        auto_approve: bool,
        continue_command: Option<CommandSpec>,
    ) -> anyhow::Result<()> {
        let one_shot_spec = continue_command.map(|cont| OneShotSpec {
            initial_args: command.argv.clone(),
            continue_args: cont.argv,
        });

        let adapter_config = AdapterConfig {
            session: self.session.clone(),
            workdir: self.workdir.clone(),
            auto_approve,
            approval_policy,
            mcp_servers: self.mcp_servers.clone(),
            agent_id: self.agent_id.clone(),
            one_shot: one_shot_spec,
        };
        let adapter = (self.factory)(adapter_config)?;

        adapter.set_stderr_provider(Arc::clone(&self.stderr) as Arc<dyn RecentStderr>);
        let handler_sup = Arc::clone(self);
        let handler_ctx = stop_token.clone();
        adapter.set_permission_handler(Arc::new(move |request| {
            let sup = Arc::clone(&handler_sup);
            let ctx = handler_ctx.clone();
            Box::pin(async move { sup.handle_permission(request, &ctx).await })
        }));

        let watcher = WorkspaceWatcher::start(
            &self.workdir,
            &self.config,
            self.watcher_events.clone(),
            stop_token.clone(),
        )?;
        *self.watcher.lock() = Some(watcher);

        self.start_shell().await;

        let one_shot = adapter.is_one_shot();
        self.one_shot.store(one_shot, Ordering::Release);
        if one_shot {
            // The adapter spawns per prompt; only the forwarder runs here.
            if let Some(updates) = adapter.updates() {
                let task = tokio::spawn(forward_events(
                    Arc::clone(self),
                    updates,
                    stop_token.clone(),
                ));
                self.tasks.lock().push(task);
            }
            *self.adapter.lock() = Some(adapter);
            self.set_status(SupervisorStatus::Running);
            info!(session = %self.session, "supervisor started (one-shot adapter)");
            return Ok(());
        }

        // Long-lived subprocess: compose env and argv, pipes before spawn.
        let mut merged_env = env;
        merged_env.extend(adapter.prepare_environment());

        let mut argv = command.argv.clone();
        argv.extend(adapter.prepare_command_args());

        let mut cmd = Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.workdir)
            .envs(merged_env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unix::own_process_group(&mut cmd);

        let mut child =
            cmd.spawn().map_err(|e| anyhow::anyhow!("spawn {}: {e}", command.display))?;
        self.child_pid.store(child.id().map(|id| id as i32).unwrap_or(0), Ordering::Release);

        let stdin = child
            .stdin
            .take()
            .map(StdinPipe::new)
            .ok_or_else(|| anyhow::anyhow!("agent stdin pipe missing"))?;
        let stdout =
            child.stdout.take().ok_or_else(|| anyhow::anyhow!("agent stdout pipe missing"))?;
        let child_stderr =
            child.stderr.take().ok_or_else(|| anyhow::anyhow!("agent stderr pipe missing"))?;

        if let Err(e) = adapter.connect(stdin.clone(), stdout) {
            unix::signal_group(self.child_pid.load(Ordering::Acquire), Signal::SIGKILL);
            let _ = child.wait().await;
            return Err(e.context("adapter connect"));
        }
        *self.stdin.lock() = Some(stdin);

        let mut tasks = Vec::new();
        let stderr_task = tokio::spawn(stderr::read_stderr(
            child_stderr,
            Arc::clone(&self.stderr),
            stop_token.clone(),
        ));
        tasks.push(tokio::spawn(wait_for_exit(
            Arc::clone(self),
            child,
            stderr_task,
            stop_token.clone(),
        )));
        if let Some(updates) = adapter.updates() {
            tasks.push(tokio::spawn(forward_events(
                Arc::clone(self),
                updates,
                stop_token.clone(),
            )));
        }
        self.tasks.lock().extend(tasks);
        *self.adapter.lock() = Some(adapter);

        self.set_status(SupervisorStatus::Running);
        info!(session = %self.session, command = %command.display, "supervisor started");
        Ok(())
    }

    async fn start_shell(self: &Arc<Self>) {
        let Some(shell) = self.config.shell_command.clone() else {
            return;
        };
        let request = StartRequest {
            session: self.session.clone(),
            command: shell,
            workdir: self.workdir.clone(),
            env: Vec::new(),
            prompt_pattern: None,
            idle_timeout: Some(std::time::Duration::ZERO),
            immediate_start: false,
            user_shell: true,
            track_status: false,
        };
        match self.interactive.start(request).await {
            Ok(info) => *self.shell_id.lock() = Some(info.id),
            Err(e) => warn!(session = %self.session, "user shell start failed: {e}"),
        }
    }

    /// Stop everything this supervisor owns. Idempotent; the exact order is
    /// part of the contract.
    pub async fn stop(&self, ctx: &CancellationToken) -> anyhow::Result<()> {
        {
            let mut state = self.state.lock();
            if state.status == SupervisorStatus::Stopped {
                return Ok(());
            }
            state.status = SupervisorStatus::Stopping;
        }
        self.try_emit(AgentEvent::Status {
            session_id: self.session.clone(),
            status: SupervisorStatus::Stopping,
        });

        // 1. Embedded shell, aux service, background processes.
        let shell_id = self.shell_id.lock().take();
        if let Some(id) = shell_id {
            if let Err(e) = self.interactive.stop(ctx, id).await {
                debug!(session = %self.session, "shell stop skipped: {e}");
            }
        }
        let aux = self.aux.lock().take();
        if let Some(aux) = aux {
            if let Err(e) = aux.stop() {
                warn!(service = aux.name(), "aux service stop failed: {e}");
            }
        }
        self.background.stop_all(ctx).await;

        // 2. Workspace watcher.
        let watcher = self.watcher.lock().take();
        if let Some(watcher) = watcher {
            watcher.stop().await;
        }

        // 3. Adapter.
        let adapter = self.adapter.lock().take();
        if let Some(ref adapter) = adapter {
            adapter.close();
        }

        // 4. Signal the readers.
        let stop_token = self.stop_token.lock().clone();
        stop_token.cancel();

        // 5. EOF to the agent.
        let stdin = self.stdin.lock().take();
        if let Some(stdin) = stdin {
            stdin.close().await;
        }

        // 6. Agents that ignore EOF get their whole group killed.
        let pid = self.child_pid.load(Ordering::Acquire);
        let requires_kill = adapter.map(|a| a.requires_process_kill()).unwrap_or(false);
        if requires_kill && pid != 0 {
            unix::signal_group(pid, Signal::SIGKILL);
        }

        // 7. Wait for the readers and the exit waiter; force-kill on ctx
        //    expiry.
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        let join_all = async move {
            for task in tasks {
                let _ = task.await;
            }
        };
        tokio::select! {
            _ = join_all => {}
            _ = ctx.cancelled() => {
                if pid != 0 {
                    unix::signal_group(pid, Signal::SIGKILL);
                }
            }
        }

        self.child_pid.store(0, Ordering::Release);
        self.set_status(SupervisorStatus::Stopped);
        info!(session = %self.session, "supervisor stopped");
        Ok(())
    }

    /// Pause event interpretation without touching the subprocess.
    pub fn pause(&self) -> Result<(), OpError> {
        let mut state = self.state.lock();
        if state.status != SupervisorStatus::Running {
            return Err(OpError::InvalidState(format!("pause while {}", state.status)));
        }
        state.status = SupervisorStatus::Paused;
        Ok(())
    }

    pub fn resume(&self) -> Result<(), OpError> {
        let mut state = self.state.lock();
        if state.status != SupervisorStatus::Paused {
            return Err(OpError::InvalidState(format!("resume while {}", state.status)));
        }
        state.status = SupervisorStatus::Running;
        Ok(())
    }

    // -- permissions ----------------------------------------------------------

    /// Deliver a human response to a pending permission. Non-blocking.
    pub fn respond_to_permission(
        &self,
        pending_id: &str,
        option_id: Option<String>,
        cancelled: bool,
    ) -> Result<(), OpError> {
        let response = if cancelled {
            PermissionResponse::cancelled()
        } else {
            PermissionResponse { option_id, cancelled: false }
        };
        self.pending.respond(pending_id, response)
    }

    /// Adapter-facing rendezvous: publish the request, await the human.
    pub(crate) async fn handle_permission(
        self: &Arc<Self>,
        request: PermissionRequest,
        ctx: &CancellationToken,
    ) -> PermissionResponse {
        let pending_id = request
            .pending_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| permission::mint_id(&self.session, &request.tool_call_id));

        if self.state.lock().auto_approve {
            let choice = request
                .options
                .iter()
                .find(|o| o.kind.is_allow())
                .or_else(|| request.options.first());
            return match choice {
                Some(option) => PermissionResponse::selected(option.id.clone()),
                None => PermissionResponse::cancelled(),
            };
        }

        let mut rx = self.pending.register(&pending_id);

        let event = AgentEvent::PermissionRequest {
            session_id: self.session.clone(),
            pending_id: pending_id.clone(),
            tool_call_id: Some(request.tool_call_id.clone()),
            title: request.title.clone(),
            options: request.options.clone(),
            action_type: request.action_type.clone(),
            action_details: request.action_details.clone(),
        };

        // The single blocking send in the core: the agent is suspended on
        // this answer, so the event must not be silently dropped — but it
        // must not hang forever either.
        if self
            .events_tx
            .send_timeout(event, self.config.permission_publish_timeout)
            .await
            .is_err()
        {
            self.pending.remove(&pending_id);
            warn!(pending_id = %pending_id, "permission request publish timed out; auto-cancelling");
            return PermissionResponse::cancelled();
        }

        tokio::select! {
            response = rx.recv() => {
                self.pending.remove(&pending_id);
                response.unwrap_or_else(PermissionResponse::cancelled)
            }
            _ = ctx.cancelled() => {
                self.pending.remove(&pending_id);
                let _ = self.events_tx.try_send(AgentEvent::PermissionCancelled {
                    session_id: self.session.clone(),
                    pending_id,
                });
                PermissionResponse::cancelled()
            }
        }
    }

    // -- internals ------------------------------------------------------------

    fn set_status(&self, status: SupervisorStatus) {
        self.state.lock().status = status;
        self.try_emit(AgentEvent::Status { session_id: self.session.clone(), status });
    }

    pub(crate) fn try_emit(&self, event: AgentEvent) {
        if self.events_tx.try_send(event).is_err() {
            warn!(session = %self.session, "agent event dropped: channel full or closed");
        }
    }
}

/// Reap the agent subprocess. An exit during normal operation is reported
/// once via an `Error` event carrying the recent stderr; a supervisor-driven
/// shutdown stays quiet.
async fn wait_for_exit(
    sup: Arc<Supervisor>,
    mut child: Child,
    stderr_task: JoinHandle<()>,
    stop: CancellationToken,
) {
    let status = child.wait().await;
    // The pipe closed with the child; let the reader drain its final lines.
    let _ = stderr_task.await;
    let exit_code = match &status {
        Ok(s) => unix::exit_code_of(s),
        Err(_) => -1,
    };

    sup.state.lock().last_exit_code = exit_code;

    if stop.is_cancelled() {
        return;
    }

    let mut message = format!("agent exited with code {exit_code}");
    if exit_code != 0 {
        let recent = sup.stderr.joined();
        if !recent.is_empty() {
            message = format!("{message}: {recent}");
        }
    }
    sup.state.lock().last_exit_error = Some(message.clone());

    sup.try_emit(AgentEvent::Error { session_id: sup.session.clone(), error: message });
    sup.set_status(SupervisorStatus::Stopped);
}

/// Move adapter events onto the outbound channel.
async fn forward_events(
    sup: Arc<Supervisor>,
    mut updates: mpsc::Receiver<AgentEvent>,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            event = updates.recv() => match event {
                Some(event) => sup.try_emit(event),
                None => break,
            },
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
