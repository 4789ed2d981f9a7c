// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end harness wiring all five core components into one scratch
//! workspace, the way the hosting server does.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use paddock::background::{BackgroundEvent, BackgroundRunner, BackgroundSink};
use paddock::config::CoreConfig;
use paddock::event::AgentEvent;
use paddock::interactive::{InteractiveRunner, RunnerEvent};
use paddock::supervisor::Supervisor;
use paddock::test_support::{init_git_repo, FakeAdapter};
use paddock::watcher::WatcherEvent;

/// One fully wired session over a scratch git workspace.
pub struct Workspace {
    pub dir: tempfile::TempDir,
    pub sup: Arc<Supervisor>,
    pub adapter_slot: Arc<Mutex<Option<Arc<FakeAdapter>>>>,
    pub interactive: Arc<InteractiveRunner>,
    pub background: Arc<BackgroundRunner>,
    pub events: mpsc::Receiver<AgentEvent>,
    pub runner_events: mpsc::Receiver<RunnerEvent>,
    pub background_events: mpsc::Receiver<BackgroundEvent>,
    pub watcher_events: mpsc::Receiver<WatcherEvent>,
}

impl Workspace {
    pub fn new(session: &str) -> anyhow::Result<Self> {
        Self::with_config(session, CoreConfig::default())
    }

    pub fn with_config(session: &str, config: CoreConfig) -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        init_git_repo(dir.path())?;

        let adapter_slot = Arc::new(Mutex::new(None));
        let factory = FakeAdapter::factory(Arc::clone(&adapter_slot), false, false);

        let (runner_tx, runner_events) = mpsc::channel(256);
        let interactive = InteractiveRunner::new(config.clone(), runner_tx);

        let (bg_tx, background_events) = mpsc::channel(256);
        let background =
            Arc::new(BackgroundRunner::new(config.clone(), BackgroundSink::Stream(bg_tx)));

        let (watcher_tx, watcher_events) = mpsc::channel(256);

        let sup = Supervisor::new(
            session,
            dir.path(),
            config,
            factory,
            "fake-agent",
            vec![],
            Arc::clone(&interactive),
            Arc::clone(&background),
            watcher_tx,
        );
        let events = sup.take_events().ok_or_else(|| anyhow::anyhow!("events already taken"))?;

        Ok(Self {
            dir,
            sup,
            adapter_slot,
            interactive,
            background,
            events,
            runner_events,
            background_events,
            watcher_events,
        })
    }

    /// The adapter created by the last start.
    pub fn adapter(&self) -> Arc<FakeAdapter> {
        self.adapter_slot.lock().clone().expect("supervisor not started")
    }
}

/// Receive events until `pred` returns `Some`, panicking after `timeout`.
pub async fn wait_for<T, R>(
    rx: &mut mpsc::Receiver<T>,
    timeout: Duration,
    mut pred: impl FnMut(T) -> Option<R>,
) -> R {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed");
        if let Some(found) = pred(event) {
            return found;
        }
    }
}
