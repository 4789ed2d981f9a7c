// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debounced workspace observer.
//!
//! Two cooperating loops: the watch loop turns raw `notify` events into
//! pending `{path, op}` records and pokes a size-1 trigger channel; the
//! monitor loop re-arms a debounce timer on each poke and, when it fires,
//! refreshes git status and the file list and emits the coalesced batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use notify::event::ModifyKind;
use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::CoreConfig;

/// Directory names never registered for watching.
pub const SKIP_DIRS: &[&str] = &[".git", "node_modules", ".next", "dist", "build"];

/// File the git operator touches-and-removes so the watcher re-reads git
/// state even when the platform suppresses `.git` events.
pub const SENTINEL_FILE: &str = ".paddock-sync";

/// Upper bound on the refreshed file list.
const FILE_LIST_CAP: usize = 10_000;

/// Operation attributed to a pending filesystem change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Create,
    Write,
    Remove,
    Rename,
    Refresh,
}

/// One coalesced change, path relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeNotification {
    pub at: SystemTime,
    pub path: String,
    pub op: ChangeOp,
}

impl FileChangeNotification {
    /// The synthetic whole-workspace refresh.
    pub fn refresh() -> Self {
        Self { at: SystemTime::now(), path: String::new(), op: ChangeOp::Refresh }
    }
}

/// One entry of the parsed `git status` output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStatusEntry {
    pub path: String,
    /// Two-letter XY code from porcelain output ("??" for untracked).
    pub status: String,
}

/// Parsed summary of `git status --porcelain=v2 --branch`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitStatusSnapshot {
    pub branch: Option<String>,
    pub ahead: i32,
    pub behind: i32,
    pub entries: Vec<GitStatusEntry>,
}

/// Event emitted by the watcher to its workspace subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatcherEvent {
    GitStatus(GitStatusSnapshot),
    FileList(Vec<String>),
    Changes(Vec<FileChangeNotification>),
}

/// Handle for a running workspace watcher.
pub struct WorkspaceWatcher {
    stop: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkspaceWatcher {
    /// Register watches under `root` and start both loops.
    pub fn start(
        root: &Path,
        config: &CoreConfig,
        events: mpsc::Sender<WatcherEvent>,
        ctx: CancellationToken,
    ) -> anyhow::Result<Self> {
        let root = root.to_owned();
        let stop = CancellationToken::new();
        let pending: Arc<Mutex<HashMap<PathBuf, ChangeOp>>> =
            Arc::new(Mutex::new(HashMap::new()));

        let (raw_tx, raw_rx) = mpsc::channel::<notify::Event>(4096);
        let (trigger_tx, trigger_rx) = mpsc::channel::<()>(1);

        let mut watcher = notify::recommended_watcher(
            move |result: notify::Result<notify::Event>| {
                if let Ok(event) = result {
                    let _ = raw_tx.try_send(event);
                }
            },
        )?;
        register_watches(&mut watcher, &root);

        let watch = tokio::spawn(watch_loop(
            watcher,
            root.clone(),
            raw_rx,
            Arc::clone(&pending),
            trigger_tx,
            ctx.clone(),
            stop.clone(),
        ));
        let monitor = tokio::spawn(monitor_loop(
            root,
            config.clone(),
            trigger_rx,
            pending,
            events,
            ctx,
            stop.clone(),
        ));

        Ok(Self { stop, tasks: Mutex::new(vec![watch, monitor]) })
    }

    /// Stop both loops and wait for them to exit.
    pub async fn stop(&self) {
        self.stop.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            let _ = task.await;
        }
    }
}

/// Map a raw notify event kind onto a pending-change op.
///
/// Metadata-only modifications (permission bits) and access events are
/// dropped.
fn map_event_kind(kind: &EventKind) -> Option<ChangeOp> {
    match kind {
        EventKind::Create(_) => Some(ChangeOp::Create),
        EventKind::Remove(_) => Some(ChangeOp::Remove),
        EventKind::Modify(ModifyKind::Name(_)) => Some(ChangeOp::Rename),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeOp::Write),
        EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => Some(ChangeOp::Refresh),
    }
}

fn is_skipped_dir(name: &std::ffi::OsStr) -> bool {
    SKIP_DIRS.iter().any(|skip| name == std::ffi::OsStr::new(skip))
}

/// Register a non-recursive watch on `dir` and every descendant directory,
/// honoring the skip list.
fn register_watches(watcher: &mut notify::RecommendedWatcher, dir: &Path) {
    if let Err(e) = watcher.watch(dir, RecursiveMode::NonRecursive) {
        debug!(dir = %dir.display(), "watch registration failed: {e}");
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() && !is_skipped_dir(entry.file_name().as_os_str()) {
            register_watches(watcher, &path);
        }
    }
}

async fn watch_loop(
    mut watcher: notify::RecommendedWatcher,
    root: PathBuf,
    mut raw_rx: mpsc::Receiver<notify::Event>,
    pending: Arc<Mutex<HashMap<PathBuf, ChangeOp>>>,
    trigger_tx: mpsc::Sender<()>,
    ctx: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = ctx.cancelled() => break,
            _ = stop.cancelled() => break,
            event = raw_rx.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };

        let Some(op) = map_event_kind(&event.kind) else {
            continue;
        };

        let mut poke = false;
        for path in &event.paths {
            // Sentinel traffic forces a refresh cycle but never surfaces
            // as a notification of its own.
            if path.file_name().is_some_and(|n| n == SENTINEL_FILE) {
                poke = true;
                continue;
            }

            if op == ChangeOp::Create
                && path.is_dir()
                && !path.file_name().is_some_and(is_skipped_dir)
            {
                register_watches(&mut watcher, path);
            }

            let rel = path.strip_prefix(&root).unwrap_or(path).to_owned();
            pending.lock().insert(rel, op);
            poke = true;
        }

        if poke {
            // Size-1 channel: a pending trigger is already enough.
            let _ = trigger_tx.try_send(());
        }
    }
}

async fn monitor_loop(
    root: PathBuf,
    config: CoreConfig,
    mut trigger_rx: mpsc::Receiver<()>,
    pending: Arc<Mutex<HashMap<PathBuf, ChangeOp>>>,
    events: mpsc::Sender<WatcherEvent>,
    ctx: CancellationToken,
    stop: CancellationToken,
) {
    // Initial refresh so subscribers start from a known state.
    refresh_workspace(&root, &events).await;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,
            _ = stop.cancelled() => break,
            received = trigger_rx.recv() => {
                if received.is_none() {
                    break;
                }
            }
        }

        // Debounce: every further trigger re-arms the timer.
        let mut deadline = tokio::time::Instant::now() + config.debounce_window;
        loop {
            tokio::select! {
                _ = ctx.cancelled() => return,
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => break,
                received = trigger_rx.recv() => {
                    if received.is_none() {
                        break;
                    }
                    deadline = tokio::time::Instant::now() + config.debounce_window;
                }
            }
        }

        refresh_workspace(&root, &events).await;

        let drained: Vec<(PathBuf, ChangeOp)> = pending.lock().drain().collect();
        let batch = coalesce_batch(drained, config.fanout_cap);
        emit(&events, WatcherEvent::Changes(batch));
    }
}

/// Build the outgoing batch, applying the fan-out cap: an empty or
/// oversized pending set collapses into a single synthetic refresh.
fn coalesce_batch(
    drained: Vec<(PathBuf, ChangeOp)>,
    cap: usize,
) -> Vec<FileChangeNotification> {
    if drained.is_empty() || drained.len() > cap {
        return vec![FileChangeNotification::refresh()];
    }
    let at = SystemTime::now();
    drained
        .into_iter()
        .map(|(path, op)| FileChangeNotification {
            at,
            path: path.to_string_lossy().into_owned(),
            op,
        })
        .collect()
}

async fn refresh_workspace(root: &Path, events: &mpsc::Sender<WatcherEvent>) {
    let status = read_git_status(root).await;
    emit(events, WatcherEvent::GitStatus(status));

    let files = list_files(root);
    emit(events, WatcherEvent::FileList(files));
}

fn emit(events: &mpsc::Sender<WatcherEvent>, event: WatcherEvent) {
    if events.try_send(event).is_err() {
        warn!("watcher event dropped: subscriber full or closed");
    }
}

/// Run `git status --porcelain=v2 --branch` and parse the result.
///
/// A non-repository (or missing git) yields the default snapshot.
pub async fn read_git_status(root: &Path) -> GitStatusSnapshot {
    let output = tokio::process::Command::new("git")
        .args(["status", "--porcelain=v2", "--branch"])
        .current_dir(root)
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            parse_git_status(&String::from_utf8_lossy(&out.stdout))
        }
        _ => GitStatusSnapshot::default(),
    }
}

/// Parse porcelain v2 output into a snapshot.
pub fn parse_git_status(raw: &str) -> GitStatusSnapshot {
    let mut snapshot = GitStatusSnapshot::default();

    for line in raw.lines() {
        if let Some(rest) = line.strip_prefix("# branch.head ") {
            if rest != "(detached)" {
                snapshot.branch = Some(rest.to_owned());
            }
        } else if let Some(rest) = line.strip_prefix("# branch.ab ") {
            for part in rest.split_whitespace() {
                if let Some(n) = part.strip_prefix('+') {
                    snapshot.ahead = n.parse().unwrap_or(0);
                } else if let Some(n) = part.strip_prefix('-') {
                    snapshot.behind = n.parse().unwrap_or(0);
                }
            }
        } else if let Some(rest) = line.strip_prefix("1 ") {
            let xy = rest.split(' ').next().unwrap_or("").to_owned();
            if let Some(path) = rest.splitn(8, ' ').nth(7) {
                snapshot.entries.push(GitStatusEntry { path: path.to_owned(), status: xy });
            }
        } else if let Some(rest) = line.strip_prefix("2 ") {
            let xy = rest.split(' ').next().unwrap_or("").to_owned();
            // Renames carry "<new>\t<old>" in the final field.
            if let Some(paths) = rest.splitn(9, ' ').nth(8) {
                let path = paths.split('\t').next().unwrap_or(paths);
                snapshot.entries.push(GitStatusEntry { path: path.to_owned(), status: xy });
            }
        } else if let Some(path) = line.strip_prefix("? ") {
            snapshot
                .entries
                .push(GitStatusEntry { path: path.to_owned(), status: "??".to_owned() });
        } else if let Some(rest) = line.strip_prefix("u ") {
            let xy = rest.split(' ').next().unwrap_or("").to_owned();
            if let Some(path) = rest.splitn(10, ' ').nth(9) {
                snapshot.entries.push(GitStatusEntry { path: path.to_owned(), status: xy });
            }
        }
    }

    snapshot
}

/// Walk the workspace and collect relative file paths, honoring the skip
/// list and the size cap.
pub fn list_files(root: &Path) -> Vec<String> {
    let mut files = Vec::new();
    walk(root, root, &mut files);
    files.sort();
    files
}

fn walk(root: &Path, dir: &Path, files: &mut Vec<String>) {
    if files.len() >= FILE_LIST_CAP {
        return;
    }
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };
    for entry in entries.flatten() {
        if files.len() >= FILE_LIST_CAP {
            return;
        }
        let path = entry.path();
        let name = entry.file_name();
        if path.is_dir() {
            if !is_skipped_dir(name.as_os_str()) {
                walk(root, &path, files);
            }
        } else if name != SENTINEL_FILE {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            files.push(rel.to_string_lossy().into_owned());
        }
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
