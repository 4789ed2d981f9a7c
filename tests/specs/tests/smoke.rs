// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Whole-core smoke tests: supervisor, watcher, git operator, interactive
//! and background runners cooperating over one workspace.

use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

use paddock::background::{BackgroundEvent, ScriptKind};
use paddock::event::{AgentEvent, ProcessStatus, SupervisorStatus};
use paddock::interactive::StartRequest;
use paddock::watcher::WatcherEvent;

use paddock_specs::{wait_for, Workspace};

const TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::test]
async fn supervisor_session_round_trip() {
    let mut ws = Workspace::new("smoke-1").unwrap();

    ws.sup.configure("cat", vec![], None, None).unwrap();
    ws.sup.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(ws.sup.status(), SupervisorStatus::Running);
    assert!(ws.adapter().is_connected());

    wait_for(&mut ws.events, TIMEOUT, |event| match event {
        AgentEvent::Status { status: SupervisorStatus::Running, .. } => Some(()),
        _ => None,
    })
    .await;

    ws.sup.stop(&CancellationToken::new()).await.unwrap();
    assert_eq!(ws.sup.status(), SupervisorStatus::Stopped);
    assert!(ws.adapter().is_closed());
}

#[tokio::test]
async fn git_operations_wake_the_watcher() {
    let mut ws = Workspace::new("smoke-2").unwrap();
    ws.sup.configure("cat", vec![], None, None).unwrap();
    ws.sup.start(&CancellationToken::new()).await.unwrap();

    // Drain the initial refresh.
    wait_for(&mut ws.watcher_events, TIMEOUT, |event| match event {
        WatcherEvent::FileList(_) => Some(()),
        _ => None,
    })
    .await;

    // A commit through the operator touches the sentinel, which must force
    // a git-status refresh even without any tracked-file events.
    std::fs::write(ws.dir.path().join("committed.txt"), "data\n").unwrap();
    let result = ws.sup.git().commit("smoke commit", true, &CancellationToken::new()).await;
    assert!(result.success, "{}", result.error);

    wait_for(&mut ws.watcher_events, TIMEOUT, |event| match event {
        WatcherEvent::GitStatus(snapshot) if snapshot.branch.as_deref() == Some("main") => {
            Some(())
        }
        _ => None,
    })
    .await;

    ws.sup.stop(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn passthrough_echo_alongside_supervisor() {
    let mut ws = Workspace::new("smoke-3").unwrap();
    ws.sup.configure("cat", vec![], None, None).unwrap();
    ws.sup.start(&CancellationToken::new()).await.unwrap();

    let info = ws
        .interactive
        .start(StartRequest {
            session: "smoke-3".into(),
            command: vec!["cat".into()],
            workdir: ws.dir.path().to_owned(),
            env: vec![],
            prompt_pattern: None,
            idle_timeout: Some(Duration::ZERO),
            immediate_start: false,
            user_shell: false,
            track_status: false,
        })
        .await
        .unwrap();
    assert_eq!(info.status, ProcessStatus::Pending);

    let (sink_tx, mut sink_rx) = tokio::sync::mpsc::channel::<Bytes>(64);
    ws.interactive.set_direct_output(info.id, sink_tx).await.unwrap();
    ws.interactive.resize_by_session("smoke-3", 80, 24).unwrap();

    ws.interactive.write_stdin(info.id, b"round-trip\n").await.unwrap();
    let mut seen = String::new();
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !seen.contains("round-trip") {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let chunk = tokio::time::timeout(remaining, sink_rx.recv())
            .await
            .expect("no echo before timeout")
            .expect("sink closed");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }

    ws.sup.stop(&CancellationToken::new()).await.unwrap();
    ws.interactive.stop_all(&CancellationToken::new()).await;
}

#[tokio::test]
async fn background_script_reports_through_the_stream() {
    let mut ws = Workspace::new("smoke-4").unwrap();

    ws.background
        .start(
            "smoke-4",
            ScriptKind::Setup,
            vec!["sh".into(), "-c".into(), "echo ready".into()],
            ws.dir.path(),
            &[],
        )
        .await
        .unwrap();

    let exit_code = wait_for(&mut ws.background_events, TIMEOUT, |event| match event {
        BackgroundEvent::Status { status, exit_code, .. } if status.is_terminal() => {
            Some(exit_code)
        }
        _ => None,
    })
    .await;
    assert_eq!(exit_code, Some(0));
}

#[tokio::test]
async fn permission_flow_end_to_end() {
    let mut ws = Workspace::new("smoke-5").unwrap();
    ws.sup.configure("cat", vec![], None, None).unwrap();
    ws.sup.start(&CancellationToken::new()).await.unwrap();

    let adapter = ws.adapter();
    let raise = tokio::spawn(async move {
        adapter
            .raise_permission(paddock::event::PermissionRequest {
                pending_id: None,
                tool_call_id: "tc-9".into(),
                title: "Write file?".into(),
                options: vec![paddock::event::PermissionOption {
                    id: "yes".into(),
                    label: "Allow".into(),
                    kind: paddock::event::PermissionOptionKind::AllowOnce,
                }],
                action_type: None,
                action_details: None,
            })
            .await
    });

    let pending_id = wait_for(&mut ws.events, TIMEOUT, |event| match event {
        AgentEvent::PermissionRequest { pending_id, .. } => Some(pending_id),
        _ => None,
    })
    .await;

    ws.sup.respond_to_permission(&pending_id, Some("yes".into()), false).unwrap();
    let response = raise.await.unwrap();
    assert_eq!(response.option_id.as_deref(), Some("yes"));

    ws.sup.stop(&CancellationToken::new()).await.unwrap();
}
