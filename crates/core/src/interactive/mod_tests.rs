// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn runner_with_events() -> (Arc<InteractiveRunner>, mpsc::Receiver<RunnerEvent>) {
    let (tx, rx) = mpsc::channel(100);
    let config = CoreConfig::default().with_idle_timeout(Duration::ZERO);
    (InteractiveRunner::new(config, tx), rx)
}

fn request(session: &str, command: &[&str]) -> StartRequest {
    StartRequest {
        session: session.to_owned(),
        command: command.iter().map(|s| s.to_string()).collect(),
        workdir: std::env::temp_dir(),
        env: vec![],
        prompt_pattern: None,
        idle_timeout: None,
        immediate_start: false,
        user_shell: false,
        track_status: false,
    }
}

async fn collect_text(rx: &mut mpsc::Receiver<Bytes>, needle: &str) -> String {
    let mut text = String::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Some(chunk)) => {
                text.push_str(&String::from_utf8_lossy(&chunk));
                if text.contains(needle) {
                    return text;
                }
            }
            _ => panic!("never saw {needle:?} in output: {text:?}"),
        }
    }
}

#[tokio::test]
async fn lazy_start_spawns_at_first_resize_dimensions() {
    let (runner, _events) = runner_with_events();
    let info = runner
        .start(request("s1", &["sh", "-c", "stty size; cat"]))
        .await
        .unwrap();

    assert_eq!(info.status, ProcessStatus::Pending);
    assert!(!info.started);
    assert!(runner.is_process_ready_or_pending(info.id));
    assert!(!runner.is_process_running(info.id));

    let (sink_tx, mut sink_rx) = mpsc::channel(64);
    runner.set_direct_output(info.id, sink_tx).await.unwrap();

    runner.resize_by_session("s1", 100, 30).unwrap();
    assert!(runner.is_process_running(info.id));

    // `stty size` prints "rows cols" — the PTY was created at 30x100.
    collect_text(&mut sink_rx, "30 100").await;

    // Echo round-trip through the PTY.
    runner.write_stdin(info.id, b"ping\n").await.unwrap();
    collect_text(&mut sink_rx, "ping").await;

    // A second resize must not respawn.
    runner.resize_by_session("s1", 120, 40).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(runner.list("s1").len(), 1);
    assert!(runner.is_process_running(info.id));

    runner.stop(&CancellationToken::new(), info.id).await.unwrap();
    assert!(runner.get(info.id).is_none());
}

#[tokio::test]
async fn write_stdin_before_spawn_is_rejected() {
    let (runner, _events) = runner_with_events();
    let info = runner.start(request("s1", &["cat"])).await.unwrap();
    let err = runner.write_stdin(info.id, b"early").await.unwrap_err();
    assert_eq!(err, OpError::NotStarted);
}

#[tokio::test]
async fn immediate_start_uses_default_dimensions() {
    let (runner, _events) = runner_with_events();
    let mut req = request("s1", &["sh", "-c", "stty size; cat"]);
    req.immediate_start = true;
    let info = runner.start(req).await.unwrap();
    assert!(info.started);

    let (sink_tx, mut sink_rx) = mpsc::channel(64);
    runner.set_direct_output(info.id, sink_tx).await.unwrap();
    collect_text(&mut sink_rx, "40 120").await;

    runner.stop(&CancellationToken::new(), info.id).await.unwrap();
}

#[tokio::test]
async fn empty_session_or_command_rejected() {
    let (runner, _events) = runner_with_events();
    assert!(matches!(
        runner.start(request("", &["cat"])).await,
        Err(OpError::InvalidCommand(_))
    ));
    assert_eq!(
        runner.start(request("s1", &[])).await.unwrap_err(),
        OpError::EmptyCommand
    );
}

#[tokio::test]
async fn user_shell_never_takes_the_session_binding() {
    let (runner, _events) = runner_with_events();
    let agent = runner.start(request("s1", &["cat"])).await.unwrap();
    let mut shell_req = request("s1", &["cat"]);
    shell_req.user_shell = true;
    let shell = runner.start(shell_req).await.unwrap();

    let (agent_tx, mut agent_rx) = mpsc::channel(8);
    let (shell_tx, mut shell_rx) = mpsc::channel(8);
    runner.set_direct_output(agent.id, agent_tx).await.unwrap();
    runner.set_direct_output(shell.id, shell_tx).await.unwrap();

    assert!(runner.has_active_client_by_session("s1"));
    assert!(runner.has_active_client(agent.id).await);
    assert!(runner.has_active_client(shell.id).await);

    // Session-level injection reaches the agent's client, not the shell's.
    runner
        .write_to_direct_output_by_session("s1", Bytes::from_static(b"banner"))
        .await
        .unwrap();
    let chunk = agent_rx.recv().await.unwrap();
    assert_eq!(&chunk[..], b"banner");
    assert!(shell_rx.try_recv().is_err());

    // Clearing the shell's sink leaves the session binding alone.
    runner.clear_direct_output(shell.id).await.unwrap();
    assert!(runner.has_active_client_by_session("s1"));
}

#[tokio::test]
async fn session_binding_survives_process_replacement() {
    let (runner, _events) = runner_with_events();
    let first = runner.start(request("s1", &["cat"])).await.unwrap();
    let (tx, mut rx) = mpsc::channel(8);
    runner.set_direct_output(first.id, tx).await.unwrap();

    // Replacement process adopts the surviving session binding.
    let second = runner.start(request("s1", &["cat"])).await.unwrap();
    assert!(runner.has_active_client(second.id).await);

    runner
        .write_to_direct_output(second.id, Bytes::from_static(b"restarted"))
        .await
        .unwrap();
    assert_eq!(&rx.recv().await.unwrap()[..], b"restarted");
}

#[tokio::test]
async fn clean_exit_publishes_final_status_and_removes() {
    let (runner, mut events) = runner_with_events();
    let mut req = request("s1", &["sh", "-c", "true"]);
    req.immediate_start = true;
    let info = runner.start(req).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv()).await.unwrap().unwrap();
        if let RunnerEvent::Status { info: status } = event {
            if status.status.is_terminal() {
                assert_eq!(status.status, ProcessStatus::Exited);
                assert_eq!(status.exit_code, Some(0));
                break;
            }
        }
    }
    // Reaped processes leave the map.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while runner.get(info.id).is_some() {
        assert!(tokio::time::Instant::now() < deadline, "process never removed");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn prompt_pattern_fires_turn_complete() {
    let (runner, mut events) = runner_with_events();
    let mut req = request("s1", &["sh", "-c", "printf 'task done\\nREADY> '; sleep 5"]);
    req.prompt_pattern = Some("READY> $".to_owned());
    req.immediate_start = true;
    let info = runner.start(req).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv()).await.unwrap().unwrap();
        if let RunnerEvent::TurnComplete { reason, .. } = event {
            assert_eq!(reason, TurnReason::PromptMatch);
            break;
        }
    }

    runner.stop(&CancellationToken::new(), info.id).await.unwrap();
}

#[tokio::test]
async fn idle_timeout_fires_turn_complete() {
    let (tx, mut events) = mpsc::channel(100);
    let config = CoreConfig::default();
    let runner = InteractiveRunner::new(config, tx);

    let mut req = request("s1", &["sh", "-c", "echo working; sleep 10"]);
    req.idle_timeout = Some(Duration::from_millis(200));
    req.immediate_start = true;
    let info = runner.start(req).await.unwrap();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        let event = tokio::time::timeout(remaining, events.recv()).await.unwrap().unwrap();
        if let RunnerEvent::TurnComplete { reason, .. } = event {
            assert_eq!(reason, TurnReason::Idle);
            break;
        }
    }

    runner.stop(&CancellationToken::new(), info.id).await.unwrap();
}

#[tokio::test]
async fn invalid_prompt_pattern_is_ignored() {
    let (runner, _events) = runner_with_events();
    let mut req = request("s1", &["cat"]);
    req.prompt_pattern = Some("[unclosed".to_owned());
    let info = runner.start(req).await.unwrap();
    assert_eq!(info.status, ProcessStatus::Pending);
}

#[tokio::test]
async fn stop_of_unspawned_record_clears_it() {
    let (runner, _events) = runner_with_events();
    let info = runner.start(request("s1", &["cat"])).await.unwrap();
    runner.stop(&CancellationToken::new(), info.id).await.unwrap();
    assert!(runner.get(info.id).is_none());
    assert!(!runner.is_process_ready_or_pending(info.id));
}
