// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::time::Duration;

fn sh(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into()]
}

fn collecting_runner() -> (Arc<BackgroundRunner>, tokio::sync::mpsc::Receiver<BackgroundEvent>) {
    let (tx, rx) = tokio::sync::mpsc::channel(64);
    let runner = Arc::new(BackgroundRunner::new(
        CoreConfig::default(),
        BackgroundSink::Stream(tx),
    ));
    (runner, rx)
}

async fn wait_terminal(
    rx: &mut tokio::sync::mpsc::Receiver<BackgroundEvent>,
) -> (ProcessStatus, Option<i32>, Vec<u8>) {
    let mut output = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .ok()
            .flatten()
            .unwrap();
        match event {
            BackgroundEvent::Output { data, .. } => output.extend_from_slice(&data),
            BackgroundEvent::Status { status, exit_code, .. } if status.is_terminal() => {
                return (status, exit_code, output);
            }
            BackgroundEvent::Status { .. } => {}
        }
    }
}

#[tokio::test]
async fn captures_output_and_exit() {
    let (runner, mut rx) = collecting_runner();
    let dir = tempfile::tempdir().unwrap();

    let info = runner
        .start("s1", ScriptKind::Custom, sh("echo setup-done"), dir.path(), &[])
        .await
        .unwrap();
    assert_eq!(info.status, ProcessStatus::Running);
    assert_eq!(info.kind, ScriptKind::Custom);

    let (status, exit_code, output) = wait_terminal(&mut rx).await;
    assert_eq!(status, ProcessStatus::Exited);
    assert_eq!(exit_code, Some(0));
    assert!(String::from_utf8_lossy(&output).contains("setup-done"));

    // Finished processes are removed from tracking.
    assert!(runner.get(info.id).is_none());
}

#[tokio::test]
async fn nonzero_exit_is_failed() {
    let (runner, mut rx) = collecting_runner();
    let dir = tempfile::tempdir().unwrap();

    runner
        .start("s1", ScriptKind::Setup, sh("exit 3"), dir.path(), &[])
        .await
        .unwrap();

    let (status, exit_code, _) = wait_terminal(&mut rx).await;
    assert_eq!(status, ProcessStatus::Failed);
    assert_eq!(exit_code, Some(3));
}

#[tokio::test]
async fn stop_all_terminates_sleepers() {
    let (runner, mut rx) = collecting_runner();
    let dir = tempfile::tempdir().unwrap();

    runner
        .start("s1", ScriptKind::DevServer, sh("sleep 30"), dir.path(), &[])
        .await
        .unwrap();
    assert_eq!(runner.list("s1").len(), 1);

    let ctx = CancellationToken::new();
    runner.stop_all(&ctx).await;

    let (status, exit_code, _) = wait_terminal(&mut rx).await;
    assert_eq!(status, ProcessStatus::Failed);
    // SIGTERM death surfaces as 128 + 15.
    assert_eq!(exit_code, Some(143));
    assert!(runner.list("").is_empty());
}

#[tokio::test]
async fn empty_command_rejected() {
    let (runner, _rx) = collecting_runner();
    let dir = tempfile::tempdir().unwrap();
    let err = runner
        .start("s1", ScriptKind::Custom, vec![], dir.path(), &[])
        .await
        .unwrap_err();
    assert_eq!(err.downcast_ref::<OpError>(), Some(&OpError::EmptyCommand));
}

#[tokio::test]
async fn scrollback_replay_from_offset() {
    let (runner, mut rx) = collecting_runner();
    let dir = tempfile::tempdir().unwrap();

    let info = runner
        .start("s1", ScriptKind::Custom, sh("printf abcdef; sleep 2"), dir.path(), &[])
        .await
        .unwrap();

    // Wait until output shows up in the stream, then read the ring.
    loop {
        match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await.ok().flatten() {
            Some(BackgroundEvent::Output { .. }) => break,
            Some(_) => {}
            None => panic!("stream closed early"),
        }
    }

    let replay = runner.read_output(info.id, 2).unwrap();
    assert_eq!(replay, b"cdef");

    runner.stop(info.id, &CancellationToken::new()).await.unwrap();
}
