// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Git operator flows against a real local remote.

use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;

use paddock::git::GitOperator;
use paddock::test_support::git_in;

struct Fixture {
    _root: tempfile::TempDir,
    /// Primary working copy the operator runs in.
    work: PathBuf,
    /// Second working copy used to push divergent history.
    other: PathBuf,
}

fn init_logs() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

fn run(dir: &Path, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .unwrap();
    assert!(status.success(), "git {args:?} failed in {}", dir.display());
}

fn configure_identity(dir: &Path) {
    run(dir, &["config", "user.email", "dev@example.com"]);
    run(dir, &["config", "user.name", "Dev"]);
}

/// Bare origin plus two clones, with one shared commit on `main`.
fn fixture() -> Fixture {
    init_logs();
    let root = tempfile::tempdir().unwrap();
    run(root.path(), &["init", "--bare", "-b", "main", "origin.git"]);

    let work = root.path().join("work");
    run(root.path(), &["clone", "origin.git", "work"]);
    configure_identity(&work);
    std::fs::write(work.join("file.txt"), "base\n").unwrap();
    run(&work, &["add", "-A"]);
    run(&work, &["commit", "-m", "base"]);
    run(&work, &["push", "-u", "origin", "main"]);

    let other = root.path().join("other");
    run(root.path(), &["clone", "origin.git", "other"]);
    configure_identity(&other);

    Fixture { _root: root, work, other }
}

/// Commit `content` into `file.txt` in the second clone and push it.
fn push_divergent_change(fixture: &Fixture, content: &str) {
    std::fs::write(fixture.other.join("file.txt"), content).unwrap();
    run(&fixture.other, &["commit", "-am", "theirs"]);
    run(&fixture.other, &["push", "origin", "main"]);
}

#[tokio::test]
async fn rebase_conflict_auto_aborts() {
    let f = fixture();
    push_divergent_change(&f, "theirs\n");
    std::fs::write(f.work.join("file.txt"), "ours\n").unwrap();
    run(&f.work, &["commit", "-am", "ours"]);

    let op = GitOperator::new(&f.work);
    let result = op.rebase("main", &CancellationToken::new()).await;

    assert!(!result.success);
    assert_eq!(result.conflict_files, vec!["file.txt"]);
    // The tree was restored: no rebase in progress, local content intact.
    assert!(!f.work.join(".git/rebase-merge").exists());
    assert!(!f.work.join(".git/rebase-apply").exists());
    assert_eq!(std::fs::read_to_string(f.work.join("file.txt")).unwrap(), "ours\n");
}

#[tokio::test]
async fn merge_conflict_is_left_for_the_human() {
    let f = fixture();
    push_divergent_change(&f, "theirs\n");
    std::fs::write(f.work.join("file.txt"), "ours\n").unwrap();
    run(&f.work, &["commit", "-am", "ours"]);

    let op = GitOperator::new(&f.work);
    let result = op.merge("main", &CancellationToken::new()).await;

    assert!(!result.success);
    assert_eq!(result.conflict_files, vec!["file.txt"]);
    // Conflicted merge stays in progress.
    assert!(f.work.join(".git/MERGE_HEAD").exists());
    let content = std::fs::read_to_string(f.work.join("file.txt")).unwrap();
    assert!(content.contains("<<<<<<<"), "no conflict markers: {content}");

    // abort("merge") restores the clean tree.
    let aborted = op.abort("merge", &CancellationToken::new()).await;
    assert!(aborted.success, "{}", aborted.error);
    assert!(!f.work.join(".git/MERGE_HEAD").exists());
}

#[tokio::test]
async fn pull_fast_forwards_new_commits() {
    let f = fixture();
    std::fs::write(f.other.join("extra.txt"), "new\n").unwrap();
    run(&f.other, &["add", "-A"]);
    run(&f.other, &["commit", "-m", "extra"]);
    run(&f.other, &["push", "origin", "main"]);

    let op = GitOperator::new(&f.work);
    let result = op.pull(false, &CancellationToken::new()).await;
    assert!(result.success, "{}", result.error);
    assert!(f.work.join("extra.txt").exists());
}

#[tokio::test]
async fn pull_rebase_conflict_restores_clean_tree() {
    let f = fixture();
    push_divergent_change(&f, "theirs\n");
    std::fs::write(f.work.join("file.txt"), "ours\n").unwrap();
    run(&f.work, &["commit", "-am", "ours"]);

    let op = GitOperator::new(&f.work);
    let result = op.pull(true, &CancellationToken::new()).await;
    assert!(!result.success);
    assert_eq!(result.conflict_files, vec!["file.txt"]);
    assert!(!f.work.join(".git/rebase-merge").exists());
}

#[tokio::test]
async fn push_publishes_local_commits() {
    let f = fixture();
    std::fs::write(f.work.join("pushed.txt"), "x\n").unwrap();
    run(&f.work, &["add", "-A"]);
    run(&f.work, &["commit", "-m", "to push"]);

    let op = GitOperator::new(&f.work);
    let result = op.push(false, false, &CancellationToken::new()).await;
    assert!(result.success, "{}", result.error);

    let log = git_in(&f.other, &["fetch", "origin", "main"])
        .and_then(|_| git_in(&f.other, &["log", "--oneline", "origin/main"]))
        .unwrap();
    assert!(log.contains("to push"));
}

#[tokio::test]
async fn push_to_new_branch_sets_upstream() {
    let f = fixture();
    run(&f.work, &["checkout", "-b", "feature/x.y_z"]);
    std::fs::write(f.work.join("feature.txt"), "f\n").unwrap();
    run(&f.work, &["add", "-A"]);
    run(&f.work, &["commit", "-m", "feature work"]);

    let op = GitOperator::new(&f.work);
    let result = op.push(false, true, &CancellationToken::new()).await;
    assert!(result.success, "{}", result.error);

    let upstream =
        git_in(&f.work, &["rev-parse", "--abbrev-ref", "@{upstream}"]).unwrap();
    assert_eq!(upstream.trim(), "origin/feature/x.y_z");
}

#[tokio::test]
async fn rebase_rejects_invalid_base_before_spawning() {
    let f = fixture();
    let op = GitOperator::new(&f.work);
    let result = op.rebase("bad..name", &CancellationToken::new()).await;
    assert!(!result.success);
    assert!(result.error.contains("invalid branch name"));
    assert!(result.output.is_empty(), "a git command ran: {}", result.output);
}
