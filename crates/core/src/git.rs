// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Serialised version-control operations with structured results.
//!
//! Failures are carried in [`GitOperationResult`] values, never as `Err`:
//! the transport shows the operator-level message alongside the command's
//! combined output. Only one operation runs per working directory at a
//! time, and every operation pokes the workspace sentinel on completion so
//! the watcher re-reads git state.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::OpError;
use crate::unix;
use crate::watcher::SENTINEL_FILE;

/// External CLI used for pull-request creation.
const PR_CLI: &str = "gh";

/// Outcome of one version-control operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GitOperationResult {
    pub operation: String,
    pub success: bool,
    /// Combined stdout+stderr of the underlying commands.
    pub output: String,
    /// Operator-level failure text; empty on success.
    pub error: String,
    pub conflict_files: Vec<String>,
    /// URL extracted from the PR CLI, when the operation creates one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
}

impl GitOperationResult {
    fn ok(operation: &str, output: String) -> Self {
        Self {
            operation: operation.to_owned(),
            success: true,
            output,
            error: String::new(),
            conflict_files: Vec::new(),
            pr_url: None,
        }
    }

    fn fail(operation: &str, error: impl Into<String>, output: String) -> Self {
        Self {
            operation: operation.to_owned(),
            success: false,
            output,
            error: error.into(),
            conflict_files: Vec::new(),
            pr_url: None,
        }
    }

    fn with_conflicts(mut self, conflicts: Vec<String>) -> Self {
        self.conflict_files = conflicts;
        self
    }
}

/// Validate a branch name against the accepted grammar.
///
/// Accepts `^[A-Za-z0-9][A-Za-z0-9._/-]{0,254}$` minus any name containing
/// `..` or ending in `.lock`.
pub fn validate_branch_name(name: &str) -> Result<(), OpError> {
    static BRANCH_RE: OnceLock<Regex> = OnceLock::new();
    let re = BRANCH_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._/-]*$").unwrap();
        re
    });

    if name.is_empty()
        || name.len() > 255
        || !re.is_match(name)
        || name.contains("..")
        || name.ends_with(".lock")
    {
        return Err(OpError::InvalidBranchName(name.to_owned()));
    }
    Ok(())
}

/// Extract conflicted paths from merge/rebase output.
pub fn parse_conflicts(output: &str) -> Vec<String> {
    static CONFLICT_RE: OnceLock<Regex> = OnceLock::new();
    let re = CONFLICT_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"(?m)^CONFLICT \([^)]*\): Merge conflict in (.+)$").unwrap();
        re
    });
    re.captures_iter(output).map(|c| c[1].trim().to_owned()).collect()
}

/// Extract the first URL from PR CLI stdout.
pub fn parse_pr_url(stdout: &str) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        let re = Regex::new(r"https://\S+").unwrap();
        re
    });
    re.find(stdout).map(|m| m.as_str().to_owned())
}

struct CmdOutput {
    code: i32,
    stdout: String,
    combined: String,
}

impl CmdOutput {
    fn success(&self) -> bool {
        self.code == 0
    }
}

/// Mutually exclusive git operations for one working directory.
pub struct GitOperator {
    workdir: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl GitOperator {
    pub fn new(workdir: &Path) -> Self {
        Self { workdir: workdir.to_owned(), lock: tokio::sync::Mutex::new(()) }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Fetch and integrate the current branch from origin.
    pub async fn pull(&self, rebase: bool, ctx: &CancellationToken) -> GitOperationResult {
        let op = "pull";
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.pull_inner(op, rebase, ctx).await;
        self.trigger_sentinel();
        result
    }

    async fn pull_inner(
        &self,
        op: &str,
        rebase: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let branch = match self.current_branch(ctx).await {
            Ok(branch) => branch,
            Err(detail) => return GitOperationResult::fail(op, detail, String::new()),
        };

        let fetch = self.git(&["fetch", "origin", &branch], ctx).await;
        if !fetch.success() {
            return GitOperationResult::fail(op, "fetch failed", fetch.combined);
        }

        let upstream = format!("origin/{branch}");
        let integrate = if rebase {
            self.git(&["rebase", &upstream], ctx).await
        } else {
            self.git(&["merge", &upstream], ctx).await
        };

        if integrate.success() {
            return GitOperationResult::ok(op, join_output(fetch.combined, integrate.combined));
        }

        let conflicts = parse_conflicts(&integrate.combined);
        if rebase {
            // Restore a clean tree; a conflicted rebase is never left behind.
            let _ = self.git(&["rebase", "--abort"], ctx).await;
        }
        GitOperationResult::fail(op, "pull failed", join_output(fetch.combined, integrate.combined))
            .with_conflicts(conflicts)
    }

    /// Push the current branch to origin.
    pub async fn push(
        &self,
        force: bool,
        set_upstream: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let op = "push";
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.push_inner(op, force, set_upstream, ctx).await;
        self.trigger_sentinel();
        result
    }

    async fn push_inner(
        &self,
        op: &str,
        force: bool,
        set_upstream: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let branch = match self.current_branch(ctx).await {
            Ok(branch) => branch,
            Err(detail) => return GitOperationResult::fail(op, detail, String::new()),
        };

        let mut args = vec!["push"];
        if force {
            args.push("--force-with-lease");
        }
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push("origin");
        args.push(&branch);

        let push = self.git(&args, ctx).await;
        if push.success() {
            GitOperationResult::ok(op, push.combined)
        } else {
            GitOperationResult::fail(op, "push failed", push.combined)
        }
    }

    /// Rebase the current branch onto `origin/<base>`, aborting on conflict.
    pub async fn rebase(&self, base: &str, ctx: &CancellationToken) -> GitOperationResult {
        let op = "rebase";
        if let Err(e) = validate_branch_name(base) {
            return GitOperationResult::fail(op, e.to_string(), String::new());
        }
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.integrate_base(op, base, true, ctx).await;
        self.trigger_sentinel();
        result
    }

    /// Merge `origin/<base>` into the current branch, leaving conflicts in
    /// the tree for the human to resolve.
    pub async fn merge(&self, base: &str, ctx: &CancellationToken) -> GitOperationResult {
        let op = "merge";
        if let Err(e) = validate_branch_name(base) {
            return GitOperationResult::fail(op, e.to_string(), String::new());
        }
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.integrate_base(op, base, false, ctx).await;
        self.trigger_sentinel();
        result
    }

    async fn integrate_base(
        &self,
        op: &str,
        base: &str,
        rebase: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let fetch = self.git(&["fetch", "origin", base], ctx).await;
        if !fetch.success() {
            return GitOperationResult::fail(op, "fetch failed", fetch.combined);
        }

        let upstream = format!("origin/{base}");
        let integrate = if rebase {
            self.git(&["rebase", &upstream], ctx).await
        } else {
            self.git(&["merge", &upstream], ctx).await
        };

        if integrate.success() {
            return GitOperationResult::ok(op, join_output(fetch.combined, integrate.combined));
        }

        let conflicts = parse_conflicts(&integrate.combined);
        if rebase {
            let _ = self.git(&["rebase", "--abort"], ctx).await;
        }
        GitOperationResult::fail(
            op,
            format!("{op} failed"),
            join_output(fetch.combined, integrate.combined),
        )
        .with_conflicts(conflicts)
    }

    /// Commit staged (or all) changes; a clean tree is an error before any
    /// `git commit` is spawned.
    pub async fn commit(
        &self,
        message: &str,
        stage_all: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let op = "commit";
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.commit_inner(op, message, stage_all, ctx).await;
        self.trigger_sentinel();
        result
    }

    async fn commit_inner(
        &self,
        op: &str,
        message: &str,
        stage_all: bool,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let status = self.git(&["status", "--porcelain"], ctx).await;
        if !status.success() {
            return GitOperationResult::fail(op, "status failed", status.combined);
        }
        if status.stdout.trim().is_empty() {
            return GitOperationResult::fail(op, "no changes to commit", String::new());
        }

        if stage_all {
            let add = self.git(&["add", "-A"], ctx).await;
            if !add.success() {
                return GitOperationResult::fail(op, "stage failed", add.combined);
            }
        }

        let commit = self.git(&["commit", "-m", message], ctx).await;
        if commit.success() {
            GitOperationResult::ok(op, commit.combined)
        } else {
            GitOperationResult::fail(op, "commit failed", commit.combined)
        }
    }

    /// Stage everything (empty list) or the given paths.
    pub async fn stage(&self, paths: &[String], ctx: &CancellationToken) -> GitOperationResult {
        let op = "stage";
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };

        let result = if paths.is_empty() {
            self.git(&["add", "-A"], ctx).await
        } else {
            let mut args = vec!["add", "--"];
            args.extend(paths.iter().map(String::as_str));
            self.git(&args, ctx).await
        };

        self.trigger_sentinel();
        if result.success() {
            GitOperationResult::ok(op, result.combined)
        } else {
            GitOperationResult::fail(op, "stage failed", result.combined)
        }
    }

    /// Abort an in-progress merge or rebase.
    pub async fn abort(&self, kind: &str, ctx: &CancellationToken) -> GitOperationResult {
        let op = "abort";
        if kind != "merge" && kind != "rebase" {
            return GitOperationResult::fail(
                op,
                OpError::UnknownAbortKind(kind.to_owned()).to_string(),
                String::new(),
            );
        }
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };

        let result = self.git(&[kind, "--abort"], ctx).await;
        self.trigger_sentinel();
        if result.success() {
            GitOperationResult::ok(op, result.combined)
        } else {
            GitOperationResult::fail(op, format!("{kind} abort failed"), result.combined)
        }
    }

    /// Push the current branch with upstream, then create a pull request
    /// through the external PR CLI.
    pub async fn create_pr(
        &self,
        title: &str,
        body: &str,
        base: &str,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let op = "create_pr";
        let Ok(_guard) = self.lock.try_lock() else {
            return GitOperationResult::fail(op, OpError::OperationInProgress.to_string(), String::new());
        };
        let result = self.create_pr_inner(op, title, body, base, ctx).await;
        self.trigger_sentinel();
        result
    }

    async fn create_pr_inner(
        &self,
        op: &str,
        title: &str,
        body: &str,
        base: &str,
        ctx: &CancellationToken,
    ) -> GitOperationResult {
        let branch = match self.current_branch(ctx).await {
            Ok(branch) => branch,
            Err(detail) => return GitOperationResult::fail(op, detail, String::new()),
        };

        let push = self.git(&["push", "--set-upstream", "origin", &branch], ctx).await;
        if !push.success() {
            return GitOperationResult::fail(op, "push failed", push.combined);
        }

        let base = base.strip_prefix("origin/").unwrap_or(base);
        let mut cmd = Command::new(PR_CLI);
        cmd.args(["pr", "create", "--title", title, "--body", body])
            .current_dir(&self.workdir)
            // The PR CLI must see the repository the normal way; an
            // inherited GIT_DIR would point it somewhere else entirely.
            .env_remove("GIT_DIR")
            .env_remove("GIT_WORK_TREE");
        if !base.is_empty() {
            cmd.args(["--base", base]);
        }

        let result = run_command(cmd, ctx).await;
        match result {
            Ok(out) if out.success() => {
                let url = parse_pr_url(&out.stdout);
                let mut result = GitOperationResult::ok(op, out.combined);
                result.pr_url = url;
                result
            }
            Ok(out) => GitOperationResult::fail(op, "pr creation failed", out.combined),
            Err(e) => GitOperationResult::fail(op, format!("pr cli unavailable: {e}"), String::new()),
        }
    }

    async fn current_branch(&self, ctx: &CancellationToken) -> Result<String, String> {
        let out = self.git(&["rev-parse", "--abbrev-ref", "HEAD"], ctx).await;
        if !out.success() {
            return Err(format!("cannot resolve current branch: {}", out.combined.trim()));
        }
        let branch = out.stdout.trim().to_owned();
        if branch.is_empty() || branch == "HEAD" {
            return Err("detached HEAD".to_owned());
        }
        Ok(branch)
    }

    async fn git(&self, args: &[&str], ctx: &CancellationToken) -> CmdOutput {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        match run_command(cmd, ctx).await {
            Ok(out) => out,
            Err(e) => CmdOutput { code: -1, stdout: String::new(), combined: e.to_string() },
        }
    }

    /// Touch-and-remove the sentinel so the watcher re-reads git state.
    fn trigger_sentinel(&self) {
        let path = self.workdir.join(SENTINEL_FILE);
        let _ = std::fs::write(&path, b"");
        let _ = std::fs::remove_file(&path);
    }
}

fn join_output(a: String, b: String) -> String {
    if a.trim().is_empty() {
        b
    } else if b.trim().is_empty() {
        a
    } else {
        format!("{a}\n{b}")
    }
}

/// Run a command with piped output, killing it on context cancellation.
///
/// Stderr is pumped line-by-line to the debug log while also being captured
/// for the combined output.
async fn run_command(mut cmd: Command, ctx: &CancellationToken) -> anyhow::Result<CmdOutput> {
    cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped());
    unix::own_process_group(&mut cmd);

    let mut child = cmd.spawn()?;

    let stdout_pipe = child.stdout.take();
    let stderr_pipe = child.stderr.take();

    let stdout_task = tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = stdout_pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    });
    let stderr_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        if let Some(pipe) = stderr_pipe {
            let mut reader = BufReader::new(pipe).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                debug!(target: "paddock::git", "{line}");
                lines.push(line);
            }
        }
        lines.join("\n")
    });

    let status = tokio::select! {
        status = child.wait() => status?,
        _ = ctx.cancelled() => {
            let _ = child.start_kill();
            child.wait().await?
        }
    };

    let stdout = String::from_utf8_lossy(&stdout_task.await.unwrap_or_default()).into_owned();
    let stderr = stderr_task.await.unwrap_or_default();

    Ok(CmdOutput {
        code: unix::exit_code_of(&status),
        combined: join_output(stdout.clone(), stderr),
        stdout,
    })
}

#[cfg(test)]
#[path = "git_tests.rs"]
mod tests;
