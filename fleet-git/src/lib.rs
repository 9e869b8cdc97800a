#![deny(missing_docs)]
//! # fleet-git — a creature's version-control state
//!
//! Four operations over a creature's directory: read its current commit,
//! read/write its last-known-good commit (tracked outside version control,
//! in `.sys/last-good`), and hard-reset the working tree. Every version
//! control invocation runs under a short timeout and never panics —
//! a read failure returns an empty string, matching the "pure function
//! that can't throw" contract the supervisor's rollback path depends on.
//!
//! Grounded on `codex-rs`'s `git_info.rs`: the timeout-wrapped CLI
//! shell-out pattern (`GIT_COMMAND_TIMEOUT`, one `tokio::process::Command`
//! per invocation).

use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

/// Default timeout for a single version-control CLI invocation.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(5);

const LAST_GOOD_RELATIVE_PATH: &str = ".sys/last-good";

/// A creature directory's version-control state.
pub struct GitRepo {
    dir: PathBuf,
    timeout: Duration,
}

impl GitRepo {
    /// A repo helper rooted at `dir`, using the default timeout.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_timeout(dir, DEFAULT_GIT_TIMEOUT)
    }

    /// A repo helper with an explicit per-command timeout.
    pub fn with_timeout(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            timeout,
        }
    }

    /// The working tree's current commit SHA. Empty string if it can't be
    /// determined (not a repo, command failed, timed out).
    pub async fn current_sha(&self) -> String {
        self.run_git(&["rev-parse", "HEAD"]).await.unwrap_or_default()
    }

    /// The creature's recorded last-good SHA from `.sys/last-good`.
    /// Empty string if the file doesn't exist or can't be read.
    pub async fn last_good_sha(&self) -> String {
        match tokio::fs::read_to_string(self.dir.join(LAST_GOOD_RELATIVE_PATH)).await {
            Ok(contents) => contents.trim().to_string(),
            Err(_) => String::new(),
        }
    }

    /// Persist `sha` as the creature's last-good SHA. Logs and drops the
    /// error on failure rather than propagating it — losing this write
    /// only means the next rollback decision falls back to an empty
    /// last-good, which the supervisor already treats as "always roll back".
    pub async fn set_last_good_sha(&self, sha: &str) {
        let path = self.dir.join(LAST_GOOD_RELATIVE_PATH);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(error = %e, "failed to create .sys directory for last-good sha");
                return;
            }
        }
        if let Err(e) = tokio::fs::write(&path, sha).await {
            tracing::warn!(error = %e, "failed to persist last-good sha");
        }
    }

    /// Hard-reset the working tree to `sha`. Returns whether the reset
    /// succeeded; a failure is logged, not panicked on.
    pub async fn reset_to_sha(&self, sha: &str) -> bool {
        self.run_git(&["reset", "--hard", sha]).await.is_some()
    }

    async fn run_git(&self, args: &[&str]) -> Option<String> {
        match tokio::time::timeout(self.timeout, self.spawn_git(args)).await {
            Ok(Ok(output)) if output.status.success() => {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    args = ?args,
                    stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                    "git command exited with failure"
                );
                None
            }
            Ok(Err(e)) => {
                tracing::warn!(args = ?args, error = %e, "failed to spawn git");
                None
            }
            Err(_) => {
                tracing::warn!(args = ?args, "git command timed out");
                None
            }
        }
    }

    async fn spawn_git(&self, args: &[&str]) -> std::io::Result<Output> {
        tokio::process::Command::new("git")
            .arg("-C")
            .arg(&self.dir)
            .args(args)
            .output()
            .await
    }
}
