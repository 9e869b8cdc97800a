//! Minimal on-disk scaffold for a freshly spawned creature.
//!
//! The creature template/genome content itself is an external
//! collaborator's concern (§1 Non-goals); this module only lays out the
//! directory shape `spec.md` §6.1 requires so `fleet-git` and
//! `fleet-events` have somewhere to write, and records `{genome, purpose,
//! model}` so a restarted `fleetd` can rediscover the creature without
//! re-running `POST /creatures`.
//!
//! Grounded on `fleet-git`'s timeout-wrapped `tokio::process::Command`
//! shell-out idiom for the `git init`/initial-commit step.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

const SCAFFOLD_GIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Persisted alongside a creature's directory so its genome/purpose/model
/// survive an orchestrator restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatureMeta {
    /// The genome identifier the creature was scaffolded from.
    pub genome: String,
    /// Free-text purpose, if one was given at creation.
    pub purpose: Option<String>,
    /// Preferred model, if one was given at creation.
    pub model: Option<String>,
    /// The host port assigned to this creature at creation. Stable across
    /// restarts so a recreated container keeps answering on the same
    /// host-mapped port callers already know about.
    #[serde(default)]
    pub port: u16,
}

/// Lay out a fresh creature directory under `creatures_dir/<name>` and
/// commit it so `fleet-git`'s `current_sha` has something to read.
#[allow(clippy::too_many_arguments)]
pub async fn scaffold(
    creatures_dir: &Path,
    name: &str,
    genome: &str,
    purpose: Option<&str>,
    model: Option<&str>,
    port: u16,
) -> std::io::Result<PathBuf> {
    let dir = creatures_dir.join(name);
    tokio::fs::create_dir_all(dir.join("src")).await?;
    tokio::fs::create_dir_all(dir.join(".self")).await?;
    tokio::fs::create_dir_all(dir.join(".sys")).await?;
    tokio::fs::create_dir_all(dir.join("workspace")).await?;

    tokio::fs::write(dir.join("src").join(".gitkeep"), b"").await?;
    tokio::fs::write(
        dir.join("PURPOSE.md"),
        purpose.unwrap_or("(no purpose recorded yet)").as_bytes(),
    )
    .await?;
    tokio::fs::write(dir.join(".gitignore"), b".sys/\nworkspace/\n").await?;

    let meta = CreatureMeta { genome: genome.to_string(), purpose: purpose.map(str::to_string), model: model.map(str::to_string), port };
    let meta_json = serde_json::to_vec_pretty(&meta).expect("meta always serializes");
    tokio::fs::write(dir.join(".sys").join("meta.json"), meta_json).await?;

    init_and_commit(&dir).await;
    Ok(dir)
}

/// Read back a previously scaffolded creature's metadata, for rediscovery
/// at boot. `None` if the file is missing or unreadable.
pub async fn read_meta(creature_dir: &Path) -> Option<CreatureMeta> {
    let contents = tokio::fs::read_to_string(creature_dir.join(".sys").join("meta.json")).await.ok()?;
    serde_json::from_str(&contents).ok()
}

async fn init_and_commit(dir: &Path) {
    let _ = run_git(dir, &["init", "-q"]).await;
    let _ = run_git(dir, &["config", "user.email", "fleet@localhost"]).await;
    let _ = run_git(dir, &["config", "user.name", "fleet"]).await;
    let _ = run_git(dir, &["add", "-A"]).await;
    let _ = run_git(dir, &["commit", "-q", "-m", "scaffold"]).await;
}

async fn run_git(dir: &Path, args: &[&str]) -> Option<()> {
    let result = tokio::time::timeout(
        SCAFFOLD_GIT_TIMEOUT,
        Command::new("git").arg("-C").arg(dir).args(args).output(),
    )
    .await;
    match result {
        Ok(Ok(output)) if output.status.success() => Some(()),
        Ok(Ok(output)) => {
            tracing::warn!(args = ?args, stderr = %String::from_utf8_lossy(&output.stderr).trim(), "scaffold git command failed");
            None
        }
        Ok(Err(e)) => {
            tracing::warn!(args = ?args, error = %e, "failed to spawn git during scaffold");
            None
        }
        Err(_) => {
            tracing::warn!(args = ?args, "scaffold git command timed out");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn scaffold_lays_out_expected_tree_and_commits() {
        let dir = tempdir().unwrap();
        let creature_dir = scaffold(dir.path(), "alpha", "rust-basic", Some("say hi"), Some("claude-3-5-sonnet"), 9001)
            .await
            .unwrap();

        assert!(creature_dir.join("src").is_dir());
        assert!(creature_dir.join(".self").is_dir());
        assert!(creature_dir.join(".sys").is_dir());
        assert!(creature_dir.join("workspace").is_dir());
        assert!(creature_dir.join("PURPOSE.md").exists());

        let meta = read_meta(&creature_dir).await.unwrap();
        assert_eq!(meta.genome, "rust-basic");
        assert_eq!(meta.purpose.as_deref(), Some("say hi"));
        assert_eq!(meta.port, 9001);

        let repo = fleet_git::GitRepo::new(&creature_dir);
        assert!(!repo.current_sha().await.is_empty());
    }

    #[tokio::test]
    async fn read_meta_missing_file_returns_none() {
        let dir = tempdir().unwrap();
        assert!(read_meta(dir.path()).await.is_none());
    }
}
