//! The narrator's fixed investigation tool set.
//!
//! Grounded on `fleet-git`'s timeout-wrapped CLI shell-out pattern, reused
//! here for read-only `git log`/`git diff` rather than the supervised
//! rollback operations `fleet-git` exposes.

use async_trait::async_trait;
use fleet_core::ToolDefinition;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;

/// Tool shell timeout for narrator investigation calls.
pub const NARRATOR_TOOL_TIMEOUT: Duration = Duration::from_secs(5);

/// Default number of commits `git_log` returns if the model doesn't ask
/// for a specific count.
pub const DEFAULT_GIT_LOG_LIMIT: u32 = 10;

/// Caps how much of a file or diff is handed back to the model.
const MAX_TOOL_OUTPUT_CHARS: usize = 8_000;

/// The narrator's investigation surface: everything it's allowed to look
/// at while composing one narration entry.
#[async_trait]
pub trait NarratorTools: Send + Sync {
    /// Read a file within one creature's directory. Errors (as a plain
    /// string, since it becomes `tool_result` content either way) if the
    /// resolved path would escape that directory.
    async fn read_file(&self, creature: &str, path: &str) -> Result<String, String>;

    /// The creature's recent commit history, one line per commit.
    async fn git_log(&self, creature: &str, limit: u32) -> Result<String, String>;

    /// The diff introduced by one commit in the creature's history.
    async fn git_diff(&self, creature: &str, sha: &str) -> Result<String, String>;

    /// Every creature name the orchestrator currently knows about.
    async fn list_creatures(&self) -> Vec<String>;
}

/// Tool definitions offered to the model, in the order the narrator's
/// system prompt describes them.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "read_file".to_string(),
            description: "Read a file within one creature's directory.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "creature": {"type": "string"},
                    "path": {"type": "string"},
                },
                "required": ["creature", "path"],
            }),
        },
        ToolDefinition {
            name: "git_log".to_string(),
            description: "Recent commit history for one creature, one line per commit.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "creature": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["creature"],
            }),
        },
        ToolDefinition {
            name: "git_diff".to_string(),
            description: "The diff introduced by one commit in a creature's history.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "creature": {"type": "string"},
                    "sha": {"type": "string"},
                },
                "required": ["creature", "sha"],
            }),
        },
        ToolDefinition {
            name: "list_creatures".to_string(),
            description: "List every creature name the orchestrator currently knows about.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "search_narration".to_string(),
            description: "Search past narration entries by substring.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string"},
                    "limit": {"type": "integer"},
                },
                "required": ["query"],
            }),
        },
    ]
}

/// The real, filesystem- and git-backed tool implementation.
pub struct FsNarratorTools {
    creatures_dir: PathBuf,
}

impl FsNarratorTools {
    /// Tools rooted at the orchestrator's creatures directory.
    pub fn new(creatures_dir: PathBuf) -> Self {
        Self { creatures_dir }
    }

    fn truncate(mut s: String) -> String {
        if s.len() > MAX_TOOL_OUTPUT_CHARS {
            s.truncate(MAX_TOOL_OUTPUT_CHARS);
            s.push_str("\n...(truncated)");
        }
        s
    }

    async fn run_git(&self, creature: &str, args: &[&str]) -> Result<String, String> {
        let dir = self.creatures_dir.join(creature);
        let output = tokio::time::timeout(
            NARRATOR_TOOL_TIMEOUT,
            Command::new("git").arg("-C").arg(&dir).args(args).output(),
        )
        .await
        .map_err(|_| "git command timed out".to_string())?
        .map_err(|e| format!("failed to spawn git: {e}"))?;

        if !output.status.success() {
            return Err(String::from_utf8_lossy(&output.stderr).trim().to_string());
        }
        Ok(Self::truncate(String::from_utf8_lossy(&output.stdout).trim().to_string()))
    }
}

#[async_trait]
impl NarratorTools for FsNarratorTools {
    async fn read_file(&self, creature: &str, path: &str) -> Result<String, String> {
        let base = self.creatures_dir.join(creature);
        let target = base.join(path);

        let canon_base = tokio::fs::canonicalize(&base)
            .await
            .map_err(|e| format!("unknown creature directory: {e}"))?;
        let canon_target = tokio::fs::canonicalize(&target)
            .await
            .map_err(|e| format!("cannot resolve path: {e}"))?;
        if !canon_target.starts_with(&canon_base) {
            return Err("path escapes the creature's directory".to_string());
        }

        tokio::fs::read_to_string(&canon_target)
            .await
            .map(Self::truncate)
            .map_err(|e| format!("failed to read file: {e}"))
    }

    async fn git_log(&self, creature: &str, limit: u32) -> Result<String, String> {
        let limit = if limit == 0 { DEFAULT_GIT_LOG_LIMIT } else { limit };
        self.run_git(creature, &["log", "--oneline", "-n", &limit.to_string()]).await
    }

    async fn git_diff(&self, creature: &str, sha: &str) -> Result<String, String> {
        self.run_git(creature, &["show", sha]).await
    }

    async fn list_creatures(&self) -> Vec<String> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.creatures_dir).await {
            Ok(entries) => entries,
            Err(_) => return names,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn read_file_confined_to_creature_directory() {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(creature_dir.join("sub")).await.unwrap();
        tokio::fs::write(creature_dir.join("sub/notes.md"), "hello").await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("beta")).await.unwrap();
        tokio::fs::write(dir.path().join("beta/secret.txt"), "nope").await.unwrap();

        let tools = FsNarratorTools::new(dir.path().to_path_buf());
        let contents = tools.read_file("alpha", "sub/notes.md").await.unwrap();
        assert_eq!(contents, "hello");

        let escape = tools.read_file("alpha", "../beta/secret.txt").await;
        assert!(escape.is_err());
    }

    #[tokio::test]
    async fn list_creatures_returns_sorted_directory_names() {
        let dir = tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("zeta")).await.unwrap();
        tokio::fs::create_dir_all(dir.path().join("alpha")).await.unwrap();
        tokio::fs::write(dir.path().join("not-a-dir.txt"), "x").await.unwrap();

        let tools = FsNarratorTools::new(dir.path().to_path_buf());
        assert_eq!(tools.list_creatures().await, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
