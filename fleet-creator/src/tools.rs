//! The creator's tool set: everything scoped to one creature's directory.
//!
//! Grounded on `fleet-git`'s timeout-wrapped shell-out pattern for the
//! creature shell and build check, and on the REDESIGN FLAGS note that
//! the restart tool's compile check must be parameterized per genome
//! rather than hardcoded to one language's toolchain.

use async_trait::async_trait;
use fleet_core::ToolDefinition;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Timeout for the creature shell tool.
pub const SHELL_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the restart tool's build check.
pub const BUILD_CHECK_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_SHELL_OUTPUT_CHARS: usize = 8_000;

/// Validates that a creature's source still builds before the creator is
/// allowed to request a restart. Parameterized per genome: a Rust
/// creature might run `cargo check`, a Python one might run `python -m
/// py_compile`, and so on — this crate hardcodes neither.
#[async_trait]
pub trait BuildCheck: Send + Sync {
    /// Run the build check rooted at `dir`. `Ok(())` means it passed;
    /// `Err` carries the diagnostic output to hand back to the model.
    async fn check(&self, dir: &Path) -> Result<(), String>;
}

/// A build check that shells out to an arbitrary command.
pub struct CommandBuildCheck {
    command: Vec<String>,
}

impl CommandBuildCheck {
    /// Build a check that runs `command` (argv form, e.g. `["cargo",
    /// "check"]`) with the creature directory as its working directory.
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl BuildCheck for CommandBuildCheck {
    async fn check(&self, dir: &Path) -> Result<(), String> {
        let Some((program, args)) = self.command.split_first() else {
            return Err("build check command is empty".to_string());
        };
        let output = tokio::time::timeout(
            BUILD_CHECK_TIMEOUT,
            Command::new(program).args(args).current_dir(dir).output(),
        )
        .await
        .map_err(|_| "build check timed out".to_string())?
        .map_err(|e| format!("failed to spawn build check: {e}"))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(truncate(format!(
                "{}\n{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            )))
        }
    }
}

/// Run an arbitrary shell command within `dir`, under [`SHELL_TIMEOUT`].
pub async fn run_shell(dir: &Path, command: &str) -> Result<String, String> {
    let output = tokio::time::timeout(
        SHELL_TIMEOUT,
        Command::new("sh").arg("-c").arg(command).current_dir(dir).output(),
    )
    .await
    .map_err(|_| "shell command timed out".to_string())?
    .map_err(|e| format!("failed to spawn shell: {e}"))?;

    let combined = format!(
        "exit status: {}\nstdout:\n{}\nstderr:\n{}",
        output.status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
    Ok(truncate(combined))
}

/// Commit every change in `dir` under one message. Returns the new SHA,
/// or `None` if there was nothing to commit or the commit failed.
pub async fn commit_all(dir: &Path, message: &str) -> Option<String> {
    let add = Command::new("git").arg("-C").arg(dir).args(["add", "-A"]).output().await.ok()?;
    if !add.status.success() {
        tracing::warn!(stderr = %String::from_utf8_lossy(&add.stderr), "creator git add failed");
        return None;
    }
    let commit = Command::new("git").arg("-C").arg(dir).args(["commit", "-m", message]).output().await.ok()?;
    if !commit.status.success() {
        // Most commonly: nothing to commit.
        return None;
    }
    let rev = Command::new("git").arg("-C").arg(dir).args(["rev-parse", "HEAD"]).output().await.ok()?;
    if !rev.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&rev.stdout).trim().to_string())
}

fn truncate(mut s: String) -> String {
    if s.len() > MAX_SHELL_OUTPUT_CHARS {
        s.truncate(MAX_SHELL_OUTPUT_CHARS);
        s.push_str("\n...(truncated)");
    }
    s
}

/// Tool definitions offered to the model during a creator run.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "shell".to_string(),
            description: "Run a shell command in the creature's directory.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"command": {"type": "string"}},
                "required": ["command"],
            }),
        },
        ToolDefinition {
            name: "recent_events".to_string(),
            description: "Read the creature's recent event history.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"limit": {"type": "integer"}},
            }),
        },
        ToolDefinition {
            name: "recent_dreams".to_string(),
            description: "Read the creature's recent creature.dream events.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"limit": {"type": "integer"}},
            }),
        },
        ToolDefinition {
            name: "status".to_string(),
            description: "The creature's current supervision status.".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        ToolDefinition {
            name: "restart".to_string(),
            description: "Validate the creature's source still builds, commit the working tree, \
                           and request a supervisor restart. Fails without committing or \
                           restarting if the build check fails."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"commit_message": {"type": "string"}},
                "required": ["commit_message"],
            }),
        },
        ToolDefinition {
            name: "done".to_string(),
            description: "End the evaluation. Summarize the reasoning and what, if anything, changed."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "reasoning": {"type": "string"},
                    "changed": {"type": "string"},
                },
                "required": ["reasoning", "changed"],
            }),
        },
    ]
}
