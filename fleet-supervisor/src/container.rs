//! The container runtime seam.
//!
//! Every supervisor action that touches a creature's container goes
//! through this trait rather than shelling out directly, so tests can
//! swap in a mock runtime without a real container engine installed.
//! Grounded on `fleet-git`'s timeout-wrapped CLI invocation pattern,
//! generalized from one fixed binary (`git`) to a configurable one
//! (`docker`, `podman`, ...).

use crate::error::ContainerError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default per-invocation timeout for cheap operations (`inspect`, `stop`,
/// `kill`, `rm`).
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-invocation timeout for slower operations (`run`, `start`,
/// `restart`, `wait`).
pub const DEFAULT_SPAWN_TIMEOUT: Duration = Duration::from_secs(30);

/// What `inspect` found for a creature's container name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    /// Container exists and is running.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// No container by that name exists.
    Absent,
}

/// Everything needed to create a fresh container for a creature.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Container name, unique per creature.
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Host directory bind-mounted into the container.
    pub bind_mount: PathBuf,
    /// Named volume for package caches, one per creature.
    pub cache_volume: String,
    /// Host port mapped to `internal_port`.
    pub host_port: u16,
    /// Fixed internal port the creature listens on inside the container.
    pub internal_port: u16,
    /// CPU limit, in the runtime's own units (e.g. `"1.0"`).
    pub cpu_limit: String,
    /// Memory limit, in the runtime's own units (e.g. `"512m"`).
    pub memory_limit: String,
    /// Environment variables: orchestrator URL, creature name, model,
    /// `<prefix>:<name>` API key, and anything host-view-rewritten when
    /// the orchestrator itself runs inside a container.
    pub env: HashMap<String, String>,
}

/// The container lifecycle operations the supervisor needs, named after
/// the CLI verbs they shell out to (`run`, `start`, `stop`, `restart`,
/// `kill`, `rm`, `wait`, `inspect`, `logs -f`). No HTTP API is assumed.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Whether the runtime itself can be reached at all (daemon up,
    /// socket reachable). `false` trips the supervisor's infra guard.
    async fn is_available(&self) -> bool;

    /// Look up the current state of the named container.
    async fn inspect(&self, name: &str) -> Result<ContainerState, ContainerError>;

    /// Create and run a brand-new container from `spec`.
    async fn run(&self, spec: &ContainerSpec) -> Result<(), ContainerError>;

    /// Start an existing, stopped container (environment preserved).
    async fn start(&self, name: &str) -> Result<(), ContainerError>;

    /// Restart a running (or stopped) container in place; its writable
    /// layer is preserved.
    async fn restart(&self, name: &str) -> Result<(), ContainerError>;

    /// Gracefully stop a running container.
    async fn stop(&self, name: &str) -> Result<(), ContainerError>;

    /// Forcefully kill, wait for exit, then remove the container. Used
    /// only by `rebuild()`.
    async fn kill_wait_remove(&self, name: &str) -> Result<(), ContainerError>;

    /// Attach a following log stream to an already-running container.
    /// Best-effort: failures here don't affect supervision state.
    async fn attach_logs(&self, name: &str);
}

/// The real runtime, shelling out to a configured binary (`docker`,
/// `podman`, ...) with a timeout on every invocation.
pub struct CliContainerRuntime {
    binary: String,
    operation_timeout: Duration,
    spawn_timeout: Duration,
}

impl CliContainerRuntime {
    /// A runtime driving `binary` (e.g. `"docker"`) with default timeouts.
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            spawn_timeout: DEFAULT_SPAWN_TIMEOUT,
        }
    }

    async fn run_cli(&self, args: Vec<String>, timeout: Duration) -> Result<String, ContainerError> {
        let binary = self.binary.clone();
        let spawn = tokio::process::Command::new(&binary).args(&args).output();
        match tokio::time::timeout(timeout, spawn).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => Err(ContainerError::OperationFailed(format!(
                "{} {:?}: {}",
                binary,
                args,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(ContainerError::RuntimeUnavailable(format!("failed to spawn {binary}: {e}"))),
            Err(_) => Err(ContainerError::Timeout(timeout)),
        }
    }

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }
}

#[async_trait]
impl ContainerRuntime for CliContainerRuntime {
    async fn is_available(&self) -> bool {
        self.run_cli(Self::args(&["info"]), self.operation_timeout).await.is_ok()
    }

    async fn inspect(&self, name: &str) -> Result<ContainerState, ContainerError> {
        let output = self
            .run_cli(
                vec!["inspect".to_string(), "--format".to_string(), "{{.State.Running}}".to_string(), name.to_string()],
                self.operation_timeout,
            )
            .await;
        match output {
            Ok(s) if s.trim() == "true" => Ok(ContainerState::Running),
            Ok(_) => Ok(ContainerState::Stopped),
            Err(ContainerError::OperationFailed(_)) => Ok(ContainerState::Absent),
            Err(e) => Err(e),
        }
    }

    async fn run(&self, spec: &ContainerSpec) -> Result<(), ContainerError> {
        let mut args = vec![
            "run".to_string(),
            "-d".to_string(),
            "--init".to_string(),
            "--name".to_string(),
            spec.name.clone(),
            "--cpus".to_string(),
            spec.cpu_limit.clone(),
            "--memory".to_string(),
            spec.memory_limit.clone(),
            "-p".to_string(),
            format!("{}:{}", spec.host_port, spec.internal_port),
            "-v".to_string(),
            format!("{}:/creature", spec.bind_mount.display()),
            "-v".to_string(),
            format!("{}:/cache", spec.cache_volume),
        ];
        for (key, value) in &spec.env {
            args.push("-e".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(spec.image.clone());
        self.run_cli(args, self.spawn_timeout).await.map(|_| ())
    }

    async fn start(&self, name: &str) -> Result<(), ContainerError> {
        self.run_cli(vec!["start".to_string(), name.to_string()], self.spawn_timeout).await.map(|_| ())
    }

    async fn restart(&self, name: &str) -> Result<(), ContainerError> {
        self.run_cli(vec!["restart".to_string(), name.to_string()], self.spawn_timeout).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> Result<(), ContainerError> {
        self.run_cli(vec!["stop".to_string(), name.to_string()], self.operation_timeout).await.map(|_| ())
    }

    async fn kill_wait_remove(&self, name: &str) -> Result<(), ContainerError> {
        let _ = self.run_cli(vec!["kill".to_string(), name.to_string()], self.operation_timeout).await;
        let _ = self.run_cli(vec!["wait".to_string(), name.to_string()], self.spawn_timeout).await;
        self.run_cli(vec!["rm".to_string(), name.to_string()], self.operation_timeout).await.map(|_| ())
    }

    async fn attach_logs(&self, name: &str) {
        tracing::debug!(container = name, "attaching log stream (fire-and-forget)");
        let binary = self.binary.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let _ = tokio::process::Command::new(binary).args(["logs", "-f", &name]).output().await;
        });
    }
}
