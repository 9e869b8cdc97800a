//! Tunables for one supervisor actor. Defaults match the constants named
//! in the supervision algorithm (`HEALTH_GATE_MS`, `ROLLBACK_TIMEOUT_MS`,
//! `MAX_CONSECUTIVE_FAILURES`).

use std::path::PathBuf;
use std::time::Duration;

/// Sustained-success window before a fresh spawn is promoted.
pub const DEFAULT_HEALTH_GATE: Duration = Duration::from_secs(10);

/// How long a fresh spawn has to pass the health gate before it's
/// considered a failed start.
pub const DEFAULT_ROLLBACK_TIMEOUT: Duration = Duration::from_secs(30);

/// Consecutive failures tolerated before a creature is given up on and
/// parked in `stopped`.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// First respawn backoff after a failure.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Backoff ceiling.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// The fixed internal port every creature container listens on.
pub const DEFAULT_INTERNAL_PORT: u16 = 8080;

/// Tunables and container-creation parameters for one supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Sustained-success window before promotion.
    pub health_gate: Duration,
    /// Deadline for a fresh spawn to first pass health.
    pub rollback_timeout: Duration,
    /// Consecutive-failure cap before giving up.
    pub max_consecutive_failures: u32,
    /// First respawn backoff.
    pub initial_backoff: Duration,
    /// Backoff ceiling.
    pub max_backoff: Duration,
    /// Container image to run creatures from.
    pub container_image: String,
    /// CPU limit passed to the container runtime.
    pub cpu_limit: String,
    /// Memory limit passed to the container runtime.
    pub memory_limit: String,
    /// Fixed internal port creature containers listen on.
    pub internal_port: u16,
    /// The orchestrator's own URL, as creature containers should reach it.
    pub orchestrator_url: String,
    /// Override for `orchestrator_url` when the orchestrator itself runs
    /// inside a container and needs the host's view of itself.
    pub host_orchestrator_url: Option<String>,
    /// Override for the bind-mount root when the orchestrator itself runs
    /// inside a container and needs the host's view of creature directories.
    pub host_bind_mount_root: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            health_gate: DEFAULT_HEALTH_GATE,
            rollback_timeout: DEFAULT_ROLLBACK_TIMEOUT,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            container_image: "fleet-creature:latest".to_string(),
            cpu_limit: "1.0".to_string(),
            memory_limit: "512m".to_string(),
            internal_port: DEFAULT_INTERNAL_PORT,
            orchestrator_url: "http://host.docker.internal:4000".to_string(),
            host_orchestrator_url: None,
            host_bind_mount_root: None,
        }
    }
}
