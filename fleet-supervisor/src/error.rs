//! Errors surfaced by the container runtime seam.

use std::time::Duration;

/// Failures a [`crate::container::ContainerRuntime`] implementation can
/// report. The supervisor never panics on these — each variant maps to a
/// specific point in the failure handler (§ failure handler, infra guard).
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The runtime binary itself could not be reached (not installed, daemon
    /// down, socket permission denied). Trips the supervisor's infra guard.
    #[error("container runtime unreachable: {0}")]
    RuntimeUnavailable(String),
    /// The runtime ran but the requested operation failed (non-zero exit).
    #[error("container operation failed: {0}")]
    OperationFailed(String),
    /// The operation did not complete within its allotted timeout.
    #[error("container operation timed out after {0:?}")]
    Timeout(Duration),
}
