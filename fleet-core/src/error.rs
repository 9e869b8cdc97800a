//! Shared, protocol-boundary-scoped error types.
//!
//! Each downstream crate defines its own `thiserror` enum scoped to its own
//! boundary (`fleet_events::EventStoreError`, `fleet_cost::CostError`, ...).
//! This module holds only the few error shapes common enough to be shared.

use thiserror::Error;

/// Errors from shell/process invocations shared by `fleet-git` and
/// `fleet-supervisor`'s container runtime shell-outs.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("command failed: {0}")]
    Failed(String),

    #[error("failed to spawn command: {0}")]
    Spawn(#[from] std::io::Error),
}
