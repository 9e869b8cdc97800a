//! Errors from supervising the credential-proxy side-car.

use thiserror::Error;

/// Failures starting or managing the credential-proxy side-car.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CredProxyError {
    #[error("credential-proxy config file not found at {0}")]
    MissingConfig(std::path::PathBuf),

    #[error("failed to read or generate runner key: {0}")]
    RunnerKey(#[source] std::io::Error),

    #[error("failed to spawn credential-proxy side-car: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("side-car did not become healthy within the wait window")]
    HealthTimeout,
}
