//! The creature health check, abstracted so tests can fake `/healthz`
//! without binding a real port.

use async_trait::async_trait;
use std::time::Duration;

/// Health check timeout. Spec range is 3-5s; 3s keeps the 1s poll
/// interval meaningful even under load.
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(3);

/// A single `GET /healthz` probe against a creature's host-mapped port.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    /// Whether the creature answered healthy on `port`.
    async fn probe(&self, port: u16) -> bool;
}

/// The real probe: an HTTP GET against `127.0.0.1:<port>/healthz`.
pub struct HttpHealthProbe {
    http: reqwest::Client,
}

impl HttpHealthProbe {
    /// Build a probe with [`HEALTH_CHECK_TIMEOUT`] applied to every request.
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(HEALTH_CHECK_TIMEOUT)
                .build()
                .unwrap_or_default(),
        }
    }
}

impl Default for HttpHealthProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, port: u16) -> bool {
        match self.http.get(format!("http://127.0.0.1:{port}/healthz")).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}
