//! Dependency checks wired into [`fleet_health::HealthMonitor`] at boot.
//!
//! Each of the three dependencies named in spec §4.4 (container runtime,
//! credential-proxy, pricing) already has a crate that knows how to ask
//! itself whether it's alive; these adapters just translate that answer
//! into the shape `HealthMonitor` polls.

use async_trait::async_trait;
use fleet_health::DependencyCheck;
use fleet_supervisor::ContainerRuntime;
use std::sync::Arc;

/// Wraps a [`ContainerRuntime`] so the health monitor can ping it the
/// same way the supervisor's infra guard does.
pub struct ContainerRuntimeCheck {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ContainerRuntimeCheck {
    /// Check the given runtime, reported under `"docker"`.
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl DependencyCheck for ContainerRuntimeCheck {
    fn name(&self) -> &str {
        "docker"
    }

    async fn check(&self) -> Result<Option<String>, String> {
        if self.runtime.is_available().await {
            Ok(None)
        } else {
            Err("container runtime unreachable".to_string())
        }
    }
}

/// Pings the credential-proxy side-car's own `/health` endpoint. Reports
/// `up` with no error when no side-car is configured for this
/// installation — an absent side-car isn't a degraded dependency, it's
/// simply not part of this deployment.
pub struct CredentialProxyCheck {
    http: reqwest::Client,
    url: Option<String>,
}

impl CredentialProxyCheck {
    /// `url` is `None` when this installation has no credential-proxy
    /// config file, matching `fleet_credproxy::CredentialProxyManager`'s
    /// own no-op-if-unconfigured behavior.
    pub fn new(url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(3))
                .build()
                .unwrap_or_default(),
            url,
        }
    }
}

#[async_trait]
impl DependencyCheck for CredentialProxyCheck {
    fn name(&self) -> &str {
        "credential-proxy"
    }

    async fn check(&self) -> Result<Option<String>, String> {
        let Some(url) = &self.url else {
            return Ok(None);
        };
        match self.http.get(url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(None),
            Ok(resp) => Err(format!("unhealthy status {}", resp.status())),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Reports the pricing loader's own health, set during its startup
/// cache-or-fetch algorithm (spec §4.3).
pub struct PricingCheck {
    pricing: Arc<fleet_pricing::PricingLoader>,
}

impl PricingCheck {
    /// Check the given loader, reported under `"pricing"`.
    pub fn new(pricing: Arc<fleet_pricing::PricingLoader>) -> Self {
        Self { pricing }
    }
}

#[async_trait]
impl DependencyCheck for PricingCheck {
    fn name(&self) -> &str {
        "pricing"
    }

    async fn check(&self) -> Result<Option<String>, String> {
        let status = self.pricing.health().await;
        match status.status {
            fleet_core::Liveness::Up => Ok(status.version),
            _ => Err(status.error.unwrap_or_else(|| "pricing table unavailable".to_string())),
        }
    }
}
