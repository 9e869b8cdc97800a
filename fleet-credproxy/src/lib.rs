#![deny(missing_docs)]
//! # fleet-credproxy — credential-proxy side-car supervision
//!
//! The credential-proxy itself is an external collaborator (it brokers
//! authenticated outbound API calls on behalf of creatures); this crate
//! only spawns it, waits for it to report healthy, and keeps it running
//! with exponential-backoff auto-restart.
//!
//! Grounded on `neuron-env-local`'s process-spawning shape and
//! `codex-rs::git_info`'s timeout-wrapped external-process idiom, combined
//! into a supervised long-lived child rather than a one-shot command.

mod error;

pub use error::CredProxyError;

use rand::RngCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::RwLock;

/// Starting backoff delay for auto-restart.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Backoff cap for auto-restart.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);
/// Maximum consecutive restart attempts before giving up.
pub const MAX_ATTEMPTS: u32 = 5;
/// How many 1s polls to wait for the health endpoint at startup.
pub const DEFAULT_HEALTH_WAIT_ATTEMPTS: u32 = 30;

/// Static configuration for the side-car.
#[derive(Debug, Clone)]
pub struct CredentialProxyConfig {
    /// Path to the side-car's own config file; its absence means the
    /// side-car is not configured for this installation and `start` is a
    /// no-op.
    pub config_file: PathBuf,
    /// Path to the side-car executable.
    pub binary_path: PathBuf,
    /// Path the runner key is loaded from or generated into, if no
    /// override is given.
    pub runner_key_path: PathBuf,
    /// Explicit runner key override (env var `RUNNER_KEY_OVERRIDE`).
    pub runner_key_override: Option<String>,
    /// Fixed port the side-car binds to.
    pub port: u16,
    /// Host the side-car is reachable at from inside creature containers
    /// (e.g. `host.docker.internal` when the orchestrator itself runs
    /// dockerized).
    pub container_host: String,
    /// How many 1s polls to wait for `/health` at startup.
    pub health_wait_attempts: u32,
}

impl CredentialProxyConfig {
    /// The side-car's health endpoint.
    fn health_url(&self) -> String {
        format!("http://127.0.0.1:{}/health", self.port)
    }
}

struct State {
    runner_key: String,
    child: Option<Child>,
    auto_restart: bool,
    attempts: u32,
}

/// Supervises the credential-proxy side-car process.
pub struct CredentialProxyManager {
    config: CredentialProxyConfig,
    http: reqwest::Client,
    state: RwLock<State>,
}

impl CredentialProxyManager {
    /// Build a manager for the given config. Does not spawn anything yet.
    pub fn new(config: CredentialProxyConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(3))
                .build()
                .expect("reqwest client builds with defaults"),
            state: RwLock::new(State {
                runner_key: String::new(),
                child: None,
                auto_restart: true,
                attempts: 0,
            }),
        }
    }

    /// Boot the side-car: load or generate the runner key, spawn the
    /// process, and wait for it to report healthy. On success, starts the
    /// background auto-restart supervisor.
    pub async fn start(self: &Arc<Self>) -> Result<(), CredProxyError> {
        if !self.config.config_file.exists() {
            return Err(CredProxyError::MissingConfig(self.config.config_file.clone()));
        }

        let runner_key = self.load_or_generate_runner_key().await?;
        {
            let mut state = self.state.write().await;
            state.runner_key = runner_key;
        }

        self.spawn_and_wait_healthy().await?;

        let manager = self.clone();
        tokio::spawn(async move {
            manager.supervise().await;
        });

        Ok(())
    }

    async fn load_or_generate_runner_key(&self) -> Result<String, CredProxyError> {
        if let Some(key) = &self.config.runner_key_override {
            return Ok(key.clone());
        }
        match tokio::fs::read_to_string(&self.config.runner_key_path).await {
            Ok(existing) if !existing.trim().is_empty() => Ok(existing.trim().to_string()),
            _ => {
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                let key = bytes.iter().map(|b| format!("{b:02x}")).collect::<String>();
                if let Some(parent) = self.config.runner_key_path.parent() {
                    tokio::fs::create_dir_all(parent).await.map_err(CredProxyError::RunnerKey)?;
                }
                tokio::fs::write(&self.config.runner_key_path, &key)
                    .await
                    .map_err(CredProxyError::RunnerKey)?;
                Ok(key)
            }
        }
    }

    async fn spawn_and_wait_healthy(&self) -> Result<(), CredProxyError> {
        let runner_key = self.state.read().await.runner_key.clone();
        let child = tokio::process::Command::new(&self.config.binary_path)
            .arg("--config")
            .arg(&self.config.config_file)
            .env("CREDENTIAL_PROXY_PORT", self.config.port.to_string())
            .env("CREDENTIAL_PROXY_RUNNER_KEY", runner_key)
            .kill_on_drop(true)
            .spawn()
            .map_err(CredProxyError::Spawn)?;

        self.state.write().await.child = Some(child);

        let attempts = if self.config.health_wait_attempts == 0 {
            DEFAULT_HEALTH_WAIT_ATTEMPTS
        } else {
            self.config.health_wait_attempts
        };
        for _ in 0..attempts {
            if self.ping_health().await {
                tracing::info!("credential-proxy side-car is healthy");
                return Ok(());
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        Err(CredProxyError::HealthTimeout)
    }

    async fn ping_health(&self) -> bool {
        matches!(self.http.get(self.config.health_url()).send().await, Ok(resp) if resp.status().is_success())
    }

    /// Watches the side-car and restarts it with exponential backoff on
    /// unexpected exit, up to [`MAX_ATTEMPTS`] consecutive attempts.
    async fn supervise(self: Arc<Self>) {
        loop {
            let mut child = match self.state.write().await.child.take() {
                Some(child) => child,
                None => return,
            };
            // Lock released before waiting: `wait()` can run for as long as
            // the side-car lives, and `stop_janee` needs the write lock too.
            let exit_status = child.wait().await;

            if !self.state.read().await.auto_restart {
                tracing::info!("credential-proxy auto-restart disabled, stopping supervisor");
                return;
            }

            match exit_status {
                Ok(status) => tracing::warn!(?status, "credential-proxy side-car exited unexpectedly"),
                Err(e) => tracing::warn!(error = %e, "failed to wait on credential-proxy side-car"),
            }

            let attempts = self.state.read().await.attempts;
            if attempts >= MAX_ATTEMPTS {
                tracing::error!(attempts, "credential-proxy exceeded max restart attempts, giving up");
                return;
            }

            let backoff = std::cmp::min(INITIAL_BACKOFF * 2u32.pow(attempts), MAX_BACKOFF);
            tracing::info!(?backoff, attempts, "restarting credential-proxy side-car");
            tokio::time::sleep(backoff).await;

            match self.spawn_and_wait_healthy().await {
                Ok(()) => {
                    self.state.write().await.attempts = 0;
                }
                Err(CredProxyError::Spawn(e)) if is_port_in_use(&e) => {
                    tracing::warn!("credential-proxy port still in use, rescheduling without counting attempt");
                    // Don't bump `attempts`; just loop back and retry on the next pass.
                }
                Err(e) => {
                    tracing::warn!(error = %e, "credential-proxy restart attempt failed");
                    self.state.write().await.attempts += 1;
                }
            }
        }
    }

    /// URL other containers should reach the side-car at.
    pub fn authority_url(&self) -> String {
        format!("http://{}:{}", self.config.container_host, self.config.port)
    }

    /// The shared runner key, once [`Self::start`] has completed.
    pub async fn runner_key(&self) -> String {
        self.state.read().await.runner_key.clone()
    }

    /// Disable auto-restart and terminate the side-car.
    pub async fn stop_janee(&self) {
        let mut state = self.state.write().await;
        state.auto_restart = false;
        if let Some(mut child) = state.child.take() {
            if let Err(e) = child.kill().await {
                tracing::warn!(error = %e, "failed to terminate credential-proxy side-car");
            }
        }
    }
}

fn is_port_in_use(e: &std::io::Error) -> bool {
    e.kind() == std::io::ErrorKind::AddrInUse
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(dir: &std::path::Path, binary: PathBuf) -> CredentialProxyConfig {
        CredentialProxyConfig {
            config_file: dir.join("config.json"),
            binary_path: binary,
            runner_key_path: dir.join("runner-key"),
            runner_key_override: None,
            port: 18080,
            container_host: "host.docker.internal".to_string(),
            health_wait_attempts: 1,
        }
    }

    #[tokio::test]
    async fn start_fails_fast_when_config_missing() {
        let dir = tempdir().unwrap();
        let manager = Arc::new(CredentialProxyManager::new(config(dir.path(), PathBuf::from("/bin/true"))));
        let err = manager.start().await.unwrap_err();
        assert!(matches!(err, CredProxyError::MissingConfig(_)));
    }

    #[tokio::test]
    async fn runner_key_override_is_used_verbatim() {
        let dir = tempdir().unwrap();
        let mut cfg = config(dir.path(), PathBuf::from("/bin/true"));
        cfg.runner_key_override = Some("fixed-key".to_string());
        let manager = CredentialProxyManager::new(cfg);
        let key = manager.load_or_generate_runner_key().await.unwrap();
        assert_eq!(key, "fixed-key");
    }

    #[tokio::test]
    async fn runner_key_generated_and_persisted_when_absent() {
        let dir = tempdir().unwrap();
        let cfg = config(dir.path(), PathBuf::from("/bin/true"));
        let manager = CredentialProxyManager::new(cfg.clone());
        let first = manager.load_or_generate_runner_key().await.unwrap();
        assert!(!first.is_empty());

        let reloaded = CredentialProxyManager::new(cfg);
        let second = reloaded.load_or_generate_runner_key().await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn authority_url_uses_configured_container_host() {
        let dir = tempdir().unwrap();
        let manager = CredentialProxyManager::new(config(dir.path(), PathBuf::from("/bin/true")));
        assert_eq!(manager.authority_url(), "http://host.docker.internal:18080");
    }

    #[tokio::test]
    async fn stop_janee_disables_auto_restart() {
        let dir = tempdir().unwrap();
        let manager = CredentialProxyManager::new(config(dir.path(), PathBuf::from("/bin/true")));
        manager.stop_janee().await;
        assert!(!manager.state.read().await.auto_restart);
    }
}
