//! `fleetd` — boot binary for the fleet orchestrator.
//!
//! Initializes every `fleet-*` collaborator in the order spec.md §2's
//! control-flow paragraph requires (pricing, cost tracker, event store,
//! credential-proxy, health monitor, then the HTTP API), rediscovers
//! creature directories left over from a previous run, and serves until a
//! shutdown signal arrives.
//!
//! Grounded on `apps/inbox-autopilot/daemon/src/main.rs`: `init_tracing`,
//! `Config::from_env`, `anyhow::Context`-annotated boot failures, and
//! graceful shutdown via `tokio::signal`.

mod checks;
mod config;

use anyhow::Context;
use config::Config;
use fleet_core::{Event, EventType};
use fleet_cost::CostTracker;
use fleet_creator::{BuildCheck, CommandBuildCheck};
use fleet_credproxy::{CredentialProxyConfig, CredentialProxyManager};
use fleet_events::EventStore;
use fleet_health::HealthMonitor;
use fleet_narrator::{Narrator, NarratorConfig};
use fleet_pricing::PricingLoader;
use fleet_proxy::{HttpUpstream, Upstream};
use fleet_supervisor::{CliContainerRuntime, ContainerRuntime, HealthProbe, HttpHealthProbe, SupervisorConfig};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env();

    tokio::fs::create_dir_all(&config.home_dir)
        .await
        .with_context(|| format!("failed creating home dir {}", config.home_dir.display()))?;
    tokio::fs::create_dir_all(&config.creatures_dir)
        .await
        .with_context(|| format!("failed creating creatures dir {}", config.creatures_dir.display()))?;

    let pricing = Arc::new(PricingLoader::new(config.home_dir.join("pricing.json"), config.pricing_url.clone()));
    pricing.load().await;
    info!("pricing table loaded");

    let cost = CostTracker::new(config.home_dir.join("cost.json"), pricing.clone()).await;
    cost.start_autosave(fleet_cost::DEFAULT_AUTOSAVE_INTERVAL).await;

    let events = EventStore::new(config.creatures_dir.clone());

    let credproxy = boot_credential_proxy(&config).await;

    let container_runtime: Arc<dyn ContainerRuntime> = Arc::new(CliContainerRuntime::new(config.container_runtime_binary.clone()));
    let health_probe: Arc<dyn HealthProbe> = Arc::new(HttpHealthProbe::new());

    let health = Arc::new(HealthMonitor::new(vec![
        Arc::new(checks::ContainerRuntimeCheck::new(container_runtime.clone())),
        Arc::new(checks::CredentialProxyCheck::new(credproxy.as_ref().map(|_| format!("http://127.0.0.1:{}/health", config.credproxy_port)))),
        Arc::new(checks::PricingCheck::new(pricing.clone())),
    ]));
    {
        let events = events.clone();
        health.on_change(move |snapshot| {
            let events = events.clone();
            tokio::spawn(async move {
                let status = serde_json::to_value(&snapshot).unwrap_or(serde_json::Value::Null);
                events.append("_orchestrator", Event::new("_orchestrator", EventType::OrchestratorStatus).with_field("snapshot", status)).await;
            });
        }).await;
    }
    let _health_loop = health.start(std::time::Duration::from_secs(config.health_check_interval_secs));

    let upstream: Arc<dyn Upstream> = Arc::new(HttpUpstream::new(
        config.anthropic_base_url.clone(),
        config.anthropic_api_key.clone(),
        config.openai_base_url.clone(),
        config.openai_api_key.clone(),
    ));

    let narrator_config = NarratorConfig {
        enabled: config.narrator_enabled,
        model: config.narrator_model.clone(),
        interval_minutes: config.narrator_interval_minutes,
    };
    let narrator_tools = Arc::new(fleet_narrator::FsNarratorTools::new(config.creatures_dir.clone()));
    let narrator = Arc::new(
        Narrator::new(narrator_config, events.clone(), cost.clone(), upstream.clone(), narrator_tools, config.home_dir.join("narration.jsonl"))
            .await
            .context("failed building narrator")?,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let _narrator_loop = narrator.start(shutdown_rx);

    let build_check: Arc<dyn BuildCheck> = Arc::new(CommandBuildCheck::new(config.build_check_command.clone()));

    let supervisor_config = SupervisorConfig {
        container_image: config.container_image.clone(),
        cpu_limit: config.cpu_limit.clone(),
        memory_limit: config.memory_limit.clone(),
        orchestrator_url: config.orchestrator_url.clone(),
        host_orchestrator_url: config.host_orchestrator_url.clone(),
        host_bind_mount_root: config.host_bind_mount_root.clone(),
        ..Default::default()
    };

    let state = fleet_api::AppState::new(fleet_api::AppStateParams {
        creatures_dir: config.creatures_dir.clone(),
        events,
        cost: cost.clone(),
        pricing,
        health,
        global_budget: config.global_budget(),
        upstream,
        narrator,
        credproxy: credproxy.clone(),
        supervisor_config,
        container_runtime,
        health_probe,
        rollback_log: config.home_dir.join("rollbacks.jsonl"),
        creator_model: config.creator_model.clone(),
        build_check,
        port_range_start: config.port_range_start,
    })
    .await;

    let app = fleet_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed binding {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "fleetd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server exited with error")?;

    let _ = shutdown_tx.send(true);
    if let Some(credproxy) = credproxy {
        credproxy.stop_janee().await;
    }
    cost.destroy().await;

    Ok(())
}

async fn boot_credential_proxy(config: &Config) -> Option<Arc<CredentialProxyManager>> {
    let cred_config = CredentialProxyConfig {
        config_file: config.credproxy_config_file.clone(),
        binary_path: config.credproxy_binary.clone(),
        runner_key_path: config.home_dir.join("credential-proxy").join("runner-key"),
        runner_key_override: config.runner_key_override.clone(),
        port: config.credproxy_port,
        container_host: config.credproxy_container_host.clone(),
        health_wait_attempts: 0,
    };
    let manager = Arc::new(CredentialProxyManager::new(cred_config));
    match manager.start().await {
        Ok(()) => {
            info!("credential-proxy side-car started");
            Some(manager)
        }
        Err(fleet_credproxy::CredProxyError::MissingConfig(path)) => {
            info!(path = %path.display(), "no credential-proxy config found, skipping side-car for this installation");
            None
        }
        Err(e) => {
            error!(error = %e, "failed to start credential-proxy side-car, continuing without it");
            None
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("install ctrl-c handler should not fail");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install signal handler should not fail")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
