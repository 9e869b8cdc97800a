//! Environment-driven configuration for the boot path.
//!
//! One flat struct read once in `main`, following
//! `apps/inbox-autopilot/daemon/src/config.rs`'s `Config::from_env` shape:
//! every setting has a sane default so the daemon boots with nothing set
//! beyond a provider API key, and every override is a single env var.

use fleet_core::{Budget, BudgetAction};
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::str::FromStr;

/// Everything `fleetd::main` needs, read once from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API binds to.
    pub bind_addr: String,
    /// This process's own externally-reachable URL, handed to creature
    /// containers as the orchestrator to call back into.
    pub orchestrator_url: String,
    /// Root directory for the orchestrator's own state (pricing cache,
    /// cost ledger, narration log, global rollback log).
    pub home_dir: PathBuf,
    /// Root directory holding one subdirectory per creature.
    pub creatures_dir: PathBuf,

    /// Source-upstream (Claude-shaped) base URL and API key.
    pub anthropic_base_url: String,
    /// `None` if this installation has no source-upstream credentials.
    pub anthropic_api_key: Option<String>,
    /// Target-upstream (GPT-shaped) base URL and API key.
    pub openai_base_url: String,
    /// `None` if this installation has no target-upstream credentials.
    pub openai_api_key: Option<String>,

    /// Override for the pricing table's upstream URL.
    pub pricing_url: String,

    /// Model a freshly scaffolded creature runs with if none is given.
    pub default_model: String,
    /// Model the narrator summarizes with.
    pub narrator_model: String,
    /// Whether the narrator's background loop runs at all.
    pub narrator_enabled: bool,
    /// Narrator tick interval, in minutes.
    pub narrator_interval_minutes: u32,
    /// Model the creator evaluates with.
    pub creator_model: String,
    /// Shell command the creator's `restart` tool runs to validate a
    /// creature's source before committing, split on whitespace
    /// (parameterized per genome is left as a later extension; this is
    /// the single global default every creature uses today).
    pub build_check_command: Vec<String>,

    /// Container runtime binary (`docker`, `podman`, ...).
    pub container_runtime_binary: String,
    /// Image every creature container runs from.
    pub container_image: String,
    /// CPU limit passed to the container runtime.
    pub cpu_limit: String,
    /// Memory limit passed to the container runtime.
    pub memory_limit: String,
    /// First host port handed out to a newly scaffolded creature.
    pub port_range_start: u16,
    /// Whether the orchestrator process itself runs inside a container
    /// (changes bind-mount path and orchestrator URL rewriting).
    pub dockerized_self: bool,
    /// Host's view of `orchestrator_url`, when `dockerized_self` is set.
    pub host_orchestrator_url: Option<String>,
    /// Host's view of `creatures_dir`'s parent, when `dockerized_self` is set.
    pub host_bind_mount_root: Option<PathBuf>,

    /// Credential-proxy side-car's own config file; its absence makes the
    /// side-car a no-op for this installation.
    pub credproxy_config_file: PathBuf,
    /// Path to the credential-proxy side-car executable.
    pub credproxy_binary: PathBuf,
    /// Fixed port the side-car binds to.
    pub credproxy_port: u16,
    /// Host other containers reach the side-car at.
    pub credproxy_container_host: String,
    /// Explicit runner key override, skipping load-or-generate.
    pub runner_key_override: Option<String>,

    /// Global daily spend cap, in USD.
    pub global_daily_budget_usd: Decimal,
    /// Action taken when the global cap is exceeded.
    pub global_budget_action: BudgetAction,

    /// Interval between dependency health check passes.
    pub health_check_interval_secs: u64,
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim(), "1" | "true" | "TRUE" | "yes"),
        Err(_) => default,
    }
}

impl Config {
    /// Read configuration from the process environment, falling back to
    /// defaults suitable for a single-machine development boot.
    pub fn from_env() -> Self {
        let home_dir = PathBuf::from(env_string("FLEET_HOME", "./fleet-home"));
        let creatures_dir = env_opt("FLEET_CREATURES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir.join("creatures"));
        let bind_addr = env_string("FLEET_BIND_ADDR", "0.0.0.0:4000");
        let orchestrator_url =
            env_opt("FLEET_ORCHESTRATOR_URL").unwrap_or_else(|| format!("http://localhost:{}", port_from_bind_addr(&bind_addr)));

        let default_model = env_string("FLEET_DEFAULT_MODEL", "claude-3-5-sonnet-latest");
        let creator_model = env_opt("FLEET_CREATOR_MODEL").unwrap_or_else(|| default_model.clone());

        let build_check_command = env_opt("FLEET_BUILD_CHECK_COMMAND")
            .map(|s| s.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec!["true".to_string()]);

        let budget_action = match env_string("FLEET_GLOBAL_BUDGET_ACTION", "sleep").to_lowercase().as_str() {
            "warn" => BudgetAction::Warn,
            "off" => BudgetAction::Off,
            _ => BudgetAction::Sleep,
        };

        Self {
            orchestrator_url,
            home_dir: home_dir.clone(),
            creatures_dir,
            bind_addr,

            anthropic_base_url: env_string("ANTHROPIC_BASE_URL", "https://api.anthropic.com"),
            anthropic_api_key: env_opt("ANTHROPIC_API_KEY"),
            openai_base_url: env_string("OPENAI_BASE_URL", "https://api.openai.com"),
            openai_api_key: env_opt("OPENAI_API_KEY"),

            pricing_url: env_opt("FLEET_PRICING_URL").unwrap_or_else(|| fleet_pricing::DEFAULT_PRICING_URL.to_string()),

            default_model,
            narrator_model: env_string("FLEET_NARRATOR_MODEL", "claude-3-5-haiku-latest"),
            narrator_enabled: env_bool("FLEET_NARRATOR_ENABLED", true),
            narrator_interval_minutes: env_parsed("FLEET_NARRATOR_INTERVAL_MINUTES", 30),
            creator_model,
            build_check_command,

            container_runtime_binary: env_string("FLEET_CONTAINER_RUNTIME", "docker"),
            container_image: env_string("FLEET_CONTAINER_IMAGE", "fleet-creature:latest"),
            cpu_limit: env_string("FLEET_CPU_LIMIT", "1.0"),
            memory_limit: env_string("FLEET_MEMORY_LIMIT", "512m"),
            port_range_start: env_parsed("FLEET_PORT_RANGE_START", 9000u16),
            dockerized_self: env_bool("FLEET_DOCKERIZED_SELF", false),
            host_orchestrator_url: env_opt("FLEET_HOST_ORCHESTRATOR_URL"),
            host_bind_mount_root: env_opt("FLEET_HOST_BIND_MOUNT_ROOT").map(PathBuf::from),

            credproxy_config_file: env_opt("CREDENTIAL_PROXY_HOME")
                .map(|home| PathBuf::from(home).join("config.json"))
                .unwrap_or_else(|| home_dir.join("credential-proxy").join("config.json")),
            credproxy_binary: env_opt("CREDENTIAL_PROXY_BINARY")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("credential-proxy")),
            credproxy_port: env_parsed("CREDENTIAL_PROXY_PORT", 8089u16),
            credproxy_container_host: env_string("FLEET_CREDPROXY_CONTAINER_HOST", "host.docker.internal"),
            runner_key_override: env_opt("RUNNER_KEY_OVERRIDE"),

            global_daily_budget_usd: env_opt("FLEET_GLOBAL_DAILY_BUDGET_USD")
                .and_then(|v| Decimal::from_str(&v).ok())
                .unwrap_or(Decimal::new(20, 0)),
            global_budget_action: budget_action,

            health_check_interval_secs: env_parsed("FLEET_HEALTH_CHECK_INTERVAL_SECS", 15u64),
        }
    }

    /// The orchestrator URL creature containers should use — the host's
    /// view when the orchestrator itself is dockerized, else the plain one.
    pub fn creature_facing_orchestrator_url(&self) -> String {
        self.host_orchestrator_url.clone().unwrap_or_else(|| self.orchestrator_url.clone())
    }

    /// Global budget built from this config's cap and action.
    pub fn global_budget(&self) -> Budget {
        Budget::new(self.global_daily_budget_usd, self.global_budget_action)
    }
}

fn port_from_bind_addr(bind_addr: &str) -> &str {
    bind_addr.rsplit(':').next().unwrap_or("4000")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_from_bind_addr_splits_last_colon() {
        assert_eq!(port_from_bind_addr("0.0.0.0:4000"), "4000");
        assert_eq!(port_from_bind_addr("[::]:4000"), "4000");
    }
}
