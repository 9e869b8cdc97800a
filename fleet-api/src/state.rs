//! Shared orchestrator state: the composition root for everything a REST
//! handler or the SSE stream needs to reach.
//!
//! `AppState` itself does no env/config parsing — `fleetd` builds every
//! already-configured component (event store, cost tracker, pricing
//! loader, health monitor, narrator, credential-proxy manager, container
//! runtime, health probe, upstream client) and hands them here. What this
//! module owns is the plumbing *between* those components that only
//! exists once they're all in the same process: the budget admission
//! cache the proxy's synchronous callbacks read from, the two event-bus
//! subscriptions that fan inbound events out to supervisors and SSE
//! clients, the in-memory creature registry, and boot-time rediscovery of
//! creature directories left over from a previous run.
//!
//! Grounded on `apps/inbox-autopilot/daemon/src/state.rs`'s `AppState`
//! composition-root shape (one struct of `Arc`-wrapped collaborators,
//! built once in `main`, cloned cheaply into every handler).

use crate::scaffold;
use fleet_core::{Budget, BudgetRegistry, Creature, CreatureName, Event, EventType};
use fleet_cost::CostTracker;
use fleet_creator::{BuildCheck, CreatorRun};
use fleet_credproxy::CredentialProxyManager;
use fleet_events::EventStore;
use fleet_health::HealthMonitor;
use fleet_narrator::Narrator;
use fleet_pricing::PricingLoader;
use fleet_proxy::{BudgetDecision, LlmProxy, Upstream};
use fleet_git::GitRepo;
use fleet_supervisor::{spawn as spawn_supervisor_actor, ContainerRuntime, HealthProbe, SupervisorConfig, SupervisorHandle};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};
use tokio::sync::{broadcast, RwLock as TokioRwLock};

/// How often the synchronous-budget-check cache is refreshed from the
/// (async-locked) cost tracker. The proxy's `check_budget` closure can't
/// `.await` anything, so it always reads a value that is at most this
/// stale — an accepted tradeoff, noted in `DESIGN.md`.
const BUDGET_CACHE_REFRESH: std::time::Duration = std::time::Duration::from_secs(1);

/// Capacity of the broadcast channel backing `/api/events`. Generous
/// relative to the event store's own per-subscriber queue since this one
/// only needs to outlast the slowest currently-connected SSE client.
const SSE_CHANNEL_CAPACITY: usize = 1024;

/// Everything already constructed and configured by `fleetd`, handed to
/// [`AppState::new`] to be wired together.
pub struct AppStateParams {
    /// Root directory holding one subdirectory per creature.
    pub creatures_dir: PathBuf,
    /// The shared event store.
    pub events: EventStore,
    /// The shared cost tracker.
    pub cost: CostTracker,
    /// The shared pricing loader.
    pub pricing: Arc<PricingLoader>,
    /// The shared dependency health monitor.
    pub health: Arc<HealthMonitor>,
    /// The starting global budget (overridable later via `PUT /budget`).
    pub global_budget: Budget,
    /// Raw LLM upstream client, shared by the proxy, narrator, and creator.
    pub upstream: Arc<dyn Upstream>,
    /// The narrator instance; its background loop is started separately.
    pub narrator: Arc<Narrator>,
    /// The credential-proxy manager, if this installation has one configured.
    pub credproxy: Option<Arc<CredentialProxyManager>>,
    /// Defaults applied to every supervisor this process spawns.
    pub supervisor_config: SupervisorConfig,
    /// Container runtime shared by every supervisor.
    pub container_runtime: Arc<dyn ContainerRuntime>,
    /// Health probe shared by every supervisor.
    pub health_probe: Arc<dyn HealthProbe>,
    /// Global rollback log, appended to by every supervisor.
    pub rollback_log: PathBuf,
    /// Default model the creator runs evaluations with.
    pub creator_model: String,
    /// Build check the creator's `restart` tool runs before committing.
    pub build_check: Arc<dyn BuildCheck>,
    /// First host port handed out to a newly scaffolded creature.
    pub port_range_start: u16,
}

/// The orchestrator's shared state. Cheaply clonable behind the `Arc`
/// every handler receives via axum's `State` extractor.
pub struct AppState {
    /// Root directory holding one subdirectory per creature.
    pub creatures_dir: PathBuf,
    /// The shared event store.
    pub events: EventStore,
    /// The shared cost tracker.
    pub cost: CostTracker,
    /// The shared pricing loader.
    pub pricing: Arc<PricingLoader>,
    /// The shared dependency health monitor.
    pub health: Arc<HealthMonitor>,
    /// Global and per-creature budgets. Plain `std::sync::RwLock` because
    /// the proxy's `check_budget` closure reads this synchronously.
    pub budgets: Arc<StdRwLock<BudgetRegistry>>,
    /// Per-creature daily spend, refreshed from `cost` once a second so
    /// `check_budget` has something synchronous to read.
    pub daily_cost_cache: Arc<StdRwLock<HashMap<String, Decimal>>>,
    /// One supervisor handle per known creature.
    pub supervisors: Arc<TokioRwLock<HashMap<String, SupervisorHandle>>>,
    /// Static/rediscovered creature metadata, merged with live supervisor
    /// info at response time.
    pub creatures: Arc<TokioRwLock<HashMap<String, Creature>>>,
    /// The narrator.
    pub narrator: Arc<Narrator>,
    /// The credential-proxy manager, if configured.
    pub credproxy: Option<Arc<CredentialProxyManager>>,
    /// Raw upstream client, shared with the narrator and creator runs.
    pub upstream: Arc<dyn Upstream>,
    /// The translating LLM proxy mounted at `/v1/messages`.
    pub proxy: Arc<LlmProxy>,
    /// Broadcast side of the SSE bridge; `/api/events` subscribes to this,
    /// independent of the event store's own bounded fan-out.
    pub sse_tx: broadcast::Sender<Event>,
    /// Defaults applied to every supervisor this process spawns.
    pub supervisor_config: SupervisorConfig,
    /// Container runtime shared by every supervisor.
    pub container_runtime: Arc<dyn ContainerRuntime>,
    /// Health probe shared by every supervisor.
    pub health_probe: Arc<dyn HealthProbe>,
    /// Global rollback log path.
    pub rollback_log: PathBuf,
    /// Default model for creator evaluations.
    pub creator_model: String,
    /// Build check used by creator `restart` tool calls.
    pub build_check: Arc<dyn BuildCheck>,
    next_port: AtomicU16,
}

impl AppState {
    /// Wire every collaborator together, rediscover any creatures left
    /// over from a previous run, and return the shared state ready to be
    /// mounted into a router.
    pub async fn new(params: AppStateParams) -> Arc<Self> {
        let budgets = Arc::new(StdRwLock::new(BudgetRegistry::new(params.global_budget)));
        let daily_cost_cache = Arc::new(StdRwLock::new(HashMap::new()));
        let supervisors: Arc<TokioRwLock<HashMap<String, SupervisorHandle>>> = Arc::new(TokioRwLock::new(HashMap::new()));
        let creatures: Arc<TokioRwLock<HashMap<String, Creature>>> = Arc::new(TokioRwLock::new(HashMap::new()));
        let (sse_tx, _) = broadcast::channel(SSE_CHANNEL_CAPACITY);

        let proxy = Arc::new(LlmProxy::new(
            params.upstream.clone(),
            params.cost.clone(),
            check_budget_fn(budgets.clone(), daily_cost_cache.clone()),
            on_budget_exceeded_fn(params.events.clone()),
            on_model_seen_fn(creatures.clone()),
        ));

        let state = Arc::new(Self {
            creatures_dir: params.creatures_dir,
            events: params.events,
            cost: params.cost,
            pricing: params.pricing,
            health: params.health,
            budgets,
            daily_cost_cache,
            supervisors,
            creatures,
            narrator: params.narrator,
            credproxy: params.credproxy,
            upstream: params.upstream,
            proxy,
            sse_tx,
            supervisor_config: params.supervisor_config,
            container_runtime: params.container_runtime,
            health_probe: params.health_probe,
            rollback_log: params.rollback_log,
            creator_model: params.creator_model,
            build_check: params.build_check,
            next_port: AtomicU16::new(params.port_range_start),
        });

        state.start_budget_cache_refresh();
        state.bridge_events_to_supervisors().await;
        state.bridge_events_to_sse().await;
        state.bridge_events_to_creator().await;
        state.rediscover_creatures().await;

        state
    }

    /// Hand out the next host port for a freshly scaffolded creature.
    pub fn allocate_port(&self) -> u16 {
        self.next_port.fetch_add(1, Ordering::SeqCst)
    }

    /// Spawn a supervisor for `creature` and register its handle, but do
    /// not start it — callers decide whether a fresh creature should be
    /// started immediately or a rediscovered one reconnected.
    pub async fn spawn_supervisor(&self, creature: &Creature) -> SupervisorHandle {
        let git = GitRepo::new(&creature.directory);
        let handle = spawn_supervisor_actor(
            creature,
            git,
            self.container_runtime.clone(),
            self.health_probe.clone(),
            self.events.clone(),
            self.supervisor_config.clone(),
            self.rollback_log.clone(),
        );
        self.supervisors.write().await.insert(creature.name.as_str().to_string(), handle.clone());
        handle
    }

    async fn rediscover_creatures(self: &Arc<Self>) {
        let mut dirs = match tokio::fs::read_dir(&self.creatures_dir).await {
            Ok(dirs) => dirs,
            Err(e) => {
                tracing::info!(error = %e, dir = %self.creatures_dir.display(), "no existing creatures directory to rediscover from");
                return;
            }
        };

        while let Ok(Some(entry)) = dirs.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let Some(meta) = scaffold::read_meta(&path).await else {
                continue;
            };

            let mut creature = Creature::new(CreatureName::new(&name), path.clone(), meta.port);
            creature.model = meta.model.clone();

            let git = GitRepo::new(&path);
            creature.current_sha = Some(git.current_sha().await);
            let last_good = git.last_good_sha().await;
            creature.last_good_sha = if last_good.is_empty() { None } else { Some(last_good) };

            self.creatures.write().await.insert(name.clone(), creature.clone());
            let handle = self.spawn_supervisor(&creature).await;

            tracing::info!(creature = %name, port = meta.port, "rediscovered creature, reconnecting supervisor");
            handle.start().await;
        }
    }

    fn start_budget_cache_refresh(self: &Arc<Self>) {
        let state = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(BUDGET_CACHE_REFRESH);
            loop {
                ticker.tick().await;
                let names: Vec<String> = state.creatures.read().await.keys().cloned().collect();
                let mut fresh = HashMap::with_capacity(names.len());
                for name in names {
                    let spent = state.cost.get_creature_daily_cost(&name).await;
                    fresh.insert(name, spent);
                }
                if let Ok(mut cache) = state.daily_cost_cache.write() {
                    *cache = fresh;
                }
            }
        });
    }

    /// Forward every appended event to the matching creature's supervisor
    /// so its status machine reacts to `creature.sleep`/`creature.error`/
    /// etc. without the event store knowing supervisors exist.
    async fn bridge_events_to_supervisors(&self) {
        let supervisors = self.supervisors.clone();
        self.events
            .subscribe(move |event| {
                let supervisors = supervisors.clone();
                tokio::spawn(async move {
                    if let Some(handle) = supervisors.read().await.get(&event.creature) {
                        handle.observe_event(event).await;
                    }
                });
            })
            .await;
    }

    /// Forward every appended event onto the SSE broadcast channel. This
    /// is a distinct subscription from the supervisor bridge — the event
    /// store's own fan-out is an at-least-once bounded queue per
    /// subscriber; the SSE side additionally needs the broadcast
    /// semantics `axum::response::sse` is built around.
    async fn bridge_events_to_sse(&self) {
        let sse_tx = self.sse_tx.clone();
        self.events
            .subscribe(move |event| {
                let _ = sse_tx.send(event);
            })
            .await;
    }

    /// Trigger a creator run automatically for §4.11's non-explicit
    /// triggers: a deep-sleep `creature.dream` and a creature-emitted
    /// `request_evolution`. The explicit-API-call trigger is handled by
    /// the `/creatures/:name/evolve` route directly.
    async fn bridge_events_to_creator(self: &Arc<Self>) {
        let state = self.clone();
        self.events
            .subscribe(move |event| {
                let reason = if event.is_deep_dream() {
                    Some("deep sleep".to_string())
                } else if event.event_type == EventType::RequestEvolution {
                    Some(
                        event
                            .fields
                            .get("reason")
                            .and_then(|v| v.as_str())
                            .unwrap_or("creature requested evolution")
                            .to_string(),
                    )
                } else {
                    None
                };
                let Some(reason) = reason else { return };

                let state = state.clone();
                let creature_name = event.creature.clone();
                tokio::spawn(async move {
                    let Some(creature) = state.creatures.read().await.get(&creature_name).cloned() else { return };
                    let Some(handle) = state.supervisors.read().await.get(&creature_name).cloned() else { return };
                    let log_path = creature.directory.join(".self").join("creator-log.jsonl");
                    let run = CreatorRun::new(
                        creature_name.clone(),
                        creature.directory.clone(),
                        reason,
                        state.events.clone(),
                        state.cost.clone(),
                        state.upstream.clone(),
                        handle,
                        state.build_check.clone(),
                        state.creator_model.clone(),
                        log_path,
                    );
                    if let Err(e) = run.run().await {
                        tracing::warn!(creature = %creature_name, error = %e, "auto-triggered creator run failed");
                    }
                });
            })
            .await;
    }
}

fn check_budget_fn(
    budgets: Arc<StdRwLock<BudgetRegistry>>,
    daily_cost_cache: Arc<StdRwLock<HashMap<String, Decimal>>>,
) -> impl Fn(&str) -> BudgetDecision + Send + Sync + 'static {
    move |name: &str| {
        let registry = budgets.read().unwrap_or_else(|e| e.into_inner());
        let budget = registry.effective(name);
        let spent = daily_cost_cache
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
            .unwrap_or(Decimal::ZERO);
        BudgetDecision { exceeded: budget.is_exceeded(spent), action: budget.action }
    }
}

fn on_budget_exceeded_fn(events: EventStore) -> impl Fn(&str) + Send + Sync + 'static {
    move |name: &str| {
        let events = events.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            tracing::warn!(creature = %name, "daily budget exceeded, putting creature to sleep");
            events.append(&name, Event::new(&name, EventType::BudgetExceeded)).await;
            events
                .append(&name, Event::new(&name, EventType::CreatureSleep).with_field("reason", serde_json::json!("budget")))
                .await;
        });
    }
}

fn on_model_seen_fn(creatures: Arc<TokioRwLock<HashMap<String, Creature>>>) -> impl Fn(&str, &str) + Send + Sync + 'static {
    move |name: &str, model: &str| {
        let creatures = creatures.clone();
        let name = name.to_string();
        let model = model.to_string();
        tokio::spawn(async move {
            if let Some(creature) = creatures.write().await.get_mut(&name) {
                creature.model = Some(model);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::BudgetAction;
    use rust_decimal::Decimal;

    #[test]
    fn check_budget_reads_cache_and_registry() {
        let budgets = Arc::new(StdRwLock::new(BudgetRegistry::new(Budget::new(Decimal::ONE, BudgetAction::Sleep))));
        let cache = Arc::new(StdRwLock::new(HashMap::new()));
        cache.write().unwrap().insert("alpha".to_string(), Decimal::new(2, 0));

        let check = check_budget_fn(budgets, cache);
        let decision = check("alpha");
        assert!(decision.exceeded);
        assert_eq!(decision.action, BudgetAction::Sleep);
    }

    #[test]
    fn check_budget_under_cap_not_exceeded() {
        let budgets = Arc::new(StdRwLock::new(BudgetRegistry::new(Budget::new(Decimal::TEN, BudgetAction::Sleep))));
        let cache = Arc::new(StdRwLock::new(HashMap::new()));
        cache.write().unwrap().insert("alpha".to_string(), Decimal::ONE);

        let check = check_budget_fn(budgets, cache);
        assert!(!check("alpha").exceeded);
    }
}
