//! The per-creature actor: single-threaded ownership of one creature's
//! supervision state, driven by messages on its own inbox. Grounded on
//! the callback-injection pattern already used by `fleet-proxy::LlmProxy`
//! for cyclic dependencies, and on `fleet-credproxy`'s
//! spawn/health-poll/backoff supervision loop, generalized here to a full
//! state machine instead of a single up/down flag.

use crate::config::SupervisorConfig;
use crate::container::{ContainerRuntime, ContainerSpec, ContainerState};
use crate::health_probe::HealthProbe;
use fleet_core::{Creature, CreatureStatus, Event, EventType};
use fleet_events::EventStore;
use fleet_git::GitRepo;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

/// A read-only snapshot of one supervisor's state, for `GET /creatures`
/// and friends.
#[derive(Debug, Clone)]
pub struct SupervisorInfo {
    /// The creature's name.
    pub name: String,
    /// Current supervision status.
    pub status: CreatureStatus,
    /// The SHA the working tree is currently at.
    pub current_sha: String,
    /// The last SHA known to have passed the health gate.
    pub last_good_sha: String,
    /// Consecutive failures since the last successful promotion.
    pub consecutive_failures: u32,
}

pub(crate) enum Command {
    Start,
    Stop,
    Restart,
    Rebuild,
    Wake,
    ObserveEvent(Event),
    Shutdown,
    GetInfo(oneshot::Sender<SupervisorInfo>),
}

/// A handle to a running supervisor actor. Cheaply clonable; every clone
/// talks to the same underlying actor task.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    /// Run the start/reconnect algorithm: attach to an already-running
    /// container, start a stopped one, or create fresh.
    pub async fn start(&self) {
        let _ = self.tx.send(Command::Start).await;
    }

    /// Stop the creature's container and transition to `stopped`.
    pub async fn stop(&self) {
        let _ = self.tx.send(Command::Stop).await;
    }

    /// Restart the existing container in place (writable layer preserved).
    pub async fn restart(&self) {
        let _ = self.tx.send(Command::Restart).await;
    }

    /// Destroy and recreate the container from scratch. Operator-only.
    pub async fn rebuild(&self) {
        let _ = self.tx.send(Command::Rebuild).await;
    }

    /// Force a `sleeping`/`error` creature back to `running`.
    pub async fn wake(&self) {
        let _ = self.tx.send(Command::Wake).await;
    }

    /// Feed an observed event for this creature into the state machine.
    /// The supervisor does not read the event store itself; callers (the
    /// event store's subscriber bus, or the API layer) push events here.
    pub async fn observe_event(&self, event: Event) {
        let _ = self.tx.send(Command::ObserveEvent(event)).await;
    }

    /// Stop accepting new restart attempts; let any in-flight spawn reach
    /// a stable state instead of being torn down mid-transition.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    /// A snapshot of this creature's current supervision state.
    pub async fn get_info(&self) -> Option<SupervisorInfo> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::GetInfo(tx)).await.ok()?;
        rx.await.ok()
    }
}

#[derive(Serialize)]
struct RollbackRecord<'a> {
    t: chrono::DateTime<chrono::Utc>,
    creature: &'a str,
    from: &'a str,
    to: &'a str,
    reason: &'a str,
}

struct Actor {
    name: String,
    creature_dir: std::path::PathBuf,
    port: u16,
    model: Option<String>,
    git: GitRepo,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    events: EventStore,
    config: SupervisorConfig,
    global_rollback_log: std::path::PathBuf,

    status: CreatureStatus,
    current_sha: String,
    last_good_sha: String,
    consecutive_failures: u32,
    healthy_at: Option<Instant>,
    spawn_deadline: Option<Instant>,
    shutting_down: bool,
}

impl Actor {
    fn container_name(&self) -> String {
        format!("creature-{}", self.name)
    }

    fn info(&self) -> SupervisorInfo {
        SupervisorInfo {
            name: self.name.clone(),
            status: self.status,
            current_sha: self.current_sha.clone(),
            last_good_sha: self.last_good_sha.clone(),
            consecutive_failures: self.consecutive_failures,
        }
    }

    async fn emit(&self, event_type: EventType, fields: serde_json::Map<String, serde_json::Value>) {
        let mut event = Event::new(self.name.clone(), event_type);
        event.fields = fields;
        self.events.append(&self.name, event).await;
    }

    fn container_env(&self) -> HashMap<String, String> {
        let orchestrator_url = self
            .config
            .host_orchestrator_url
            .clone()
            .unwrap_or_else(|| self.config.orchestrator_url.clone());
        let mut env = HashMap::new();
        env.insert("FLEET_ORCHESTRATOR_URL".to_string(), orchestrator_url);
        env.insert("FLEET_CREATURE_NAME".to_string(), self.name.clone());
        env.insert("FLEET_API_KEY".to_string(), format!("creature:{}", self.name));
        if let Some(model) = &self.model {
            env.insert("FLEET_MODEL".to_string(), model.clone());
        }
        env
    }

    fn container_spec(&self) -> ContainerSpec {
        let bind_mount = self
            .config
            .host_bind_mount_root
            .as_ref()
            .map(|root| root.join(&self.name))
            .unwrap_or_else(|| self.creature_dir.clone());

        ContainerSpec {
            name: self.container_name(),
            image: self.config.container_image.clone(),
            bind_mount,
            cache_volume: format!("creature-{}-cache", self.name),
            host_port: self.port,
            internal_port: self.config.internal_port,
            cpu_limit: self.config.cpu_limit.clone(),
            memory_limit: self.config.memory_limit.clone(),
            env: self.container_env(),
        }
    }

    /// Steps 1-6 of the start/reconnect algorithm.
    async fn do_start(&mut self) {
        if !self.runtime.is_available().await {
            self.status = CreatureStatus::Stopped;
            self.emit(EventType::HostInfraFailure, fields(&[("reason", "container runtime unreachable")])).await;
            return;
        }

        self.current_sha = self.git.current_sha().await;
        self.last_good_sha = self.git.last_good_sha().await;

        let name = self.container_name();
        let state = self.runtime.inspect(&name).await.unwrap_or(ContainerState::Absent);
        let fresh = match state {
            ContainerState::Running => {
                self.runtime.attach_logs(&name).await;
                false
            }
            ContainerState::Stopped => {
                if self.runtime.start(&name).await.is_ok() {
                    self.runtime.attach_logs(&name).await;
                }
                false
            }
            ContainerState::Absent => {
                let spec = self.container_spec();
                let _ = self.runtime.run(&spec).await;
                true
            }
        };

        if fresh {
            self.emit(EventType::HostSpawn, fields(&[("sha", self.current_sha.as_str())])).await;
        }

        self.healthy_at = None;
        self.spawn_deadline = Some(Instant::now() + self.config.rollback_timeout);
        self.status = CreatureStatus::Starting;
    }

    async fn do_stop(&mut self) {
        let name = self.container_name();
        let _ = self.runtime.stop(&name).await;
        self.healthy_at = None;
        self.spawn_deadline = None;
        self.status = CreatureStatus::Stopped;
    }

    async fn do_restart(&mut self) {
        let name = self.container_name();
        let state = self.runtime.inspect(&name).await.unwrap_or(ContainerState::Absent);
        if state == ContainerState::Absent {
            self.do_start().await;
            return;
        }
        let _ = self.runtime.restart(&name).await;
        self.healthy_at = None;
        self.spawn_deadline = Some(Instant::now() + self.config.rollback_timeout);
        self.status = CreatureStatus::Starting;
    }

    async fn do_rebuild(&mut self) {
        let name = self.container_name();
        let _ = self.runtime.kill_wait_remove(&name).await;

        self.current_sha = self.git.current_sha().await;
        self.last_good_sha = self.git.last_good_sha().await;
        let spec = self.container_spec();
        let _ = self.runtime.run(&spec).await;
        self.emit(EventType::HostSpawn, fields(&[("sha", self.current_sha.as_str())])).await;

        self.healthy_at = None;
        self.spawn_deadline = Some(Instant::now() + self.config.rollback_timeout);
        self.status = CreatureStatus::Starting;
    }

    fn do_wake(&mut self) {
        if matches!(self.status, CreatureStatus::Sleeping | CreatureStatus::Error) {
            self.status = CreatureStatus::Running;
        }
    }

    fn observe_event(&mut self, event: &Event) {
        match event.event_type {
            EventType::CreatureSleep => self.status = CreatureStatus::Sleeping,
            EventType::CreatureToolCall | EventType::CreatureThought => {
                if matches!(self.status, CreatureStatus::Sleeping | CreatureStatus::Error) {
                    self.status = CreatureStatus::Running;
                }
            }
            EventType::CreatureError => self.status = CreatureStatus::Error,
            _ => {}
        }
    }

    /// Runs once a second while `starting`: advances the health gate and
    /// the rollback timer.
    async fn tick_health(&mut self) {
        if self.status != CreatureStatus::Starting {
            return;
        }
        let ok = self.probe.probe(self.port).await;

        match self.healthy_at {
            None => {
                if ok {
                    self.healthy_at = Some(Instant::now());
                } else if let Some(deadline) = self.spawn_deadline {
                    if Instant::now() >= deadline {
                        self.handle_failure("health timeout").await;
                    }
                }
            }
            Some(since) => {
                if !ok {
                    // Sustained-success window resets on any flap; the
                    // rollback deadline keeps ticking toward its own timeout.
                    self.healthy_at = None;
                } else if Instant::now().duration_since(since) >= self.config.health_gate {
                    self.promote().await;
                }
            }
        }
    }

    async fn promote(&mut self) {
        self.healthy_at = None;
        self.spawn_deadline = None;
        self.git.set_last_good_sha(&self.current_sha).await;
        self.last_good_sha = self.current_sha.clone();
        self.consecutive_failures = 0;
        self.status = CreatureStatus::Running;
        self.emit(EventType::HostPromote, fields(&[("sha", self.current_sha.as_str())])).await;
    }

    /// The seven-step failure handler.
    async fn handle_failure(&mut self, reason: &str) {
        // 1. Infra guard.
        if !self.runtime.is_available().await {
            self.status = CreatureStatus::Stopped;
            self.healthy_at = None;
            self.spawn_deadline = None;
            self.emit(EventType::HostInfraFailure, fields(&[("reason", reason)])).await;
            return;
        }

        // 2. Same-SHA guard: whether a code rollback is needed at all.
        let needs_code_rollback = self.current_sha != self.last_good_sha && !self.last_good_sha.is_empty();

        // 3. Emit + record the rollback regardless of whether a code
        // rollback is actually needed.
        self.emit(
            EventType::HostRollback,
            fields(&[("from", self.current_sha.as_str()), ("to", self.last_good_sha.as_str()), ("reason", reason)]),
        )
        .await;
        self.append_rollback_record(reason).await;

        // 4. Bound-check consecutive failures.
        self.consecutive_failures += 1;
        if self.consecutive_failures > self.config.max_consecutive_failures {
            self.status = CreatureStatus::Stopped;
            self.healthy_at = None;
            self.spawn_deadline = None;
            return;
        }

        if self.shutting_down {
            self.status = CreatureStatus::Stopped;
            self.healthy_at = None;
            self.spawn_deadline = None;
            return;
        }

        // 5. Reset the working tree if a code rollback is needed.
        if needs_code_rollback {
            self.git.reset_to_sha(&self.last_good_sha).await;
            self.current_sha = self.last_good_sha.clone();
        }

        // 6-7. Prefer restart over recreate, after an exponential backoff.
        let backoff = self.backoff_for(self.consecutive_failures);
        tokio::time::sleep(backoff).await;

        let name = self.container_name();
        let state = self.runtime.inspect(&name).await.unwrap_or(ContainerState::Absent);
        match state {
            ContainerState::Absent => {
                let spec = self.container_spec();
                let _ = self.runtime.run(&spec).await;
            }
            _ => {
                let _ = self.runtime.restart(&name).await;
            }
        }

        self.healthy_at = None;
        self.spawn_deadline = Some(Instant::now() + self.config.rollback_timeout);
        self.status = CreatureStatus::Starting;
    }

    fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let doubled = self.config.initial_backoff.saturating_mul(1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX));
        doubled.min(self.config.max_backoff)
    }

    async fn append_rollback_record(&self, reason: &str) {
        let record = RollbackRecord {
            t: chrono::Utc::now(),
            creature: &self.name,
            from: &self.current_sha,
            to: &self.last_good_sha,
            reason,
        };
        let line = match serde_json::to_vec(&record) {
            Ok(mut bytes) => {
                bytes.push(b'\n');
                bytes
            }
            Err(e) => {
                tracing::warn!(creature = %self.name, error = %e, "failed to encode rollback record");
                return;
            }
        };
        self.append_jsonl(&self.creature_dir.join(".sys").join("rollbacks.jsonl"), &line).await;
        self.append_jsonl(&self.global_rollback_log, &line).await;
    }

    async fn append_jsonl(&self, path: &std::path::Path, line: &[u8]) {
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(creature = %self.name, path = %path.display(), error = %e, "failed to create rollback log directory");
                return;
            }
        }
        match tokio::fs::OpenOptions::new().create(true).append(true).open(path).await {
            Ok(mut file) => {
                use tokio::io::AsyncWriteExt;
                if let Err(e) = file.write_all(line).await {
                    tracing::warn!(creature = %self.name, path = %path.display(), error = %e, "failed to append rollback record");
                }
            }
            Err(e) => {
                tracing::warn!(creature = %self.name, path = %path.display(), error = %e, "failed to open rollback log");
            }
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        let mut health_ticker = tokio::time::interval(std::time::Duration::from_secs(1));
        health_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        Some(Command::Start) => self.do_start().await,
                        Some(Command::Stop) => self.do_stop().await,
                        Some(Command::Restart) => self.do_restart().await,
                        Some(Command::Rebuild) => self.do_rebuild().await,
                        Some(Command::Wake) => self.do_wake(),
                        Some(Command::ObserveEvent(event)) => self.observe_event(&event),
                        Some(Command::Shutdown) => self.shutting_down = true,
                        Some(Command::GetInfo(tx)) => { let _ = tx.send(self.info()); }
                        None => break,
                    }
                }
                _ = health_ticker.tick() => {
                    self.tick_health().await;
                }
            }
        }
    }
}

fn fields(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string()))).collect()
}

/// Spawn a supervisor actor for `creature`, returning a handle to it.
/// The actor owns all mutable state; callers only ever talk to it
/// through the handle.
pub fn spawn(
    creature: &Creature,
    git: GitRepo,
    runtime: Arc<dyn ContainerRuntime>,
    probe: Arc<dyn HealthProbe>,
    events: EventStore,
    config: SupervisorConfig,
    global_rollback_log: std::path::PathBuf,
) -> SupervisorHandle {
    let (tx, rx) = mpsc::channel(64);
    let actor = Actor {
        name: creature.name.as_str().to_string(),
        creature_dir: creature.directory.clone(),
        port: creature.port,
        model: creature.model.clone(),
        git,
        runtime,
        probe,
        events,
        config,
        global_rollback_log,
        status: creature.status,
        current_sha: creature.current_sha.clone().unwrap_or_default(),
        last_good_sha: creature.last_good_sha.clone().unwrap_or_default(),
        consecutive_failures: 0,
        healthy_at: None,
        spawn_deadline: None,
        shutting_down: false,
    };
    tokio::spawn(actor.run(rx));
    SupervisorHandle { tx }
}
