#![deny(missing_docs)]
//! # fleet-supervisor — per-creature container lifecycle and rollback
//!
//! One actor per creature (§ 4.8): owns the container runtime shell-outs,
//! the health gate, SHA promotion, and the failure → rollback pipeline
//! with exponential backoff and consecutive-failure caps. Callers never
//! touch creature state directly — they send messages to a
//! [`SupervisorHandle`] and the actor task serializes everything.
//!
//! Grounded on `neuron-orch-local`'s dispatch-table shape, generalized
//! from a stateless dispatch call into a stateful actor with its own
//! inbox, and on `fleet-credproxy`'s spawn/health-poll/backoff loop.

mod actor;
/// Tunables for one supervisor: health gate, rollback timeout, backoff,
/// container-creation parameters.
pub mod config;
/// The container runtime seam (`run`/`start`/`stop`/`restart`/`inspect`/...).
pub mod container;
/// Errors surfaced by the container runtime seam.
pub mod error;
/// The creature `/healthz` probe seam.
pub mod health_probe;

pub use actor::{spawn, SupervisorHandle, SupervisorInfo};
pub use config::SupervisorConfig;
pub use container::{CliContainerRuntime, ContainerRuntime, ContainerSpec, ContainerState};
pub use error::ContainerError;
pub use health_probe::{HealthProbe, HttpHealthProbe};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::{Creature, CreatureName, CreatureStatus, Event, EventType};
    use fleet_events::EventStore;
    use fleet_git::GitRepo;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    struct MockRuntime {
        available: AtomicBool,
        state: std::sync::Mutex<ContainerState>,
        run_calls: AtomicU32,
        restart_calls: AtomicU32,
    }

    impl MockRuntime {
        fn new(state: ContainerState) -> Self {
            Self {
                available: AtomicBool::new(true),
                state: std::sync::Mutex::new(state),
                run_calls: AtomicU32::new(0),
                restart_calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContainerRuntime for MockRuntime {
        async fn is_available(&self) -> bool {
            self.available.load(Ordering::SeqCst)
        }
        async fn inspect(&self, _name: &str) -> Result<ContainerState, ContainerError> {
            Ok(*self.state.lock().unwrap())
        }
        async fn run(&self, _spec: &ContainerSpec) -> Result<(), ContainerError> {
            self.run_calls.fetch_add(1, Ordering::SeqCst);
            *self.state.lock().unwrap() = ContainerState::Running;
            Ok(())
        }
        async fn start(&self, _name: &str) -> Result<(), ContainerError> {
            *self.state.lock().unwrap() = ContainerState::Running;
            Ok(())
        }
        async fn restart(&self, _name: &str) -> Result<(), ContainerError> {
            self.restart_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn stop(&self, _name: &str) -> Result<(), ContainerError> {
            *self.state.lock().unwrap() = ContainerState::Stopped;
            Ok(())
        }
        async fn kill_wait_remove(&self, _name: &str) -> Result<(), ContainerError> {
            *self.state.lock().unwrap() = ContainerState::Absent;
            Ok(())
        }
        async fn attach_logs(&self, _name: &str) {}
    }

    struct ScriptedProbe {
        healthy: AtomicBool,
    }

    #[async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _port: u16) -> bool {
            self.healthy.load(Ordering::SeqCst)
        }
    }

    fn test_config() -> SupervisorConfig {
        SupervisorConfig {
            health_gate: std::time::Duration::from_millis(50),
            rollback_timeout: std::time::Duration::from_millis(200),
            max_consecutive_failures: 2,
            initial_backoff: std::time::Duration::from_millis(10),
            max_backoff: std::time::Duration::from_millis(50),
            ..Default::default()
        }
    }

    async fn setup(
        healthy: bool,
        container_state: ContainerState,
    ) -> (SupervisorHandle, EventStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir.path());
        let creature = Creature::new(CreatureName::new("alpha"), creature_dir.clone(), 9001);
        let runtime = Arc::new(MockRuntime::new(container_state));
        let probe = Arc::new(ScriptedProbe { healthy: AtomicBool::new(healthy) });
        let handle = spawn(
            &creature,
            GitRepo::new(&creature_dir),
            runtime,
            probe,
            events.clone(),
            test_config(),
            dir.path().join("rollbacks.jsonl"),
        );
        (handle, events, dir)
    }

    #[tokio::test]
    async fn fresh_spawn_promotes_after_sustained_health() {
        let (handle, events, _dir) = setup(true, ContainerState::Absent).await;
        handle.start().await;

        let mut promoted = false;
        for _ in 0..50 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let recent = events.read_recent("alpha", 10).await.unwrap();
            if recent.iter().any(|e| e.event_type == EventType::HostPromote) {
                promoted = true;
                break;
            }
        }
        assert!(promoted, "expected a host.promote event after sustained health");

        let info = handle.get_info().await.unwrap();
        assert_eq!(info.status, CreatureStatus::Running);
    }

    #[tokio::test]
    async fn observed_sleep_event_transitions_to_sleeping() {
        let (handle, _events, _dir) = setup(true, ContainerState::Running).await;
        handle.observe_event(Event::new("alpha", EventType::CreatureSleep)).await;
        let info = handle.get_info().await.unwrap();
        assert_eq!(info.status, CreatureStatus::Sleeping);
    }

    #[tokio::test]
    async fn wake_from_error_returns_to_running() {
        let (handle, _events, _dir) = setup(true, ContainerState::Running).await;
        handle.observe_event(Event::new("alpha", EventType::CreatureError)).await;
        assert_eq!(handle.get_info().await.unwrap().status, CreatureStatus::Error);
        handle.wake().await;
        assert_eq!(handle.get_info().await.unwrap().status, CreatureStatus::Running);
    }

    #[tokio::test]
    async fn never_healthy_spawn_rolls_back_and_emits_rollback_event() {
        let (handle, events, _dir) = setup(false, ContainerState::Absent).await;
        handle.start().await;

        let mut rolled_back = false;
        for _ in 0..60 {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            let recent = events.read_recent("alpha", 20).await.unwrap();
            if recent.iter().any(|e| e.event_type == EventType::HostRollback) {
                rolled_back = true;
                break;
            }
        }
        assert!(rolled_back, "expected a host.rollback event after a health timeout");
    }

    #[tokio::test]
    async fn infra_unavailable_skips_rollback_and_stops() {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir.path());
        let creature = Creature::new(CreatureName::new("alpha"), creature_dir.clone(), 9001);
        let runtime = Arc::new(MockRuntime::new(ContainerState::Absent));
        runtime.available.store(false, Ordering::SeqCst);
        let probe = Arc::new(ScriptedProbe { healthy: AtomicBool::new(false) });
        let handle = spawn(
            &creature,
            GitRepo::new(&creature_dir),
            runtime,
            probe,
            events.clone(),
            test_config(),
            dir.path().join("rollbacks.jsonl"),
        );
        handle.start().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let info = handle.get_info().await.unwrap();
        assert_eq!(info.status, CreatureStatus::Stopped);

        let recent = events.read_recent("alpha", 10).await.unwrap();
        assert!(recent.iter().any(|e| e.event_type == EventType::HostInfraFailure));
        assert!(!recent.iter().any(|e| e.event_type == EventType::HostRollback));
    }
}
