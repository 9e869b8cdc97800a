#![deny(missing_docs)]
//! # fleet-health — dependency liveness monitoring
//!
//! Runs a small static set of named checks on a fixed interval, guards
//! against overlapping passes, and fans out an aggregate-status-change
//! notification to registered listeners (`fleet-api` turns these into
//! `orchestrator.status` events).
//!
//! Grounded on `neuron-runtime::tracing_hook`'s structured logging at
//! lifecycle points, generalized here to drive the change-listener
//! callback instead of only emitting a trace.

use async_trait::async_trait;
use fleet_core::{DependencyStatus, HealthSnapshot};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Default interval between health check passes.
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(15);

/// Default per-check timeout.
pub const DEFAULT_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// One pingable dependency. `check` returns the dependency's version
/// string on success, or an error string on failure — the monitor handles
/// timeouts and status-building around it.
#[async_trait]
pub trait DependencyCheck: Send + Sync {
    /// Stable name this dependency is reported under (`"docker"`,
    /// `"credential-proxy"`, `"pricing"`).
    fn name(&self) -> &str;

    /// Ping the dependency. Should return quickly; the monitor enforces
    /// its own timeout regardless.
    async fn check(&self) -> Result<Option<String>, String>;
}

type ChangeListener = dyn Fn(HealthSnapshot) + Send + Sync;

/// Runs the configured checks on an interval and maintains the last
/// snapshot.
pub struct HealthMonitor {
    checks: Vec<Arc<dyn DependencyCheck>>,
    check_timeout: Duration,
    snapshot: RwLock<HealthSnapshot>,
    listeners: RwLock<Vec<Arc<ChangeListener>>>,
    in_flight: AtomicBool,
}

impl HealthMonitor {
    /// Build a monitor over `checks`, with the default per-check timeout.
    pub fn new(checks: Vec<Arc<dyn DependencyCheck>>) -> Self {
        Self::with_timeout(checks, DEFAULT_CHECK_TIMEOUT)
    }

    /// Build a monitor with an explicit per-check timeout.
    pub fn with_timeout(checks: Vec<Arc<dyn DependencyCheck>>, check_timeout: Duration) -> Self {
        let unknown: HashMap<String, DependencyStatus> =
            checks.iter().map(|c| (c.name().to_string(), DependencyStatus::unknown())).collect();
        Self {
            checks,
            check_timeout,
            snapshot: RwLock::new(HealthSnapshot::from_map(unknown)),
            listeners: RwLock::new(Vec::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Spawn the periodic loop on `interval`. Returns the task handle; drop
    /// or abort it to stop checking.
    pub fn start(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                monitor.run_once().await;
            }
        })
    }

    /// Run one pass over every check. Skips entirely (logging at debug)
    /// if a previous pass is still in flight.
    pub async fn run_once(&self) {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            tracing::debug!("health check pass already in flight, skipping this tick");
            return;
        }

        let mut deps = HashMap::new();
        for check in &self.checks {
            let name = check.name();
            let status = match tokio::time::timeout(self.check_timeout, check.check()).await {
                Ok(Ok(version)) => DependencyStatus::up(version),
                Ok(Err(e)) => {
                    tracing::warn!(dependency = name, error = %e, "dependency check failed");
                    DependencyStatus::down(e)
                }
                Err(_) => {
                    tracing::warn!(dependency = name, "dependency check timed out");
                    DependencyStatus::down("timed out")
                }
            };
            deps.insert(name.to_string(), status);
        }

        let new_snapshot = HealthSnapshot::from_map(deps);
        let changed = {
            let current = self.snapshot.read().await;
            current.status != new_snapshot.status
        };
        *self.snapshot.write().await = new_snapshot.clone();

        if changed {
            tracing::info!(status = ?new_snapshot.status, "aggregate health status changed");
            let listeners = self.listeners.read().await;
            for listener in listeners.iter() {
                listener(new_snapshot.clone());
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// The most recent snapshot, without triggering a new pass.
    pub async fn snapshot(&self) -> HealthSnapshot {
        self.snapshot.read().await.clone()
    }

    /// Register a callback invoked whenever the aggregate status changes
    /// (`healthy` ↔ `degraded`), with a full snapshot.
    pub async fn on_change<F>(&self, listener: F)
    where
        F: Fn(HealthSnapshot) + Send + Sync + 'static,
    {
        self.listeners.write().await.push(Arc::new(listener));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::Liveness;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysUp;
    #[async_trait]
    impl DependencyCheck for AlwaysUp {
        fn name(&self) -> &str {
            "always-up"
        }
        async fn check(&self) -> Result<Option<String>, String> {
            Ok(Some("1.0".to_string()))
        }
    }

    struct AlwaysDown;
    #[async_trait]
    impl DependencyCheck for AlwaysDown {
        fn name(&self) -> &str {
            "always-down"
        }
        async fn check(&self) -> Result<Option<String>, String> {
            Err("connection refused".to_string())
        }
    }

    struct NeverReturns;
    #[async_trait]
    impl DependencyCheck for NeverReturns {
        fn name(&self) -> &str {
            "hangs"
        }
        async fn check(&self) -> Result<Option<String>, String> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(None)
        }
    }

    #[tokio::test]
    async fn all_up_checks_report_healthy() {
        let monitor = HealthMonitor::new(vec![Arc::new(AlwaysUp)]);
        monitor.run_once().await;
        let snap = monitor.snapshot().await;
        assert_eq!(snap.dependencies["always-up"].status, Liveness::Up);
    }

    #[tokio::test]
    async fn failing_check_reports_down_with_error() {
        let monitor = HealthMonitor::new(vec![Arc::new(AlwaysDown)]);
        monitor.run_once().await;
        let snap = monitor.snapshot().await;
        assert_eq!(snap.dependencies["always-down"].status, Liveness::Down);
        assert!(snap.dependencies["always-down"].error.is_some());
    }

    #[tokio::test]
    async fn slow_check_times_out() {
        let monitor = HealthMonitor::with_timeout(vec![Arc::new(NeverReturns)], Duration::from_millis(50));
        monitor.run_once().await;
        let snap = monitor.snapshot().await;
        assert_eq!(snap.dependencies["hangs"].status, Liveness::Down);
        assert_eq!(snap.dependencies["hangs"].error.as_deref(), Some("timed out"));
    }

    #[tokio::test]
    async fn status_change_invokes_listeners() {
        let monitor = Arc::new(HealthMonitor::new(vec![Arc::new(AlwaysDown)]));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        monitor.on_change(move |_snap| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }).await;

        // unknown -> degraded is a change
        monitor.run_once().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // degraded -> degraded is not
        monitor.run_once().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn overlapping_pass_is_skipped() {
        let monitor = Arc::new(HealthMonitor::with_timeout(vec![Arc::new(NeverReturns)], Duration::from_secs(10)));
        let m1 = monitor.clone();
        let first = tokio::spawn(async move { m1.run_once().await });
        tokio::task::yield_now().await;
        // Second pass should see in_flight and return immediately.
        monitor.run_once().await;
        first.abort();
    }
}
