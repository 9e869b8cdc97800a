//! Dependency health snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Liveness state of a single external dependency.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Up,
    Down,
    Unknown,
}

/// A dependency's last-known status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub status: Liveness,
    pub last_check: DateTime<Utc>,
    pub error: Option<String>,
    pub version: Option<String>,
}

impl DependencyStatus {
    pub fn unknown() -> Self {
        Self {
            status: Liveness::Unknown,
            last_check: Utc::now(),
            error: None,
            version: None,
        }
    }

    pub fn up(version: Option<String>) -> Self {
        Self {
            status: Liveness::Up,
            last_check: Utc::now(),
            error: None,
            version,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: Liveness::Down,
            last_check: Utc::now(),
            error: Some(error.into()),
            version: None,
        }
    }
}

/// Aggregate health: `Healthy` iff every dependency is `Up`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AggregateStatus {
    Healthy,
    Degraded,
}

/// A full snapshot of dependency health, as published on `/api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: AggregateStatus,
    pub dependencies: HashMap<String, DependencyStatus>,
}

impl HealthSnapshot {
    pub fn from_map(dependencies: HashMap<String, DependencyStatus>) -> Self {
        let healthy = dependencies
            .values()
            .all(|d| d.status == Liveness::Up);
        Self {
            status: if healthy {
                AggregateStatus::Healthy
            } else {
                AggregateStatus::Degraded
            },
            dependencies,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_up_is_healthy() {
        let mut deps = HashMap::new();
        deps.insert("docker".to_string(), DependencyStatus::up(None));
        deps.insert("pricing".to_string(), DependencyStatus::up(Some("1.0".into())));
        let snap = HealthSnapshot::from_map(deps);
        assert_eq!(snap.status, AggregateStatus::Healthy);
    }

    #[test]
    fn any_down_is_degraded() {
        let mut deps = HashMap::new();
        deps.insert("docker".to_string(), DependencyStatus::up(None));
        deps.insert("pricing".to_string(), DependencyStatus::down("timeout"));
        let snap = HealthSnapshot::from_map(deps);
        assert_eq!(snap.status, AggregateStatus::Degraded);
    }

    #[test]
    fn empty_map_is_healthy() {
        let snap = HealthSnapshot::from_map(HashMap::new());
        assert_eq!(snap.status, AggregateStatus::Healthy);
    }
}
