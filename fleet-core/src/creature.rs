//! The Creature data model — a named, persistent, self-modifying workload.

use crate::id::CreatureName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A creature's supervision state. See `fleet-supervisor` for the state
/// machine that drives transitions between these.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CreatureStatus {
    Stopped,
    Starting,
    Running,
    Sleeping,
    Error,
}

impl CreatureStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreatureStatus::Stopped => "stopped",
            CreatureStatus::Starting => "starting",
            CreatureStatus::Running => "running",
            CreatureStatus::Sleeping => "sleeping",
            CreatureStatus::Error => "error",
        }
    }
}

/// A named, persistent workload supervised by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Creature {
    /// Unique lowercase identifier, at most 32 characters.
    pub name: CreatureName,
    /// Directory owning `src/`, `.self/`, `.sys/`, `workspace/`.
    pub directory: PathBuf,
    /// Host-mapped port used for health checks.
    pub port: u16,
    /// Preferred model identifier, if the creature has one.
    pub model: Option<String>,
    /// Current supervision status.
    pub status: CreatureStatus,
    /// The SHA the creature's working tree is currently at.
    pub current_sha: Option<String>,
    /// The last SHA known to have passed the health gate.
    pub last_good_sha: Option<String>,
    /// Whether this creature runs inside a sandboxed container.
    pub sandboxed: bool,
    /// Why the creature is asleep, if it is (e.g. `"budget"`).
    pub sleep_reason: Option<String>,
    /// When this creature record was first created.
    pub created_at: DateTime<Utc>,
    /// When this creature record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Creature {
    /// Scaffold a fresh creature record. Supervision starts it separately.
    pub fn new(name: CreatureName, directory: PathBuf, port: u16) -> Self {
        let now = Utc::now();
        Self {
            name,
            directory,
            port,
            model: None,
            status: CreatureStatus::Stopped,
            current_sha: None,
            last_good_sha: None,
            sandboxed: true,
            sleep_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Update status and bump `updated_at`.
    pub fn set_status(&mut self, status: CreatureStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creature_starts_stopped() {
        let c = Creature::new(CreatureName::new("alpha"), PathBuf::from("/tmp/alpha"), 9001);
        assert_eq!(c.status, CreatureStatus::Stopped);
        assert!(c.current_sha.is_none());
    }

    #[test]
    fn set_status_bumps_updated_at() {
        let mut c = Creature::new(CreatureName::new("alpha"), PathBuf::from("/tmp/alpha"), 9001);
        let before = c.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        c.set_status(CreatureStatus::Running);
        assert!(c.updated_at >= before);
        assert_eq!(c.status, CreatureStatus::Running);
    }
}
