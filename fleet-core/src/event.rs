//! The Event data model — a tagged, append-only record of creature activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed taxonomy of event types. Serializes to/from the dotted
/// wire strings (`"host.spawn"`, `"creature.thought"`, ...) the rest of
/// the system (event log lines, SSE payloads) uses.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    #[serde(rename = "host.spawn")]
    HostSpawn,
    #[serde(rename = "host.promote")]
    HostPromote,
    #[serde(rename = "host.rollback")]
    HostRollback,
    #[serde(rename = "host.infra_failure")]
    HostInfraFailure,
    #[serde(rename = "creature.boot")]
    CreatureBoot,
    #[serde(rename = "creature.thought")]
    CreatureThought,
    #[serde(rename = "creature.tool_call")]
    CreatureToolCall,
    #[serde(rename = "creature.sleep")]
    CreatureSleep,
    #[serde(rename = "creature.wake")]
    CreatureWake,
    #[serde(rename = "creature.dream")]
    CreatureDream,
    #[serde(rename = "creature.progress_check")]
    CreatureProgressCheck,
    #[serde(rename = "creature.self_evaluation")]
    CreatureSelfEvaluation,
    #[serde(rename = "creator.evaluation")]
    CreatorEvaluation,
    #[serde(rename = "creature.error")]
    CreatureError,
    #[serde(rename = "budget.exceeded")]
    BudgetExceeded,
    #[serde(rename = "budget.reset")]
    BudgetReset,
    #[serde(rename = "narrator.entry")]
    NarratorEntry,
    #[serde(rename = "orchestrator.status")]
    OrchestratorStatus,
    /// A creature's own request that the creator evaluate it now. Not
    /// named among §3's closed taxonomy, but required by §4.11's trigger
    /// (c); reconciled in `DESIGN.md`.
    #[serde(rename = "request_evolution")]
    RequestEvolution,
}

impl EventType {
    /// Whether this event type is part of the narrator's "interesting
    /// events" subset (see `spec.md` §4.10). `creature.thought` is handled
    /// separately since it additionally requires a length threshold.
    pub fn is_narrator_interesting(&self) -> bool {
        matches!(
            self,
            EventType::CreatureDream
                | EventType::CreatureSleep
                | EventType::CreatureSelfEvaluation
                | EventType::CreatorEvaluation
                | EventType::CreatureWake
                | EventType::BudgetExceeded
                | EventType::BudgetReset
        )
    }
}

/// A tagged record produced by a creature, or by the orchestrator about one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Stable id distinct from per-creature ordering; lets SSE clients and
    /// the durable log dedupe/resume without relying on line offsets.
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// The creature this event is about, or `"_narrator"`.
    pub creature: String,
    /// When the event was recorded. Stamped by the event store if absent.
    #[serde(default = "Utc::now")]
    pub t: DateTime<Utc>,
    /// The event's type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Type-specific fields, as a JSON object.
    #[serde(default, flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// Construct a new event with the current time, no extra fields.
    pub fn new(creature: impl Into<String>, event_type: EventType) -> Self {
        Self {
            id: Uuid::new_v4(),
            creature: creature.into(),
            t: Utc::now(),
            event_type,
            fields: serde_json::Map::new(),
        }
    }

    /// Builder-style: attach a field.
    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Whether this is a `creature.dream` event marking a deep-sleep
    /// consolidation boundary, the creator's trigger (a) per §4.11.
    pub fn is_deep_dream(&self) -> bool {
        self.event_type == EventType::CreatureDream && self.fields.get("deep").and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Whether this counts toward the narrator's "interesting" set,
    /// including the `creature.thought` length-threshold rule.
    pub fn is_narrator_interesting(&self) -> bool {
        if self.event_type.is_narrator_interesting() {
            return true;
        }
        if self.event_type == EventType::CreatureThought {
            let len = self
                .fields
                .get("text")
                .and_then(|v| v.as_str())
                .map(str::len)
                .unwrap_or(0);
            return len > 20;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_type_roundtrips_wire_string() {
        let json = serde_json::to_string(&EventType::HostSpawn).unwrap();
        assert_eq!(json, "\"host.spawn\"");
        let back: EventType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, EventType::HostSpawn);
    }

    #[test]
    fn thought_interesting_only_above_threshold() {
        let short = Event::new("alpha", EventType::CreatureThought)
            .with_field("text", serde_json::json!("short"));
        assert!(!short.is_narrator_interesting());

        let long = Event::new("alpha", EventType::CreatureThought).with_field(
            "text",
            serde_json::json!("this is a much longer thought than twenty characters"),
        );
        assert!(long.is_narrator_interesting());
    }

    #[test]
    fn dream_always_interesting() {
        let e = Event::new("alpha", EventType::CreatureDream);
        assert!(e.is_narrator_interesting());
    }

    #[test]
    fn only_deep_dream_is_deep_dream() {
        let shallow = Event::new("alpha", EventType::CreatureDream);
        assert!(!shallow.is_deep_dream());

        let deep = Event::new("alpha", EventType::CreatureDream).with_field("deep", serde_json::json!(true));
        assert!(deep.is_deep_dream());

        let other = Event::new("alpha", EventType::CreatureSleep).with_field("deep", serde_json::json!(true));
        assert!(!other.is_deep_dream());
    }

    #[test]
    fn event_serializes_flattened_fields() {
        let e = Event::new("alpha", EventType::HostPromote).with_field("sha", serde_json::json!("abc123"));
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["sha"], serde_json::json!("abc123"));
        assert_eq!(v["type"], serde_json::json!("host.promote"));
    }
}
