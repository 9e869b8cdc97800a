//! Narration log entries produced by the Narrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One narrator run's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarrationEntry {
    pub timestamp: DateTime<Utc>,
    pub text: String,
    /// Optional per-creature one-sentence share blocks, keyed by name.
    #[serde(default)]
    pub shares: HashMap<String, String>,
    /// Creature names mentioned in `text` or `shares`.
    #[serde(default)]
    pub creatures_mentioned: Vec<String>,
    /// How many source events fed this entry.
    pub source_event_count: usize,
}

impl NarrationEntry {
    pub fn new(text: String, source_event_count: usize) -> Self {
        Self {
            timestamp: Utc::now(),
            text,
            shares: HashMap::new(),
            creatures_mentioned: Vec::new(),
            source_event_count,
        }
    }
}
