#![deny(missing_docs)]
//! # fleet-core — shared data model for the fleet orchestrator
//!
//! Carries the types every other `fleet-*` crate shares: the creature
//! record, the event taxonomy, usage/budget accounting, health snapshots,
//! and narration entries. No I/O lives here — that's each component
//! crate's job (`fleet-events`, `fleet-cost`, `fleet-supervisor`, ...).

/// Budget configuration and evaluation.
pub mod budget;
/// Chat protocol content types (text, tool use, tool result).
pub mod content;
/// The Creature record and its status enum.
pub mod creature;
/// Shared, cross-cutting error types.
pub mod error;
/// The Event record and its closed type taxonomy.
pub mod event;
/// Dependency health snapshots.
pub mod health;
/// Typed identifiers.
pub mod id;
/// Narration log entries.
pub mod narration;
/// Per-identity usage accounting.
pub mod usage;

pub use budget::{Budget, BudgetAction, BudgetRegistry};
pub use content::{Content, ContentBlock, Message, Role, StopReason, SystemPrompt, SystemTextBlock, TokenUsage, ToolDefinition};
pub use creature::{Creature, CreatureStatus};
pub use event::{Event, EventType};
pub use health::{AggregateStatus, DependencyStatus, HealthSnapshot, Liveness};
pub use id::{is_valid_creature_name, CreatureName, Identity};
pub use narration::NarrationEntry;
pub use usage::UsageEntry;
