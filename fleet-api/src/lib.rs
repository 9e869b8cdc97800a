#![deny(missing_docs)]
//! # fleet-api — the orchestrator's REST + SSE surface (§ 4.9)
//!
//! Composes every other `fleet-*` crate into one HTTP listener:
//! `/api/*` REST routes for the dashboard, a live `/api/events` SSE
//! stream, and the translating LLM proxy mounted at `/v1/messages`.
//! `fleetd` owns process boot (reading env, constructing each
//! collaborator); this crate owns wiring them into one `Router` once
//! they exist.
//!
//! Grounded on `apps/inbox-autopilot/daemon`'s `state`/`routes`/`error`
//! module split — the closest example of an axum composition root over a
//! set of independently-testable backend crates.

/// Request errors and their HTTP rendering.
pub mod error;
/// Minimal on-disk scaffold for a freshly created creature.
pub mod scaffold;
/// The `/api/events` SSE stream.
pub mod sse;
/// Shared state and the boot-time wiring between collaborators.
pub mod state;

mod routes;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateParams};
