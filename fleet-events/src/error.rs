//! Errors surfaced by the event store.

use thiserror::Error;

/// Failures from [`crate::EventStore`] operations.
///
/// Write failures are deliberately *not* part of [`crate::EventStore::append`]'s
/// return type — a creature's event can't fail to be recorded just because
/// disk is unhappy, so `append` logs and moves on. This enum exists for the
/// operations where a caller can actually act on the failure.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("failed to read events for {creature}: {source}")]
    Read {
        creature: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed event record in {creature}'s log: {source}")]
    Decode {
        creature: String,
        #[source]
        source: serde_json::Error,
    },
}
