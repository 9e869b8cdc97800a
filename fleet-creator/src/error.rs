//! Errors surfaced by a creator run.

use std::path::PathBuf;

/// Failures a creator evaluation can hit.
#[derive(Debug, thiserror::Error)]
pub enum CreatorError {
    /// Couldn't read the creature's creator log.
    #[error("failed to read creator log at {path}: {source}")]
    Read {
        /// The file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Couldn't append to the creature's creator log.
    #[error("failed to write creator log at {path}: {source}")]
    Write {
        /// The file that couldn't be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line in the creator log wasn't valid JSON.
    #[error("failed to decode creator log entry: {0}")]
    Decode(#[from] serde_json::Error),

    /// The upstream LLM call failed or returned something unusable.
    #[error("creator upstream call failed: {0}")]
    Upstream(String),
}
