//! Errors surfaced by the narrator.

use std::path::PathBuf;

/// Failures the narrator can hit while running a summarization tick.
#[derive(Debug, thiserror::Error)]
pub enum NarratorError {
    /// Couldn't read the narration log from disk.
    #[error("failed to read narration log at {path}: {source}")]
    Read {
        /// The file that couldn't be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Couldn't persist the narration log to disk.
    #[error("failed to write narration log at {path}: {source}")]
    Write {
        /// The file that couldn't be written.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A line in the narration log wasn't valid JSON.
    #[error("failed to decode narration log entry: {0}")]
    Decode(#[from] serde_json::Error),

    /// The upstream LLM call failed or returned something unusable.
    #[error("narrator upstream call failed: {0}")]
    Upstream(String),
}
