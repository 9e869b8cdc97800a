//! The creator log: an append-only JSONL history of evaluations, one
//! file per creature. Unlike the narrator's narration log this has no
//! size cap — a creature's own evolution history is meant to be kept in
//! full.

use crate::error::CreatorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One creator evaluation's outcome, as persisted to `creator-log.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatorLogEntry {
    /// When the evaluation ran.
    pub timestamp: DateTime<Utc>,
    /// Why the creator ran (dream, explicit call, or `request_evolution` reason).
    pub reason: String,
    /// The model's closing reasoning, from the `done` tool call.
    pub reasoning: String,
    /// The model's summary of what changed, from the `done` tool call.
    pub changed: String,
    /// Whether the `restart` tool was invoked and succeeded.
    pub restarted: bool,
    /// The new commit SHA, if the restart tool committed one.
    pub new_sha: Option<String>,
}

/// Append one entry to `path`, creating the file and its parent
/// directory if needed.
pub async fn append(path: &PathBuf, entry: &CreatorLogEntry) -> Result<(), CreatorError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| CreatorError::Write { path: path.clone(), source })?;
    }
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');

    use tokio::io::AsyncWriteExt;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|source| CreatorError::Write { path: path.clone(), source })?;
    file.write_all(line.as_bytes())
        .await
        .map_err(|source| CreatorError::Write { path: path.clone(), source })
}

/// Read every entry from `path`, oldest first. Empty if the file doesn't
/// exist yet.
pub async fn read_all(path: &PathBuf) -> Result<Vec<CreatorLogEntry>, CreatorError> {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(CreatorError::from))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(source) => Err(CreatorError::Read { path: path.clone(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(reason: &str) -> CreatorLogEntry {
        CreatorLogEntry {
            timestamp: Utc::now(),
            reason: reason.to_string(),
            reasoning: "because".to_string(),
            changed: "nothing".to_string(),
            restarted: false,
            new_sha: None,
        }
    }

    #[tokio::test]
    async fn appends_without_truncation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("creator-log.jsonl");
        for i in 0..5 {
            append(&path, &entry(&format!("reason {i}"))).await.unwrap();
        }
        let entries = read_all(&path).await.unwrap();
        assert_eq!(entries.len(), 5);
        assert_eq!(entries[0].reason, "reason 0");
        assert_eq!(entries[4].reason, "reason 4");
    }

    #[tokio::test]
    async fn missing_file_reads_empty() {
        let dir = tempdir().unwrap();
        let entries = read_all(&dir.path().join("nope.jsonl")).await.unwrap();
        assert!(entries.is_empty());
    }
}
