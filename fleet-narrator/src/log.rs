//! The narration log: an append-only, size-capped history of entries.
//!
//! Grounded on `fleet-cost`'s persist-whole-state-on-write shape — the
//! in-memory deque is the source of truth and every append rewrites the
//! backing file, which is simple and fine at this log's bounded size.

use crate::error::NarratorError;
use fleet_core::NarrationEntry;
use std::collections::VecDeque;
use std::path::PathBuf;
use tokio::sync::RwLock;

/// Narration entries beyond this count are dropped, oldest first.
pub const MAX_ENTRIES: usize = 500;

/// The persisted narration history.
pub struct NarrationLog {
    path: PathBuf,
    entries: RwLock<VecDeque<NarrationEntry>>,
}

impl NarrationLog {
    /// Load the narration log from `path`, or start empty if it doesn't
    /// exist yet.
    pub async fn load(path: PathBuf) -> Result<Self, NarratorError> {
        let entries = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let mut entries = VecDeque::new();
                for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                    entries.push_back(serde_json::from_str::<NarrationEntry>(line)?);
                }
                entries
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => VecDeque::new(),
            Err(source) => return Err(NarratorError::Read { path, source }),
        };
        Ok(Self { path, entries: RwLock::new(entries) })
    }

    /// Append one entry, truncating the oldest entries past [`MAX_ENTRIES`],
    /// and rewrite the backing file.
    pub async fn append(&self, entry: NarrationEntry) -> Result<(), NarratorError> {
        let mut entries = self.entries.write().await;
        entries.push_back(entry);
        while entries.len() > MAX_ENTRIES {
            entries.pop_front();
        }
        let mut contents = String::new();
        for entry in entries.iter() {
            contents.push_str(&serde_json::to_string(entry)?);
            contents.push('\n');
        }
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| NarratorError::Write { path: self.path.clone(), source })?;
        }
        tokio::fs::write(&self.path, contents)
            .await
            .map_err(|source| NarratorError::Write { path: self.path.clone(), source })
    }

    /// The most recent `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<NarrationEntry> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Entries whose text contains `query` (case-insensitive), most recent
    /// first, capped at `limit`.
    pub async fn search(&self, query: &str, limit: usize) -> Vec<NarrationEntry> {
        let needle = query.to_lowercase();
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .filter(|e| e.text.to_lowercase().contains(&needle))
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(text: &str) -> NarrationEntry {
        NarrationEntry::new(text.to_string(), 1)
    }

    #[tokio::test]
    async fn appends_and_reads_back_recent() {
        let dir = tempdir().unwrap();
        let log = NarrationLog::load(dir.path().join("narration.jsonl")).await.unwrap();
        log.append(entry("alpha dreamed of rivers")).await.unwrap();
        log.append(entry("beta woke up")).await.unwrap();

        let reloaded = NarrationLog::load(dir.path().join("narration.jsonl")).await.unwrap();
        let recent = reloaded.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].text, "alpha dreamed of rivers");
        assert_eq!(recent[1].text, "beta woke up");
    }

    #[tokio::test]
    async fn truncates_past_max_entries() {
        let dir = tempdir().unwrap();
        let log = NarrationLog::load(dir.path().join("narration.jsonl")).await.unwrap();
        for i in 0..(MAX_ENTRIES + 10) {
            log.append(entry(&format!("entry {i}"))).await.unwrap();
        }
        let recent = log.recent(MAX_ENTRIES + 10).await;
        assert_eq!(recent.len(), MAX_ENTRIES);
        assert_eq!(recent[0].text, "entry 10");
    }

    #[tokio::test]
    async fn search_is_case_insensitive_and_newest_first() {
        let dir = tempdir().unwrap();
        let log = NarrationLog::load(dir.path().join("narration.jsonl")).await.unwrap();
        log.append(entry("alpha explored the Garden")).await.unwrap();
        log.append(entry("beta slept")).await.unwrap();
        log.append(entry("gamma entered the garden again")).await.unwrap();

        let hits = log.search("garden", 10).await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].text, "gamma entered the garden again");
    }

    #[tokio::test]
    async fn missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let log = NarrationLog::load(dir.path().join("nope.jsonl")).await.unwrap();
        assert!(log.recent(10).await.is_empty());
    }
}
