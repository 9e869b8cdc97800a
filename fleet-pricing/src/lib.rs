#![deny(missing_docs)]
//! # fleet-pricing — the model pricing table
//!
//! Loads a model→unit-cost table from a local cache file, refreshing from
//! a well-known URL when the cache is missing or stale, and resolves a
//! creature's bare model name against the upstream table's
//! provider-prefixed keys.
//!
//! Grounded on `neuron-provider-anthropic/openai`'s HTTP client builder
//! shape (reqwest client, timeout, base URL override) for the fetch path,
//! and `neuron-state-fs` for the "read cache, fall back to fetch" idiom.

use chrono::{DateTime, Utc};
use fleet_core::DependencyStatus;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;

/// The default upstream pricing table URL (LiteLLM's community-maintained
/// model cost map), overridable via config.
pub const DEFAULT_PRICING_URL: &str =
    "https://raw.githubusercontent.com/BerriAI/litellm/main/model_prices_and_context_window.json";

const CACHE_MAX_AGE: Duration = Duration::from_secs(24 * 60 * 60);
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Per-token input/output cost for one model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PricingEntry {
    /// Cost per input token, in USD.
    pub input: Decimal,
    /// Cost per output token, in USD.
    pub output: Decimal,
}

/// The fixed list of provider prefixes tried, in order, before falling
/// back to a suffix match. An empty string tries the bare model name.
const PREFIXES: &[&str] = &["", "gemini/", "vertex_ai/", "openrouter/", "openai/", "anthropic/"];

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    fetched_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    table: HashMap<String, PricingEntry>,
}

/// Loads and serves the pricing table.
pub struct PricingLoader {
    cache_path: PathBuf,
    url: String,
    http: reqwest::Client,
    table: RwLock<HashMap<String, PricingEntry>>,
    fetched_at: RwLock<Option<DateTime<Utc>>>,
    health: RwLock<DependencyStatus>,
}

impl PricingLoader {
    /// Build a loader using the cache file at `cache_path` and the given
    /// upstream URL.
    pub fn new(cache_path: impl Into<PathBuf>, url: impl Into<String>) -> Self {
        Self {
            cache_path: cache_path.into(),
            url: url.into(),
            http: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("reqwest client builds with defaults"),
            table: RwLock::new(HashMap::new()),
            fetched_at: RwLock::new(None),
            health: RwLock::new(DependencyStatus::unknown()),
        }
    }

    /// Run the startup algorithm: load from cache if fresh, else fetch and
    /// persist. Never fails the caller — on total failure the table stays
    /// empty and health is marked `down`.
    pub async fn load(&self) {
        match self.read_cache().await {
            Some(cache) if self.is_fresh(cache.fetched_at) => {
                tracing::info!(entries = cache.table.len(), "loaded pricing table from cache");
                *self.table.write().await = cache.table;
                *self.fetched_at.write().await = cache.fetched_at;
                *self.health.write().await = DependencyStatus::up(None);
                return;
            }
            cache => {
                self.refresh(cache.map(|c| c.table)).await;
            }
        }
    }

    fn is_fresh(&self, fetched_at: Option<DateTime<Utc>>) -> bool {
        match fetched_at {
            Some(t) => {
                let age = Utc::now().signed_duration_since(t);
                age.to_std().map(|d| d < CACHE_MAX_AGE).unwrap_or(false)
            }
            None => false,
        }
    }

    async fn refresh(&self, cached_table: Option<HashMap<String, PricingEntry>>) {
        match self.fetch().await {
            Ok(fresh) => {
                tracing::info!(entries = fresh.len(), "fetched pricing table");
                let now = Utc::now();
                *self.table.write().await = fresh.clone();
                *self.fetched_at.write().await = Some(now);
                *self.health.write().await = DependencyStatus::up(None);
                if let Err(e) = self.write_cache(&fresh, now).await {
                    tracing::warn!(error = %e, "failed to persist pricing cache");
                }
            }
            Err(e) => {
                if let Some(table) = cached_table {
                    tracing::warn!(error = %e, "pricing fetch failed, keeping stale cache");
                    *self.table.write().await = table;
                    *self.health.write().await = DependencyStatus::up(None);
                } else {
                    tracing::error!(error = %e, "pricing fetch failed with no cache available");
                    *self.health.write().await = DependencyStatus::down(e.to_string());
                }
            }
        }
    }

    async fn fetch(&self) -> Result<HashMap<String, PricingEntry>, FetchError> {
        let resp = self.http.get(&self.url).send().await.map_err(FetchError::Http)?;
        let resp = resp.error_for_status().map_err(FetchError::Http)?;
        let raw: HashMap<String, RawEntry> = resp.json().await.map_err(FetchError::Http)?;
        Ok(raw
            .into_iter()
            .filter_map(|(k, v)| {
                let input = v.input_cost_per_token?;
                let output = v.output_cost_per_token?;
                Some((k, PricingEntry { input, output }))
            })
            .collect())
    }

    async fn read_cache(&self) -> Option<CacheFile> {
        let contents = tokio::fs::read_to_string(&self.cache_path).await.ok()?;
        serde_json::from_str(&contents).ok()
    }

    async fn write_cache(&self, table: &HashMap<String, PricingEntry>, fetched_at: DateTime<Utc>) -> std::io::Result<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let cache = CacheFile {
            fetched_at: Some(fetched_at),
            table: table.clone(),
        };
        let json = serde_json::to_vec_pretty(&cache).expect("CacheFile always serializes");
        tokio::fs::write(&self.cache_path, json).await
    }

    /// Resolve `model`'s unit pricing: exact match, then each fixed
    /// provider prefix, then a suffix match against any key ending with
    /// `/<model>`. `None` if nothing matches.
    pub async fn lookup_pricing(&self, model: &str) -> Option<PricingEntry> {
        let table = self.table.read().await;

        if let Some(entry) = table.get(model) {
            return Some(*entry);
        }
        for prefix in PREFIXES {
            if let Some(entry) = table.get(&format!("{prefix}{model}")) {
                return Some(*entry);
            }
        }
        let suffix = format!("/{model}");
        table
            .iter()
            .find(|(k, _)| k.ends_with(&suffix))
            .map(|(_, v)| *v)
    }

    /// Current health of the pricing dependency.
    pub async fn health(&self) -> DependencyStatus {
        self.health.read().await.clone()
    }
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    input_cost_per_token: Option<Decimal>,
    output_cost_per_token: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(input: &str, output: &str) -> PricingEntry {
        PricingEntry {
            input: input.parse().unwrap(),
            output: output.parse().unwrap(),
        }
    }

    async fn loader_with_table(table: HashMap<String, PricingEntry>) -> PricingLoader {
        let dir = tempdir().unwrap();
        let loader = PricingLoader::new(dir.path().join("pricing.json"), "http://unused.invalid");
        *loader.table.write().await = table;
        loader
    }

    #[tokio::test]
    async fn exact_match_wins() {
        let mut table = HashMap::new();
        table.insert("test-model".to_string(), entry("0.000001", "0.000002"));
        let loader = loader_with_table(table).await;
        let found = loader.lookup_pricing("test-model").await.unwrap();
        assert_eq!(found.input.to_string(), "0.000001");
    }

    #[tokio::test]
    async fn prefix_match_falls_back() {
        let mut table = HashMap::new();
        table.insert("anthropic/claude-3".to_string(), entry("1", "2"));
        let loader = loader_with_table(table).await;
        assert!(loader.lookup_pricing("claude-3").await.is_some());
    }

    #[tokio::test]
    async fn suffix_match_is_last_resort() {
        let mut table = HashMap::new();
        table.insert("some-provider/custom/gpt-4o".to_string(), entry("1", "2"));
        let loader = loader_with_table(table).await;
        assert!(loader.lookup_pricing("gpt-4o").await.is_some());
    }

    #[tokio::test]
    async fn unknown_model_returns_none() {
        let loader = loader_with_table(HashMap::new()).await;
        assert!(loader.lookup_pricing("nonexistent").await.is_none());
    }

    #[tokio::test]
    async fn cache_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pricing.json");
        let mut table = HashMap::new();
        table.insert("test-model".to_string(), entry("1", "2"));
        let loader = PricingLoader::new(&path, "http://unused.invalid");
        loader.write_cache(&table, Utc::now()).await.unwrap();

        let cache = loader.read_cache().await.unwrap();
        assert_eq!(cache.table.get("test-model").unwrap().input.to_string(), "1");
        assert!(loader.is_fresh(cache.fetched_at));
    }

    #[tokio::test]
    async fn stale_cache_is_not_fresh() {
        let dir = tempdir().unwrap();
        let loader = PricingLoader::new(dir.path().join("pricing.json"), "http://unused.invalid");
        let ancient = Utc::now() - chrono::Duration::hours(25);
        assert!(!loader.is_fresh(Some(ancient)));
        assert!(!loader.is_fresh(None));
    }
}
