#![deny(missing_docs)]
//! # fleet-cost — per-identity token and spend accounting
//!
//! Tracks cumulative and UTC-daily token/cost counters per identity
//! (a creature, a `creator:<name>` run, or `_narrator`), backed by a
//! [`fleet_pricing::PricingLoader`] for turning token counts into dollars,
//! and autosaving to a single JSON file on a timer.
//!
//! Grounded on `neuron-turn`'s `Decimal`-typed cost field convention and
//! `neuron-state-fs`'s persist-on-timer-plus-flush-on-drop shape.

use chrono::Utc;
use fleet_core::{Identity, UsageEntry};
use fleet_pricing::PricingLoader;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// Default autosave interval.
pub const DEFAULT_AUTOSAVE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

struct Inner {
    path: PathBuf,
    pricing: Arc<PricingLoader>,
    entries: RwLock<HashMap<String, UsageEntry>>,
    dirty: AtomicBool,
}

/// The cost tracker. Cheaply clonable; clones share the same backing state.
#[derive(Clone)]
pub struct CostTracker {
    inner: Arc<Inner>,
    autosave: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl CostTracker {
    /// Build a tracker backed by the JSON file at `path`, loading any
    /// existing entries synchronously (a missing or malformed file starts
    /// empty rather than failing construction).
    pub async fn new(path: impl Into<PathBuf>, pricing: Arc<PricingLoader>) -> Self {
        let path = path.into();
        let entries = Self::load_from_disk(&path).await;
        Self {
            inner: Arc::new(Inner {
                path,
                pricing,
                entries: RwLock::new(entries),
                dirty: AtomicBool::new(false),
            }),
            autosave: Arc::new(RwLock::new(None)),
        }
    }

    async fn load_from_disk(path: &PathBuf) -> HashMap<String, UsageEntry> {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "cost file malformed, starting empty");
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    /// Start the autosave loop on the given interval. Safe to call once;
    /// later calls are no-ops until [`Self::destroy`] stops the current one.
    pub async fn start_autosave(&self, interval: std::time::Duration) {
        let mut guard = self.autosave.write().await;
        if guard.is_some() {
            return;
        }
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if inner.dirty.swap(false, Ordering::SeqCst) {
                    if let Err(e) = Self::flush_inner(&inner).await {
                        tracing::warn!(error = %e, "cost autosave failed");
                        inner.dirty.store(true, Ordering::SeqCst);
                    }
                }
            }
        });
        *guard = Some(handle);
    }

    /// Record one call's usage against `identity`. Looks up the model's
    /// unit pricing; an unknown or absent model records tokens with zero
    /// cost rather than failing.
    pub async fn record(&self, identity: &Identity, input_tokens: u64, output_tokens: u64, model: Option<&str>) {
        let today = Utc::now().date_naive();
        let cost = match model {
            Some(m) => match self.inner.pricing.lookup_pricing(m).await {
                Some(price) => Decimal::from(input_tokens) * price.input + Decimal::from(output_tokens) * price.output,
                None => {
                    tracing::warn!(model = m, "no pricing for model, recording zero cost");
                    Decimal::ZERO
                }
            },
            None => Decimal::ZERO,
        };

        let mut entries = self.inner.entries.write().await;
        let entry = entries
            .entry(identity.as_str().to_string())
            .or_insert_with(|| UsageEntry::new(today));
        entry.record(input_tokens, output_tokens, cost, today, model);
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    /// The raw entry for one identity, if any usage has been recorded.
    pub async fn get(&self, identity: &Identity) -> Option<UsageEntry> {
        self.inner.entries.read().await.get(identity.as_str()).cloned()
    }

    /// Every identity's entry, keyed by identity string.
    pub async fn get_all(&self) -> HashMap<String, UsageEntry> {
        self.inner.entries.read().await.clone()
    }

    /// Cumulative cost across every identity.
    pub async fn get_total(&self) -> Decimal {
        self.inner.entries.read().await.values().map(|e| e.cost_usd).sum()
    }

    /// A creature's cumulative cost: its own identity plus any
    /// `creator:<name>` (or other `<prefix>:<name>`) entries.
    pub async fn get_creature_cost(&self, name: &str) -> Decimal {
        self.sum_creature(name, |e| e.cost_usd).await
    }

    /// A creature's UTC-daily cost, summed the same way as
    /// [`Self::get_creature_cost`].
    pub async fn get_creature_daily_cost(&self, name: &str) -> Decimal {
        self.sum_creature(name, |e| e.daily_cost_usd).await
    }

    async fn sum_creature(&self, name: &str, field: impl Fn(&UsageEntry) -> Decimal) -> Decimal {
        let entries = self.inner.entries.read().await;
        entries
            .iter()
            .filter(|(id, _)| belongs_to_creature(id, name))
            .map(|(_, e)| field(e))
            .sum()
    }

    /// Flush synchronously and stop the autosave loop. Safe to call
    /// multiple times.
    pub async fn destroy(&self) {
        if let Some(handle) = self.autosave.write().await.take() {
            handle.abort();
        }
        if let Err(e) = Self::flush_inner(&self.inner).await {
            tracing::error!(error = %e, "failed to flush cost data on destroy");
        }
    }

    async fn flush_inner(inner: &Inner) -> std::io::Result<()> {
        let entries = inner.entries.read().await;
        let json = serde_json::to_vec_pretty(&*entries).expect("entries always serialize");
        drop(entries);
        if let Some(parent) = inner.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&inner.path, json).await
    }
}

/// Whether identity `id` is one of `name`'s own identities: the bare
/// name, or any `<prefix>:<name>` form.
fn belongs_to_creature(id: &str, name: &str) -> bool {
    if id == name {
        return true;
    }
    match id.split_once(':') {
        Some((_, suffix)) => suffix == name,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_pricing::PricingLoader;
    use tempfile::tempdir;

    async fn tracker_with_pricing(table: HashMap<String, fleet_pricing::PricingEntry>) -> CostTracker {
        let dir = tempdir().unwrap();
        let pricing = Arc::new(PricingLoader::new(dir.path().join("pricing.json"), "http://unused.invalid"));
        // Inject the table directly; loader internals are crate-private so
        // tests rely on `lookup_pricing` seeing whatever `load()` would
        // have populated. We bypass `load()` here via the same mechanism
        // fleet-pricing's own tests use: write a fresh cache and load it.
        let cache_path = dir.path().join("pricing.json");
        let cache = serde_json::json!({
            "fetched_at": chrono::Utc::now().to_rfc3339(),
        });
        let mut cache = cache.as_object().unwrap().clone();
        for (k, v) in &table {
            cache.insert(k.clone(), serde_json::to_value(v).unwrap());
        }
        tokio::fs::write(&cache_path, serde_json::to_vec(&cache).unwrap()).await.unwrap();
        pricing.load().await;

        CostTracker::new(dir.path().join("cost.json"), pricing).await
    }

    fn entry(input: &str, output: &str) -> fleet_pricing::PricingEntry {
        fleet_pricing::PricingEntry {
            input: input.parse().unwrap(),
            output: output.parse().unwrap(),
        }
    }

    #[tokio::test]
    async fn record_computes_cost_from_pricing() {
        let mut table = HashMap::new();
        table.insert("test-model".to_string(), entry("0.000001", "0.000002"));
        let tracker = tracker_with_pricing(table).await;

        let id = Identity::from("alpha");
        tracker.record(&id, 1000, 500, Some("test-model")).await;

        let usage = tracker.get(&id).await.unwrap();
        assert_eq!(usage.calls, 1);
        assert_eq!(usage.cost_usd.to_string(), "0.002");
    }

    #[tokio::test]
    async fn unknown_model_records_zero_cost() {
        let tracker = tracker_with_pricing(HashMap::new()).await;
        let id = Identity::from("alpha");
        tracker.record(&id, 100, 50, Some("ghost-model")).await;

        let usage = tracker.get(&id).await.unwrap();
        assert_eq!(usage.cost_usd, Decimal::ZERO);
        assert_eq!(usage.input_tokens, 100);
    }

    #[tokio::test]
    async fn creature_cost_sums_prefixed_identities() {
        let mut table = HashMap::new();
        table.insert("m".to_string(), entry("1", "1"));
        let tracker = tracker_with_pricing(table).await;

        tracker.record(&Identity::from("alpha"), 1, 0, Some("m")).await;
        tracker.record(&Identity::from("creator:alpha"), 1, 0, Some("m")).await;
        tracker.record(&Identity::from("beta"), 1, 0, Some("m")).await;

        let total = tracker.get_creature_cost("alpha").await;
        assert_eq!(total, Decimal::new(2, 0));
    }

    #[tokio::test]
    async fn destroy_flushes_to_disk() {
        let mut table = HashMap::new();
        table.insert("m".to_string(), entry("1", "1"));
        let dir = tempdir().unwrap();
        let pricing = Arc::new(PricingLoader::new(dir.path().join("pricing.json"), "http://unused.invalid"));
        let cost_path = dir.path().join("cost.json");
        let tracker = CostTracker::new(&cost_path, pricing).await;
        tracker.record(&Identity::from("alpha"), 10, 10, None).await;
        tracker.destroy().await;

        let contents = tokio::fs::read_to_string(&cost_path).await.unwrap();
        assert!(contents.contains("alpha"));
    }

    #[tokio::test]
    async fn get_total_sums_every_identity() {
        let mut table = HashMap::new();
        table.insert("m".to_string(), entry("1", "0"));
        let tracker = tracker_with_pricing(table).await;
        tracker.record(&Identity::from("alpha"), 1, 0, Some("m")).await;
        tracker.record(&Identity::from("beta"), 2, 0, Some("m")).await;
        assert_eq!(tracker.get_total().await, Decimal::new(3, 0));
    }
}
