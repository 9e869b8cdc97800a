#![deny(missing_docs)]
//! # fleet-narrator — periodic event summarization (§ 4.10)
//!
//! A single background loop: every `interval_minutes`, gather interesting
//! events recorded since the last run across every creature, hand them to
//! an LLM alongside a fixed investigation tool set, and persist whatever
//! comes back as one narration entry.
//!
//! The agentic tool-use loop here is deliberately a small hand-rolled
//! round trip over [`fleet_proxy::Upstream::call_source`] rather than a
//! port of `neuron-loop`'s generic `AgentLoop<P, C>` — this crate always
//! speaks the source wire format to one upstream and needs none of that
//! crate's pluggable provider/context-strategy machinery.

mod error;
mod log;
mod tools;

pub use error::NarratorError;
pub use log::{NarrationLog, MAX_ENTRIES};
pub use tools::{tool_definitions, FsNarratorTools, NarratorTools, DEFAULT_GIT_LOG_LIMIT, NARRATOR_TOOL_TIMEOUT};

use chrono::{DateTime, Utc};
use fleet_core::{Content, ContentBlock, Event, Identity, Message, NarrationEntry, Role, StopReason, SystemPrompt, TokenUsage};
use fleet_cost::CostTracker;
use fleet_events::EventStore;
use fleet_proxy::Upstream;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Delay before the first tick after startup.
pub const INITIAL_DELAY: std::time::Duration = std::time::Duration::from_secs(15);

/// Upper bound on agentic tool-use rounds per tick.
pub const MAX_ROUNDS: u32 = 5;

/// How many past events (per creature) the narrator scans for "interesting"
/// ones each tick. The tail is bounded, not the window — a creature that's
/// been quiet for days still only costs one cheap read.
const EVENT_SCAN_WINDOW: usize = 200;

const NARRATOR_MODEL_FALLBACK: &str = "claude-3-5-haiku-latest";

/// Live-editable narrator configuration, exposed over `GET/PUT
/// /api/narrator/config`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarratorConfig {
    /// Whether the background loop runs at all.
    pub enabled: bool,
    /// Which model narrates.
    pub model: String,
    /// Tick interval, in minutes.
    pub interval_minutes: u32,
}

impl Default for NarratorConfig {
    fn default() -> Self {
        Self { enabled: true, model: NARRATOR_MODEL_FALLBACK.to_string(), interval_minutes: 30 }
    }
}

struct Inner {
    config: RwLock<NarratorConfig>,
    events: EventStore,
    cost: CostTracker,
    upstream: Arc<dyn Upstream>,
    tools: Arc<dyn NarratorTools>,
    log: NarrationLog,
    ticking: AtomicBool,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

/// The narrator. Cheaply clonable; clones share the same backing state.
#[derive(Clone)]
pub struct Narrator {
    inner: Arc<Inner>,
}

impl Narrator {
    /// Build a narrator. `log_path` is where narration entries persist.
    pub async fn new(
        config: NarratorConfig,
        events: EventStore,
        cost: CostTracker,
        upstream: Arc<dyn Upstream>,
        tools: Arc<dyn NarratorTools>,
        log_path: std::path::PathBuf,
    ) -> Result<Self, NarratorError> {
        let log = NarrationLog::load(log_path).await?;
        Ok(Self {
            inner: Arc::new(Inner {
                config: RwLock::new(config),
                events,
                cost,
                upstream,
                tools,
                log,
                ticking: AtomicBool::new(false),
                last_run: Mutex::new(None),
            }),
        })
    }

    /// Current configuration.
    pub async fn config(&self) -> NarratorConfig {
        self.inner.config.read().await.clone()
    }

    /// Replace the configuration. Takes effect on the next tick.
    pub async fn set_config(&self, config: NarratorConfig) {
        *self.inner.config.write().await = config;
    }

    /// Recent narration entries, oldest first.
    pub async fn recent_entries(&self, limit: usize) -> Vec<NarrationEntry> {
        self.inner.log.recent(limit).await
    }

    /// Start the background tick loop. Honors `shutdown`: a `true` value
    /// aborts the in-flight LLM call (by simply not awaiting it further —
    /// the task is dropped) and stops scheduling new ticks.
    pub fn start(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let narrator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(INITIAL_DELAY) => {}
                _ = shutdown.changed() => return,
            }
            loop {
                let interval_minutes = narrator.config().await.interval_minutes.max(1);
                let interval = std::time::Duration::from_secs(u64::from(interval_minutes) * 60);

                if narrator.config().await.enabled {
                    tokio::select! {
                        _ = narrator.run_once() => {}
                        _ = shutdown.changed() => return,
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown.changed() => return,
                }
            }
        })
    }

    /// Run one tick immediately, skipping it if a tick is already in
    /// flight (single-flight guard for manually-triggered runs racing the
    /// scheduled loop).
    pub async fn run_once(&self) {
        if self.inner.ticking.swap(true, Ordering::SeqCst) {
            tracing::debug!("narrator tick already in flight, skipping");
            return;
        }
        if let Err(e) = self.tick().await {
            tracing::warn!(error = %e, "narrator tick failed");
        }
        self.inner.ticking.store(false, Ordering::SeqCst);
    }

    async fn tick(&self) -> Result<(), NarratorError> {
        let since = *self.inner.last_run.lock().await;
        let interesting = self.gather_interesting_events(since).await;
        if interesting.is_empty() {
            tracing::debug!("no interesting events since last run, skipping narration");
            *self.inner.last_run.lock().await = Some(Utc::now());
            return Ok(());
        }

        let model = self.inner.config.read().await.model.clone();
        let recent_entries = self.inner.log.recent(5).await;
        let user_message = format_user_message(&interesting, &recent_entries);

        let (text, usage) = self.run_agentic_loop(&model, user_message).await?;
        *self.inner.last_run.lock().await = Some(Utc::now());

        self.inner
            .cost
            .record(&Identity::narrator(), usage.input_tokens, usage.output_tokens, Some(&model))
            .await;

        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("skip") {
            tracing::debug!("narrator chose to skip this tick");
            return Ok(());
        }

        let (prose, shares) = extract_share_block(trimmed);
        let creature_names = self.inner.tools.list_creatures().await;
        let creatures_mentioned = mentioned_creatures(&prose, &creature_names);

        let entry = NarrationEntry {
            timestamp: Utc::now(),
            text: prose,
            shares,
            creatures_mentioned,
            source_event_count: interesting.len(),
        };
        self.inner.log.append(entry).await?;
        self.inner
            .events
            .append("_narrator", Event::new("_narrator", fleet_core::EventType::NarratorEntry))
            .await;
        Ok(())
    }

    async fn gather_interesting_events(&self, since: Option<DateTime<Utc>>) -> Vec<Event> {
        let mut interesting = Vec::new();
        for name in self.inner.tools.list_creatures().await {
            let Ok(recent) = self.inner.events.read_recent(&name, EVENT_SCAN_WINDOW).await else {
                continue;
            };
            for event in recent {
                if since.is_none_or(|cutoff| event.t > cutoff) && event.is_narrator_interesting() {
                    interesting.push(event);
                }
            }
        }
        interesting.sort_by_key(|e| e.t);
        interesting
    }

    async fn run_agentic_loop(&self, model: &str, user_message: String) -> Result<(String, TokenUsage), NarratorError> {
        let mut messages = vec![Message { role: Role::User, content: Content::text(user_message) }];
        let mut total = TokenUsage::default();

        for _ in 0..MAX_ROUNDS {
            let request = fleet_proxy::SourceRequest {
                model: model.to_string(),
                messages: messages.clone(),
                system: Some(SystemPrompt::Text(system_prompt())),
                tools: tool_definitions(),
                max_tokens: 1024,
            };
            let body = serde_json::to_value(&request).expect("request always serializes");
            let (status, value) = self
                .inner
                .upstream
                .call_source(&body)
                .await
                .map_err(|e| NarratorError::Upstream(e.to_string()))?;
            if status / 100 != 2 {
                return Err(NarratorError::Upstream(format!("upstream returned status {status}")));
            }

            let content: Vec<ContentBlock> =
                serde_json::from_value(value.get("content").cloned().unwrap_or_default()).unwrap_or_default();
            let stop_reason: StopReason = value
                .get("stop_reason")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or(StopReason::EndTurn);
            let usage: TokenUsage =
                value.get("usage").cloned().and_then(|v| serde_json::from_value(v).ok()).unwrap_or_default();
            total.input_tokens += usage.input_tokens;
            total.output_tokens += usage.output_tokens;

            messages.push(Message { role: Role::Assistant, content: Content::Blocks(content.clone()) });

            if stop_reason != StopReason::ToolUse {
                return Ok((Content::Blocks(content).text_concat(), total));
            }

            let mut results = Vec::new();
            for block in &content {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    let outcome = self.dispatch_tool(name, input).await;
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: outcome.clone().unwrap_or_else(|e| e),
                        is_error: outcome.is_err(),
                    });
                }
            }
            messages.push(Message { role: Role::User, content: Content::Blocks(results) });
        }

        Ok(("SKIP".to_string(), total))
    }

    async fn dispatch_tool(&self, name: &str, input: &serde_json::Value) -> Result<String, String> {
        let get_str = |key: &str| input.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let get_u32 = |key: &str| input.get(key).and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        match name {
            "read_file" => self.inner.tools.read_file(&get_str("creature"), &get_str("path")).await,
            "git_log" => self.inner.tools.git_log(&get_str("creature"), get_u32("limit")).await,
            "git_diff" => self.inner.tools.git_diff(&get_str("creature"), &get_str("sha")).await,
            "list_creatures" => Ok(self.inner.tools.list_creatures().await.join("\n")),
            "search_narration" => {
                let limit = get_u32("limit").max(1) as usize;
                let hits = self.inner.log.search(&get_str("query"), limit).await;
                Ok(hits.into_iter().map(|e| format!("[{}] {}", e.timestamp, e.text)).collect::<Vec<_>>().join("\n\n"))
            }
            other => Err(format!("unknown tool {other}")),
        }
    }
}

fn system_prompt() -> String {
    "You narrate the activity of a fleet of autonomous software creatures for a human operator. \
     You will be given a batch of recent interesting events and your own last few entries for \
     continuity. Investigate with the tools available if useful, then respond with concise prose \
     (a few sentences per creature mentioned). If nothing worth narrating happened, respond with \
     exactly SKIP and nothing else. Otherwise end your response with a fenced JSON code block \
     containing a flat object mapping creature names to a one-line shareable summary, e.g. \
     ```json\n{\"alpha\": \"alpha refactored its scheduler\"}\n```"
        .to_string()
}

fn format_user_message(events: &[Event], recent_entries: &[NarrationEntry]) -> String {
    let mut out = String::new();
    out.push_str("## Recent narration entries\n");
    if recent_entries.is_empty() {
        out.push_str("(none yet)\n");
    }
    for entry in recent_entries {
        out.push_str(&format!("- [{}] {}\n", entry.timestamp, entry.text));
    }
    out.push_str("\n## New events\n");
    for event in events {
        let fields = serde_json::Value::Object(event.fields.clone());
        let event_type = serde_json::to_value(&event.event_type)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        out.push_str(&format!("- [{}] {} {}: {}\n", event.t, event.creature, event_type, fields));
    }
    out
}

/// Extracts the trailing fenced JSON share block from narrator prose,
/// returning the prose with the block stripped and the parsed map (empty
/// if none was found or it didn't parse).
fn extract_share_block(text: &str) -> (String, std::collections::HashMap<String, String>) {
    let re = Regex::new(r"```(?:json)?\s*(\{[\s\S]*?\})\s*```").expect("static regex is valid");
    if let Some(caps) = re.captures(text) {
        let json = &caps[1];
        let shares = serde_json::from_str(json).unwrap_or_default();
        let prose = re.replace(text, "").trim().to_string();
        (prose, shares)
    } else {
        (text.trim().to_string(), std::collections::HashMap::new())
    }
}

fn mentioned_creatures(text: &str, creature_names: &[String]) -> Vec<String> {
    let lower = text.to_lowercase();
    creature_names
        .iter()
        .filter(|name| contains_whole_word(&lower, &name.to_lowercase()))
        .cloned()
        .collect()
}

/// Whether `needle` occurs in `haystack` as a standalone identifier: not
/// immediately preceded or followed by another alphanumeric, `-`, or `_`
/// character. A plain, allocation-free substitute for a per-name `\b...\b`
/// regex, since creature names are checked one-by-one every narration tick.
fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let abs = start + pos;
        let before_ok = haystack[..abs].chars().next_back().map(|c| !is_identifier_char(c)).unwrap_or(true);
        let after_ok = haystack[abs + needle.len()..].chars().next().map(|c| !is_identifier_char(c)).unwrap_or(true);
        if before_ok && after_ok {
            return true;
        }
        start = abs + 1;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::EventType;
    use fleet_pricing::PricingLoader;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct MockTools {
        creatures: Vec<String>,
    }

    #[async_trait::async_trait]
    impl NarratorTools for MockTools {
        async fn read_file(&self, _creature: &str, _path: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn git_log(&self, _creature: &str, _limit: u32) -> Result<String, String> {
            Ok(String::new())
        }
        async fn git_diff(&self, _creature: &str, _sha: &str) -> Result<String, String> {
            Ok(String::new())
        }
        async fn list_creatures(&self) -> Vec<String> {
            self.creatures.clone()
        }
    }

    struct ScriptedUpstream {
        responses: StdMutex<Vec<serde_json::Value>>,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Upstream for ScriptedUpstream {
        async fn call_source(
            &self,
            _body: &serde_json::Value,
        ) -> Result<(u16, serde_json::Value), fleet_proxy::ProxyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                panic!("upstream called more times than scripted");
            }
            Ok((200, responses.remove(0)))
        }
        async fn call_target(
            &self,
            _body: &fleet_proxy::TargetRequest,
        ) -> Result<(u16, serde_json::Value), fleet_proxy::ProxyError> {
            unreachable!("narrator never calls the target upstream")
        }
    }

    async fn cost_tracker(dir: &std::path::Path) -> CostTracker {
        let pricing = Arc::new(PricingLoader::new(dir.join("pricing.json"), "http://unused.invalid"));
        CostTracker::new(dir.join("cost.json"), pricing).await
    }

    fn end_turn_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": text}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 10, "output_tokens": 5},
        })
    }

    #[tokio::test]
    async fn skip_response_suppresses_narration_entry() {
        let dir = tempdir().unwrap();
        let events = EventStore::new(dir.path());
        events
            .append("alpha", Event::new("alpha", EventType::CreatureDream))
            .await;
        let cost = cost_tracker(dir.path()).await;
        let upstream = Arc::new(ScriptedUpstream {
            responses: StdMutex::new(vec![end_turn_response("SKIP")]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(MockTools { creatures: vec!["alpha".to_string()] });
        let narrator = Narrator::new(
            NarratorConfig::default(),
            events,
            cost,
            upstream,
            tools,
            dir.path().join("narration.jsonl"),
        )
        .await
        .unwrap();

        narrator.run_once().await;
        assert!(narrator.recent_entries(10).await.is_empty());
    }

    #[tokio::test]
    async fn narration_entry_extracts_share_block_and_mentions() {
        let dir = tempdir().unwrap();
        let events = EventStore::new(dir.path());
        events
            .append("alpha", Event::new("alpha", EventType::CreatureDream))
            .await;
        let cost = cost_tracker(dir.path()).await;
        let text = "Alpha spent the night refactoring its scheduler.\n```json\n{\"alpha\": \"alpha refactored its scheduler\"}\n```";
        let upstream = Arc::new(ScriptedUpstream {
            responses: StdMutex::new(vec![end_turn_response(text)]),
            calls: AtomicUsize::new(0),
        });
        let tools = Arc::new(MockTools { creatures: vec!["alpha".to_string()] });
        let narrator = Narrator::new(
            NarratorConfig::default(),
            events,
            cost,
            upstream,
            tools,
            dir.path().join("narration.jsonl"),
        )
        .await
        .unwrap();

        narrator.run_once().await;
        let entries = narrator.recent_entries(10).await;
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].text.contains("```"));
        assert_eq!(entries[0].creatures_mentioned, vec!["alpha".to_string()]);
        assert_eq!(entries[0].shares.get("alpha").unwrap(), "alpha refactored its scheduler");

        let cost_entry = narrator.inner.cost.get(&Identity::narrator()).await.unwrap();
        assert_eq!(cost_entry.input_tokens, 10);
    }

    #[tokio::test]
    async fn no_interesting_events_skips_upstream_call() {
        let dir = tempdir().unwrap();
        let events = EventStore::new(dir.path());
        let cost = cost_tracker(dir.path()).await;
        let upstream = Arc::new(ScriptedUpstream { responses: StdMutex::new(vec![]), calls: AtomicUsize::new(0) });
        let tools = Arc::new(MockTools { creatures: vec![] });
        let narrator = Narrator::new(
            NarratorConfig::default(),
            events,
            cost,
            upstream.clone(),
            tools,
            dir.path().join("narration.jsonl"),
        )
        .await
        .unwrap();

        narrator.run_once().await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn mentioned_creatures_matches_whole_words_only() {
        let names = vec!["alpha".to_string(), "alphabet".to_string()];
        let mentioned = mentioned_creatures("alpha woke up", &names);
        assert_eq!(mentioned, vec!["alpha".to_string()]);
    }

    #[test]
    fn extract_share_block_handles_missing_block() {
        let (prose, shares) = extract_share_block("just plain prose, nothing fenced");
        assert_eq!(prose, "just plain prose, nothing fenced");
        assert!(shares.is_empty());
    }
}
