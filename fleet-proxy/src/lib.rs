#![deny(missing_docs)]
//! # fleet-proxy — the translating LLM gateway
//!
//! One HTTP endpoint creatures call as if it were a single provider. Model
//! prefix decides the real upstream; requests to the secondary provider
//! are translated to its response-style wire format and back. Every call
//! runs through a budget/identity admission pipeline before touching the
//! network.
//!
//! Cyclic references to the supervisor and cost tracker are resolved the
//! way `layer0`'s protocol traits are consumed elsewhere in this
//! workspace: explicit callbacks injected at construction, not a shared
//! mutable reference back into the caller.

mod error;
mod identity;
mod provider;
mod translate;
mod upstream;

pub use error::ProxyError;
pub use identity::extract_identity;
pub use provider::{infer_provider, Provider};
pub use translate::{source_to_target_request, target_response_to_source, SourceRequest, SourceResponse, TargetRequest};
pub use upstream::{HttpUpstream, Upstream};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use fleet_core::BudgetAction;
use fleet_cost::CostTracker;
use std::sync::Arc;

/// The header creatures send their identity on.
pub const IDENTITY_HEADER: &str = "x-api-key";

/// The result of a budget pre- or post-check for one creature.
#[derive(Debug, Clone, Copy)]
pub struct BudgetDecision {
    /// Whether the creature is currently over its effective daily cap.
    pub exceeded: bool,
    /// What to do about it.
    pub action: BudgetAction,
}

type CheckBudgetFn = Arc<dyn Fn(&str) -> BudgetDecision + Send + Sync>;
type OnBudgetExceededFn = Arc<dyn Fn(&str) + Send + Sync>;
type OnModelSeenFn = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// The translating proxy itself.
pub struct LlmProxy {
    upstream: Arc<dyn Upstream>,
    cost: CostTracker,
    check_budget: CheckBudgetFn,
    on_budget_exceeded: OnBudgetExceededFn,
    on_model_seen: OnModelSeenFn,
}

impl LlmProxy {
    /// Build a proxy. `check_budget`/`on_budget_exceeded`/`on_model_seen`
    /// are injected rather than held as a back-reference to the
    /// supervisor or budget registry, so this crate has no dependency
    /// cycle with `fleet-supervisor`.
    pub fn new(
        upstream: Arc<dyn Upstream>,
        cost: CostTracker,
        check_budget: impl Fn(&str) -> BudgetDecision + Send + Sync + 'static,
        on_budget_exceeded: impl Fn(&str) + Send + Sync + 'static,
        on_model_seen: impl Fn(&str, &str) + Send + Sync + 'static,
    ) -> Self {
        Self {
            upstream,
            cost,
            check_budget: Arc::new(check_budget),
            on_budget_exceeded: Arc::new(on_budget_exceeded),
            on_model_seen: Arc::new(on_model_seen),
        }
    }

    /// Run the full admission pipeline for one inbound call.
    pub async fn handle(&self, identity_header: Option<&str>, body: Bytes) -> Result<Response, ProxyError> {
        let (creature_name, identity) = extract_identity(identity_header.unwrap_or(""));

        let pre = (self.check_budget)(&creature_name);
        if pre.exceeded {
            match pre.action {
                BudgetAction::Sleep => {
                    (self.on_budget_exceeded)(&creature_name);
                    return Err(ProxyError::BudgetExceeded { creature: creature_name });
                }
                BudgetAction::Warn => {
                    tracing::warn!(creature = creature_name, "over daily budget, action=warn, allowing request");
                }
                BudgetAction::Off => {}
            }
        }

        let req: SourceRequest = serde_json::from_slice(&body).map_err(|e| ProxyError::BadRequest(e.to_string()))?;

        (self.on_model_seen)(&creature_name, &req.model);

        let (status, response_body, usage) = match infer_provider(&req.model) {
            Provider::Source => {
                let source_body = serde_json::to_value(&req).expect("request always serializes");
                let (status, value) = self.upstream.call_source(&source_body).await?;
                let usage = (status / 100 == 2).then(|| extract_source_usage(&value)).flatten();
                (status, value, usage)
            }
            Provider::Target => {
                let target_req = source_to_target_request(&req);
                let (status, value) = self.upstream.call_target(&target_req).await?;
                if status / 100 == 2 {
                    let translated = target_response_to_source(&value).map_err(|e| ProxyError::UpstreamUnreachable(e.to_string()))?;
                    let usage = Some((translated.usage.input_tokens, translated.usage.output_tokens));
                    let value = serde_json::to_value(&translated).expect("translated response always serializes");
                    (status, value, usage)
                } else {
                    (status, value, None)
                }
            }
        };

        if let Some((input_tokens, output_tokens)) = usage {
            self.cost.record(&identity, input_tokens, output_tokens, Some(&req.model)).await;
            let post = (self.check_budget)(&creature_name);
            if post.exceeded && post.action == BudgetAction::Sleep {
                (self.on_budget_exceeded)(&creature_name);
            }
        }

        let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
        Ok((status, Json(response_body)).into_response())
    }
}

fn extract_source_usage(value: &serde_json::Value) -> Option<(u64, u64)> {
    let usage = value.get("usage")?;
    let input = usage.get("input_tokens")?.as_u64()?;
    let output = usage.get("output_tokens")?.as_u64()?;
    Some((input, output))
}

async fn proxy_handler(State(proxy): State<Arc<LlmProxy>>, headers: HeaderMap, body: Bytes) -> Response {
    let identity = headers.get(IDENTITY_HEADER).and_then(|v| v.to_str().ok());
    match proxy.handle(identity, body).await {
        Ok(resp) => resp,
        Err(e) => e.into_response(),
    }
}

/// Build the router to mount at the LLM proxy's path (`/v1/messages`).
pub fn router(proxy: Arc<LlmProxy>) -> Router {
    Router::new().route("/v1/messages", post(proxy_handler)).with_state(proxy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_pricing::{PricingEntry, PricingLoader};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct MockUpstream {
        source_calls: AtomicUsize,
        target_calls: AtomicUsize,
        source_response: Mutex<(u16, serde_json::Value)>,
        target_response: Mutex<(u16, serde_json::Value)>,
    }

    #[async_trait::async_trait]
    impl Upstream for MockUpstream {
        async fn call_source(&self, _body: &serde_json::Value) -> Result<(u16, serde_json::Value), ProxyError> {
            self.source_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.source_response.lock().unwrap().clone())
        }

        async fn call_target(&self, _body: &TargetRequest) -> Result<(u16, serde_json::Value), ProxyError> {
            self.target_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.target_response.lock().unwrap().clone())
        }
    }

    async fn cost_tracker() -> CostTracker {
        let dir = tempdir().unwrap();
        let pricing = Arc::new(PricingLoader::new(dir.path().join("pricing.json"), "http://unused.invalid"));
        let mut table = std::collections::HashMap::new();
        table.insert(
            "test-model".to_string(),
            PricingEntry {
                input: "0.000001".parse().unwrap(),
                output: "0.000002".parse().unwrap(),
            },
        );
        let cache_path = dir.path().join("pricing.json");
        let mut cache = serde_json::json!({ "fetched_at": chrono::Utc::now().to_rfc3339() }).as_object().unwrap().clone();
        for (k, v) in &table {
            cache.insert(k.clone(), serde_json::to_value(v).unwrap());
        }
        tokio::fs::write(&cache_path, serde_json::to_vec(&cache).unwrap()).await.unwrap();
        pricing.load().await;
        CostTracker::new(dir.path().join("cost.json"), pricing).await
    }

    fn never_exceeded(_: &str) -> BudgetDecision {
        BudgetDecision { exceeded: false, action: BudgetAction::Sleep }
    }

    #[tokio::test]
    async fn budget_block_skips_upstream_call() {
        let upstream = Arc::new(MockUpstream {
            source_calls: AtomicUsize::new(0),
            target_calls: AtomicUsize::new(0),
            source_response: Mutex::new((200, serde_json::json!({}))),
            target_response: Mutex::new((200, serde_json::json!({}))),
        });
        let cost = cost_tracker().await;
        let exceeded_calls = Arc::new(AtomicUsize::new(0));
        let exceeded_calls_clone = exceeded_calls.clone();
        let proxy = LlmProxy::new(
            upstream.clone(),
            cost,
            |_name| BudgetDecision { exceeded: true, action: BudgetAction::Sleep },
            move |_name| {
                exceeded_calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            |_name, _model| {},
        );

        let result = proxy.handle(Some("creature:beta"), Bytes::from_static(b"{}")).await;
        assert!(matches!(result, Err(ProxyError::BudgetExceeded { .. })));
        assert_eq!(upstream.source_calls.load(Ordering::SeqCst), 0);
        assert_eq!(upstream.target_calls.load(Ordering::SeqCst), 0);
        assert_eq!(exceeded_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let upstream = Arc::new(MockUpstream {
            source_calls: AtomicUsize::new(0),
            target_calls: AtomicUsize::new(0),
            source_response: Mutex::new((200, serde_json::json!({}))),
            target_response: Mutex::new((200, serde_json::json!({}))),
        });
        let cost = cost_tracker().await;
        let proxy = LlmProxy::new(upstream, cost, never_exceeded, |_| {}, |_, _| {});

        let result = proxy.handle(Some("creature:beta"), Bytes::from_static(b"not json")).await;
        assert!(matches!(result, Err(ProxyError::BadRequest(_))));
    }

    #[tokio::test]
    async fn source_model_routes_to_source_upstream_and_records_usage() {
        let source_response = serde_json::json!({
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 1000, "output_tokens": 500},
        });
        let upstream = Arc::new(MockUpstream {
            source_calls: AtomicUsize::new(0),
            target_calls: AtomicUsize::new(0),
            source_response: Mutex::new((200, source_response)),
            target_response: Mutex::new((200, serde_json::json!({}))),
        });
        let cost = cost_tracker().await;
        let proxy = LlmProxy::new(upstream.clone(), cost.clone(), never_exceeded, |_| {}, |_, _| {});

        let body = serde_json::json!({
            "model": "claude-3-5-sonnet",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
        });
        let result = proxy.handle(Some("creature:alpha"), Bytes::from(serde_json::to_vec(&body).unwrap())).await;
        assert!(result.is_ok());
        assert_eq!(upstream.source_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.target_calls.load(Ordering::SeqCst), 0);

        let usage = cost.get(&fleet_core::Identity::from("alpha")).await.unwrap();
        assert_eq!(usage.input_tokens, 1000);
    }

    #[tokio::test]
    async fn target_model_routes_to_target_upstream_and_translates() {
        let target_response = serde_json::json!({
            "output": [
                {"type": "message", "role": "assistant", "content": [{"type": "output_text", "text": "hi"}]},
            ],
            "usage": {"input_tokens": 10, "output_tokens": 5},
        });
        let upstream = Arc::new(MockUpstream {
            source_calls: AtomicUsize::new(0),
            target_calls: AtomicUsize::new(0),
            source_response: Mutex::new((200, serde_json::json!({}))),
            target_response: Mutex::new((200, target_response)),
        });
        let cost = cost_tracker().await;
        let proxy = LlmProxy::new(upstream.clone(), cost, never_exceeded, |_| {}, |_, _| {});

        let body = serde_json::json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 100,
        });
        let result = proxy.handle(Some("creature:alpha"), Bytes::from(serde_json::to_vec(&body).unwrap())).await;
        assert!(result.is_ok());
        assert_eq!(upstream.target_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.source_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_credentials_surfaces_as_500() {
        struct NoCreds;
        #[async_trait::async_trait]
        impl Upstream for NoCreds {
            async fn call_source(&self, _body: &serde_json::Value) -> Result<(u16, serde_json::Value), ProxyError> {
                Err(ProxyError::MissingCredentials)
            }
            async fn call_target(&self, _body: &TargetRequest) -> Result<(u16, serde_json::Value), ProxyError> {
                Err(ProxyError::MissingCredentials)
            }
        }
        let cost = cost_tracker().await;
        let proxy = LlmProxy::new(Arc::new(NoCreds), cost, never_exceeded, |_| {}, |_, _| {});
        let body = serde_json::json!({"model": "claude-3-5-sonnet", "messages": [], "max_tokens": 10});
        let result = proxy.handle(Some("creature:alpha"), Bytes::from(serde_json::to_vec(&body).unwrap())).await;
        assert!(matches!(result, Err(ProxyError::MissingCredentials)));
    }
}
