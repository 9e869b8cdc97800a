#![deny(missing_docs)]
//! # fleet-creator — per-creature self-evaluation (§ 4.11)
//!
//! Triggered by deep sleep, an explicit API call, or a creature-emitted
//! `request_evolution` event. Runs an agentic loop scoped to one
//! creature's directory, with a tool set for inspection (shell, recent
//! events, recent dreams, status) and mutation (restart: build-check,
//! commit, ask the supervisor to restart). Ends via the model's own
//! `done` tool call rather than a stop-reason heuristic, since unlike the
//! narrator this loop always expects an explicit close.
//!
//! Like `fleet-narrator`, this is a small hand-rolled round trip over
//! [`fleet_proxy::Upstream::call_source`] rather than a port of
//! `neuron-loop`'s generic agent loop.

mod error;
/// Append-only per-creature evaluation history.
pub mod log;
mod tools;

pub use error::CreatorError;
pub use log::CreatorLogEntry;
pub use tools::{tool_definitions, BuildCheck, CommandBuildCheck, BUILD_CHECK_TIMEOUT, SHELL_TIMEOUT};

use chrono::Utc;
use fleet_core::{
    Content, ContentBlock, CreatureName, Event, EventType, Identity, Message, Role, StopReason, SystemPrompt,
    TokenUsage,
};
use fleet_cost::CostTracker;
use fleet_events::EventStore;
use fleet_proxy::Upstream;
use fleet_supervisor::SupervisorHandle;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound on agentic tool-use turns per evaluation.
pub const MAX_TURNS: u32 = 30;

const EVENT_READ_WINDOW: usize = 100;

/// One creator evaluation, fully scoped at construction.
pub struct CreatorRun {
    creature_name: String,
    creature_dir: PathBuf,
    reason: String,
    events: EventStore,
    cost: CostTracker,
    upstream: Arc<dyn Upstream>,
    supervisor: SupervisorHandle,
    build_check: Arc<dyn BuildCheck>,
    model: String,
    log_path: PathBuf,
}

impl CreatorRun {
    /// Build one evaluation run. `reason` describes why it was triggered
    /// (e.g. `"deep sleep"`, `"explicit request"`, or the creature's own
    /// `request_evolution` reason string).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        creature_name: impl Into<String>,
        creature_dir: PathBuf,
        reason: impl Into<String>,
        events: EventStore,
        cost: CostTracker,
        upstream: Arc<dyn Upstream>,
        supervisor: SupervisorHandle,
        build_check: Arc<dyn BuildCheck>,
        model: impl Into<String>,
        log_path: PathBuf,
    ) -> Self {
        Self {
            creature_name: creature_name.into(),
            creature_dir,
            reason: reason.into(),
            events,
            cost,
            upstream,
            supervisor,
            build_check,
            model: model.into(),
            log_path,
        }
    }

    /// Run the evaluation to completion (or until [`MAX_TURNS`] is hit
    /// without the model calling `done`), persist the outcome, and emit
    /// `creator.evaluation`.
    pub async fn run(self) -> Result<CreatorLogEntry, CreatorError> {
        let mut state = RunState { restarted: false, new_sha: None };
        let mut messages = vec![Message { role: Role::User, content: Content::text(self.opening_message()) }];
        let mut total = TokenUsage::default();
        let mut outcome: Option<(String, String)> = None;

        for _ in 0..MAX_TURNS {
            let request = fleet_proxy::SourceRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                system: Some(SystemPrompt::Text(system_prompt(&self.reason))),
                tools: tool_definitions(),
                max_tokens: 2048,
            };
            let body = serde_json::to_value(&request).expect("request always serializes");
            let (status, value) = self
                .upstream
                .call_source(&body)
                .await
                .map_err(|e| CreatorError::Upstream(e.to_string()))?;
            if status / 100 != 2 {
                return Err(CreatorError::Upstream(format!("upstream returned status {status}")));
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
                // The model stopped without calling `done`; nudge it once
                // more rather than silently ending the evaluation.
                messages.push(Message {
                    role: Role::User,
                    content: Content::text("Call the `done` tool to end the evaluation."),
                });
                continue;
            }

            let mut results = Vec::new();
            let mut done = false;
            for block in &content {
                if let ContentBlock::ToolUse { id, name, input } = block {
                    if name == "done" {
                        let reasoning = input.get("reasoning").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        let changed = input.get("changed").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                        outcome = Some((reasoning, changed));
                        done = true;
                        break;
                    }
                    let result = self.dispatch_tool(name, input, &mut state).await;
                    results.push(ContentBlock::ToolResult {
                        tool_use_id: id.clone(),
                        content: result.clone().unwrap_or_else(|e| e),
                        is_error: result.is_err(),
                    });
                }
            }
            if done {
                break;
            }
            messages.push(Message { role: Role::User, content: Content::Blocks(results) });
        }

        let identity = Identity::creator(&CreatureName::new(self.creature_name.clone()));
        self.cost.record(&identity, total.input_tokens, total.output_tokens, Some(&self.model)).await;

        let (reasoning, changed) = outcome.unwrap_or_else(|| {
            ("evaluation ended without calling done".to_string(), "nothing recorded".to_string())
        });

        let entry = CreatorLogEntry {
            timestamp: Utc::now(),
            reason: self.reason.clone(),
            reasoning,
            changed,
            restarted: state.restarted,
            new_sha: state.new_sha,
        };
        log::append(&self.log_path, &entry).await?;

        self.events
            .append(
                &self.creature_name,
                Event::new(self.creature_name.clone(), EventType::CreatorEvaluation)
                    .with_field("reasoning", serde_json::Value::String(entry.reasoning.clone()))
                    .with_field("changed", serde_json::Value::String(entry.changed.clone()))
                    .with_field("restarted", serde_json::Value::Bool(entry.restarted)),
            )
            .await;

        Ok(entry)
    }

    fn opening_message(&self) -> String {
        format!(
            "You are evaluating creature `{}`. Trigger reason: {}. Investigate with the tools \
             available, make any changes you judge worthwhile, and call `done` when finished.",
            self.creature_name, self.reason
        )
    }

    async fn dispatch_tool(
        &self,
        name: &str,
        input: &serde_json::Value,
        state: &mut RunState,
    ) -> Result<String, String> {
        match name {
            "shell" => {
                let command = input.get("command").and_then(|v| v.as_str()).unwrap_or_default();
                tools::run_shell(&self.creature_dir, command).await
            }
            "recent_events" => {
                let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(20) as usize;
                let events = self
                    .events
                    .read_recent(&self.creature_name, limit.max(1).min(EVENT_READ_WINDOW))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(format_events(&events))
            }
            "recent_dreams" => {
                let limit = input.get("limit").and_then(|v| v.as_u64()).unwrap_or(5) as usize;
                let events = self
                    .events
                    .read_recent(&self.creature_name, EVENT_READ_WINDOW)
                    .await
                    .map_err(|e| e.to_string())?;
                let dreams: Vec<_> =
                    events.into_iter().filter(|e| e.event_type == EventType::CreatureDream).rev().take(limit).collect();
                Ok(format_events(&dreams))
            }
            "status" => match self.supervisor.get_info().await {
                Some(info) => Ok(format!(
                    "status={} current_sha={} last_good_sha={} consecutive_failures={}",
                    info.status.as_str(),
                    info.current_sha,
                    info.last_good_sha,
                    info.consecutive_failures
                )),
                None => Err("supervisor unavailable".to_string()),
            },
            "restart" => {
                let message = input.get("commit_message").and_then(|v| v.as_str()).unwrap_or("creator: restart").to_string();
                self.build_check.check(&self.creature_dir).await?;
                match tools::commit_all(&self.creature_dir, &message).await {
                    Some(sha) => {
                        state.restarted = true;
                        state.new_sha = Some(sha.clone());
                        self.supervisor.restart().await;
                        Ok(format!("committed {sha} and requested restart"))
                    }
                    None => {
                        self.supervisor.restart().await;
                        state.restarted = true;
                        Ok("nothing to commit; requested restart".to_string())
                    }
                }
            }
            other => Err(format!("unknown tool {other}")),
        }
    }
}

struct RunState {
    restarted: bool,
    new_sha: Option<String>,
}

fn system_prompt(reason: &str) -> String {
    format!(
        "You are the creator: an evaluator for one autonomous software creature, triggered \
         because: {reason}. Use the tools available to understand recent activity, decide \
         whether the creature's source should change, and act. Call `restart` only after you're \
         confident the change is safe — it runs a build check, and only commits and restarts if \
         that check passes. Always end by calling `done`.",
    )
}

fn format_events(events: &[Event]) -> String {
    if events.is_empty() {
        return "(none)".to_string();
    }
    events
        .iter()
        .map(|e| {
            let event_type = serde_json::to_value(&e.event_type)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| "unknown".to_string());
            format!("[{}] {}: {}", e.t, event_type, serde_json::Value::Object(e.fields.clone()))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fleet_core::Creature;
    use fleet_git::GitRepo;
    use fleet_pricing::PricingLoader;
    use fleet_supervisor::{ContainerError, ContainerRuntime, ContainerSpec, ContainerState, HealthProbe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use tempfile::tempdir;

    struct AlwaysPassBuildCheck;
    #[async_trait]
    impl BuildCheck for AlwaysPassBuildCheck {
        async fn check(&self, _dir: &std::path::Path) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysFailBuildCheck;
    #[async_trait]
    impl BuildCheck for AlwaysFailBuildCheck {
        async fn check(&self, _dir: &std::path::Path) -> Result<(), String> {
            Err("compile error".to_string())
        }
    }

    struct ScriptedUpstream {
        responses: StdMutex<Vec<serde_json::Value>>,
        calls: AtomicUsize,
    }

    #[async_trait]
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
            unreachable!("creator never calls the target upstream")
        }
    }

    fn done_response(reasoning: &str, changed: &str) -> serde_json::Value {
        serde_json::json!({
            "role": "assistant",
            "content": [{"type": "tool_use", "id": "t1", "name": "done", "input": {"reasoning": reasoning, "changed": changed}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 5},
        })
    }

    fn restart_response(message: &str) -> serde_json::Value {
        serde_json::json!({
            "role": "assistant",
            "content": [{"type": "tool_use", "id": "t1", "name": "restart", "input": {"commit_message": message}}],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 5},
        })
    }

    async fn cost_tracker(dir: &std::path::Path) -> CostTracker {
        let pricing = Arc::new(PricingLoader::new(dir.join("pricing.json"), "http://unused.invalid"));
        CostTracker::new(dir.join("cost.json"), pricing).await
    }

    async fn noop_supervisor(dir: &std::path::Path) -> SupervisorHandle {
        let creature_dir = dir.join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir);
        let creature = Creature::new(fleet_core::CreatureName::new("alpha"), creature_dir.clone(), 9001);
        struct NoopRuntime;
        #[async_trait]
        impl ContainerRuntime for NoopRuntime {
            async fn is_available(&self) -> bool {
                false
            }
            async fn inspect(&self, _name: &str) -> Result<ContainerState, ContainerError> {
                Ok(ContainerState::Absent)
            }
            async fn run(&self, _spec: &ContainerSpec) -> Result<(), ContainerError> {
                Ok(())
            }
            async fn start(&self, _name: &str) -> Result<(), ContainerError> {
                Ok(())
            }
            async fn restart(&self, _name: &str) -> Result<(), ContainerError> {
                Ok(())
            }
            async fn stop(&self, _name: &str) -> Result<(), ContainerError> {
                Ok(())
            }
            async fn kill_wait_remove(&self, _name: &str) -> Result<(), ContainerError> {
                Ok(())
            }
            async fn attach_logs(&self, _name: &str) {}
        }
        struct NoopProbe;
        #[async_trait]
        impl HealthProbe for NoopProbe {
            async fn probe(&self, _port: u16) -> bool {
                false
            }
        }
        fleet_supervisor::spawn(
            &creature,
            GitRepo::new(&creature_dir),
            Arc::new(NoopRuntime),
            Arc::new(NoopProbe),
            events,
            fleet_supervisor::SupervisorConfig::default(),
            dir.join("rollbacks.jsonl"),
        )
    }

    #[tokio::test]
    async fn done_tool_ends_run_and_persists_log_entry() {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir.path());
        let cost = cost_tracker(dir.path()).await;
        let upstream = Arc::new(ScriptedUpstream {
            responses: StdMutex::new(vec![done_response("looked fine", "nothing")]),
            calls: AtomicUsize::new(0),
        });
        let supervisor = noop_supervisor(dir.path()).await;

        let run = CreatorRun::new(
            "alpha",
            creature_dir,
            "explicit request",
            events,
            cost,
            upstream,
            supervisor,
            Arc::new(AlwaysPassBuildCheck),
            "claude-3-5-sonnet",
            dir.path().join("creator-log.jsonl"),
        );
        let entry = run.run().await.unwrap();
        assert_eq!(entry.reasoning, "looked fine");
        assert!(!entry.restarted);

        let log_entries = log::read_all(&dir.path().join("creator-log.jsonl")).await.unwrap();
        assert_eq!(log_entries.len(), 1);
    }

    #[tokio::test]
    async fn failing_build_check_blocks_restart() {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir.path());
        let cost = cost_tracker(dir.path()).await;
        let upstream = Arc::new(ScriptedUpstream {
            responses: StdMutex::new(vec![
                restart_response("try a restart"),
                done_response("build failed, left it alone", "nothing"),
            ]),
            calls: AtomicUsize::new(0),
        });
        let supervisor = noop_supervisor(dir.path()).await;

        let run = CreatorRun::new(
            "alpha",
            creature_dir,
            "deep sleep",
            events,
            cost,
            upstream,
            supervisor,
            Arc::new(AlwaysFailBuildCheck),
            "claude-3-5-sonnet",
            dir.path().join("creator-log.jsonl"),
        );
        let entry = run.run().await.unwrap();
        assert!(!entry.restarted);
        assert!(entry.new_sha.is_none());
    }

    #[tokio::test]
    async fn cost_recorded_against_creator_identity() {
        let dir = tempdir().unwrap();
        let creature_dir = dir.path().join("alpha");
        tokio::fs::create_dir_all(&creature_dir).await.unwrap();
        let events = EventStore::new(dir.path());
        let cost = cost_tracker(dir.path()).await;
        let upstream = Arc::new(ScriptedUpstream {
            responses: StdMutex::new(vec![done_response("fine", "nothing")]),
            calls: AtomicUsize::new(0),
        });
        let supervisor = noop_supervisor(dir.path()).await;

        let run = CreatorRun::new(
            "alpha",
            creature_dir,
            "explicit request",
            events,
            cost.clone(),
            upstream,
            supervisor,
            Arc::new(AlwaysPassBuildCheck),
            "claude-3-5-sonnet",
            dir.path().join("creator-log.jsonl"),
        );
        run.run().await.unwrap();

        let identity = Identity::creator(&CreatureName::new("alpha"));
        let usage = cost.get(&identity).await.unwrap();
        assert_eq!(usage.input_tokens, 5);
    }
}
