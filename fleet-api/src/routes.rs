//! REST handlers, mounted under `/api` (plus the LLM proxy at
//! `/v1/messages`, merged in by [`router`]).
//!
//! Grounded on `apps/inbox-autopilot/daemon/src/routes.rs`'s handler
//! shape: one small `async fn` per route, `State<Arc<AppState>>` first,
//! `Result<_, ApiError>` return type, path/query extractors doing their
//! own validation before touching state.

use crate::error::ApiError;
use crate::scaffold;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use fleet_core::{is_valid_creature_name, Budget, BudgetAction, Creature, CreatureName, Event};
use fleet_creator::CreatorRun;
use fleet_narrator::NarratorConfig;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Build the full HTTP surface: REST routes under `/api`, the SSE stream,
/// and the LLM proxy merged in at `/v1/messages`.
pub fn router(state: Arc<AppState>) -> Router {
    let proxy_router = fleet_proxy::router(state.proxy.clone());

    let api = Router::new()
        .route("/creatures", get(list_creatures).post(create_creature))
        .route("/creatures/{name}", get(get_creature))
        .route("/creatures/{name}/{action}", post(lifecycle_action))
        .route("/creatures/{name}/events", get(creature_events))
        .route("/creatures/{name}/event", post(post_creature_event))
        .route("/creatures/{name}/budget", get(get_creature_budget).put(put_creature_budget))
        .route("/creatures/{name}/evolve", post(evolve_creature))
        .route("/budget", get(get_global_budget).put(put_global_budget))
        .route("/usage", get(get_usage))
        .route("/narrator/config", get(get_narrator_config).put(put_narrator_config))
        .route("/narration", get(get_narration))
        .route("/status", get(get_status))
        .route("/health", get(get_status))
        .route("/events", get(crate::sse::stream))
        .with_state(state);

    Router::new().nest("/api", api).merge(proxy_router)
}

/// `GET /creatures` — `{name, status, model?, sha?, sleepReason?}` list.
#[derive(Debug, Serialize)]
pub struct CreatureSummary {
    name: String,
    status: fleet_core::CreatureStatus,
    model: Option<String>,
    sha: Option<String>,
    sleep_reason: Option<String>,
}

async fn summarize(state: &AppState, name: &str, creature: &Creature) -> CreatureSummary {
    let info = match state.supervisors.read().await.get(name) {
        Some(handle) => handle.get_info().await,
        None => None,
    };
    match info {
        Some(info) => CreatureSummary {
            name: info.name,
            status: info.status,
            model: creature.model.clone(),
            sha: Some(info.current_sha).filter(|s| !s.is_empty()),
            sleep_reason: creature.sleep_reason.clone(),
        },
        None => CreatureSummary {
            name: name.to_string(),
            status: creature.status,
            model: creature.model.clone(),
            sha: creature.current_sha.clone(),
            sleep_reason: creature.sleep_reason.clone(),
        },
    }
}

async fn list_creatures(State(state): State<Arc<AppState>>) -> Json<Vec<CreatureSummary>> {
    let creatures = state.creatures.read().await;
    let mut summaries = Vec::with_capacity(creatures.len());
    for (name, creature) in creatures.iter() {
        summaries.push(summarize(&state, name, creature).await);
    }
    Json(summaries)
}

/// `POST /creatures` request body.
#[derive(Debug, Deserialize)]
pub struct CreateCreatureRequest {
    name: String,
    genome: String,
    purpose: Option<String>,
    model: Option<String>,
}

async fn create_creature(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateCreatureRequest>,
) -> Result<(StatusCode, Json<CreatureSummary>), ApiError> {
    if !is_valid_creature_name(&req.name) {
        return Err(ApiError::BadRequest(format!("invalid creature name: {}", req.name)));
    }
    if state.creatures.read().await.contains_key(&req.name) {
        return Err(ApiError::Conflict(format!("creature {} already exists", req.name)));
    }

    let port = state.allocate_port();
    let directory = scaffold::scaffold(&state.creatures_dir, &req.name, &req.genome, req.purpose.as_deref(), req.model.as_deref(), port)
        .await
        .map_err(ApiError::internal)?;

    let mut creature = Creature::new(CreatureName::new(&req.name), directory, port);
    creature.model = req.model.clone();
    state.creatures.write().await.insert(req.name.clone(), creature.clone());

    let handle = state.spawn_supervisor(&creature).await;
    handle.start().await;

    let summary = summarize(&state, &req.name, &creature).await;
    Ok((StatusCode::CREATED, Json(summary)))
}

async fn lifecycle_action(
    State(state): State<Arc<AppState>>,
    Path((name, action)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if action == "archive" {
        return archive_creature(&state, &name).await;
    }

    let handle = state
        .supervisors
        .read()
        .await
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("no such creature: {name}")))?;

    match action.as_str() {
        "start" => handle.start().await,
        "stop" => handle.stop().await,
        "restart" => handle.restart().await,
        "rebuild" => handle.rebuild().await,
        "wake" => handle.wake().await,
        other => return Err(ApiError::BadRequest(format!("unknown lifecycle action: {other}"))),
    }
    Ok(StatusCode::ACCEPTED)
}

async fn archive_creature(state: &AppState, name: &str) -> Result<StatusCode, ApiError> {
    let creature = state
        .creatures
        .write()
        .await
        .remove(name)
        .ok_or_else(|| ApiError::NotFound(format!("no such creature: {name}")))?;

    if let Some(handle) = state.supervisors.write().await.remove(name) {
        handle.stop().await;
        handle.shutdown().await;
    }

    let archive_dir = state.creatures_dir.join(".archive");
    tokio::fs::create_dir_all(&archive_dir).await.map_err(ApiError::internal)?;
    let dest = archive_dir.join(name);
    tokio::fs::rename(&creature.directory, &dest).await.map_err(ApiError::internal)?;
    Ok(StatusCode::ACCEPTED)
}

async fn get_creature(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CreatureSummary>, ApiError> {
    let creatures = state.creatures.read().await;
    let creature = creatures.get(&name).ok_or_else(|| ApiError::NotFound(format!("no such creature: {name}")))?;
    Ok(Json(summarize(&state, &name, creature).await))
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    #[serde(default = "default_event_limit")]
    limit: usize,
}

fn default_event_limit() -> usize {
    100
}

async fn creature_events(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<Event>>, ApiError> {
    let events = state.events.read_recent(&name, query.limit).await.map_err(ApiError::internal)?;
    Ok(Json(events))
}

async fn post_creature_event(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(value): Json<serde_json::Value>,
) -> Result<StatusCode, ApiError> {
    let event: Event = serde_json::from_value(value).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state.events.append(&name, event).await;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Debug, Serialize)]
pub struct BudgetView {
    daily_cap_usd: Decimal,
    daily_spent_usd: Decimal,
    action: BudgetAction,
}

#[derive(Debug, Deserialize)]
pub struct BudgetUpdate {
    daily_cap_usd: Decimal,
    action: BudgetAction,
}

async fn get_creature_budget(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Json<BudgetView> {
    let spent = state.cost.get_creature_daily_cost(&name).await;
    let budget = {
        let registry = state.budgets.read().unwrap_or_else(|e| e.into_inner());
        registry.effective(&name).clone()
    };
    Json(BudgetView { daily_cap_usd: budget.daily_cap_usd, daily_spent_usd: spent, action: budget.action })
}

async fn put_creature_budget(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(update): Json<BudgetUpdate>,
) -> StatusCode {
    let mut registry = state.budgets.write().unwrap_or_else(|e| e.into_inner());
    registry.set_creature_budget(name, Budget::new(update.daily_cap_usd, update.action));
    StatusCode::OK
}

async fn get_global_budget(State(state): State<Arc<AppState>>) -> Json<BudgetView> {
    let total = state.cost.get_total().await;
    let budget = state.budgets.read().unwrap_or_else(|e| e.into_inner()).global.clone();
    Json(BudgetView { daily_cap_usd: budget.daily_cap_usd, daily_spent_usd: total, action: budget.action })
}

async fn put_global_budget(State(state): State<Arc<AppState>>, Json(update): Json<BudgetUpdate>) -> StatusCode {
    let mut registry = state.budgets.write().unwrap_or_else(|e| e.into_inner());
    registry.global = Budget::new(update.daily_cap_usd, update.action);
    StatusCode::OK
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    usage: HashMap<String, fleet_core::UsageEntry>,
    total: Decimal,
}

async fn get_usage(State(state): State<Arc<AppState>>) -> Json<UsageResponse> {
    let usage = state.cost.get_all().await;
    let total = state.cost.get_total().await;
    Json(UsageResponse { usage, total })
}

async fn get_narrator_config(State(state): State<Arc<AppState>>) -> Json<NarratorConfig> {
    Json(state.narrator.config().await)
}

async fn put_narrator_config(State(state): State<Arc<AppState>>, Json(config): Json<NarratorConfig>) -> StatusCode {
    state.narrator.set_config(config).await;
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
pub struct NarrationQuery {
    #[serde(default = "default_narration_limit")]
    limit: usize,
}

fn default_narration_limit() -> usize {
    20
}

async fn get_narration(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NarrationQuery>,
) -> Json<Vec<fleet_core::NarrationEntry>> {
    Json(state.narrator.recent_entries(query.limit).await)
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<fleet_core::HealthSnapshot> {
    Json(state.health.snapshot().await)
}

#[derive(Debug, Deserialize, Default)]
pub struct EvolveRequest {
    reason: Option<String>,
}

async fn evolve_creature(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Option<Json<EvolveRequest>>,
) -> Result<StatusCode, ApiError> {
    let creature = state
        .creatures
        .read()
        .await
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("no such creature: {name}")))?;
    let handle = state
        .supervisors
        .read()
        .await
        .get(&name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("no such creature: {name}")))?;

    let reason = body.and_then(|Json(r)| r.reason).unwrap_or_else(|| "explicit request".to_string());
    let log_path = creature.directory.join(".self").join("creator-log.jsonl");

    let run = CreatorRun::new(
        name.clone(),
        creature.directory.clone(),
        reason,
        state.events.clone(),
        state.cost.clone(),
        state.upstream.clone(),
        handle,
        state.build_check.clone(),
        state.creator_model.clone(),
        log_path,
    );

    tokio::spawn(async move {
        if let Err(e) = run.run().await {
            tracing::warn!(error = %e, "creator run failed");
        }
    });

    Ok(StatusCode::ACCEPTED)
}
