//! services/api/src/web/picks.rs
//!
//! Handlers for picking a rule and for the hotkey-style counter mutations
//! on the caller's current playthrough.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use challenge_picker_core::{
    activation, domain::Caller, CounterUpdate, EngineError, EngineResult, PickOutcome,
};

//=========================================================================================
// API Request Structs
//=========================================================================================

/// The request payload for picking a rule.
#[derive(Deserialize, ToSchema)]
pub struct PickRuleRequest {
    pub rule_id: Uuid,
    pub difficulty_level: u32,
}

/// Query parameters for the counter mutation endpoints.
#[derive(Deserialize, ToSchema)]
pub struct CounterQuery {
    /// 1-based index into the active counter rules, in activation order.
    pub index: usize,
    pub amount: i32,
}

//=========================================================================================
// Handlers
//=========================================================================================

/// Pick a rule at a difficulty level.
///
/// Activates immediately when a concurrency slot is free; otherwise the
/// pick is queued and acknowledged with its queue position.
#[utoipa::path(
    post,
    path = "/playthroughs/{id}/pick-rule",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    request_body = PickRuleRequest,
    responses(
        (status = 201, description = "Rule activated"),
        (status = 202, description = "Pick queued, concurrency cap reached"),
        (status = 404, description = "Playthrough, rule, or difficulty level not found"),
        (status = 429, description = "Rate limited or rule on cooldown")
    )
)]
pub async fn pick_rule_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<PickRuleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = state.catalog.rule(req.rule_id).await?;
    let level = rule
        .level(req.difficulty_level)
        .ok_or_else(|| {
            EngineError::NotFound(format!(
                "Difficulty level {} not found for rule {}",
                req.difficulty_level, req.rule_id
            ))
        })?
        .clone();

    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    let now = state.clock.now();
    let outcome = activation::pick_rule(&mut aggregate, &rule, &level, &caller, now)?;
    state.repo.store(&aggregate).await?;

    let status = match &outcome {
        PickOutcome::Activated(_) => StatusCode::CREATED,
        PickOutcome::Queued { .. } => StatusCode::ACCEPTED,
    };
    Ok((status, Json(outcome)))
}

/// Shared load-mutate-store sequence for the counter endpoints, which
/// address the caller's current playthrough rather than a UUID.
async fn apply_counter<F>(
    state: &AppState,
    caller: &Caller,
    mutate: F,
) -> Result<Json<CounterUpdate>, ApiError>
where
    F: FnOnce(
        &mut challenge_picker_core::domain::PlaythroughAggregate,
        &Caller,
        chrono::DateTime<chrono::Utc>,
    ) -> EngineResult<CounterUpdate>,
{
    let owner_id = caller.user_id.ok_or(EngineError::Unauthorized)?;
    let current = state.repo.fetch_current_for_owner(owner_id).await?;
    let id = current.playthrough.id;

    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    let now = state.clock.now();
    let update = mutate(&mut aggregate, caller, now)?;
    state.repo.store(&aggregate).await?;
    Ok(Json(update))
}

/// Increment the Nth active counter rule. Reactivates a counter that
/// completed at 0.
#[utoipa::path(
    post,
    path = "/playthrough/counters/increment",
    params(
        ("index" = usize, Query, description = "1-based counter rule index"),
        ("amount" = i32, Query, description = "Amount to add")
    ),
    responses(
        (status = 200, description = "Counter updated"),
        (status = 401, description = "Caller identity required"),
        (status = 404, description = "No counter rule at that index")
    )
)]
pub async fn increment_counter_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<CounterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    apply_counter(&state, &caller, |aggregate, caller, now| {
        activation::increment_counter(aggregate, query.index, query.amount, caller, now)
    })
    .await
}

/// Decrement the Nth active counter rule. Clamps at 0 and completes the
/// rule when it gets there.
#[utoipa::path(
    post,
    path = "/playthrough/counters/decrement",
    params(
        ("index" = usize, Query, description = "1-based counter rule index"),
        ("amount" = i32, Query, description = "Amount to subtract")
    ),
    responses(
        (status = 200, description = "Counter updated"),
        (status = 401, description = "Caller identity required"),
        (status = 404, description = "No counter rule at that index")
    )
)]
pub async fn decrement_counter_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Query(query): Query<CounterQuery>,
) -> Result<impl IntoResponse, ApiError> {
    apply_counter(&state, &caller, |aggregate, caller, now| {
        activation::decrement_counter(aggregate, query.index, query.amount, caller, now)
    })
    .await
}
