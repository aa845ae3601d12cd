//! services/api/src/web/playthroughs.rs
//!
//! Handlers for creating a playthrough and driving its lifecycle
//! (start/pause/resume/end), plus the owner-only rule toggle and the
//! privacy flag on the caller's current session.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use challenge_picker_core::{
    activation, domain::Caller, domain::Playthrough, domain::PlaythroughAggregate,
    domain::SessionConfiguration, lifecycle, projector::PlaythroughSummary, EngineError,
    EngineResult,
};

//=========================================================================================
// API Request/Response Structs
//=========================================================================================

/// The request payload for creating a playthrough.
#[derive(Deserialize, ToSchema)]
pub struct CreatePlaythroughRequest {
    pub max_concurrent_rules: Option<u32>,
    pub rule_cooldown_seconds: Option<i64>,
    pub allow_viewer_picks: Option<bool>,
    pub require_auth: Option<bool>,
    /// Raw configuration snapshot; malformed rule entries are tolerated and
    /// treated as disabled.
    #[schema(value_type = Object)]
    pub configuration: serde_json::Value,
}

#[derive(Deserialize, ToSchema)]
pub struct PrivacyRequest {
    pub require_auth: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ToggleResponse {
    pub rule_id: Uuid,
    pub is_active: bool,
}

//=========================================================================================
// Creation
//=========================================================================================

/// Create a playthrough in `setup` status for the calling user.
#[utoipa::path(
    post,
    path = "/playthroughs",
    request_body = CreatePlaythroughRequest,
    responses(
        (status = 201, description = "Playthrough created"),
        (status = 401, description = "Caller identity required"),
        (status = 422, description = "Invalid settings")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "The unique ID of the user.")
    )
)]
pub async fn create_playthrough_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<CreatePlaythroughRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = caller.user_id.ok_or(EngineError::Unauthorized)?;

    let configuration = SessionConfiguration::from_json(&req.configuration);
    let mut playthrough = Playthrough::new(owner_id, configuration);
    if let Some(cap) = req.max_concurrent_rules {
        if cap == 0 {
            return Err(EngineError::Validation(
                "max_concurrent_rules must be positive".into(),
            )
            .into());
        }
        playthrough.max_concurrent_rules = cap;
    }
    if let Some(cooldown) = req.rule_cooldown_seconds {
        if cooldown < 0 {
            return Err(EngineError::Validation(
                "rule_cooldown_seconds must not be negative".into(),
            )
            .into());
        }
        playthrough.rule_cooldown_seconds = cooldown;
    }
    if let Some(allow) = req.allow_viewer_picks {
        playthrough.allow_viewer_picks = allow;
    }
    if let Some(require) = req.require_auth {
        playthrough.require_auth = require;
    }

    let aggregate = PlaythroughAggregate::new(playthrough);
    state.repo.create(&aggregate).await?;
    info!(playthrough = %aggregate.playthrough.id, owner = %owner_id, "playthrough created");

    Ok((
        StatusCode::CREATED,
        Json(PlaythroughSummary::of(&aggregate.playthrough)),
    ))
}

//=========================================================================================
// Lifecycle Transitions
//=========================================================================================

type Transition = fn(&mut PlaythroughAggregate, &Caller, DateTime<Utc>) -> EngineResult<()>;

/// Shared load-transition-store sequence, run under the playthrough guard.
async fn apply_transition(
    state: &AppState,
    id: Uuid,
    caller: &Caller,
    transition: Transition,
) -> Result<Json<PlaythroughSummary>, ApiError> {
    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    let now = state.clock.now();
    transition(&mut aggregate, caller, now)?;
    state.repo.store(&aggregate).await?;
    Ok(Json(PlaythroughSummary::of(&aggregate.playthrough)))
}

/// Start the playthrough (`setup → active`).
#[utoipa::path(
    put,
    path = "/playthroughs/{id}/start",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    responses(
        (status = 200, description = "Playthrough started"),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Playthrough not found"),
        (status = 409, description = "Illegal transition")
    )
)]
pub async fn start_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    apply_transition(&state, id, &caller, lifecycle::start).await
}

/// Pause the playthrough (`active → paused`).
#[utoipa::path(
    put,
    path = "/playthroughs/{id}/pause",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    responses(
        (status = 200, description = "Playthrough paused"),
        (status = 409, description = "Illegal transition")
    )
)]
pub async fn pause_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    apply_transition(&state, id, &caller, lifecycle::pause).await
}

/// Resume the playthrough (`paused → active`).
#[utoipa::path(
    put,
    path = "/playthroughs/{id}/resume",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    responses(
        (status = 200, description = "Playthrough resumed"),
        (status = 409, description = "Illegal transition")
    )
)]
pub async fn resume_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    apply_transition(&state, id, &caller, lifecycle::resume).await
}

/// End the playthrough (`active|paused → completed`).
#[utoipa::path(
    put,
    path = "/playthroughs/{id}/end",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    responses(
        (status = 200, description = "Playthrough completed"),
        (status = 409, description = "Illegal transition")
    )
)]
pub async fn end_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    apply_transition(&state, id, &caller, lifecycle::complete).await
}

//=========================================================================================
// Manual Toggle & Privacy
//=========================================================================================

/// Owner-only manual enable/disable of a rule outside the pick flow.
#[utoipa::path(
    put,
    path = "/playthroughs/{id}/rules/{rule_id}/toggle",
    params(
        ("id" = Uuid, Path, description = "Playthrough ID"),
        ("rule_id" = Uuid, Path, description = "Rule ID")
    ),
    responses(
        (status = 200, description = "Rule toggled", body = ToggleResponse),
        (status = 403, description = "Caller is not the owner"),
        (status = 404, description = "Playthrough or rule not found")
    )
)]
pub async fn toggle_rule_handler(
    State(state): State<Arc<AppState>>,
    Path((id, rule_id)): Path<(Uuid, Uuid)>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    let rule = state.catalog.rule(rule_id).await?;

    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    let now = state.clock.now();
    let is_active = activation::toggle_rule(&mut aggregate, &rule, &caller, now)?;
    state.repo.store(&aggregate).await?;

    Ok(Json(ToggleResponse { rule_id, is_active }))
}

/// Set the `require_auth` flag on the caller's current playthrough.
#[utoipa::path(
    patch,
    path = "/playthrough/privacy",
    request_body = PrivacyRequest,
    responses(
        (status = 200, description = "Privacy updated"),
        (status = 401, description = "Caller identity required"),
        (status = 404, description = "No current playthrough")
    )
)]
pub async fn privacy_handler(
    State(state): State<Arc<AppState>>,
    Extension(caller): Extension<Caller>,
    Json(req): Json<PrivacyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let owner_id = caller.user_id.ok_or(EngineError::Unauthorized)?;

    // Resolve the session first, then re-fetch under its guard.
    let current = state.repo.fetch_current_for_owner(owner_id).await?;
    let id = current.playthrough.id;

    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    aggregate.playthrough.require_auth = req.require_auth;
    state.repo.store(&aggregate).await?;

    Ok(Json(PlaythroughSummary::of(&aggregate.playthrough)))
}
