//! services/api/src/web/dashboard.rs
//!
//! The read path. Every dashboard fetch reconciles lazily-evaluated state
//! (expiry, counter completion, dedup, cooldown clearance), drains the pick
//! queue while the session is active, and only then assembles the view.
//! Mutations from the sweep are persisted in a single flush, and only when
//! something actually changed, so quiet polls cost no writes.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::state::AppState;
use challenge_picker_core::{domain::Caller, projector, queue};

/// Full dashboard for a playthrough: summary, active rules with countdowns,
/// host-only pick status, and queue status.
#[utoipa::path(
    get,
    path = "/playthrough/{id}/dashboard",
    params(("id" = Uuid, Path, description = "Playthrough ID")),
    responses(
        (status = 200, description = "Dashboard view"),
        (status = 401, description = "Session requires an authenticated caller"),
        (status = 404, description = "Playthrough not found")
    )
)]
pub async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    // The read path can write (sweeps, queue drain), so it takes the same
    // per-playthrough guard as the mutating handlers.
    let _guard = state.locks.lock(id).await;
    let mut aggregate = state.repo.fetch(id).await?;
    let now = state.clock.now();

    let swept = projector::reconcile(&mut aggregate, now);
    let drained = queue::process_queue(&mut aggregate, state.catalog.as_ref(), now).await?;
    if swept || drained > 0 {
        state.repo.store(&aggregate).await?;
    }

    let dashboard = projector::project(&aggregate, &caller, now)?;
    Ok(Json(dashboard))
}
