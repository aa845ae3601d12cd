//! crates/challenge_picker_core/src/projector.rs
//!
//! The read side: reconciles lazily-evaluated state (expiry, counter
//! completion, duplicate activations, cooldown clearance) and assembles the
//! view model consumed by host/viewer/overlay clients.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activation::GLOBAL_PICK_INTERVAL_SECONDS;
use crate::domain::{Caller, PlaythroughAggregate, PlaythroughStatus, RuleBehavior};
use crate::error::{EngineError, EngineResult};
use crate::lifecycle;
use crate::queue::{self, QueueStatus};

//=========================================================================================
// View Model
//=========================================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    pub playthrough: PlaythroughSummary,
    pub active_rules: Vec<ActiveRuleView>,
    /// Present only for the host, and only while the session is active.
    pub pick_status: Option<PickStatus>,
    pub queue: QueueStatus,
    pub is_host: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlaythroughSummary {
    pub id: Uuid,
    pub status: PlaythroughStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
    pub total_duration_seconds: Option<i64>,
    pub max_concurrent_rules: u32,
    pub rule_cooldown_seconds: i64,
    pub allow_viewer_picks: bool,
    pub require_auth: bool,
}

impl PlaythroughSummary {
    pub fn of(playthrough: &crate::domain::Playthrough) -> Self {
        Self {
            id: playthrough.id,
            status: playthrough.status,
            started_at: playthrough.started_at,
            paused_at: playthrough.paused_at,
            ended_at: playthrough.ended_at,
            total_paused_seconds: playthrough.total_paused_seconds,
            total_duration_seconds: playthrough.total_duration_seconds,
            max_concurrent_rules: playthrough.max_concurrent_rules,
            rule_cooldown_seconds: playthrough.rule_cooldown_seconds,
            allow_viewer_picks: playthrough.allow_viewer_picks,
            require_auth: playthrough.require_auth,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveRuleView {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub behavior: RuleBehavior,
    pub is_default: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Frozen at the pause instant while the session is paused.
    pub time_remaining_seconds: Option<i64>,
    pub current_amount: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PickStatus {
    pub can_pick: bool,
    pub rate_limit_seconds_remaining: f64,
    pub cooldowns: Vec<CooldownView>,
    /// Enabled non-default rules currently neither active nor cooling.
    pub available_rule_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CooldownView {
    pub rule_id: Uuid,
    pub seconds_remaining: i64,
}

//=========================================================================================
// Reconcile (lazy, read-triggered mutation)
//=========================================================================================

/// Idempotent housekeeping sweep, invoked before every dashboard read and
/// usable from an optional background ticker. Returns whether anything
/// changed so the caller can skip the flush on quiet polls.
///
/// Expiry and dedup are corrective, never user-visible errors.
pub fn reconcile(agg: &mut PlaythroughAggregate, now: DateTime<Utc>) -> bool {
    let status = agg.playthrough.status;
    if status != PlaythroughStatus::Active && status != PlaythroughStatus::Paused {
        return false;
    }

    let mut changed = lifecycle::ensure_default_rule_states(agg, now);

    // Time-based expiry only ticks while active; a paused session's
    // countdowns are frozen.
    if status == PlaythroughStatus::Active {
        for state in agg.rule_states.iter_mut().filter(|s| s.is_active) {
            if let Some(expires_at) = state.expires_at {
                if expires_at < now {
                    state.deactivate(now);
                    changed = true;
                    debug!(rule = %state.rule_id, "rule expired");
                }
            }
        }
    }

    for state in agg.rule_states.iter_mut().filter(|s| s.is_active) {
        if let Some(amount) = state.current_amount {
            if amount <= 0 {
                state.deactivate(now);
                changed = true;
                debug!(rule = %state.rule_id, "counter rule completed");
            }
        }
    }

    changed |= dedup_active_states(agg, now);
    changed |= agg.playthrough.sweep_cooldowns(now);
    changed
}

/// Heals duplicate activations: at most one active state may exist per rule
/// id; the earliest-activated wins. A duplicate is a defect being repaired,
/// not a user error.
fn dedup_active_states(agg: &mut PlaythroughAggregate, now: DateTime<Utc>) -> bool {
    let mut earliest: HashMap<Uuid, usize> = HashMap::new();
    let mut extras: Vec<usize> = Vec::new();

    for (i, state) in agg.rule_states.iter().enumerate() {
        if !state.is_active {
            continue;
        }
        match earliest.get(&state.rule_id) {
            None => {
                earliest.insert(state.rule_id, i);
            }
            Some(&kept) => {
                if state.started_at < agg.rule_states[kept].started_at {
                    extras.push(kept);
                    earliest.insert(state.rule_id, i);
                } else {
                    extras.push(i);
                }
            }
        }
    }

    for &i in &extras {
        let state = &mut agg.rule_states[i];
        warn!(rule = %state.rule_id, "healed duplicate active rule state");
        state.deactivate(now);
    }
    !extras.is_empty()
}

//=========================================================================================
// Projection
//=========================================================================================

/// Assembles the dashboard view. Expects `reconcile` to have run already;
/// this function never mutates.
pub fn project(
    agg: &PlaythroughAggregate,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<Dashboard> {
    let playthrough = &agg.playthrough;
    if playthrough.require_auth && caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    let is_host = playthrough.is_owner(caller);

    let mut active_rules: Vec<ActiveRuleView> = agg
        .rule_states
        .iter()
        .filter(|s| s.is_active)
        .map(|s| ActiveRuleView {
            rule_id: s.rule_id,
            rule_name: s.rule_name.clone(),
            behavior: s.behavior(),
            is_default: playthrough.configuration.is_default(s.rule_id),
            started_at: s.started_at,
            expires_at: s.expires_at,
            time_remaining_seconds: s.expires_at.map(|expires_at| {
                let reference = match playthrough.status {
                    PlaythroughStatus::Paused => playthrough.paused_at.unwrap_or(now),
                    _ => now,
                };
                (expires_at - reference).num_seconds().max(0)
            }),
            current_amount: s.current_amount,
        })
        .collect();
    active_rules.sort_by_key(|r| r.started_at);

    let pick_status = (is_host && playthrough.status == PlaythroughStatus::Active)
        .then(|| build_pick_status(agg, now));

    Ok(Dashboard {
        playthrough: PlaythroughSummary::of(playthrough),
        active_rules,
        pick_status,
        queue: queue::queue_status(agg),
        is_host,
    })
}

fn build_pick_status(agg: &PlaythroughAggregate, now: DateTime<Utc>) -> PickStatus {
    let playthrough = &agg.playthrough;

    let rate_limit_seconds_remaining = playthrough
        .last_pick_at
        .map(|last| {
            let elapsed = (now - last).num_milliseconds() as f64 / 1000.0;
            (GLOBAL_PICK_INTERVAL_SECONDS - elapsed).max(0.0)
        })
        .unwrap_or(0.0);

    let cooldowns: Vec<CooldownView> = playthrough
        .cooldowns
        .iter()
        .filter_map(|c| {
            playthrough
                .cooldown_remaining(c.rule_id, now)
                .map(|seconds_remaining| CooldownView {
                    rule_id: c.rule_id,
                    seconds_remaining,
                })
        })
        .collect();

    let available_rule_count = playthrough
        .configuration
        .pickable_rules()
        .filter(|r| !agg.is_rule_active(r.rule_id))
        .filter(|r| playthrough.cooldown_remaining(r.rule_id, now).is_none())
        .count();

    PickStatus {
        can_pick: rate_limit_seconds_remaining == 0.0 && agg.has_free_slot(),
        rate_limit_seconds_remaining,
        cooldowns,
        available_rule_count,
    }
}
