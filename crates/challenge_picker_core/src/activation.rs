//! crates/challenge_picker_core/src/activation.rs
//!
//! Applies a pick (host- or viewer-initiated) to create or refresh a
//! `PlaythroughRuleState`, enforcing the global rate limit, the per-rule
//! cooldown, and the concurrency cap. Also owns the hotkey-style counter
//! mutations that address the Nth active counter rule.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    Caller, DifficultyLevel, PlaythroughAggregate, PlaythroughRuleState, PlaythroughStatus, Rule,
};
use crate::error::{EngineError, EngineResult};
use crate::queue;

/// Minimum delay between two picks on the same playthrough, regardless of
/// which rule is picked. Distinct from the per-rule cooldown: this throttles
/// humans spamming the pick button, the cooldown throttles rule reuse.
pub const GLOBAL_PICK_INTERVAL_SECONDS: f64 = 2.0;

/// The result of a successful pick.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum PickOutcome {
    Activated(ActivatedRule),
    Queued { queued: bool, position: i64 },
}

/// View of a freshly activated (or refreshed) rule state.
#[derive(Debug, Clone, Serialize)]
pub struct ActivatedRule {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub current_amount: Option<i32>,
}

/// Result of a counter increment/decrement.
#[derive(Debug, Clone, Serialize)]
pub struct CounterUpdate {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub current_amount: i32,
    pub is_active: bool,
}

fn require_active(agg: &PlaythroughAggregate, action: &'static str) -> EngineResult<()> {
    if agg.playthrough.status != PlaythroughStatus::Active {
        return Err(EngineError::InvalidTransition {
            from: agg.playthrough.status.as_str(),
            action,
        });
    }
    Ok(())
}

/// Creates or reactivates the state for `(playthrough, rule)`. Shared by the
/// direct pick path, the queue drain, and the manual toggle.
pub(crate) fn apply_activation(
    agg: &mut PlaythroughAggregate,
    rule_id: Uuid,
    rule_name: &str,
    level: &DifficultyLevel,
    now: DateTime<Utc>,
) -> ActivatedRule {
    let expires_at = level.duration_seconds.map(|d| now + chrono::Duration::seconds(d));
    let current_amount = level.amount;

    match agg.state_mut(rule_id) {
        Some(state) => {
            state.rule_name = rule_name.to_string();
            state.is_active = true;
            state.started_at = Some(now);
            state.completed_at = None;
            state.expires_at = expires_at;
            state.current_amount = current_amount;
        }
        None => agg.rule_states.push(PlaythroughRuleState {
            rule_id,
            rule_name: rule_name.to_string(),
            is_active: true,
            started_at: Some(now),
            completed_at: None,
            expires_at,
            current_amount,
        }),
    }

    ActivatedRule {
        rule_id,
        rule_name: rule_name.to_string(),
        expires_at,
        current_amount,
    }
}

/// Picks a rule at a difficulty level.
///
/// Rejections are surfaced with enough context for the client to auto-retry
/// (remaining rate-limit or cooldown seconds). When the concurrency cap is
/// reached the pick is queued instead of rejected.
pub fn pick_rule(
    agg: &mut PlaythroughAggregate,
    rule: &Rule,
    level: &DifficultyLevel,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<PickOutcome> {
    require_active(agg, "pick a rule on")?;

    let playthrough = &agg.playthrough;
    if playthrough.require_auth && caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    if !playthrough.is_owner(caller) && !playthrough.allow_viewer_picks {
        return Err(EngineError::Forbidden);
    }
    if playthrough.configuration.is_default(rule.id) {
        return Err(EngineError::Validation(
            "default rules are always active and cannot be picked".into(),
        ));
    }
    if !playthrough.configuration.is_enabled(rule.id) {
        return Err(EngineError::Validation(
            "rule is not enabled for this playthrough".into(),
        ));
    }

    if let Some(last_pick_at) = playthrough.last_pick_at {
        let elapsed_ms = (now - last_pick_at).num_milliseconds();
        let limit_ms = (GLOBAL_PICK_INTERVAL_SECONDS * 1000.0) as i64;
        if elapsed_ms < limit_ms {
            return Err(EngineError::RateLimited {
                seconds_remaining: (limit_ms - elapsed_ms) as f64 / 1000.0,
            });
        }
    }

    agg.playthrough.sweep_cooldowns(now);
    if let Some(seconds_remaining) = agg.playthrough.cooldown_remaining(rule.id, now) {
        return Err(EngineError::RuleOnCooldown {
            rule_id: rule.id,
            seconds_remaining,
        });
    }

    if !agg.has_free_slot() {
        let position = queue::enqueue(agg, rule.id, level.level, caller.user_id, now);
        debug!(playthrough = %agg.playthrough.id, rule = %rule.id, position, "pick queued, cap reached");
        return Ok(PickOutcome::Queued {
            queued: true,
            position,
        });
    }

    let activated = apply_activation(agg, rule.id, &rule.name, level, now);
    agg.playthrough.last_pick_at = Some(now);
    agg.playthrough.start_cooldown(rule.id, now);
    debug!(playthrough = %agg.playthrough.id, rule = %rule.id, "rule activated");
    Ok(PickOutcome::Activated(activated))
}

/// Activation on behalf of the queue drain. Machine-initiated, so the global
/// rate limit does not apply and `last_pick_at` is left alone; the per-rule
/// cooldown and the enabled check still hold.
pub(crate) fn activate_from_queue(
    agg: &mut PlaythroughAggregate,
    rule: &Rule,
    level: &DifficultyLevel,
    now: DateTime<Utc>,
) -> EngineResult<ActivatedRule> {
    require_active(agg, "activate a queued rule on")?;
    if !agg.playthrough.configuration.is_enabled(rule.id)
        || agg.playthrough.configuration.is_default(rule.id)
    {
        return Err(EngineError::Validation(
            "rule is no longer pickable for this playthrough".into(),
        ));
    }
    agg.playthrough.sweep_cooldowns(now);
    if let Some(seconds_remaining) = agg.playthrough.cooldown_remaining(rule.id, now) {
        return Err(EngineError::RuleOnCooldown {
            rule_id: rule.id,
            seconds_remaining,
        });
    }

    let activated = apply_activation(agg, rule.id, &rule.name, level, now);
    agg.playthrough.start_cooldown(rule.id, now);
    Ok(activated)
}

/// Owner-only manual enable/disable outside the pick flow. Toggling on uses
/// the rule's lowest difficulty level and bypasses rate limit and cooldown,
/// but the concurrency cap still holds.
pub fn toggle_rule(
    agg: &mut PlaythroughAggregate,
    rule: &Rule,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<bool> {
    if caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    if !agg.playthrough.is_owner(caller) {
        return Err(EngineError::Forbidden);
    }
    match agg.playthrough.status {
        PlaythroughStatus::Active | PlaythroughStatus::Paused => {}
        other => {
            return Err(EngineError::InvalidTransition {
                from: other.as_str(),
                action: "toggle a rule on",
            })
        }
    }

    if agg.is_rule_active(rule.id) {
        if let Some(state) = agg.state_mut(rule.id) {
            state.deactivate(now);
        }
        return Ok(false);
    }

    let is_default = agg.playthrough.configuration.is_default(rule.id);
    if !is_default && !agg.has_free_slot() {
        return Err(EngineError::Validation(
            "concurrency cap reached, cannot enable another rule".into(),
        ));
    }
    let level = rule
        .lowest_level()
        .ok_or_else(|| EngineError::NotFound(format!("rule {} has no difficulty levels", rule.id)))?
        .clone();
    apply_activation(agg, rule.id, &rule.name, &level, now);
    Ok(true)
}

/// Indexes of counter-bearing states in activation order. Includes states
/// that completed by reaching 0 so an increment can bring them back.
fn counter_state_indexes(agg: &PlaythroughAggregate) -> Vec<usize> {
    let mut indexes: Vec<usize> = agg
        .rule_states
        .iter()
        .enumerate()
        .filter(|(_, s)| s.has_counter() && (s.is_active || s.current_amount == Some(0)))
        .map(|(i, _)| i)
        .collect();
    indexes.sort_by_key(|&i| agg.rule_states[i].started_at);
    indexes
}

fn counter_target(
    agg: &PlaythroughAggregate,
    index: usize,
) -> EngineResult<usize> {
    let indexes = counter_state_indexes(agg);
    if index == 0 || index > indexes.len() {
        return Err(EngineError::NotFound(format!(
            "no counter rule at index {index}"
        )));
    }
    Ok(indexes[index - 1])
}

/// Decrements the Nth (1-based) counter rule. Clamps at 0; reaching 0
/// auto-completes the rule.
pub fn decrement_counter(
    agg: &mut PlaythroughAggregate,
    index: usize,
    amount: i32,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<CounterUpdate> {
    if caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    if !agg.playthrough.is_owner(caller) {
        return Err(EngineError::Forbidden);
    }
    require_active(agg, "adjust counters on")?;
    if amount <= 0 {
        return Err(EngineError::Validation("amount must be positive".into()));
    }

    let i = counter_target(agg, index)?;
    let state = &mut agg.rule_states[i];
    if !state.is_active {
        return Err(EngineError::Validation(
            "counter rule has already completed".into(),
        ));
    }
    let current = state.current_amount.unwrap_or(0);
    let next = (current - amount).max(0);
    state.current_amount = Some(next);
    if next == 0 {
        state.deactivate(now);
    }

    Ok(CounterUpdate {
        rule_id: state.rule_id,
        rule_name: state.rule_name.clone(),
        current_amount: next,
        is_active: state.is_active,
    })
}

/// Increments the Nth (1-based) counter rule. Incrementing a counter that
/// completed at 0 reactivates it.
pub fn increment_counter(
    agg: &mut PlaythroughAggregate,
    index: usize,
    amount: i32,
    caller: &Caller,
    _now: DateTime<Utc>,
) -> EngineResult<CounterUpdate> {
    if caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    if !agg.playthrough.is_owner(caller) {
        return Err(EngineError::Forbidden);
    }
    require_active(agg, "adjust counters on")?;
    if amount <= 0 {
        return Err(EngineError::Validation("amount must be positive".into()));
    }

    let i = counter_target(agg, index)?;
    let state = &mut agg.rule_states[i];
    let current = state.current_amount.unwrap_or(0);
    let next = current + amount;
    state.current_amount = Some(next);
    if !state.is_active {
        state.is_active = true;
        state.completed_at = None;
        debug!(rule = %state.rule_id, "completed counter rule reactivated by increment");
    }

    Ok(CounterUpdate {
        rule_id: state.rule_id,
        rule_name: state.rule_name.clone(),
        current_amount: next,
        is_active: state.is_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfiguredRule, Playthrough, QueueEntryStatus, SessionConfiguration};
    use crate::lifecycle;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 20, 0, 0).unwrap()
    }

    fn rule(name: &str, duration: Option<i64>, amount: Option<i32>) -> Rule {
        Rule {
            id: Uuid::new_v4(),
            name: name.into(),
            levels: vec![DifficultyLevel {
                level: 1,
                duration_seconds: duration,
                amount,
            }],
        }
    }

    /// An active aggregate whose configuration enables the given rules.
    fn active_aggregate(owner: Uuid, rules: &[&Rule]) -> PlaythroughAggregate {
        let config = SessionConfiguration {
            rules: rules
                .iter()
                .map(|r| ConfiguredRule {
                    rule_id: r.id,
                    rule_name: r.name.clone(),
                    is_default: false,
                    is_enabled: true,
                    tarot_card_identifier: None,
                    position: None,
                })
                .collect(),
        };
        let mut agg = PlaythroughAggregate::new(Playthrough::new(owner, config));
        lifecycle::start(&mut agg, &Caller::user(owner), t0()).unwrap();
        agg
    }

    fn pick(
        agg: &mut PlaythroughAggregate,
        r: &Rule,
        caller: &Caller,
        now: DateTime<Utc>,
    ) -> EngineResult<PickOutcome> {
        let level = r.level(1).unwrap().clone();
        pick_rule(agg, r, &level, caller, now)
    }

    #[test]
    fn pick_activates_with_duration_and_counter() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let timed = rule("timed", Some(300), None);
        let mut agg = active_aggregate(owner, &[&timed]);

        let outcome = pick(&mut agg, &timed, &caller, t0()).unwrap();
        match outcome {
            PickOutcome::Activated(a) => {
                assert_eq!(a.expires_at, Some(t0() + Duration::seconds(300)));
                assert_eq!(a.current_amount, None);
            }
            other => panic!("expected activation, got {other:?}"),
        }
        assert!(agg.is_rule_active(timed.id));
        assert_eq!(agg.playthrough.last_pick_at, Some(t0()));
        assert!(agg.playthrough.cooldown_remaining(timed.id, t0()).is_some());
    }

    #[test]
    fn second_pick_within_two_seconds_is_rate_limited() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let a = rule("a", None, None);
        let b = rule("b", None, None);
        let mut agg = active_aggregate(owner, &[&a, &b]);

        pick(&mut agg, &a, &caller, t0()).unwrap();
        let err = pick(&mut agg, &b, &caller, t0() + Duration::milliseconds(500)).unwrap_err();
        match err {
            EngineError::RateLimited { seconds_remaining } => {
                assert!((seconds_remaining - 1.5).abs() < 0.01, "{seconds_remaining}");
            }
            other => panic!("expected rate limit, got {other:?}"),
        }
    }

    #[test]
    fn repicking_a_rule_during_cooldown_is_rejected() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let a = rule("a", Some(10), None);
        let mut agg = active_aggregate(owner, &[&a]);

        pick(&mut agg, &a, &caller, t0()).unwrap();
        // Past the rate limit but inside the 120s cooldown.
        let err = pick(&mut agg, &a, &caller, t0() + Duration::seconds(30)).unwrap_err();
        match err {
            EngineError::RuleOnCooldown {
                rule_id,
                seconds_remaining,
            } => {
                assert_eq!(rule_id, a.id);
                assert_eq!(seconds_remaining, 90);
            }
            other => panic!("expected cooldown, got {other:?}"),
        }

        // After the window the rule is pickable again.
        assert!(pick(&mut agg, &a, &caller, t0() + Duration::seconds(121)).is_ok());
    }

    #[test]
    fn pick_at_cap_is_queued_not_rejected() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let a = rule("a", None, None);
        let b = rule("b", None, None);
        let c = rule("c", None, None);
        let mut agg = active_aggregate(owner, &[&a, &b, &c]);
        agg.playthrough.max_concurrent_rules = 2;

        pick(&mut agg, &a, &caller, t0()).unwrap();
        pick(&mut agg, &b, &caller, t0() + Duration::seconds(3)).unwrap();

        let outcome = pick(&mut agg, &c, &caller, t0() + Duration::seconds(6)).unwrap();
        assert!(matches!(outcome, PickOutcome::Queued { position: 1, .. }));
        assert!(!agg.is_rule_active(c.id));
        assert_eq!(agg.queue.len(), 1);
        assert_eq!(agg.queue[0].status, QueueEntryStatus::Pending);
        assert_eq!(agg.active_non_default_count(), 2);
    }

    #[test]
    fn viewer_picks_respect_session_policy() {
        let owner = Uuid::new_v4();
        let viewer = Caller::user(Uuid::new_v4());
        let a = rule("a", None, None);
        let b = rule("b", None, None);

        let mut agg = active_aggregate(owner, &[&a, &b]);
        let err = pick(&mut agg, &a, &viewer, t0()).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));

        agg.playthrough.allow_viewer_picks = true;
        assert!(pick(&mut agg, &a, &viewer, t0()).is_ok());

        // An anonymous viewer is fine unless the session requires auth.
        agg.playthrough.require_auth = true;
        let err = pick(&mut agg, &b, &Caller::anonymous(), t0() + Duration::seconds(5)).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));
    }

    #[test]
    fn disabled_and_default_rules_are_not_pickable() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let a = rule("a", None, None);
        let mut agg = active_aggregate(owner, &[&a]);

        agg.playthrough.configuration.rules[0].is_enabled = false;
        assert!(matches!(
            pick(&mut agg, &a, &caller, t0()),
            Err(EngineError::Validation(_))
        ));

        agg.playthrough.configuration.rules[0].is_enabled = true;
        agg.playthrough.configuration.rules[0].is_default = true;
        assert!(matches!(
            pick(&mut agg, &a, &caller, t0()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn decrement_clamps_at_zero_and_completes() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let counter = rule("counter", None, Some(3));
        let mut agg = active_aggregate(owner, &[&counter]);
        pick(&mut agg, &counter, &caller, t0()).unwrap();

        let update = decrement_counter(&mut agg, 1, 5, &caller, t0() + Duration::seconds(10)).unwrap();
        assert_eq!(update.current_amount, 0);
        assert!(!update.is_active);

        let state = agg.state(counter.id).unwrap();
        assert!(!state.is_active);
        assert_eq!(state.completed_at, Some(t0() + Duration::seconds(10)));
        assert_eq!(state.current_amount, Some(0));
    }

    #[test]
    fn increment_reactivates_a_completed_counter() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let counter = rule("counter", None, Some(2));
        let mut agg = active_aggregate(owner, &[&counter]);
        pick(&mut agg, &counter, &caller, t0()).unwrap();

        decrement_counter(&mut agg, 1, 2, &caller, t0() + Duration::seconds(5)).unwrap();
        assert!(!agg.is_rule_active(counter.id));

        let update = increment_counter(&mut agg, 1, 1, &caller, t0() + Duration::seconds(8)).unwrap();
        assert_eq!(update.current_amount, 1);
        assert!(update.is_active);
        assert!(agg.is_rule_active(counter.id));
        assert!(agg.state(counter.id).unwrap().completed_at.is_none());
    }

    #[test]
    fn counter_index_is_one_based_in_activation_order() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let first = rule("first", None, Some(10));
        let second = rule("second", None, Some(20));
        let timed = rule("timed", Some(60), None);
        let mut agg = active_aggregate(owner, &[&first, &second, &timed]);

        pick(&mut agg, &first, &caller, t0()).unwrap();
        pick(&mut agg, &timed, &caller, t0() + Duration::seconds(3)).unwrap();
        pick(&mut agg, &second, &caller, t0() + Duration::seconds(6)).unwrap();

        // The timed rule carries no counter, so index 2 is `second`.
        let update = decrement_counter(&mut agg, 2, 1, &caller, t0() + Duration::seconds(9)).unwrap();
        assert_eq!(update.rule_id, second.id);
        assert_eq!(update.current_amount, 19);

        let err = decrement_counter(&mut agg, 3, 1, &caller, t0() + Duration::seconds(9)).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }

    #[test]
    fn counter_mutation_is_owner_only() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let counter = rule("counter", None, Some(3));
        let mut agg = active_aggregate(owner, &[&counter]);
        pick(&mut agg, &counter, &caller, t0()).unwrap();

        let err = decrement_counter(&mut agg, 1, 1, &Caller::user(Uuid::new_v4()), t0()).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));
        let err = increment_counter(&mut agg, 1, 1, &Caller::anonymous(), t0()).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));
    }

    #[test]
    fn toggle_flips_activation_and_respects_the_cap() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let a = rule("a", Some(60), None);
        let b = rule("b", None, None);
        let mut agg = active_aggregate(owner, &[&a, &b]);
        agg.playthrough.max_concurrent_rules = 1;

        assert!(toggle_rule(&mut agg, &a, &caller, t0()).unwrap());
        assert!(agg.is_rule_active(a.id));

        // Cap is full, enabling another non-default rule fails.
        let err = toggle_rule(&mut agg, &b, &caller, t0()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // Toggling the active rule off frees the slot.
        assert!(!toggle_rule(&mut agg, &a, &caller, t0() + Duration::seconds(1)).unwrap());
        assert!(!agg.is_rule_active(a.id));
        assert!(toggle_rule(&mut agg, &b, &caller, t0() + Duration::seconds(2)).unwrap());
    }
}
