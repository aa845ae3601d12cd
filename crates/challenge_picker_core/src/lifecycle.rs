//! crates/challenge_picker_core/src/lifecycle.rs
//!
//! Drives playthrough status transitions (start/pause/resume/complete) and
//! the pause-aware duration accounting. All transitions are owner-only.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::domain::{
    Caller, PlaythroughAggregate, PlaythroughRuleState, PlaythroughStatus, QueueEntryStatus,
};
use crate::error::{EngineError, EngineResult};

fn require_owner(agg: &PlaythroughAggregate, caller: &Caller) -> EngineResult<()> {
    if caller.is_anonymous() {
        return Err(EngineError::Unauthorized);
    }
    if !agg.playthrough.is_owner(caller) {
        return Err(EngineError::Forbidden);
    }
    Ok(())
}

/// Creates (or reactivates) rule states for every configuration-flagged
/// default rule that is not already active. Default rules are permanent:
/// no expiry, no counter. Returns whether anything changed.
///
/// Called on session start and lazily from the dashboard reconcile, which
/// covers playthroughs whose default states were never materialized.
pub fn ensure_default_rule_states(agg: &mut PlaythroughAggregate, now: DateTime<Utc>) -> bool {
    let defaults: Vec<(uuid::Uuid, String)> = agg
        .playthrough
        .configuration
        .default_rules()
        .map(|r| (r.rule_id, r.rule_name.clone()))
        .collect();

    let mut changed = false;
    for (rule_id, rule_name) in defaults {
        if agg.is_rule_active(rule_id) {
            continue;
        }
        match agg.state_mut(rule_id) {
            Some(state) => {
                state.is_active = true;
                state.started_at = Some(now);
                state.completed_at = None;
                state.expires_at = None;
                state.current_amount = None;
            }
            None => {
                agg.rule_states.push(PlaythroughRuleState {
                    rule_id,
                    rule_name,
                    is_active: true,
                    started_at: Some(now),
                    completed_at: None,
                    expires_at: None,
                    current_amount: None,
                });
            }
        }
        changed = true;
    }
    changed
}

/// `setup → active`. Stamps `started_at` and activates the default rules.
pub fn start(
    agg: &mut PlaythroughAggregate,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    require_owner(agg, caller)?;
    if agg.playthrough.status != PlaythroughStatus::Setup {
        return Err(EngineError::InvalidTransition {
            from: agg.playthrough.status.as_str(),
            action: "start",
        });
    }

    agg.playthrough.status = PlaythroughStatus::Active;
    agg.playthrough.started_at = Some(now);
    ensure_default_rule_states(agg, now);
    debug!(playthrough = %agg.playthrough.id, "playthrough started");
    Ok(())
}

/// `active → paused`. Time-based rules keep their `expires_at` untouched;
/// while paused the projector reports remaining time relative to `paused_at`.
pub fn pause(
    agg: &mut PlaythroughAggregate,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    require_owner(agg, caller)?;
    if agg.playthrough.status != PlaythroughStatus::Active {
        return Err(EngineError::InvalidTransition {
            from: agg.playthrough.status.as_str(),
            action: "pause",
        });
    }

    agg.playthrough.status = PlaythroughStatus::Paused;
    agg.playthrough.paused_at = Some(now);
    Ok(())
}

/// `paused → active`. The elapsed pause interval is added to the pause total
/// and every active time-based rule's expiry shifts forward by it, so the
/// remaining countdown is exactly what it was at the pause instant.
pub fn resume(
    agg: &mut PlaythroughAggregate,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    require_owner(agg, caller)?;
    if agg.playthrough.status != PlaythroughStatus::Paused {
        return Err(EngineError::InvalidTransition {
            from: agg.playthrough.status.as_str(),
            action: "resume",
        });
    }
    let paused_at = agg
        .playthrough
        .paused_at
        .ok_or_else(|| EngineError::Internal("paused playthrough has no paused_at".into()))?;

    let pause_interval = now - paused_at;
    agg.playthrough.total_paused_seconds += pause_interval.num_seconds();
    for state in agg.rule_states.iter_mut().filter(|s| s.is_active) {
        if let Some(expires_at) = state.expires_at {
            state.expires_at = Some(expires_at + pause_interval);
        }
    }
    agg.playthrough.paused_at = None;
    agg.playthrough.status = PlaythroughStatus::Active;
    debug!(
        playthrough = %agg.playthrough.id,
        paused_for = pause_interval.num_seconds(),
        "playthrough resumed"
    );
    Ok(())
}

/// `active|paused → completed`. Finalizes the duration accounting,
/// deactivates every still-active rule, and fails still-pending queue
/// entries so nothing is left dangling.
pub fn complete(
    agg: &mut PlaythroughAggregate,
    caller: &Caller,
    now: DateTime<Utc>,
) -> EngineResult<()> {
    require_owner(agg, caller)?;
    match agg.playthrough.status {
        PlaythroughStatus::Active | PlaythroughStatus::Paused => {}
        other => {
            return Err(EngineError::InvalidTransition {
                from: other.as_str(),
                action: "end",
            })
        }
    }
    let started_at = agg
        .playthrough
        .started_at
        .ok_or_else(|| EngineError::Internal("running playthrough has no started_at".into()))?;

    // A session ended while paused never counts the open pause as active time.
    if let Some(paused_at) = agg.playthrough.paused_at.take() {
        agg.playthrough.total_paused_seconds += (now - paused_at).num_seconds();
    }

    agg.playthrough.status = PlaythroughStatus::Completed;
    agg.playthrough.ended_at = Some(now);
    agg.playthrough.total_duration_seconds =
        Some((now - started_at).num_seconds() - agg.playthrough.total_paused_seconds);

    for state in agg.rule_states.iter_mut().filter(|s| s.is_active) {
        state.is_active = false;
        state.completed_at = Some(now);
    }

    for entry in agg
        .queue
        .iter_mut()
        .filter(|e| e.status == QueueEntryStatus::Pending)
    {
        entry.status = QueueEntryStatus::Failed;
        entry.failure_reason = Some("session ended".into());
        entry.processed_at = Some(now);
    }

    debug!(
        playthrough = %agg.playthrough.id,
        total_duration = agg.playthrough.total_duration_seconds,
        "playthrough completed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ConfiguredRule, Playthrough, QueueEntry, SessionConfiguration};
    use chrono::{Duration, TimeZone};
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 18, 0, 0).unwrap()
    }

    fn configured(rule_id: Uuid, is_default: bool) -> ConfiguredRule {
        ConfiguredRule {
            rule_id,
            rule_name: "rule".into(),
            is_default,
            is_enabled: true,
            tarot_card_identifier: None,
            position: None,
        }
    }

    fn aggregate_with_defaults(owner: Uuid, default_rule: Uuid) -> PlaythroughAggregate {
        let config = SessionConfiguration {
            rules: vec![configured(default_rule, true)],
        };
        PlaythroughAggregate::new(Playthrough::new(owner, config))
    }

    #[test]
    fn start_requires_owner() {
        let owner = Uuid::new_v4();
        let mut agg = aggregate_with_defaults(owner, Uuid::new_v4());

        let err = start(&mut agg, &Caller::anonymous(), t0()).unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized));

        let err = start(&mut agg, &Caller::user(Uuid::new_v4()), t0()).unwrap_err();
        assert!(matches!(err, EngineError::Forbidden));

        start(&mut agg, &Caller::user(owner), t0()).unwrap();
        assert_eq!(agg.playthrough.status, PlaythroughStatus::Active);
    }

    #[test]
    fn start_activates_default_rules() {
        let owner = Uuid::new_v4();
        let default_rule = Uuid::new_v4();
        let mut agg = aggregate_with_defaults(owner, default_rule);

        start(&mut agg, &Caller::user(owner), t0()).unwrap();

        let state = agg.state(default_rule).unwrap();
        assert!(state.is_active);
        assert_eq!(state.expires_at, None);
        assert_eq!(state.current_amount, None);
        assert_eq!(agg.playthrough.started_at, Some(t0()));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let mut agg = aggregate_with_defaults(owner, Uuid::new_v4());

        // Cannot pause/resume/end before starting.
        assert!(matches!(
            pause(&mut agg, &caller, t0()),
            Err(EngineError::InvalidTransition { from: "setup", .. })
        ));
        assert!(matches!(
            resume(&mut agg, &caller, t0()),
            Err(EngineError::InvalidTransition { from: "setup", .. })
        ));
        assert!(matches!(
            complete(&mut agg, &caller, t0()),
            Err(EngineError::InvalidTransition { from: "setup", .. })
        ));

        start(&mut agg, &caller, t0()).unwrap();
        // Cannot start or resume an active session.
        assert!(matches!(
            start(&mut agg, &caller, t0()),
            Err(EngineError::InvalidTransition { from: "active", .. })
        ));
        assert!(matches!(
            resume(&mut agg, &caller, t0()),
            Err(EngineError::InvalidTransition { from: "active", .. })
        ));

        complete(&mut agg, &caller, t0() + Duration::seconds(60)).unwrap();
        // Completed is terminal.
        for result in [
            start(&mut agg, &caller, t0()),
            pause(&mut agg, &caller, t0()),
            resume(&mut agg, &caller, t0()),
            complete(&mut agg, &caller, t0()),
        ] {
            assert!(matches!(
                result,
                Err(EngineError::InvalidTransition {
                    from: "completed",
                    ..
                })
            ));
        }
    }

    #[test]
    fn resume_shifts_active_timed_rules_by_the_pause_interval() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let mut agg = aggregate_with_defaults(owner, Uuid::new_v4());
        start(&mut agg, &caller, t0()).unwrap();

        let expires = t0() + Duration::seconds(300);
        agg.rule_states.push(PlaythroughRuleState {
            rule_id: Uuid::new_v4(),
            rule_name: "timed".into(),
            is_active: true,
            started_at: Some(t0()),
            completed_at: None,
            expires_at: Some(expires),
            current_amount: None,
        });

        let paused_at = t0() + Duration::seconds(100);
        pause(&mut agg, &caller, paused_at).unwrap();
        let resumed_at = paused_at + Duration::seconds(40);
        resume(&mut agg, &caller, resumed_at).unwrap();

        assert_eq!(agg.playthrough.total_paused_seconds, 40);
        assert_eq!(agg.playthrough.paused_at, None);
        let state = agg.rule_states.last().unwrap();
        assert_eq!(state.expires_at, Some(expires + Duration::seconds(40)));
    }

    #[test]
    fn complete_finalizes_duration_excluding_pauses() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let mut agg = aggregate_with_defaults(owner, Uuid::new_v4());

        start(&mut agg, &caller, t0()).unwrap();
        pause(&mut agg, &caller, t0() + Duration::seconds(100)).unwrap();
        resume(&mut agg, &caller, t0() + Duration::seconds(130)).unwrap();
        complete(&mut agg, &caller, t0() + Duration::seconds(500)).unwrap();

        let p = &agg.playthrough;
        assert_eq!(p.status, PlaythroughStatus::Completed);
        assert_eq!(p.total_paused_seconds, 30);
        assert_eq!(p.total_duration_seconds, Some(470));
        assert_eq!(p.ended_at, Some(t0() + Duration::seconds(500)));
    }

    #[test]
    fn complete_from_paused_folds_the_open_pause_interval() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let mut agg = aggregate_with_defaults(owner, Uuid::new_v4());

        start(&mut agg, &caller, t0()).unwrap();
        pause(&mut agg, &caller, t0() + Duration::seconds(200)).unwrap();
        complete(&mut agg, &caller, t0() + Duration::seconds(260)).unwrap();

        assert_eq!(agg.playthrough.total_paused_seconds, 60);
        assert_eq!(agg.playthrough.total_duration_seconds, Some(200));
    }

    #[test]
    fn complete_deactivates_rules_and_fails_pending_queue_entries() {
        let owner = Uuid::new_v4();
        let caller = Caller::user(owner);
        let default_rule = Uuid::new_v4();
        let mut agg = aggregate_with_defaults(owner, default_rule);
        start(&mut agg, &caller, t0()).unwrap();

        agg.queue.push(QueueEntry {
            id: Uuid::new_v4(),
            rule_id: Uuid::new_v4(),
            difficulty_level: 1,
            position: 1,
            queued_at: t0(),
            queued_by: None,
            status: QueueEntryStatus::Pending,
            processed_at: None,
            failure_reason: None,
        });

        let ended = t0() + Duration::seconds(10);
        complete(&mut agg, &caller, ended).unwrap();

        let state = agg.state(default_rule).unwrap();
        assert!(!state.is_active);
        assert_eq!(state.completed_at, Some(ended));

        let entry = &agg.queue[0];
        assert_eq!(entry.status, QueueEntryStatus::Failed);
        assert_eq!(entry.failure_reason.as_deref(), Some("session ended"));
    }
}
