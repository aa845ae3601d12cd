//! End-to-end engine walkthrough: picks, the concurrency cap, the queue, a
//! counter completion freeing a slot, and the dashboard read that drains the
//! queue, driving the engine the way the service layer does per poll.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use challenge_picker_core::{
    activation, lifecycle, projector, queue, Caller, ConfiguredRule, DifficultyLevel, EngineError,
    EngineResult, PickOutcome, Playthrough, PlaythroughAggregate, QueueEntryStatus, Rule,
    RuleCatalog, SessionConfiguration,
};

struct StaticCatalog {
    rules: HashMap<Uuid, Rule>,
}

#[async_trait]
impl RuleCatalog for StaticCatalog {
    async fn rule(&self, rule_id: Uuid) -> EngineResult<Rule> {
        self.rules
            .get(&rule_id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id} not found")))
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 14, 19, 30, 0).unwrap()
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

fn configured(rule: &Rule) -> ConfiguredRule {
    ConfiguredRule {
        rule_id: rule.id,
        rule_name: rule.name.clone(),
        is_default: false,
        is_enabled: true,
        tarot_card_identifier: None,
        position: None,
    }
}

/// What the service does on every dashboard poll: reconcile, drain the
/// queue, project.
async fn dashboard_read(
    agg: &mut PlaythroughAggregate,
    catalog: &StaticCatalog,
    caller: &Caller,
    now: DateTime<Utc>,
) -> projector::Dashboard {
    projector::reconcile(agg, now);
    queue::process_queue(agg, catalog, now).await.unwrap();
    projector::project(agg, caller, now).unwrap()
}

#[tokio::test]
async fn cap_queue_and_counter_completion_scenario() {
    let owner = Uuid::new_v4();
    let host = Caller::user(owner);

    let rule_a = rule("No healing items", Some(300), None);
    let rule_b = rule("Lose 5 fights", None, Some(5));
    let rule_c = rule("Melee only", Some(120), None);
    let catalog = StaticCatalog {
        rules: [&rule_a, &rule_b, &rule_c]
            .into_iter()
            .map(|r| (r.id, r.clone()))
            .collect(),
    };

    let config = SessionConfiguration {
        rules: vec![configured(&rule_a), configured(&rule_b), configured(&rule_c)],
    };
    let mut playthrough = Playthrough::new(owner, config);
    playthrough.max_concurrent_rules = 2;
    playthrough.rule_cooldown_seconds = 120;
    let mut agg = PlaythroughAggregate::new(playthrough);

    lifecycle::start(&mut agg, &host, t0()).unwrap();

    // Pick rule A at difficulty 1 (300s duration): activates immediately.
    let level_a = rule_a.level(1).unwrap().clone();
    let outcome = activation::pick_rule(&mut agg, &rule_a, &level_a, &host, t0()).unwrap();
    match outcome {
        PickOutcome::Activated(a) => {
            assert_eq!(a.expires_at, Some(t0() + Duration::seconds(300)))
        }
        other => panic!("expected activation, got {other:?}"),
    }

    // Pick rule B (counter 5): slot 2 is free.
    let t_b = t0() + Duration::seconds(3);
    let level_b = rule_b.level(1).unwrap().clone();
    let outcome = activation::pick_rule(&mut agg, &rule_b, &level_b, &host, t_b).unwrap();
    assert!(matches!(outcome, PickOutcome::Activated(_)));
    assert_eq!(agg.active_non_default_count(), 2);

    // Pick rule C: the cap is reached, so it queues.
    let t_c = t0() + Duration::seconds(6);
    let level_c = rule_c.level(1).unwrap().clone();
    let outcome = activation::pick_rule(&mut agg, &rule_c, &level_c, &host, t_c).unwrap();
    assert!(matches!(outcome, PickOutcome::Queued { position: 1, .. }));
    assert!(!agg.is_rule_active(rule_c.id));

    // A dashboard read at this point drains nothing: still no capacity.
    let t_poll = t0() + Duration::seconds(8);
    let dashboard = dashboard_read(&mut agg, &catalog, &host, t_poll).await;
    assert_eq!(dashboard.queue.depth, 1);
    assert!(!dashboard.queue.has_capacity);
    assert_eq!(dashboard.active_rules.len(), 2);

    // Decrement counter #1 (rule B) by 5: clamps to 0 and completes,
    // freeing a slot.
    let t_dec = t0() + Duration::seconds(10);
    let update = activation::decrement_counter(&mut agg, 1, 5, &host, t_dec).unwrap();
    assert_eq!(update.current_amount, 0);
    assert!(!update.is_active);
    assert_eq!(agg.active_non_default_count(), 1);

    // The next dashboard read processes the queue and activates rule C.
    let t_poll2 = t0() + Duration::seconds(11);
    let dashboard = dashboard_read(&mut agg, &catalog, &host, t_poll2).await;
    assert!(agg.is_rule_active(rule_c.id));
    assert_eq!(dashboard.queue.depth, 0);
    assert_eq!(dashboard.active_rules.len(), 2);

    let entry = &agg.queue[0];
    assert_eq!(entry.status, QueueEntryStatus::Processed);
    assert_eq!(entry.processed_at, Some(t_poll2));

    // The cap invariant held throughout.
    assert!(agg.active_non_default_count() <= agg.playthrough.max_concurrent_rules as usize);
}

#[tokio::test]
async fn pause_freezes_queue_and_countdowns_until_resume() {
    let owner = Uuid::new_v4();
    let host = Caller::user(owner);

    let rule_a = rule("Timed", Some(200), None);
    let rule_b = rule("Backlog", Some(60), None);
    let catalog = StaticCatalog {
        rules: [&rule_a, &rule_b]
            .into_iter()
            .map(|r| (r.id, r.clone()))
            .collect(),
    };

    let config = SessionConfiguration {
        rules: vec![configured(&rule_a), configured(&rule_b)],
    };
    let mut playthrough = Playthrough::new(owner, config);
    playthrough.max_concurrent_rules = 1;
    let mut agg = PlaythroughAggregate::new(playthrough);

    lifecycle::start(&mut agg, &host, t0()).unwrap();
    let level_a = rule_a.level(1).unwrap().clone();
    activation::pick_rule(&mut agg, &rule_a, &level_a, &host, t0()).unwrap();
    let level_b = rule_b.level(1).unwrap().clone();
    let outcome =
        activation::pick_rule(&mut agg, &rule_b, &level_b, &host, t0() + Duration::seconds(3))
            .unwrap();
    assert!(matches!(outcome, PickOutcome::Queued { .. }));

    lifecycle::pause(&mut agg, &host, t0() + Duration::seconds(50)).unwrap();

    // While paused: no draining, no expiry, frozen countdown (150s left).
    let during_pause = t0() + Duration::seconds(500);
    let dashboard = dashboard_read(&mut agg, &catalog, &host, during_pause).await;
    assert_eq!(dashboard.queue.depth, 1);
    assert_eq!(dashboard.active_rules[0].time_remaining_seconds, Some(150));

    // Resume after 550s of pause; expiry shifted, countdown resumes at 150s.
    let resumed_at = t0() + Duration::seconds(600);
    lifecycle::resume(&mut agg, &host, resumed_at).unwrap();
    let dashboard = dashboard_read(&mut agg, &catalog, &host, resumed_at).await;
    assert_eq!(dashboard.active_rules[0].time_remaining_seconds, Some(150));

    // Once rule A expires, the queued rule B takes the freed slot.
    let after_expiry = resumed_at + Duration::seconds(151);
    let dashboard = dashboard_read(&mut agg, &catalog, &host, after_expiry).await;
    assert!(!agg.is_rule_active(rule_a.id));
    assert!(agg.is_rule_active(rule_b.id));
    assert_eq!(dashboard.queue.depth, 0);
}
