//! crates/challenge_picker_core/src/domain.rs
//!
//! Defines the pure, core data structures for the rule engine.
//! These structs are independent of any database or HTTP framework.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default per-rule cooldown applied when a playthrough is created without one.
pub const DEFAULT_RULE_COOLDOWN_SECONDS: i64 = 120;

/// Default concurrency cap for newly created playthroughs.
pub const DEFAULT_MAX_CONCURRENT_RULES: u32 = 3;

//=========================================================================================
// Catalog Types (read-only input to the engine)
//=========================================================================================

/// A challenge rule as defined in the external catalog.
#[derive(Debug, Clone)]
pub struct Rule {
    pub id: Uuid,
    pub name: String,
    pub levels: Vec<DifficultyLevel>,
}

impl Rule {
    /// Looks up a difficulty level by its level number.
    pub fn level(&self, level: u32) -> Option<&DifficultyLevel> {
        self.levels.iter().find(|l| l.level == level)
    }

    /// The lowest difficulty level, used by the manual toggle flow.
    pub fn lowest_level(&self) -> Option<&DifficultyLevel> {
        self.levels.iter().min_by_key(|l| l.level)
    }
}

/// A variant of a rule. A level may carry a duration, a counter amount,
/// both, or neither.
#[derive(Debug, Clone)]
pub struct DifficultyLevel {
    pub level: u32,
    pub duration_seconds: Option<i64>,
    pub amount: Option<i32>,
}

//=========================================================================================
// Playthrough Status & Rule Behavior
//=========================================================================================

/// The lifecycle status of a playthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaythroughStatus {
    Setup,
    Active,
    Paused,
    Completed,
}

impl PlaythroughStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaythroughStatus::Setup => "setup",
            PlaythroughStatus::Active => "active",
            PlaythroughStatus::Paused => "paused",
            PlaythroughStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "setup" => Some(PlaythroughStatus::Setup),
            "active" => Some(PlaythroughStatus::Active),
            "paused" => Some(PlaythroughStatus::Paused),
            "completed" => Some(PlaythroughStatus::Completed),
            _ => None,
        }
    }
}

/// How an activated rule behaves. Derived from which of `expires_at` and
/// `current_amount` are set, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleBehavior {
    Permanent,
    Time,
    Counter,
    Hybrid,
}

//=========================================================================================
// Configuration Snapshot
//=========================================================================================

/// One rule entry in the playthrough's configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfiguredRule {
    pub rule_id: Uuid,
    #[serde(default)]
    pub rule_name: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub tarot_card_identifier: Option<String>,
    #[serde(default)]
    pub position: Option<i32>,
}

/// The immutable-until-completion snapshot of the chosen rule set.
///
/// Parsed leniently: a malformed entry is skipped, which makes that rule
/// behave as non-default and disabled rather than failing the read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfiguration {
    pub rules: Vec<ConfiguredRule>,
}

impl SessionConfiguration {
    /// Parses a raw JSON snapshot, dropping entries that do not deserialize.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let entries = value
            .get("rules")
            .and_then(|r| r.as_array())
            .map(|a| a.as_slice())
            .unwrap_or(&[]);

        let rules = entries
            .iter()
            .filter_map(|e| serde_json::from_value::<ConfiguredRule>(e.clone()).ok())
            .collect();

        Self { rules }
    }

    pub fn entry(&self, rule_id: Uuid) -> Option<&ConfiguredRule> {
        self.rules.iter().find(|r| r.rule_id == rule_id)
    }

    pub fn is_default(&self, rule_id: Uuid) -> bool {
        self.entry(rule_id).map(|r| r.is_default).unwrap_or(false)
    }

    pub fn is_enabled(&self, rule_id: Uuid) -> bool {
        self.entry(rule_id).map(|r| r.is_enabled).unwrap_or(false)
    }

    /// Rules that are always active for the session's duration.
    pub fn default_rules(&self) -> impl Iterator<Item = &ConfiguredRule> {
        self.rules.iter().filter(|r| r.is_default && r.is_enabled)
    }

    /// Rules a host or viewer may pick: enabled and not default.
    pub fn pickable_rules(&self) -> impl Iterator<Item = &ConfiguredRule> {
        self.rules.iter().filter(|r| r.is_enabled && !r.is_default)
    }
}

//=========================================================================================
// Playthrough Aggregate
//=========================================================================================

/// A rule temporarily barred from being picked again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCooldown {
    pub rule_id: Uuid,
    pub since: DateTime<Utc>,
}

/// One streaming session instance binding a user, game, and ruleset.
#[derive(Debug, Clone)]
pub struct Playthrough {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: PlaythroughStatus,
    pub max_concurrent_rules: u32,
    pub rule_cooldown_seconds: i64,
    pub configuration: SessionConfiguration,
    pub last_pick_at: Option<DateTime<Utc>>,
    pub cooldowns: Vec<RuleCooldown>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub total_paused_seconds: i64,
    pub total_duration_seconds: Option<i64>,
    pub allow_viewer_picks: bool,
    pub require_auth: bool,
    /// Optimistic-concurrency counter, bumped by the repository on every store.
    pub version: i64,
}

impl Playthrough {
    /// Creates a fresh playthrough in `Setup` for the owning user.
    pub fn new(owner_id: Uuid, configuration: SessionConfiguration) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            status: PlaythroughStatus::Setup,
            max_concurrent_rules: DEFAULT_MAX_CONCURRENT_RULES,
            rule_cooldown_seconds: DEFAULT_RULE_COOLDOWN_SECONDS,
            configuration,
            last_pick_at: None,
            cooldowns: Vec::new(),
            started_at: None,
            paused_at: None,
            ended_at: None,
            total_paused_seconds: 0,
            total_duration_seconds: None,
            allow_viewer_picks: false,
            require_auth: false,
            version: 0,
        }
    }

    pub fn is_owner(&self, caller: &Caller) -> bool {
        caller.user_id == Some(self.owner_id)
    }

    /// Drops cooldown entries whose window has elapsed. Returns whether
    /// anything was removed. The cooldown set is only ever swept lazily,
    /// there is no background timer.
    pub fn sweep_cooldowns(&mut self, now: DateTime<Utc>) -> bool {
        let window = Duration::seconds(self.rule_cooldown_seconds);
        let before = self.cooldowns.len();
        self.cooldowns.retain(|c| now - c.since < window);
        self.cooldowns.len() != before
    }

    /// Remaining cooldown seconds for a rule, if it is still cooling.
    pub fn cooldown_remaining(&self, rule_id: Uuid, now: DateTime<Utc>) -> Option<i64> {
        self.cooldowns
            .iter()
            .find(|c| c.rule_id == rule_id)
            .and_then(|c| {
                let remaining = self.rule_cooldown_seconds - (now - c.since).num_seconds();
                (remaining > 0).then_some(remaining)
            })
    }

    /// Puts a rule on cooldown, replacing any existing entry for it.
    pub fn start_cooldown(&mut self, rule_id: Uuid, now: DateTime<Utc>) {
        self.cooldowns.retain(|c| c.rule_id != rule_id);
        self.cooldowns.push(RuleCooldown { rule_id, since: now });
    }
}

/// The activation record of a rule within a specific playthrough.
///
/// Never hard-deleted during play; completed activations stay around with
/// `completed_at` set, preserving history for post-run feedback.
#[derive(Debug, Clone)]
pub struct PlaythroughRuleState {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub is_active: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub current_amount: Option<i32>,
}

impl PlaythroughRuleState {
    pub fn behavior(&self) -> RuleBehavior {
        match (self.expires_at.is_some(), self.current_amount.is_some()) {
            (false, false) => RuleBehavior::Permanent,
            (true, false) => RuleBehavior::Time,
            (false, true) => RuleBehavior::Counter,
            (true, true) => RuleBehavior::Hybrid,
        }
    }

    /// Whether this state carries a counter, regardless of activity.
    pub fn has_counter(&self) -> bool {
        self.current_amount.is_some()
    }

    pub fn deactivate(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.completed_at = Some(now);
    }
}

//=========================================================================================
// Queue Entries
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueEntryStatus {
    Pending,
    Processed,
    Failed,
}

impl QueueEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEntryStatus::Pending => "pending",
            QueueEntryStatus::Processed => "processed",
            QueueEntryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueEntryStatus::Pending),
            "processed" => Some(QueueEntryStatus::Processed),
            "failed" => Some(QueueEntryStatus::Failed),
            _ => None,
        }
    }
}

/// A pick request deferred by the concurrency cap.
///
/// Entries are never silently dropped: every terminal state is recorded
/// with a timestamp and, for failures, a reason.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub difficulty_level: u32,
    pub position: i64,
    pub queued_at: DateTime<Utc>,
    pub queued_by: Option<Uuid>,
    pub status: QueueEntryStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

//=========================================================================================
// The Aggregate
//=========================================================================================

/// A playthrough together with its rule states and queue entries.
///
/// This is the unit of locking and of repository load/store: all engine
/// operations mutate the aggregate in memory and the service layer flushes
/// it back in a single write.
#[derive(Debug, Clone)]
pub struct PlaythroughAggregate {
    pub playthrough: Playthrough,
    pub rule_states: Vec<PlaythroughRuleState>,
    pub queue: Vec<QueueEntry>,
}

impl PlaythroughAggregate {
    pub fn new(playthrough: Playthrough) -> Self {
        Self {
            playthrough,
            rule_states: Vec::new(),
            queue: Vec::new(),
        }
    }

    pub fn state(&self, rule_id: Uuid) -> Option<&PlaythroughRuleState> {
        self.rule_states.iter().find(|s| s.rule_id == rule_id)
    }

    pub fn state_mut(&mut self, rule_id: Uuid) -> Option<&mut PlaythroughRuleState> {
        self.rule_states.iter_mut().find(|s| s.rule_id == rule_id)
    }

    pub fn is_rule_active(&self, rule_id: Uuid) -> bool {
        self.rule_states
            .iter()
            .any(|s| s.rule_id == rule_id && s.is_active)
    }

    /// Count of active states that occupy a concurrency slot. Default rules
    /// are always on and do not count against the cap.
    pub fn active_non_default_count(&self) -> usize {
        self.rule_states
            .iter()
            .filter(|s| s.is_active && !self.playthrough.configuration.is_default(s.rule_id))
            .count()
    }

    pub fn has_free_slot(&self) -> bool {
        self.active_non_default_count() < self.playthrough.max_concurrent_rules as usize
    }

    /// The position the next enqueued pick request will receive.
    pub fn next_queue_position(&self) -> i64 {
        self.queue.iter().map(|e| e.position).max().unwrap_or(0) + 1
    }

    pub fn pending_queue_depth(&self) -> usize {
        self.queue
            .iter()
            .filter(|e| e.status == QueueEntryStatus::Pending)
            .count()
    }
}

//=========================================================================================
// Caller Identity
//=========================================================================================

/// The identity attached to an incoming request, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct Caller {
    pub user_id: Option<Uuid>,
}

impl Caller {
    pub fn anonymous() -> Self {
        Self { user_id: None }
    }

    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.user_id.is_none()
    }
}
