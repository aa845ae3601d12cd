//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `PlaythroughRepository` port from the `core` crate. It handles all
//! interactions with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use challenge_picker_core::domain::{
    Playthrough, PlaythroughAggregate, PlaythroughRuleState, PlaythroughStatus, QueueEntry,
    QueueEntryStatus, RuleCooldown, SessionConfiguration,
};
use challenge_picker_core::error::{EngineError, EngineResult};
use challenge_picker_core::ports::PlaythroughRepository;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `PlaythroughRepository` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> EngineError {
    EngineError::Internal(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct PlaythroughRecord {
    id: Uuid,
    owner_id: Uuid,
    status: String,
    max_concurrent_rules: i32,
    rule_cooldown_seconds: i64,
    configuration: serde_json::Value,
    last_pick_at: Option<DateTime<Utc>>,
    cooldowns: serde_json::Value,
    started_at: Option<DateTime<Utc>>,
    paused_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    total_paused_seconds: i64,
    total_duration_seconds: Option<i64>,
    allow_viewer_picks: bool,
    require_auth: bool,
    version: i64,
}

impl PlaythroughRecord {
    fn to_domain(self) -> EngineResult<Playthrough> {
        let status = PlaythroughStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(format!("unknown playthrough status '{}'", self.status))
        })?;
        let cooldowns: Vec<RuleCooldown> =
            serde_json::from_value(self.cooldowns).unwrap_or_default();

        Ok(Playthrough {
            id: self.id,
            owner_id: self.owner_id,
            status,
            max_concurrent_rules: self.max_concurrent_rules.max(0) as u32,
            rule_cooldown_seconds: self.rule_cooldown_seconds,
            configuration: SessionConfiguration::from_json(&self.configuration),
            last_pick_at: self.last_pick_at,
            cooldowns,
            started_at: self.started_at,
            paused_at: self.paused_at,
            ended_at: self.ended_at,
            total_paused_seconds: self.total_paused_seconds,
            total_duration_seconds: self.total_duration_seconds,
            allow_viewer_picks: self.allow_viewer_picks,
            require_auth: self.require_auth,
            version: self.version,
        })
    }
}

#[derive(FromRow)]
struct RuleStateRecord {
    rule_id: Uuid,
    rule_name: String,
    is_active: bool,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    current_amount: Option<i32>,
}

impl RuleStateRecord {
    fn to_domain(self) -> PlaythroughRuleState {
        PlaythroughRuleState {
            rule_id: self.rule_id,
            rule_name: self.rule_name,
            is_active: self.is_active,
            started_at: self.started_at,
            completed_at: self.completed_at,
            expires_at: self.expires_at,
            current_amount: self.current_amount,
        }
    }
}

#[derive(FromRow)]
struct QueueEntryRecord {
    id: Uuid,
    rule_id: Uuid,
    difficulty_level: i32,
    position: i64,
    queued_at: DateTime<Utc>,
    queued_by: Option<Uuid>,
    status: String,
    processed_at: Option<DateTime<Utc>>,
    failure_reason: Option<String>,
}

impl QueueEntryRecord {
    fn to_domain(self) -> EngineResult<QueueEntry> {
        let status = QueueEntryStatus::parse(&self.status).ok_or_else(|| {
            EngineError::Internal(format!("unknown queue entry status '{}'", self.status))
        })?;
        Ok(QueueEntry {
            id: self.id,
            rule_id: self.rule_id,
            difficulty_level: self.difficulty_level.max(0) as u32,
            position: self.position,
            queued_at: self.queued_at,
            queued_by: self.queued_by,
            status,
            processed_at: self.processed_at,
            failure_reason: self.failure_reason,
        })
    }
}

//=========================================================================================
// Aggregate Assembly
//=========================================================================================

impl DbAdapter {
    async fn load_children(&self, playthrough: Playthrough) -> EngineResult<PlaythroughAggregate> {
        let state_records = sqlx::query_as::<_, RuleStateRecord>(
            "SELECT rule_id, rule_name, is_active, started_at, completed_at, expires_at, current_amount \
             FROM playthrough_rule_states WHERE playthrough_id = $1 ORDER BY started_at ASC",
        )
        .bind(playthrough.id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let queue_records = sqlx::query_as::<_, QueueEntryRecord>(
            "SELECT id, rule_id, difficulty_level, position, queued_at, queued_by, status, processed_at, failure_reason \
             FROM playthrough_queue_entries WHERE playthrough_id = $1 ORDER BY position ASC",
        )
        .bind(playthrough.id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        let rule_states = state_records.into_iter().map(|r| r.to_domain()).collect();
        let queue = queue_records
            .into_iter()
            .map(|r| r.to_domain())
            .collect::<EngineResult<Vec<_>>>()?;

        Ok(PlaythroughAggregate {
            playthrough,
            rule_states,
            queue,
        })
    }

    /// Upserts every child row of the aggregate. Rule states and queue
    /// entries are only ever updated in place or appended, never deleted,
    /// so upserts are sufficient for the single flush.
    async fn store_children(&self, aggregate: &PlaythroughAggregate) -> EngineResult<()> {
        let playthrough = &aggregate.playthrough;
        for state in &aggregate.rule_states {
            sqlx::query(
                "INSERT INTO playthrough_rule_states \
                 (playthrough_id, owner_id, rule_id, rule_name, is_active, started_at, completed_at, expires_at, current_amount) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
                 ON CONFLICT (playthrough_id, rule_id) DO UPDATE SET \
                 rule_name = EXCLUDED.rule_name, is_active = EXCLUDED.is_active, \
                 started_at = EXCLUDED.started_at, completed_at = EXCLUDED.completed_at, \
                 expires_at = EXCLUDED.expires_at, current_amount = EXCLUDED.current_amount",
            )
            .bind(playthrough.id)
            .bind(playthrough.owner_id)
            .bind(state.rule_id)
            .bind(&state.rule_name)
            .bind(state.is_active)
            .bind(state.started_at)
            .bind(state.completed_at)
            .bind(state.expires_at)
            .bind(state.current_amount)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        }

        for entry in &aggregate.queue {
            sqlx::query(
                "INSERT INTO playthrough_queue_entries \
                 (id, playthrough_id, owner_id, rule_id, difficulty_level, position, queued_at, queued_by, status, processed_at, failure_reason) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, processed_at = EXCLUDED.processed_at, \
                 failure_reason = EXCLUDED.failure_reason",
            )
            .bind(entry.id)
            .bind(playthrough.id)
            .bind(playthrough.owner_id)
            .bind(entry.rule_id)
            .bind(entry.difficulty_level as i32)
            .bind(entry.position)
            .bind(entry.queued_at)
            .bind(entry.queued_by)
            .bind(entry.status.as_str())
            .bind(entry.processed_at)
            .bind(entry.failure_reason.as_deref())
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        }

        Ok(())
    }
}

//=========================================================================================
// `PlaythroughRepository` Trait Implementation
//=========================================================================================

const SELECT_PLAYTHROUGH: &str = "SELECT id, owner_id, status, max_concurrent_rules, \
    rule_cooldown_seconds, configuration, last_pick_at, cooldowns, started_at, paused_at, \
    ended_at, total_paused_seconds, total_duration_seconds, allow_viewer_picks, require_auth, \
    version FROM playthroughs";

#[async_trait]
impl PlaythroughRepository for DbAdapter {
    async fn fetch(&self, id: Uuid) -> EngineResult<PlaythroughAggregate> {
        let record = sqlx::query_as::<_, PlaythroughRecord>(&format!(
            "{SELECT_PLAYTHROUGH} WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| EngineError::NotFound(format!("Playthrough {id} not found")))?;

        self.load_children(record.to_domain()?).await
    }

    async fn fetch_current_for_owner(&self, owner_id: Uuid) -> EngineResult<PlaythroughAggregate> {
        let record = sqlx::query_as::<_, PlaythroughRecord>(&format!(
            "{SELECT_PLAYTHROUGH} WHERE owner_id = $1 AND status != 'completed' \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .ok_or_else(|| {
            EngineError::NotFound(format!("No current playthrough for user {owner_id}"))
        })?;

        self.load_children(record.to_domain()?).await
    }

    async fn create(&self, aggregate: &PlaythroughAggregate) -> EngineResult<()> {
        let p = &aggregate.playthrough;
        let configuration = serde_json::to_value(&p.configuration)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let cooldowns = serde_json::to_value(&p.cooldowns)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        sqlx::query(
            "INSERT INTO playthroughs \
             (id, owner_id, status, max_concurrent_rules, rule_cooldown_seconds, configuration, \
              last_pick_at, cooldowns, started_at, paused_at, ended_at, total_paused_seconds, \
              total_duration_seconds, allow_viewer_picks, require_auth, version) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
        )
        .bind(p.id)
        .bind(p.owner_id)
        .bind(p.status.as_str())
        .bind(p.max_concurrent_rules as i32)
        .bind(p.rule_cooldown_seconds)
        .bind(configuration)
        .bind(p.last_pick_at)
        .bind(cooldowns)
        .bind(p.started_at)
        .bind(p.paused_at)
        .bind(p.ended_at)
        .bind(p.total_paused_seconds)
        .bind(p.total_duration_seconds)
        .bind(p.allow_viewer_picks)
        .bind(p.require_auth)
        .bind(p.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        self.store_children(aggregate).await
    }

    async fn store(&self, aggregate: &PlaythroughAggregate) -> EngineResult<()> {
        let p = &aggregate.playthrough;
        let configuration = serde_json::to_value(&p.configuration)
            .map_err(|e| EngineError::Internal(e.to_string()))?;
        let cooldowns = serde_json::to_value(&p.cooldowns)
            .map_err(|e| EngineError::Internal(e.to_string()))?;

        // The version check rejects lost updates from a concurrent writer;
        // the bump invalidates any aggregate loaded before this flush.
        let result = sqlx::query(
            "UPDATE playthroughs SET \
             status = $1, max_concurrent_rules = $2, rule_cooldown_seconds = $3, \
             configuration = $4, last_pick_at = $5, cooldowns = $6, started_at = $7, \
             paused_at = $8, ended_at = $9, total_paused_seconds = $10, \
             total_duration_seconds = $11, allow_viewer_picks = $12, require_auth = $13, \
             version = version + 1 \
             WHERE id = $14 AND version = $15",
        )
        .bind(p.status.as_str())
        .bind(p.max_concurrent_rules as i32)
        .bind(p.rule_cooldown_seconds)
        .bind(configuration)
        .bind(p.last_pick_at)
        .bind(cooldowns)
        .bind(p.started_at)
        .bind(p.paused_at)
        .bind(p.ended_at)
        .bind(p.total_paused_seconds)
        .bind(p.total_duration_seconds)
        .bind(p.allow_viewer_picks)
        .bind(p.require_auth)
        .bind(p.id)
        .bind(p.version)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Conflict(format!(
                "Playthrough {} was modified concurrently",
                p.id
            )));
        }

        self.store_children(aggregate).await
    }
}
