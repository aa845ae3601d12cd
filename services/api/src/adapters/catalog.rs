//! services/api/src/adapters/catalog.rs
//!
//! Read-only `RuleCatalog` adapter backed by the rules tables. The catalog
//! is authored by the (out-of-scope) admin screens; the engine only reads it.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use challenge_picker_core::domain::{DifficultyLevel, Rule};
use challenge_picker_core::error::{EngineError, EngineResult};
use challenge_picker_core::ports::RuleCatalog;

/// A catalog adapter that implements the `RuleCatalog` port.
#[derive(Clone)]
pub struct DbRuleCatalog {
    pool: PgPool,
}

impl DbRuleCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct RuleRecord {
    id: Uuid,
    name: String,
}

#[derive(FromRow)]
struct LevelRecord {
    level: i32,
    duration_seconds: Option<i64>,
    amount: Option<i32>,
}

#[async_trait]
impl RuleCatalog for DbRuleCatalog {
    async fn rule(&self, rule_id: Uuid) -> EngineResult<Rule> {
        let record = sqlx::query_as::<_, RuleRecord>("SELECT id, name FROM rules WHERE id = $1")
            .bind(rule_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Internal(e.to_string()))?
            .ok_or_else(|| EngineError::NotFound(format!("Rule {rule_id} not found")))?;

        let levels = sqlx::query_as::<_, LevelRecord>(
            "SELECT level, duration_seconds, amount FROM rule_difficulty_levels \
             WHERE rule_id = $1 ORDER BY level ASC",
        )
        .bind(rule_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| EngineError::Internal(e.to_string()))?;

        Ok(Rule {
            id: record.id,
            name: record.name,
            levels: levels
                .into_iter()
                .map(|l| DifficultyLevel {
                    level: l.level.max(0) as u32,
                    duration_seconds: l.duration_seconds,
                    amount: l.amount,
                })
                .collect(),
        })
    }
}
