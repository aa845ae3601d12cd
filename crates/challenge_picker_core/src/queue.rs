//! crates/challenge_picker_core/src/queue.rs
//!
//! FIFO backlog of pick requests deferred by the concurrency cap. The queue
//! is drained opportunistically on dashboard reads; there is no background
//! scheduler. Entries are never dropped, every terminal state is recorded.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::activation;
use crate::domain::{PlaythroughAggregate, PlaythroughStatus, QueueEntry, QueueEntryStatus};
use crate::error::{EngineError, EngineResult};
use crate::ports::RuleCatalog;

/// Snapshot of the queue reported on the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    pub depth: usize,
    pub next_position: i64,
    pub has_capacity: bool,
}

/// Appends a pick request with the next position. Returns the position.
pub fn enqueue(
    agg: &mut PlaythroughAggregate,
    rule_id: Uuid,
    difficulty_level: u32,
    queued_by: Option<Uuid>,
    now: DateTime<Utc>,
) -> i64 {
    let position = agg.next_queue_position();
    agg.queue.push(QueueEntry {
        id: Uuid::new_v4(),
        rule_id,
        difficulty_level,
        position,
        queued_at: now,
        queued_by,
        status: QueueEntryStatus::Pending,
        processed_at: None,
        failure_reason: None,
    });
    position
}

/// Index of the oldest pending entry, if any.
fn oldest_pending(agg: &PlaythroughAggregate) -> Option<usize> {
    agg.queue
        .iter()
        .enumerate()
        .filter(|(_, e)| e.status == QueueEntryStatus::Pending)
        .min_by_key(|(_, e)| e.position)
        .map(|(i, _)| i)
}

/// Drains the queue while the playthrough is active and slots are free.
///
/// A failed entry (rule vanished from the catalog, rule on cooldown, level
/// no longer defined) is recorded with its reason and does not block the
/// entries behind it. Returns the number of successfully activated entries.
pub async fn process_queue(
    agg: &mut PlaythroughAggregate,
    catalog: &dyn RuleCatalog,
    now: DateTime<Utc>,
) -> EngineResult<u32> {
    if agg.playthrough.status != PlaythroughStatus::Active {
        return Ok(0);
    }

    let mut processed = 0;
    while agg.has_free_slot() {
        let Some(idx) = oldest_pending(agg) else {
            break;
        };
        let rule_id = agg.queue[idx].rule_id;
        let level_number = agg.queue[idx].difficulty_level;

        let attempt = match catalog.rule(rule_id).await {
            Ok(rule) => match rule.level(level_number) {
                Some(level) => {
                    let level = level.clone();
                    activation::activate_from_queue(agg, &rule, &level, now).map(|_| ())
                }
                None => Err(EngineError::NotFound(format!(
                    "difficulty level {level_number} not found for rule {rule_id}"
                ))),
            },
            // A broken persistence layer aborts the drain; a vanished rule
            // only fails this entry.
            Err(EngineError::Internal(e)) => return Err(EngineError::Internal(e)),
            Err(e) => Err(e),
        };

        let entry = &mut agg.queue[idx];
        match attempt {
            Ok(()) => {
                entry.status = QueueEntryStatus::Processed;
                entry.processed_at = Some(now);
                processed += 1;
                debug!(playthrough = %agg.playthrough.id, rule = %rule_id, "queued pick activated");
            }
            Err(e) => {
                entry.status = QueueEntryStatus::Failed;
                entry.processed_at = Some(now);
                entry.failure_reason = Some(e.to_string());
                debug!(playthrough = %agg.playthrough.id, rule = %rule_id, reason = %e, "queued pick failed");
            }
        }
    }

    Ok(processed)
}

/// Queue depth, next position, and whether the playthrough has free capacity.
pub fn queue_status(agg: &PlaythroughAggregate) -> QueueStatus {
    QueueStatus {
        depth: agg.pending_queue_depth(),
        next_position: agg.next_queue_position(),
        has_capacity: agg.has_free_slot(),
    }
}
