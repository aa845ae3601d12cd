//! crates/challenge_picker_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the engine's collaborators.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! engine to be independent of the database and of wall-clock time.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{PlaythroughAggregate, Rule};
use crate::error::EngineResult;

/// Supplies the current time. Abstracted so pause/resume math is testable;
/// engine functions take an explicit `now` obtained from this port.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Read-only access to the rule catalog (rules and their difficulty levels).
///
/// The catalog is authored elsewhere and treated as already validated; the
/// engine only ever reads from it.
#[async_trait]
pub trait RuleCatalog: Send + Sync {
    /// Fetches a rule with all of its difficulty levels.
    /// A missing rule is `EngineError::NotFound`.
    async fn rule(&self, rule_id: Uuid) -> EngineResult<Rule>;
}

/// Persistence boundary for playthrough aggregates.
///
/// Implementations must treat `store` as a single flush of the whole
/// aggregate and must reject writes whose in-memory `version` no longer
/// matches the stored one.
#[async_trait]
pub trait PlaythroughRepository: Send + Sync {
    async fn fetch(&self, id: Uuid) -> EngineResult<PlaythroughAggregate>;

    /// The caller's most recent non-completed playthrough, for endpoints
    /// that address "the caller's active session" rather than a UUID.
    async fn fetch_current_for_owner(&self, owner_id: Uuid) -> EngineResult<PlaythroughAggregate>;

    async fn create(&self, aggregate: &PlaythroughAggregate) -> EngineResult<()>;

    async fn store(&self, aggregate: &PlaythroughAggregate) -> EngineResult<()>;
}
