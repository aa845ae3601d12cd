pub mod activation;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod ports;
pub mod projector;
pub mod queue;

pub use activation::{ActivatedRule, CounterUpdate, PickOutcome, GLOBAL_PICK_INTERVAL_SECONDS};
pub use domain::{
    Caller, ConfiguredRule, DifficultyLevel, Playthrough, PlaythroughAggregate,
    PlaythroughRuleState, PlaythroughStatus, QueueEntry, QueueEntryStatus, Rule, RuleBehavior,
    RuleCooldown, SessionConfiguration,
};
pub use error::{EngineError, EngineResult};
pub use ports::{Clock, PlaythroughRepository, RuleCatalog};
pub use projector::{Dashboard, PickStatus, PlaythroughSummary};
pub use queue::QueueStatus;
