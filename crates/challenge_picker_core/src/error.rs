//! crates/challenge_picker_core/src/error.rs
//!
//! Defines the error taxonomy for all engine operations. Every variant has a
//! stable machine-readable code so callers can build structured responses.

use uuid::Uuid;

/// A convenience type alias for `Result<T, EngineError>`.
pub type EngineResult<T> = Result<T, EngineError>;

/// The primary error type for the rule engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// No or invalid credentials where the operation requires identity.
    #[error("Authentication required")]
    Unauthorized,

    /// Authenticated but not the owner / not permitted to do this.
    #[error("Not permitted")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    /// A lifecycle transition (or an operation gated on a status) was illegal.
    #[error("Cannot {action} a {from} playthrough")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },

    /// The global anti-spam throttle between picks is still running.
    #[error("Rate limited, retry in {seconds_remaining:.1}s")]
    RateLimited { seconds_remaining: f64 },

    /// The per-rule cooldown is still running.
    #[error("Rule {rule_id} is on cooldown for another {seconds_remaining}s")]
    RuleOnCooldown {
        rule_id: Uuid,
        seconds_remaining: i64,
    },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// The aggregate was modified concurrently (stored version mismatch).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An unexpected failure in a collaborator (persistence, catalog).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Stable code string surfaced in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Unauthorized => "unauthorized",
            EngineError::Forbidden => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::RateLimited { .. } => "rate_limited",
            EngineError::RuleOnCooldown { .. } => "rule_on_cooldown",
            EngineError::Validation(_) => "validation_error",
            EngineError::Conflict(_) => "conflict",
            EngineError::Internal(_) => "internal_error",
        }
    }
}
