//! services/api/src/web/state.rs
//!
//! Defines the application's shared state and the per-playthrough locking
//! that serializes all mutating operations on one session.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::config::Config;
use challenge_picker_core::ports::{Clock, PlaythroughRepository, RuleCatalog};

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn PlaythroughRepository>,
    pub catalog: Arc<dyn RuleCatalog>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
    pub locks: PlaythroughLocks,
}

//=========================================================================================
// Per-Playthrough Mutual Exclusion
//=========================================================================================

/// A registry of per-playthrough guards.
///
/// Concurrent picks racing the concurrency cap must not both observe the
/// same "slot available" snapshot, so every load-mutate-store sequence on a
/// playthrough runs under its guard. Different playthroughs are fully
/// independent and never share a lock. The repository's version check is
/// the cross-process backstop.
#[derive(Clone, Default)]
pub struct PlaythroughLocks {
    inner: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl PlaythroughLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the guard for one playthrough, creating it on first use.
    pub async fn lock(&self, id: Uuid) -> OwnedMutexGuard<()> {
        let guard = {
            let mut registry = self.inner.lock().await;
            registry.entry(id).or_default().clone()
        };
        guard.lock_owned().await
    }
}
