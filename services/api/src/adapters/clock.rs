//! services/api/src/adapters/clock.rs
//!
//! Wall-clock implementation of the `Clock` port. Engine functions take an
//! explicit `now`, so this is the only place the service reads the system time.

use chrono::{DateTime, Utc};

use challenge_picker_core::ports::Clock;

#[derive(Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
