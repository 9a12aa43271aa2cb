//! Time source for the governance engines
//!
//! Engines never call `Utc::now()` directly: SLA deadlines, lock expiry and
//! cooldown windows are all computed from the injected clock.

use chrono::{DateTime, Utc};
use std::sync::Arc;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

#[cfg(test)]
pub use manual::ManualClock;
