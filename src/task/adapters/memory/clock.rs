//! Manually advanced clock for deterministic expiry and timestamps.

use chrono::{DateTime, Local, TimeZone, Utc};
use mockable::Clock;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let Ok(delta) = chrono::Duration::from_std(step) else {
            return;
        };
        if let Ok(mut now) = self.now.write() {
            *now += delta;
        }
    }

    /// Pins the clock to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.write() {
            *now = instant;
        }
    }

    fn current(&self) -> DateTime<Utc> {
        self.now
            .read()
            .map_or_else(|poisoned| *poisoned.into_inner(), |now| *now)
    }
}

impl Default for ManualClock {
    /// Starts at 2026-01-01T00:00:00Z.
    fn default() -> Self {
        Self::new(Utc.timestamp_opt(1_767_225_600, 0).single().unwrap_or_default())
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.current().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        self.current()
    }
}
