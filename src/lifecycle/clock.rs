//! Wall-clock source for probe bookkeeping
//!
//! Scheduling runs on tokio's monotonic timer. Wall time is only used for
//! what gets reported and rate-limited: a probe's `last_run_at` and the
//! window between repeated "still passing/failing" log lines.

use chrono::{DateTime, Utc};

/// Source of the timestamps stamped on probe executions
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the host's UTC clock
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[cfg(test)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl ManualClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    /// Step forward; takes the same unit as the probe intervals
    pub fn advance(&self, step: std::time::Duration) {
        let step = chrono::Duration::from_std(step).expect("step fits in a chrono duration");
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += step;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
