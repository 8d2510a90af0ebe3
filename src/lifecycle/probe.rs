//! Probe records and the per-execution bookkeeping rules
//!
//! A probe is a named check with its own schedule. Its execution state and
//! its log rate-limit state live together in one [`ProbeStatus`] so a status
//! snapshot always reads a consistent pair.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::lifecycle::context::Context;

/// Probes requested faster than this run at this period instead
pub const MIN_PROBE_INTERVAL: Duration = Duration::from_secs(1);

/// Unchanged state is logged at most once per window
pub const LOG_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Steady failures escalate from debug to warn once this many have accumulated
pub const FAILURE_ESCALATION_THRESHOLD: u32 = 3;

/// User-supplied health check
pub type CheckFn = Arc<dyn Fn(Context) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Last known outcome of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    /// No execution has completed yet
    Unknown,
    Ok,
    Fail,
    /// No check function to run
    Skipped,
}

impl ProbeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeState::Unknown => "unknown",
            ProbeState::Ok => "ok",
            ProbeState::Fail => "fail",
            ProbeState::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mutable per-probe state, only written by that probe's own loop
#[derive(Debug, Clone)]
pub(crate) struct ProbeStatus {
    pub state: ProbeState,
    pub consecutive_failures: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_logged_at: Option<DateTime<Utc>>,
    pub cancel_observed: bool,
}

impl Default for ProbeStatus {
    fn default() -> Self {
        Self {
            state: ProbeState::Unknown,
            consecutive_failures: 0,
            last_run_at: None,
            last_logged_at: None,
            cancel_observed: false,
        }
    }
}

/// One registered probe
pub(crate) struct ProbeRecord {
    pub name: String,
    /// Interval as requested at registration, kept for logging
    pub requested_interval: Duration,
    /// Interval actually used for scheduling (never below the floor)
    pub interval: Duration,
    pub check: Option<CheckFn>,
    status: Mutex<ProbeStatus>,
}

impl ProbeRecord {
    pub fn new(name: String, requested_interval: Duration, check: Option<CheckFn>) -> Self {
        Self {
            name,
            requested_interval,
            interval: requested_interval.max(MIN_PROBE_INTERVAL),
            check,
            status: Mutex::new(ProbeStatus::default()),
        }
    }

    /// Lock the status for a short copy or update
    ///
    /// A panic can't happen while the lock is held, but a poisoned lock
    /// still holds valid data so it is recovered rather than propagated.
    pub fn status(&self) -> MutexGuard<'_, ProbeStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Public view of one probe
#[derive(Debug, Clone, Serialize)]
pub struct ProbeSnapshot {
    pub name: String,
    pub state: ProbeState,
    pub consecutive_failures: u32,
    pub interval: Duration,
    pub requested_interval: Duration,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// How (and whether) an execution outcome is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogDecision {
    /// Transition into failure
    EnteredFailure,
    /// Transition into passing
    Recovered,
    /// Still failing, past the escalation threshold
    StillFailingWarn,
    /// Still failing, below the escalation threshold
    StillFailingDebug,
    /// Still passing
    StillPassing,
    /// Unchanged and inside the rate-limit window
    Suppressed,
}

/// Record an execution outcome into `status` and decide how to log it
///
/// Transitions are always logged. Unchanged states are logged at most once
/// per [`LOG_WINDOW`].
pub(crate) fn apply_outcome(
    status: &mut ProbeStatus,
    passed: bool,
    now: DateTime<Utc>,
) -> LogDecision {
    let previous = status.state;
    if passed {
        status.state = ProbeState::Ok;
        status.consecutive_failures = 0;
    } else {
        status.state = ProbeState::Fail;
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
    }
    status.last_run_at = Some(now);

    let decision = if previous != status.state {
        if passed {
            LogDecision::Recovered
        } else {
            LogDecision::EnteredFailure
        }
    } else if !window_elapsed(status.last_logged_at, now) {
        LogDecision::Suppressed
    } else if passed {
        LogDecision::StillPassing
    } else if status.consecutive_failures >= FAILURE_ESCALATION_THRESHOLD {
        LogDecision::StillFailingWarn
    } else {
        LogDecision::StillFailingDebug
    };

    if decision != LogDecision::Suppressed {
        status.last_logged_at = Some(now);
    }
    decision
}

fn window_elapsed(last_logged_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(last) = last_logged_at else {
        return true;
    };
    match (now - last).to_std() {
        Ok(elapsed) => elapsed >= LOG_WINDOW,
        // Clock went backwards
        Err(_) => false,
    }
}
