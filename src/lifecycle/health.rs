//! Concurrent health-check engine
//!
//! Each registered probe runs in its own loop, on its own schedule, under a
//! shared cancellable scope. The process is live while no probe is failing.
//!
//! Locking:
//! - the registry (`name -> record`) sits behind a `RwLock`; registration
//!   takes the write lock, snapshots take the read lock
//! - each record's status sits behind its own `Mutex`, held only to copy or
//!   update a few fields and never across a check invocation

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use prometheus::{IntCounterVec, IntGaugeVec};
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::lifecycle::clock::{Clock, SystemClock};
use crate::lifecycle::context::Context;
use crate::lifecycle::isolation::run_isolated;
use crate::lifecycle::probe::{
    apply_outcome, CheckFn, LogDecision, ProbeRecord, ProbeSnapshot, ProbeState,
    MIN_PROBE_INTERVAL,
};
use crate::lifecycle::shutdown::ShutdownParticipant;
use crate::server::metrics::{MetricsError, MetricsRegistry};

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("probe name must not be empty")]
    EmptyName,

    #[error("probe {0} has no check function")]
    MissingCheck(String),

    #[error("probe {0} interval must be positive")]
    InvalidInterval(String),

    #[error("probe {0} already exists")]
    AlreadyExists(String),

    #[error("probe {0} registered outside a tokio runtime")]
    NoRuntime(String),

    #[error("health coordinator is stopped")]
    Stopped,

    #[error("probe loops did not finish before the stop deadline")]
    StopTimeout,
}

/// Aggregated liveness view
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// State of every probe; `None` when no probe is registered
    pub checks: Option<BTreeMap<String, ProbeState>>,
    /// True if any probe is currently failing
    pub any_failing: bool,
}

/// Prometheus instrumentation for probe executions
#[derive(Clone)]
pub struct ProbeMetrics {
    runs: IntCounterVec,
    failing: IntGaugeVec,
}

impl ProbeMetrics {
    pub fn register(metrics: &MetricsRegistry) -> Result<Self, MetricsError> {
        Ok(Self {
            runs: metrics.register_counter_vec(
                "probe_runs_total",
                "Health probe executions by result",
                &["probe", "result"],
            )?,
            failing: metrics.register_gauge_vec(
                "probe_failing",
                "1 while the health probe is failing",
                &["probe"],
            )?,
        })
    }

    fn observe(&self, probe: &str, passed: bool) {
        let result = if passed { "ok" } else { "fail" };
        self.runs.with_label_values(&[probe, result]).inc();
        self.failing
            .with_label_values(&[probe])
            .set(if passed { 0 } else { 1 });
    }
}

/// Registry and scheduler for health probes
///
/// Cheap to clone; clones share the same registry and scope.
#[derive(Clone)]
pub struct HealthCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    probes: RwLock<HashMap<String, Arc<ProbeRecord>>>,
    scope: Context,
    tasks: TaskTracker,
    clock: Arc<dyn Clock>,
    metrics: Option<ProbeMetrics>,
}

impl HealthCoordinator {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock), None)
    }

    /// Create a coordinator with an explicit clock and optional metrics
    pub fn with_clock(clock: Arc<dyn Clock>, metrics: Option<ProbeMetrics>) -> Self {
        Self {
            inner: Arc::new(Inner {
                probes: RwLock::new(HashMap::new()),
                scope: Context::background(),
                tasks: TaskTracker::new(),
                clock,
                metrics,
            }),
        }
    }

    /// Register a probe and start its loop
    ///
    /// The check runs immediately, then every `interval` (raised to
    /// [`MIN_PROBE_INTERVAL`] if lower). Registering outside a tokio runtime
    /// is rejected with [`HealthError::NoRuntime`].
    pub fn register(
        &self,
        name: &str,
        interval: Duration,
        check: Option<CheckFn>,
    ) -> Result<(), HealthError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(HealthError::EmptyName);
        }
        if check.is_none() {
            return Err(HealthError::MissingCheck(name.to_string()));
        }
        if interval.is_zero() {
            return Err(HealthError::InvalidInterval(name.to_string()));
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Err(HealthError::NoRuntime(name.to_string()));
        };

        let mut probes = self
            .inner
            .probes
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if self.inner.scope.is_done() {
            return Err(HealthError::Stopped);
        }
        if probes.contains_key(name) {
            return Err(HealthError::AlreadyExists(name.to_string()));
        }

        if interval < MIN_PROBE_INTERVAL {
            warn!(
                probe = %name,
                requested_ms = interval.as_millis() as u64,
                floor_ms = MIN_PROBE_INTERVAL.as_millis() as u64,
                "Probe interval below floor, clamping"
            );
        }

        let record = Arc::new(ProbeRecord::new(name.to_string(), interval, check));
        probes.insert(record.name.clone(), record.clone());

        info!(
            probe = %record.name,
            interval_ms = record.interval.as_millis() as u64,
            "Registered health probe"
        );

        self.inner.tasks.spawn_on(
            run_probe_loop(
                record,
                self.inner.scope.clone(),
                self.inner.clock.clone(),
                self.inner.metrics.clone(),
            ),
            &runtime,
        );
        Ok(())
    }

    /// Register a probe from an async closure
    pub fn register_probe<F, Fut>(
        &self,
        name: &str,
        interval: Duration,
        check: F,
    ) -> Result<(), HealthError>
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let check: CheckFn = Arc::new(move |ctx| check(ctx).boxed());
        self.register(name, interval, Some(check))
    }

    /// Snapshot of every probe's state plus the aggregated failing flag
    pub fn health_status(&self) -> HealthReport {
        let probes = self
            .inner
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if probes.is_empty() {
            return HealthReport::default();
        }

        let checks: BTreeMap<String, ProbeState> = probes
            .values()
            .map(|record| (record.name.clone(), record.status().state))
            .collect();
        let any_failing = checks.values().any(|state| *state == ProbeState::Fail);

        HealthReport {
            checks: Some(checks),
            any_failing,
        }
    }

    /// Detailed per-probe view, sorted by name
    pub fn probes(&self) -> Vec<ProbeSnapshot> {
        let probes = self
            .inner
            .probes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut snapshots: Vec<ProbeSnapshot> = probes
            .values()
            .map(|record| {
                let status = record.status();
                ProbeSnapshot {
                    name: record.name.clone(),
                    state: status.state,
                    consecutive_failures: status.consecutive_failures,
                    interval: record.interval,
                    requested_interval: record.requested_interval,
                    last_run_at: status.last_run_at,
                }
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    /// Cancel every probe loop and wait for them, bounded by `ctx`
    ///
    /// Loops still running at the deadline are left detached.
    pub async fn stop(&self, ctx: &Context) -> Result<(), HealthError> {
        {
            let _probes = self
                .inner
                .probes
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            self.inner.scope.cancel();
        }
        self.inner.tasks.close();

        tokio::select! {
            biased;
            _ = self.inner.tasks.wait() => {
                debug!("All probe loops stopped");
                Ok(())
            }
            _ = ctx.done() => {
                warn!(
                    running = self.inner.tasks.len(),
                    "Probe loops still running at stop deadline"
                );
                Err(HealthError::StopTimeout)
            }
        }
    }
}

impl Default for HealthCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ShutdownParticipant for HealthCoordinator {
    async fn shutdown(&self, ctx: Context) -> anyhow::Result<()> {
        self.stop(&ctx).await?;
        Ok(())
    }
}

async fn run_probe_loop(
    record: Arc<ProbeRecord>,
    scope: Context,
    clock: Arc<dyn Clock>,
    metrics: Option<ProbeMetrics>,
) {
    let mut ticker = tokio::time::interval(record.interval);
    // A slow check pushes the next run back instead of bursting
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = scope.cancelled() => {
                let final_run = {
                    let mut status = record.status();
                    !std::mem::replace(&mut status.cancel_observed, true)
                };
                if final_run {
                    execute(&record, &scope, clock.as_ref(), metrics.as_ref()).await;
                }
                debug!(probe = %record.name, "Probe loop stopped");
                return;
            }
            _ = ticker.tick() => {
                execute(&record, &scope, clock.as_ref(), metrics.as_ref()).await;
            }
        }
    }
}

async fn execute(
    record: &ProbeRecord,
    scope: &Context,
    clock: &dyn Clock,
    metrics: Option<&ProbeMetrics>,
) {
    let Some(check) = record.check.as_ref() else {
        record.status().state = ProbeState::Skipped;
        return;
    };

    let result = run_isolated(|| check(scope.clone())).await;
    let passed = result.is_ok();

    let (decision, consecutive_failures) = {
        let mut status = record.status();
        let decision = apply_outcome(&mut status, passed, clock.now());
        (decision, status.consecutive_failures)
    };

    if let Some(metrics) = metrics {
        metrics.observe(&record.name, passed);
    }

    let error = result.err().map(|e| format!("{:#}", e)).unwrap_or_default();
    let probe = record.name.as_str();
    match decision {
        LogDecision::EnteredFailure => {
            warn!(probe = %probe, error = %error, "Health probe failing")
        }
        LogDecision::Recovered => info!(probe = %probe, "Health probe passing"),
        LogDecision::StillFailingWarn => warn!(
            probe = %probe,
            consecutive_failures,
            error = %error,
            "Health probe still failing"
        ),
        LogDecision::StillFailingDebug => debug!(
            probe = %probe,
            consecutive_failures,
            error = %error,
            "Health probe still failing"
        ),
        LogDecision::StillPassing => debug!(probe = %probe, "Health probe still passing"),
        LogDecision::Suppressed => {}
    }
}
