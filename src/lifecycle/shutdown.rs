//! Graceful shutdown orchestration
//!
//! Components register as [`ShutdownParticipant`]s during startup. On
//! trigger, every participant runs concurrently under one shared deadline;
//! registration order is not execution order, so participants must be safe
//! to stop in any relative order.
//!
//! Outcomes:
//! - `Ok(())` - every participant finished cleanly
//! - `ParticipantsFailed` - all finished, some returned errors
//! - `DeadlineExceeded` - the deadline passed first; stragglers keep running
//!   detached and are never awaited again

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::lifecycle::context::Context;
use crate::lifecycle::isolation::run_isolated;

/// Anything that can clean up within a deadline-bound context
#[async_trait]
pub trait ShutdownParticipant: Send + Sync {
    async fn shutdown(&self, ctx: Context) -> anyhow::Result<()>;
}

/// Adapts a plain async closure into a participant
pub struct FnParticipant<F>(pub F);

#[async_trait]
impl<F, Fut> ShutdownParticipant for FnParticipant<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn shutdown(&self, ctx: Context) -> anyhow::Result<()> {
        (self.0)(ctx).await
    }
}

/// One participant's failure, by registration index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantFailure {
    pub index: usize,
    pub message: String,
}

impl fmt::Display for ParticipantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "participant {}: {}", self.index, self.message)
    }
}

fn join_failures(errors: &[ParticipantFailure]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShutdownError {
    #[error(
        "{failed} of {total} shutdown participants failed: {}",
        join_failures(.errors)
    )]
    ParticipantsFailed {
        failed: usize,
        total: usize,
        errors: Vec<ParticipantFailure>,
    },

    #[error("shutdown deadline of {timeout:?} exceeded, cleanup may be incomplete")]
    DeadlineExceeded { timeout: Duration },

    #[error("shutdown task aborted: {0}")]
    Aborted(String),
}

type Outcome = Shared<BoxFuture<'static, Result<(), ShutdownError>>>;

/// Runs registered participants once, concurrently, under one deadline
pub struct ShutdownCoordinator {
    timeout: Duration,
    participants: RwLock<Vec<Arc<dyn ShutdownParticipant>>>,
    triggered: AtomicBool,
    /// Set by the first trigger; every caller awaits the same spawned run
    outcome: Mutex<Option<Outcome>>,
}

impl ShutdownCoordinator {
    /// `timeout` bounds the whole batch, not each participant
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            participants: RwLock::new(Vec::new()),
            triggered: AtomicBool::new(false),
            outcome: Mutex::new(None),
        }
    }

    pub fn register<P>(&self, participant: P)
    where
        P: ShutdownParticipant + 'static,
    {
        self.register_arc(Arc::new(participant));
    }

    /// Register a participant that may be absent; `None` is a no-op
    pub fn register_optional<P>(&self, participant: Option<P>)
    where
        P: ShutdownParticipant + 'static,
    {
        if let Some(participant) = participant {
            self.register(participant);
        }
    }

    /// Register a plain async cleanup function
    pub fn register_fn<F, Fut>(&self, cleanup: F)
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(FnParticipant(cleanup));
    }

    pub fn register_arc(&self, participant: Arc<dyn ShutdownParticipant>) {
        if self.is_triggered() {
            warn!("Shutdown already triggered, ignoring late participant");
            return;
        }
        let mut participants = self
            .participants
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        participants.push(participant);
        debug!(index = participants.len() - 1, "Registered shutdown participant");
    }

    pub fn len(&self) -> usize {
        self.participants
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Stop every participant
    ///
    /// Idempotent: the first call spawns the orchestration, and every caller
    /// (concurrent, later, or after an earlier caller gave up waiting)
    /// receives the result of that single run. Must be called inside a tokio
    /// runtime.
    pub async fn shutdown(&self) -> Result<(), ShutdownError> {
        let outcome = {
            let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
            outcome
                .get_or_insert_with(|| {
                    self.triggered.store(true, Ordering::SeqCst);
                    let participants = self
                        .participants
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clone();
                    let handle = tokio::spawn(run(participants, self.timeout));
                    async move {
                        handle
                            .await
                            .unwrap_or_else(|e| Err(ShutdownError::Aborted(e.to_string())))
                    }
                    .boxed()
                    .shared()
                })
                .clone()
        };
        outcome.await
    }

    /// Wait until `ctx` is done, then trigger the shutdown
    pub async fn shutdown_on(&self, ctx: &Context) -> Result<(), ShutdownError> {
        ctx.done().await;
        info!("Shutdown requested");
        self.shutdown().await
    }
}

async fn run(
    participants: Vec<Arc<dyn ShutdownParticipant>>,
    timeout: Duration,
) -> Result<(), ShutdownError> {
    let total = participants.len();
    if total == 0 {
        debug!("No shutdown participants registered");
        return Ok(());
    }

    info!(
        participants = total,
        timeout_ms = timeout.as_millis() as u64,
        "Stopping components"
    );

    let ctx = Context::background().with_timeout(timeout);
    let (tx, mut rx) = mpsc::channel(total);

    for (index, participant) in participants.into_iter().enumerate() {
        let tx = tx.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let result = run_isolated(|| participant.shutdown(ctx)).await;
            match &result {
                Ok(()) => debug!(participant = index, "Shutdown participant finished"),
                Err(e) => error!(
                    participant = index,
                    error = %format!("{:#}", e),
                    "Shutdown participant failed"
                ),
            }
            let _ = tx.send((index, result)).await;
        });
    }
    drop(tx);

    let collect = async {
        let mut failures = Vec::new();
        while let Some((index, result)) = rx.recv().await {
            if let Err(e) = result {
                failures.push(ParticipantFailure {
                    index,
                    message: format!("{:#}", e),
                });
            }
        }
        failures
    };

    tokio::select! {
        biased;
        mut failures = collect => {
            if failures.is_empty() {
                info!(participants = total, "All components shut down");
                return Ok(());
            }
            failures.sort_by_key(|f| f.index);
            warn!(
                failed = failures.len(),
                participants = total,
                "Shutdown finished with failures"
            );
            Err(ShutdownError::ParticipantsFailed {
                failed: failures.len(),
                total,
                errors: failures,
            })
        }
        _ = ctx.done() => {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "Shutdown deadline exceeded, some components may still be cleaning up in the background"
            );
            Err(ShutdownError::DeadlineExceeded { timeout })
        }
    }
}
