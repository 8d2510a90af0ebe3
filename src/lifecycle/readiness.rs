//! Readiness gate
//!
//! Decouples "the process is alive" (liveness, derived from probes) from
//! "the process is prepared to accept traffic" (readiness, flipped by the
//! owner once dependent subsystems are up and flipped back on shutdown).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Shared readiness flag plus process start time
///
/// Clones share the same flag.
#[derive(Debug, Clone)]
pub struct ReadinessGate {
    ready: Arc<AtomicBool>,
    started_at: Instant,
}

impl ReadinessGate {
    /// Create a new gate (initially not ready)
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            started_at: Instant::now(),
        }
    }

    /// Set the readiness flag
    ///
    /// Only an actual change is logged at info.
    pub fn set_ready(&self, ready: bool) {
        let previous = self.ready.swap(ready, Ordering::SeqCst);
        if previous != ready {
            info!(ready, "Readiness changed");
        } else {
            debug!(ready, "Readiness unchanged");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Time elapsed since the gate was created
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new()
    }
}
