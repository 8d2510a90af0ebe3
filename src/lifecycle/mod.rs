//! Lifecycle coordination kernel
//!
//! - [`HealthCoordinator`] - periodic probes aggregated into liveness
//! - [`ReadinessGate`] - explicitly toggled readiness
//! - [`ShutdownCoordinator`] - bounded, concurrent shutdown of components
//!
//! Probes and participants receive a [`Context`] and are isolated from each
//! other: a panic or hang in one is contained to that probe or participant.

pub mod clock;
pub mod context;
pub mod health;
mod isolation;
pub mod probe;
pub mod readiness;
pub mod shutdown;

pub use clock::{Clock, SystemClock};
pub use context::{Context, ContextError};
pub use health::{HealthCoordinator, HealthError, HealthReport, ProbeMetrics};
pub use probe::{CheckFn, ProbeSnapshot, ProbeState, MIN_PROBE_INTERVAL};
pub use readiness::ReadinessGate;
pub use shutdown::{
    FnParticipant, ParticipantFailure, ShutdownCoordinator, ShutdownError, ShutdownParticipant,
};

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;

#[cfg(test)]
#[path = "shutdown_test.rs"]
mod shutdown_tests;
