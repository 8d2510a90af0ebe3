//! HTTP server for health and metrics endpoints
//!
//! Provides Kubernetes-style probes:
//! - `/livez` - Liveness probe (no health probe is failing)
//! - `/readyz` - Readiness probe (agent is ready to receive work)
//! - `/metrics` - Prometheus exposition
//!
//! Also provides termination signal handling.

mod health;
pub mod metrics;
pub mod shutdown;

pub use health::{build_router, serve, HealthServer, ServerState};
pub use metrics::{create_metrics, MetricsError, MetricsRegistry, SharedMetrics};
pub use shutdown::wait_for_signal;

#[cfg(test)]
#[path = "health_test.rs"]
mod health_tests;
