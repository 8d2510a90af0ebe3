//! Monitoring agent runtime: health probes, readiness, and graceful shutdown
//!
//! - [`lifecycle`] - probe scheduling, readiness gate, shutdown orchestration
//! - [`server`] - `/livez`, `/readyz` and `/metrics` endpoints, signal handling
//! - [`config`] - environment configuration

pub mod config;
pub mod lifecycle;
pub mod server;
