use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};
use vigil::config::AgentConfig;
use vigil::lifecycle::{
    Context, HealthCoordinator, ProbeMetrics, ReadinessGate, ShutdownCoordinator, SystemClock,
};
use vigil::server::{create_metrics, wait_for_signal, HealthServer, ServerState, SharedMetrics};

/// How often the built-in probes run
const BUILTIN_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Scheduler lag above this marks the runtime probe as failing
const MAX_TIMER_LAG: Duration = Duration::from_millis(500);

/// Fails when the async runtime is too starved to wake a short timer on time
async fn runtime_probe(_ctx: Context) -> anyhow::Result<()> {
    let requested = Duration::from_millis(10);
    let started = tokio::time::Instant::now();
    tokio::time::sleep(requested).await;
    let lag = started.elapsed().saturating_sub(requested);
    if lag > MAX_TIMER_LAG {
        anyhow::bail!("timer fired {}ms late", lag.as_millis());
    }
    Ok(())
}

fn register_builtin_probes(
    health: &HealthCoordinator,
    metrics: &SharedMetrics,
) -> anyhow::Result<()> {
    health.register_probe("runtime", BUILTIN_PROBE_INTERVAL, runtime_probe)?;

    let metrics = metrics.clone();
    health.register_probe("metrics", BUILTIN_PROBE_INTERVAL, move |_ctx| {
        let encoded = metrics.encode().map(|_| ()).map_err(anyhow::Error::from);
        async move { encoded }
    })?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AgentConfig::from_env()?;

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        health_port = config.health_port,
        shutdown_timeout_secs = config.shutdown_timeout.as_secs(),
        "Starting monitoring agent"
    );

    let shutdown = ShutdownCoordinator::new(config.shutdown_timeout);

    // Create readiness state (initially not ready)
    let readiness = ReadinessGate::new();

    let metrics = create_metrics();
    let probe_metrics = ProbeMetrics::register(&metrics)?;
    let health = HealthCoordinator::with_clock(Arc::new(SystemClock), Some(probe_metrics));
    register_builtin_probes(&health, &metrics)?;

    let state = ServerState::new(readiness.clone(), health.clone(), metrics.clone());
    let server = match HealthServer::bind(config.health_port, state).await {
        Ok(server) => server,
        Err(e) => {
            error!(error = %e, port = config.health_port, "Failed to bind health server");
            return Err(e.into());
        }
    };

    // Participants run concurrently and must tolerate any relative order
    shutdown.register(server);
    shutdown.register(health.clone());

    readiness.set_ready(true);
    info!("Agent ready");

    match wait_for_signal().await {
        Ok(signal) => info!(signal = signal, "Initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Cannot wait for termination signal, shutting down"),
    }

    // Stop receiving traffic before tearing anything down
    readiness.set_ready(false);

    if let Err(e) = shutdown.shutdown().await {
        error!(error = %e, "Shutdown incomplete");
        return Err(e.into());
    }

    info!("Agent shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
