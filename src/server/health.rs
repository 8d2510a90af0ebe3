//! Health and metrics endpoints
//!
//! - `/livez` (alias `/healthz`) - Liveness: 503 while any probe is failing
//! - `/readyz` - Readiness: 503 until the owner marks the process ready
//! - `/metrics` - Prometheus metrics in text format
//!
//! Only GET and HEAD are served; anything else gets 405.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Mutex;

use async_trait::async_trait;
use axum::{
    extract::State,
    http::{
        header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE, PRAGMA},
        HeaderName, StatusCode,
    },
    response::IntoResponse,
    routing::{get, MethodRouter},
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::lifecycle::{Context, HealthCoordinator, ProbeState, ReadinessGate, ShutdownParticipant};
use crate::server::metrics::SharedMetrics;

/// Combined server state for health and metrics endpoints
#[derive(Clone)]
pub struct ServerState {
    readiness: ReadinessGate,
    health: HealthCoordinator,
    metrics: SharedMetrics,
}

impl ServerState {
    pub fn new(readiness: ReadinessGate, health: HealthCoordinator, metrics: SharedMetrics) -> Self {
        Self {
            readiness,
            health,
            metrics,
        }
    }
}

#[derive(Serialize)]
struct LivenessBody {
    status: &'static str,
    healthy: bool,
    uptime_sec: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    checks: Option<BTreeMap<String, ProbeState>>,
}

#[derive(Serialize)]
struct ReadinessBody {
    status: &'static str,
    ready: bool,
    uptime_sec: u64,
}

const NO_CACHE: [(HeaderName, &str); 2] = [(CACHE_CONTROL, "no-store"), (PRAGMA, "no-cache")];

fn status_for(ok: bool) -> (StatusCode, &'static str) {
    if ok {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "fail")
    }
}

/// Liveness probe handler
///
/// Returns 200 OK unless a probe is failing, 503 Service Unavailable otherwise.
async fn livez(State(state): State<ServerState>) -> impl IntoResponse {
    let report = state.health.health_status();
    let healthy = !report.any_failing;
    let (code, status) = status_for(healthy);

    let body = LivenessBody {
        status,
        healthy,
        uptime_sec: state.readiness.uptime().as_secs(),
        checks: report.checks,
    };
    (code, NO_CACHE, Json(body))
}

/// Readiness probe handler
///
/// Returns 200 OK if ready, 503 Service Unavailable if not.
async fn readyz(State(state): State<ServerState>) -> impl IntoResponse {
    let ready = state.readiness.is_ready();
    let (code, status) = status_for(ready);

    let body = ReadinessBody {
        status,
        ready,
        uptime_sec: state.readiness.uptime().as_secs(),
    };
    (code, NO_CACHE, Json(body))
}

/// Prometheus metrics handler
///
/// Returns metrics in Prometheus text format for scraping.
async fn metrics(State(state): State<ServerState>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to encode metrics: {}", e),
        )
            .into_response(),
    }
}

async fn method_not_allowed() -> impl IntoResponse {
    (StatusCode::METHOD_NOT_ALLOWED, [(ALLOW, "GET, HEAD")])
}

/// GET (and implicitly HEAD) only
fn read_only<H, T>(handler: H) -> MethodRouter<ServerState>
where
    H: axum::handler::Handler<T, ServerState>,
    T: 'static,
{
    get(handler).fallback(method_not_allowed)
}

/// Build the router for health and metrics endpoints
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/livez", read_only(livez))
        .route("/healthz", read_only(livez))
        .route("/readyz", read_only(readyz))
        .route("/metrics", read_only(self::metrics))
        .with_state(state)
}

/// Serve the endpoints on an already-bound listener until `shutdown` is done
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    shutdown: Context,
) -> Result<(), std::io::Error> {
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.done().await })
        .await
}

/// Background health server that stops as a shutdown participant
pub struct HealthServer {
    local_addr: SocketAddr,
    shutdown: Context,
    handle: Mutex<Option<JoinHandle<Result<(), std::io::Error>>>>,
}

impl HealthServer {
    /// Bind `0.0.0.0:port` (HTTP, no TLS) and start serving
    pub async fn bind(port: u16, state: ServerState) -> Result<Self, std::io::Error> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let server = Self::spawn(listener, state)?;
        // Log after successful bind - server is actually listening
        info!(port = server.local_addr.port(), "Health and metrics server listening (HTTP)");
        Ok(server)
    }

    /// Start serving on `listener` in a background task
    pub fn spawn(listener: TcpListener, state: ServerState) -> Result<Self, std::io::Error> {
        let local_addr = listener.local_addr()?;
        let shutdown = Context::background();
        let server_shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            let result = serve(listener, state, server_shutdown).await;
            if let Err(e) = &result {
                warn!(error = %e, "Health server failed");
            }
            result
        });
        Ok(Self {
            local_addr,
            shutdown,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl ShutdownParticipant for HealthServer {
    async fn shutdown(&self, ctx: Context) -> anyhow::Result<()> {
        self.shutdown.cancel();
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        tokio::select! {
            joined = handle => {
                joined??;
                info!("Health server stopped");
                Ok(())
            }
            _ = ctx.done() => Err(anyhow::anyhow!("health server did not drain before the deadline")),
        }
    }
}
