//! HTTP surface for health checks and metrics.
//!
//! Two small axum servers: the health server exposes `/healthz` and
//! `/metrics`, the metrics server exposes `/metrics` only. Both bodies are
//! JSON and both servers drain gracefully (bounded by a grace period) when
//! the shutdown token fires.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use snafu::ResultExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::{BindSnafu, ServeSnafu, ServerError};
use crate::health::{HealthChecker, HealthStatus};
use crate::metrics::{MetricsCollector, MetricsSnapshot};

/// How long draining connections may hold up shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

struct HealthState {
    health: Arc<HealthChecker>,
    metrics: Arc<MetricsCollector>,
}

/// Serve `/healthz` and `/metrics` on the health port until cancelled.
pub async fn run_health_server(
    port: u16,
    health: Arc<HealthChecker>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let state = Arc::new(HealthState { health, metrics });
    let app = Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(health_metrics_handler))
        .with_state(state);

    serve("health", port, app, shutdown).await
}

/// Serve `/metrics` on the metrics port until cancelled.
pub async fn run_metrics_server(
    port: u16,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    serve("metrics", port, app, shutdown).await
}

async fn serve(
    what: &'static str,
    port: u16,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), ServerError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await.context(BindSnafu {
        what,
        addr: addr.to_string(),
    })?;

    info!(server = what, %addr, "HTTP server listening");

    let graceful = {
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    };

    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(graceful) => {
            result.context(ServeSnafu { what })?;
        }
        // Hard stop if draining outlives the grace period.
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(SHUTDOWN_GRACE).await;
        } => {}
    }

    info!(server = what, "HTTP server stopped");
    Ok(())
}

async fn healthz_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<HealthStatus>) {
    let status = state.health.check_health().await;
    (health_status_code(&status.status), Json(status))
}

async fn health_metrics_handler(
    State(state): State<Arc<HealthState>>,
) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

async fn metrics_handler(
    State(metrics): State<Arc<MetricsCollector>>,
) -> Json<MetricsSnapshot> {
    Json(metrics.snapshot())
}

/// Degraded still serves 200; only unhealthy turns the probe away.
fn health_status_code(status: &str) -> StatusCode {
    match status {
        "unhealthy" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}
