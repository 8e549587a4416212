//! Webhook HTTP Server
//!
//! Axum router exposing the webhook entry point plus health, readiness and
//! metrics endpoints, with the per-client edge limiter in front.

use crate::cache::{CacheStats, CircuitState};
use crate::config::ServerConfig;
use crate::gate::{DeferredStats, WebhookEvent, WebhookOutcome};
use crate::performance::PerformanceReport;
use crate::rate_limit::rate_limit;
use crate::services::Services;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    middleware::from_fn_with_state,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<Services>,
    /// Server start time for uptime calculation
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    /// Timestamp (ISO 8601)
    pub timestamp: String,
}

/// Readiness response
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// `ready`, or `degraded` while the primary cache is bypassed
    pub status: &'static str,
    pub cache: CacheStats,
}

/// Metrics response
#[derive(Debug, Serialize)]
pub struct MetricsResponse {
    pub performance: PerformanceReport,
    pub deferred: DeferredStats,
    pub cache: CacheStats,
}

/// Webhook entry point. Always answers 200 with a structured status.
pub async fn webhook(State(state): State<AppState>, body: Bytes) -> Json<WebhookOutcome> {
    let event = match serde_json::from_slice::<WebhookEvent>(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Rejected malformed webhook payload");
            return Json(WebhookOutcome::error(format!("invalid payload: {}", e)));
        }
    };

    Json(state.services.gate.handle(event).await)
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: state.version,
        uptime_secs: state.uptime_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

/// Liveness probe
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe. The in-process fallback always serves, so a bypassed
/// primary degrades rather than fails readiness.
pub async fn readiness(State(state): State<AppState>) -> Json<ReadinessResponse> {
    let cache = state.services.cache.stats();
    let degraded = matches!(
        cache.primary_state,
        Some(CircuitState::Open) | Some(CircuitState::HalfOpen)
    );

    Json(ReadinessResponse {
        status: if degraded { "degraded" } else { "ready" },
        cache,
    })
}

pub async fn metrics(State(state): State<AppState>) -> Json<MetricsResponse> {
    let services = &state.services;
    Json(MetricsResponse {
        performance: services.tracker.report(),
        deferred: services.gate.deferred().stats(),
        cache: services.cache.stats(),
    })
}

/// Build the router with all routes and middleware
pub fn build_router(state: AppState, log_requests: bool) -> Router {
    let edge = state.services.edge.clone();

    let mut router = Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health_check))
        .route("/healthz", get(liveness))
        .route("/readyz", get(readiness))
        .route("/metrics", get(metrics))
        .layer(from_fn_with_state(edge, rate_limit))
        .with_state(state);

    if log_requests {
        router = router.layer(TraceLayer::new_for_http());
    }

    router
}

/// Serve until a shutdown signal arrives
pub async fn serve(services: Arc<Services>, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    let router = build_router(AppState::new(services), config.log_requests);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Listening for webhooks on {}", addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("HTTP server shut down gracefully");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
