//! Axum edge middleware for per-client limits
//!
//! ```ignore
//! Router::new()
//!     .route("/webhook", post(webhook))
//!     .layer(from_fn_with_state(edge.clone(), rate_limit))
//! ```

use super::{extract_client_ip, normalize_ip, RateDecision, RateLimitConfig, RateLimiter};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

/// Limiter plus edge policy, used as middleware state
#[derive(Clone)]
pub struct EdgeLimiter {
    limiter: RateLimiter,
    config: Arc<RateLimitConfig>,
}

impl EdgeLimiter {
    pub fn new(limiter: RateLimiter, config: RateLimitConfig) -> Self {
        Self {
            limiter,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }
}

/// 429 response for a rejected request
pub struct RateLimitRejection {
    pub decision: RateDecision,
    pub retry_after: u64,
}

impl IntoResponse for RateLimitRejection {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "status": "throttled",
            "reason": "rate_limit",
            "retry_after": self.retry_after,
        });
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        response
            .headers_mut()
            .insert("Retry-After", HeaderValue::from(self.retry_after));
        response
    }
}

fn apply_headers(headers: &mut HeaderMap, decision: &RateDecision) {
    headers.insert("X-RateLimit-Limit", HeaderValue::from(decision.limit));
    headers.insert("X-RateLimit-Remaining", HeaderValue::from(decision.remaining));
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.reset));
}

/// Per-client fixed-window limit on every non-exempt path
pub async fn rate_limit(State(edge): State<EdgeLimiter>, request: Request, next: Next) -> Response {
    if edge.config.is_exempt(request.uri().path()) {
        return next.run(request).await;
    }

    let connect_info = request.extensions().get::<ConnectInfo<SocketAddr>>();
    let client_ip = extract_client_ip(request.headers(), connect_info, edge.config.trust_proxy);
    let scope = format!("client:{}", normalize_ip(client_ip));

    let decision = edge
        .limiter
        .check(&scope, edge.config.requests_per_minute)
        .await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        debug!(scope = %scope, path = %request.uri().path(), "Request rejected by edge limiter");
        RateLimitRejection {
            decision,
            retry_after: decision.retry_after(edge.limiter.now_secs()),
        }
        .into_response()
    };

    apply_headers(response.headers_mut(), &decision);
    response
}
