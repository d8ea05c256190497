use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::ApiError;
use crate::rate_limit::Decision;
use crate::state::AppState;

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static("x-request-id");

    // Preserve an incoming request id; otherwise generate one
    let req_id_value = match req.headers().get(&header_name) {
        Some(value) => value.clone(),
        None => HeaderValue::from_str(&Uuid::new_v4().to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("unknown")),
    };

    // Downstream spans read it from the extensions
    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

/// Record request count and latency.
pub async fn track_metrics(req: Request<Body>, next: Next) -> Response {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let res = next.run(req).await;

    crate::metrics::record_http_request(&method, &path, res.status().as_u16(), started.elapsed());
    res
}

/// Admit or reject the request before any handler runs.
pub async fn rate_limit(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    if !state.rate_limit.enabled || bypasses_rate_limit(req.uri().path()) {
        return next.run(req).await;
    }

    let identifier = client_identifier(&req, state.rate_limit.trust_forwarded_for);
    match state.rate_limiter.check_default(&identifier) {
        Decision::Allowed { remaining } => {
            let mut res = next.run(req).await;
            res.headers_mut().insert(
                HeaderName::from_static("x-ratelimit-remaining"),
                HeaderValue::from(remaining),
            );
            res
        }
        Decision::Denied { retry_after } => {
            tracing::info!(
                identifier = %identifier,
                path = %req.uri().path(),
                "request rejected by rate limiter"
            );
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

fn bypasses_rate_limit(path: &str) -> bool {
    path == "/healthz" || path == "/metrics" || path.starts_with("/metrics/")
}

/// First `x-forwarded-for` hop when trusted, else the peer address.
fn client_identifier(req: &Request<Body>, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for
        && let Some(first_hop) = req
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
    {
        return first_hop.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
