// Rate limit middleware: per-user service gates and the per-IP guest gate

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use judge_common::{metrics, RateLimitStats, RateLimitedService};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::debug;

use crate::auth::Caller;
use crate::error::ApiError;
use crate::AppState;

pub fn apply_rate_limit_headers(headers: &mut HeaderMap, stats: &RateLimitStats) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(stats.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(stats.remaining));
    if let Ok(reset) = HeaderValue::from_str(&stats.reset_at.to_rfc3339()) {
        headers.insert("x-ratelimit-reset", reset);
    }
    headers.insert(
        "x-ratelimit-service",
        HeaderValue::from_static(stats.service.as_str()),
    );
}

/// Consume one unit of `service` for the caller or fail with 429
pub async fn gate(
    state: &AppState,
    caller: &Caller,
    service: RateLimitedService,
) -> Result<RateLimitStats, ApiError> {
    let decision = state.limiter.check(&caller.subject(), service).await?;
    if decision.allowed {
        Ok(decision.stats)
    } else {
        metrics::record_rate_limited(service.as_str());
        Err(ApiError::RateLimited(decision.stats))
    }
}

/// Per-user gate for a fixed service, layered with `from_fn_with_state`
pub async fn enforce_user_limit(
    State((state, service)): State<(Arc<AppState>, RateLimitedService)>,
    caller: Caller,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let stats = gate(&state, &caller, service).await?;
    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &stats);
    Ok(response)
}

/// First `X-Forwarded-For` entry, else the peer address
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(str::to_string)
        .or_else(|| peer.map(|addr| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}

/// Per-IP gate for unauthenticated guest creation
pub async fn enforce_guest_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer);

    let decision = state.ip_limiter.check(&ip);
    debug!(ip = %ip, allowed = decision.allowed, "Guest creation check");
    if !decision.allowed {
        metrics::record_rate_limited(RateLimitedService::GuestCreation.as_str());
        return Err(ApiError::RateLimited(decision.stats));
    }

    let mut response = next.run(request).await;
    apply_rate_limit_headers(response.headers_mut(), &decision.stats);
    Ok(response)
}
