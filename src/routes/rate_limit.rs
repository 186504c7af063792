use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::rate_limiter::{RateDecision, RateLimiter};

/// Best-effort caller address: first `X-Forwarded-For` hop, then the TCP peer.
pub fn client_key(request: &Request) -> String {
    let forwarded = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Reject the request with 429 before the handler runs if the caller is over
/// its window. Denied requests have no side effects.
pub async fn enforce_rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);
    let decision = limiter.check(&key).await;

    let mut response = if decision.allowed {
        next.run(request).await
    } else {
        metrics::counter!("pipeline_rate_limited_total").increment(1);
        tracing::warn!(client = %key, "Rate limit exceeded");
        ApiError::RateLimited {
            retry_after_secs: decision.reset_in.as_secs().max(1),
        }
        .into_response()
    };

    set_rate_limit_headers(&mut response, &decision);
    response
}

fn set_rate_limit_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
}
