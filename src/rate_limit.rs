//! Global request rate limiting.

use std::num::NonZeroU32;

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};

use crate::AppState;
use crate::config::ResilienceConfig;

/// Token bucket shared by every route. Not keyed by client address.
pub struct RequestRateLimiter {
    limiter: DefaultDirectRateLimiter,
    enabled: bool,
}

impl std::fmt::Debug for RequestRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestRateLimiter")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

impl RequestRateLimiter {
    /// Zero rates are raised to one request per second; a zero burst falls
    /// back to the rate.
    pub fn new(config: &ResilienceConfig) -> Self {
        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(rate);
        Self {
            limiter: RateLimiter::direct(Quota::per_second(rate).allow_burst(burst)),
            enabled: config.rate_limit_enabled,
        }
    }

    /// Take one token. Always succeeds when limiting is disabled.
    pub fn check(&self) -> bool {
        !self.enabled || self.limiter.check().is_ok()
    }
}

/// Middleware to enforce rate limits
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !state.rate_limiter.check() {
        tracing::warn!(path = %req.uri().path(), "Rate limit exceeded");
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }
    Ok(next.run(req).await)
}
