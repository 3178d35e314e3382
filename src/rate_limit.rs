/// Rate Limiting System
use crate::{
    config::RateLimitConfig,
    error::{PinError, PinResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated_rps: u32,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        // Burst equals the per-second rate
        let auth_quota =
            Quota::per_second(NonZeroU32::new(config.authenticated_rps).unwrap_or(NonZeroU32::MIN));
        let unauth_quota =
            Quota::per_second(NonZeroU32::new(config.unauthenticated_rps).unwrap_or(NonZeroU32::MIN));

        Self {
            enabled: config.enabled,
            authenticated_rps: config.authenticated_rps,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check rate limit for authenticated callers
    pub fn check_authenticated(&self) -> PinResult<()> {
        Self::check(&self.authenticated)
    }

    /// Check rate limit for unauthenticated callers
    pub fn check_unauthenticated(&self) -> PinResult<()> {
        Self::check(&self.unauthenticated)
    }

    fn check(limiter: &DirectLimiter) -> PinResult<()> {
        limiter.check().map_err(|_| PinError::RateLimitExceeded {
            retry_after: Duration::from_secs(1),
        })
    }
}

/// Rate limiting middleware
///
/// Requests carrying a bearer token draw from the authenticated bucket. The
/// token itself is verified later by the handler, so a forged token still
/// gets the larger bucket until it is rejected with 401.
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, PinError> {
    let limiter = &ctx.rate_limiter;
    if !limiter.is_enabled() {
        return Ok(next.run(request).await);
    }

    let has_bearer = crate::auth::extract_bearer_token(request.headers()).is_some();

    if has_bearer {
        limiter.check_authenticated()?;
    } else {
        limiter.check_unauthenticated()?;
    }

    let mut response = next.run(request).await;
    if has_bearer {
        if let Ok(value) = limiter.authenticated_rps.to_string().parse() {
            response.headers_mut().insert("X-RateLimit-Limit", value);
        }
    }

    Ok(response)
}
