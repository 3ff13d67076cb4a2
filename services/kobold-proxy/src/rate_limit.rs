//! Per-IP rate limiter for the generate route
//!
//! A `governor` keyed limiter with a quota of `requests_per_minute` per
//! client IP (burst of the same size, one cell replenished every
//! `60s / requests_per_minute`). It runs as axum middleware ahead of the
//! pipeline, so a rejected caller never touches the key pool.

use std::net::{IpAddr, SocketAddr};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use governor::clock::{Clock, DefaultClock};
use governor::middleware::NoOpMiddleware;
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter};
use tracing::debug;

use crate::error::ProxyError;

/// Tracked clients above which idle entries are dropped.
const PRUNE_ABOVE: usize = 10_000;

type KeyedLimiter<C> = RateLimiter<
    IpAddr,
    DefaultKeyedStateStore<IpAddr>,
    C,
    NoOpMiddleware<<C as Clock>::Instant>,
>;

pub struct IpRateLimiter<C: Clock = DefaultClock> {
    limiter: KeyedLimiter<C>,
    clock: C,
}

impl IpRateLimiter {
    /// `None` when `requests_per_minute` is 0 (limiter disabled).
    pub fn per_minute(requests_per_minute: u32) -> Option<Arc<Self>> {
        let per_minute = NonZeroU32::new(requests_per_minute)?;
        Some(Arc::new(Self::with_clock(
            Quota::per_minute(per_minute),
            DefaultClock::default(),
        )))
    }
}

impl<C: Clock> IpRateLimiter<C> {
    pub fn with_clock(quota: Quota, clock: C) -> Self {
        Self {
            limiter: RateLimiter::new(quota, DefaultKeyedStateStore::default(), &clock),
            clock,
        }
    }

    /// Count one request for `ip`. On rejection returns how long until the
    /// next request would be let through.
    pub fn check(&self, ip: IpAddr) -> Result<(), Duration> {
        if self.limiter.len() > PRUNE_ABOVE {
            self.limiter.retain_recent();
        }
        self.limiter
            .check_key(&ip)
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }
}

/// Client IP: the connection peer, else the first `X-Forwarded-For` entry.
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return Some(addr.ip());
    }
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .and_then(|ip| ip.trim().parse().ok())
}

/// Middleware applied to `POST /api/v1/generate`.
pub async fn rate_limit_middleware(
    State(limiter): State<Option<Arc<IpRateLimiter>>>,
    request: Request,
    next: Next,
) -> Response {
    let (Some(limiter), Some(ip)) = (limiter, client_ip(&request)) else {
        return next.run(request).await;
    };

    match limiter.check(ip) {
        Ok(()) => next.run(request).await,
        Err(retry_after) => {
            debug!(%ip, retry_after_ms = retry_after.as_millis() as u64, "rate limited");
            let request_id = format!("req_{}", uuid::Uuid::new_v4().as_simple());
            let secs = (retry_after.as_millis().div_ceil(1000) as u64).max(1);
            let mut response = ProxyError::RateLimited(format!(
                "Too many requests, try again in {secs}s"
            ))
            .into_response_for(&request_id);
            response
                .headers_mut()
                .insert("retry-after", HeaderValue::from(secs));
            response
        }
    }
}
