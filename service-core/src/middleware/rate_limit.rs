use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};
use crate::error::AppError;
use governor::{
    clock::{Clock, DefaultClock},
    state::keyed::DashMapStateStore,
    NotUntil, Quota, RateLimiter,
};
use std::{
    hash::Hash,
    net::{IpAddr, SocketAddr},
    num::NonZeroU32,
    sync::Arc,
    time::Duration,
};

/// Rate limiter keyed by client IP
pub type IpRateLimiter = Arc<RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>>;

/// Rate limiter keyed by an arbitrary string (e.g. a login identifier)
pub type KeyedRateLimiter = Arc<RateLimiter<String, DashMapStateStore<String>, DefaultClock>>;

/// `attempts` cells replenished evenly over `window_seconds`, all available as a burst.
fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis(((window_seconds * 1000) / u64::from(burst.get())).max(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Create a rate limiter keyed by string, allowing `attempts` per `window_seconds`
pub fn create_keyed_rate_limiter(attempts: u32, window_seconds: u64) -> KeyedRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Forget keys whose quota has fully replenished. Returns the keys still tracked.
pub fn prune<K>(limiter: &RateLimiter<K, DashMapStateStore<K>, DefaultClock>) -> usize
where
    K: Hash + Eq + Clone,
{
    limiter.retain_recent();
    limiter.shrink_to_fit();
    limiter.len()
}

fn retry_after_secs<C: Clock>(negative: &NotUntil<C::Instant>, clock: &C) -> u64 {
    negative.wait_time_from(clock.now()).as_secs().max(1)
}

/// Check a key against a keyed limiter.
///
/// Returns the number of seconds until the next permitted attempt when limited.
pub fn check_keyed(limiter: &KeyedRateLimiter, key: &str) -> Result<(), u64> {
    limiter
        .check_key(&key.to_string())
        .map_err(|negative| retry_after_secs(&negative, &DefaultClock::default()))
}

/// First hop of `x-forwarded-for`, else the socket peer.
fn client_ip(request: &Request) -> Option<IpAddr> {
    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<IpAddr>().ok())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip())
        })
}

/// Rejects a client IP once it exhausts its quota. Requests with no
/// discoverable IP pass through.
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(ip) = client_ip(&request) else {
        tracing::warn!(path = %request.uri().path(), "no client ip, skipping rate limit");
        return Ok(next.run(request).await);
    };

    if let Err(negative) = limiter.check_key(&ip) {
        let retry_after = retry_after_secs(&negative, &DefaultClock::default());
        tracing::info!(%ip, retry_after, "client ip rate limited");
        return Err(AppError::TooManyRequests(
            "Too many requests, try again later".to_string(),
            Some(retry_after),
        ));
    }

    Ok(next.run(request).await)
}
