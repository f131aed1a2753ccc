//! Per-client token bucket rate limiting.
//!
//! Buckets hold at most `requests_per_second` tokens and refill lazily on the
//! next admission check. Refill is counted in whole elapsed seconds, so a
//! client that drains its bucket waits for a full second before any token
//! comes back. This is a coarse approximation of a smooth rate, accepted in
//! exchange for O(1) integer work under the lock.

use axum::extract::ConnectInfo;
use axum::response::{IntoResponse, Response};
use http::Request;
use metrics::{counter, gauge};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service};

use crate::config::RateLimitConfig;
use crate::error::GatewayError;

const FORWARDED_FOR: &str = "x-forwarded-for";
const REAL_IP: &str = "x-real-ip";

/// Operational endpoints that are never rate limited.
const EXEMPT_PATHS: &[&str] = &["/health", "/ready", "/metrics"];

#[derive(Debug, Clone, Copy)]
struct ClientBucket {
    tokens: u32,
    last_refill: Instant,
}

impl ClientBucket {
    fn take(&mut self, now: Instant, capacity: u32) -> bool {
        let elapsed_secs = now.saturating_duration_since(self.last_refill).as_secs();
        let refill = elapsed_secs.saturating_mul(u64::from(capacity));

        if refill > 0 {
            let refilled = (u64::from(self.tokens) + refill).min(u64::from(capacity));
            self.tokens = u32::try_from(refilled).unwrap_or(capacity);
            self.last_refill = now;
        }

        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }
}

/// Client bucket map behind a single lock.
///
/// Admission, insertion and the idle sweep all go through the same mutex, so
/// no caller can observe or modify a bucket mid-update.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: u32,
    buckets: Mutex<HashMap<String, ClientBucket>>,
}

impl RateLimiter {
    /// `requests_per_second` is clamped to at least 1.
    pub fn new(requests_per_second: u32) -> Self {
        Self {
            capacity: requests_per_second.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.requests_per_second)
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn admit(&self, client_key: &str) -> bool {
        self.admit_at(client_key, Instant::now())
    }

    pub fn admit_at(&self, client_key: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock();

        if let Some(bucket) = buckets.get_mut(client_key) {
            return bucket.take(now, self.capacity);
        }

        buckets.insert(
            client_key.to_owned(),
            ClientBucket {
                tokens: self.capacity - 1,
                last_refill: now,
            },
        );
        true
    }

    /// Tokens currently held for a client, if it has a bucket.
    pub fn tokens(&self, client_key: &str) -> Option<u32> {
        self.buckets.lock().get(client_key).map(|b| b.tokens)
    }

    pub fn tracked_clients(&self) -> usize {
        self.buckets.lock().len()
    }

    /// Removes buckets not refilled within `idle_timeout`. Returns how many.
    pub fn sweep(&self, idle_timeout: Duration) -> usize {
        self.sweep_at(Instant::now(), idle_timeout)
    }

    pub fn sweep_at(&self, now: Instant, idle_timeout: Duration) -> usize {
        let mut buckets = self.buckets.lock();
        let before = buckets.len();
        buckets.retain(|_, bucket| now.saturating_duration_since(bucket.last_refill) <= idle_timeout);
        before - buckets.len()
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let removed = self.sweep(idle_timeout);
                        let remaining = self.tracked_clients();
                        gauge!("gateway.rate_limiter.clients").set(remaining as f64);
                        tracing::info!(removed, remaining, "Rate limiter cleanup");
                    }
                }
            }

            tracing::debug!("Rate limiter sweeper stopped");
        })
    }
}

/// Partition key for a request: forwarding headers first, then the peer IP.
pub fn client_key<B>(req: &Request<B>) -> String {
    let header = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_owned)
    };

    // X-Forwarded-For is "client, proxy1, proxy2"; only the client partitions.
    header(FORWARDED_FOR)
        .and_then(|chain| {
            chain
                .split(',')
                .map(str::trim)
                .find(|entry| !entry.is_empty())
                .map(str::to_owned)
        })
        .or_else(|| header(REAL_IP))
        .or_else(|| {
            req.extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "unknown".to_owned())
}

/// Tower layer that rejects requests once a client's bucket is empty.
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: Arc<RateLimiter>,
}

impl RateLimitLayer {
    pub const fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: Arc<RateLimiter>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for RateLimitService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();

        if EXEMPT_PATHS.contains(&req.uri().path()) {
            return Box::pin(async move { inner.call(req).await });
        }

        let key = client_key(&req);
        if !self.limiter.admit(&key) {
            tracing::warn!(client_key = %key, path = %req.uri().path(), "Rate limit exceeded");
            counter!("gateway.rate_limited").increment(1);
            return Box::pin(async { Ok(GatewayError::RateLimited.into_response()) });
        }

        Box::pin(async move { inner.call(req).await })
    }
}
