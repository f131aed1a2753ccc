//! Gateway middleware.

pub mod auth;
pub mod authorize;
pub mod correlation;
pub mod metrics;
pub mod rate_limit;
pub mod trace;

pub use auth::AuthLayer;
pub use authorize::RequireRoleLayer;
pub use correlation::{CorrelationId, CorrelationLayer, REQUEST_ID_HEADER};
pub use metrics::MetricsLayer;
pub use rate_limit::{RateLimitLayer, RateLimiter};
pub use trace::AccessLogLayer;

/// Authorization gate admitting only the listed roles.
pub fn require<I, R>(roles: I) -> RequireRoleLayer
where
    I: IntoIterator<Item = R>,
    R: Into<String>,
{
    RequireRoleLayer::new(roles)
}
