//! Transport for outbound calls to backend services.

mod http;

pub use self::http::HttpUpstream;

use ::http::{HeaderMap, Method, StatusCode, Uri};
use async_trait::async_trait;
use bytes::Bytes;

use crate::error::GatewayError;

/// A fully built outbound call.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// What the backend answered, unmodified.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Executes outbound calls.
///
/// Implementations report transport failures as
/// [`GatewayError::UpstreamUnavailable`]. Any status the backend returns,
/// including error statuses, is a successful call.
#[async_trait]
pub trait Upstream: Send + Sync + std::fmt::Debug {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, GatewayError>;
}
