//! Reverse-proxy dispatcher.
//!
//! The dispatcher builds the outbound call from a [`ProxyTarget`], stamps it
//! with the request's correlation id and identity, and hands it to an
//! [`Upstream`]. Backend responses are relayed verbatim; only transport
//! failures become local errors.

use axum::extract::FromRequestParts;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use http::request::Parts;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, Uri};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{Upstream, UpstreamRequest, UpstreamResponse};
use crate::config::BackendsConfig;
use crate::error::GatewayError;
use crate::identity::{Identity, LEGACY_USER_HEADER};
use crate::middleware::{CorrelationId, REQUEST_ID_HEADER};

/// Outbound user id header read by current backends.
pub const USER_ID_HEADER: HeaderName = HeaderName::from_static("x-user-id");

/// Outbound user id header read by older backends.
pub const LEGACY_USER_ID_HEADER: HeaderName = HeaderName::from_static(LEGACY_USER_HEADER);

/// Path prefix of the deprecated backend API.
pub const LEGACY_PATH_PREFIX: &str = "/v1";

/// Backend services the gateway fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    Users,
    Orders,
    Payments,
    Notifications,
}

impl Backend {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Orders => "orders",
            Self::Payments => "payments",
            Self::Notifications => "notifications",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to make one outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyTarget {
    pub base_url: String,
    pub method: Method,
    /// Path plus optional query string, starting with `/`.
    pub path: String,
    pub body: Option<serde_json::Value>,
}

impl ProxyTarget {
    pub fn new(base_url: impl Into<String>, method: Method, path: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            method,
            path: path.into(),
            body: None,
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.body = body;
        self
    }

    pub fn url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.path)
    }
}

/// Per-request values the dispatcher propagates.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: CorrelationId,
    pub identity: Option<Identity>,
}

impl RequestContext {
    pub fn user_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.user_id.as_str())
    }
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = CorrelationId::from_extensions(&parts.extensions)
            .cloned()
            .unwrap_or_else(|| CorrelationId::assign(&parts.headers));

        Ok(Self {
            correlation_id,
            identity: Identity::from_extensions(&parts.extensions).cloned(),
        })
    }
}

/// Builds, executes and times out outbound calls.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    upstream: Arc<dyn Upstream>,
    backends: BackendsConfig,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(upstream: Arc<dyn Upstream>, backends: BackendsConfig, timeout: Duration) -> Self {
        Self {
            upstream,
            backends,
            timeout,
        }
    }

    pub fn base_url(&self, backend: Backend) -> &str {
        match backend {
            Backend::Users => &self.backends.users,
            Backend::Orders => &self.backends.orders,
            Backend::Payments => &self.backends.payments,
            Backend::Notifications => &self.backends.notifications,
        }
    }

    /// Entry point bound to one backend's base URL.
    pub const fn service(&self, backend: Backend) -> ServiceProxy<'_> {
        ServiceProxy {
            dispatcher: self,
            backend,
        }
    }

    pub async fn forward(
        &self,
        ctx: &RequestContext,
        target: ProxyTarget,
    ) -> Result<UpstreamResponse, GatewayError> {
        let url = target.url();
        let uri: Uri = url.parse().map_err(|e| {
            tracing::debug!(error = %e, url = %url, "Unparseable upstream URL");
            GatewayError::MalformedRequest("Invalid request path".into())
        })?;

        let mut headers = HeaderMap::new();

        let body = match target.body {
            Some(ref value) => {
                let bytes = serde_json::to_vec(value).map_err(|e| {
                    tracing::warn!(
                        error = %e,
                        request_id = %ctx.correlation_id,
                        "Body serialisation failed"
                    );
                    GatewayError::MalformedRequest("Invalid request body".into())
                })?;
                headers.insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                Some(Bytes::from(bytes))
            }
            None => None,
        };

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from(&ctx.correlation_id));

        if let Some(user_id) = ctx.user_id() {
            let value = HeaderValue::from_str(user_id).map_err(|e| {
                tracing::warn!(
                    error = %e,
                    request_id = %ctx.correlation_id,
                    "User id is not a valid header value"
                );
                GatewayError::MalformedRequest("Invalid user id".into())
            })?;
            headers.insert(USER_ID_HEADER, value.clone());
            headers.insert(LEGACY_USER_ID_HEADER, value);
        }

        tracing::info!(
            method = %target.method,
            url = %url,
            request_id = %ctx.correlation_id,
            "Proxying request"
        );

        let request = UpstreamRequest {
            method: target.method,
            uri,
            headers,
            body,
        };

        match tokio::time::timeout(self.timeout, self.upstream.send(request)).await {
            Ok(Ok(response)) => {
                tracing::debug!(
                    status = response.status.as_u16(),
                    url = %url,
                    request_id = %ctx.correlation_id,
                    "Upstream responded"
                );
                Ok(response)
            }
            Ok(Err(e)) => {
                tracing::error!(
                    error = %e,
                    url = %url,
                    request_id = %ctx.correlation_id,
                    "Upstream request failed"
                );
                Err(e)
            }
            Err(_) => {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    url = %url,
                    request_id = %ctx.correlation_id,
                    "Upstream request timed out"
                );
                Err(GatewayError::UpstreamUnavailable("request timed out".into()))
            }
        }
    }
}

/// [`Dispatcher::forward`] with the base URL fixed to one backend.
#[derive(Debug, Clone, Copy)]
pub struct ServiceProxy<'a> {
    dispatcher: &'a Dispatcher,
    backend: Backend,
}

impl ServiceProxy<'_> {
    pub const fn backend(&self) -> Backend {
        self.backend
    }

    pub fn target(&self, method: Method, path: impl Into<String>) -> ProxyTarget {
        ProxyTarget::new(self.dispatcher.base_url(self.backend), method, path)
    }

    pub async fn forward(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let target = self.target(method, path).with_body(body);
        self.dispatcher.forward(ctx, target).await
    }

    /// Same call against the deprecated API: `path` gains [`LEGACY_PATH_PREFIX`].
    pub async fn forward_legacy(
        &self,
        ctx: &RequestContext,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<UpstreamResponse, GatewayError> {
        let target = self
            .target(method, format!("{LEGACY_PATH_PREFIX}{path}"))
            .with_body(body);
        self.dispatcher.forward(ctx, target).await
    }
}

/// Relays status and body unchanged, with the backend's content type.
impl IntoResponse for UpstreamResponse {
    fn into_response(self) -> Response {
        let content_type = self
            .headers
            .get(header::CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        (self.status, [(header::CONTENT_TYPE, content_type)], self.body).into_response()
    }
}
