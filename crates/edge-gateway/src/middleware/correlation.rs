//! Correlation id assignment.

use http::{Extensions, HeaderMap, HeaderName, HeaderValue, Request, Response};
use std::task::{Context, Poll};
use tower::{Layer, Service};

/// Current correlation header, read from requests and set on every response.
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-acme-request-id");

/// Older alternate name still sent by some callers.
pub const DEPRECATED_REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Identifier threaded through one request, from ingress to the backend call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_extensions(extensions: &Extensions) -> Option<&Self> {
        extensions.get::<Self>()
    }

    /// Reuses an inbound id when present, preferring the current header name.
    pub fn assign(headers: &HeaderMap) -> Self {
        if let Some(id) = header_value(headers, &REQUEST_ID_HEADER) {
            return Self(id.to_owned());
        }

        if let Some(id) = header_value(headers, &DEPRECATED_REQUEST_ID_HEADER) {
            tracing::warn!(
                header = DEPRECATED_REQUEST_ID_HEADER.as_str(),
                request_id = id,
                "Deprecated correlation header used"
            );
            return Self(id.to_owned());
        }

        Self::generate()
    }

    fn header_value(&self) -> HeaderValue {
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<CorrelationId> for HeaderValue {
    fn from(id: CorrelationId) -> Self {
        id.header_value()
    }
}

impl From<&CorrelationId> for HeaderValue {
    fn from(id: &CorrelationId) -> Self {
        id.header_value()
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
}

/// Tower layer that guarantees every request carries a [`CorrelationId`].
#[derive(Clone, Default)]
pub struct CorrelationLayer;

impl CorrelationLayer {
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = CorrelationService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CorrelationService { inner }
    }
}

#[derive(Clone)]
pub struct CorrelationService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CorrelationService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let id = CorrelationId::assign(req.headers());
        let header_value = HeaderValue::from(&id);
        req.extensions_mut().insert(id);

        let mut inner = self.inner.clone();

        Box::pin(async move {
            let mut response = inner.call(req).await?;

            // Outermost stage: whatever the backend or inner stages set is replaced.
            response
                .headers_mut()
                .insert(REQUEST_ID_HEADER, header_value);

            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::StatusCode;
    use tower::ServiceExt;

    async fn echo_id(req: Request<Body>) -> Result<Response<Body>, std::convert::Infallible> {
        let id = CorrelationId::from_extensions(req.extensions())
            .expect("correlation id in extensions")
            .to_string();
        Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Body::from(id))
            .unwrap())
    }

    async fn body_string(response: Response<Body>) -> String {
        use http_body_util::BodyExt;
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn generates_id_when_absent() {
        let service = CorrelationLayer::new().layer(tower::service_fn(echo_id));

        let req = Request::builder().uri("/test").body(Body::empty()).unwrap();
        let response = service.oneshot(req).await.unwrap();

        let header = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .expect("response header")
            .to_str()
            .unwrap()
            .to_owned();
        assert!(uuid::Uuid::parse_str(&header).is_ok());
        assert_eq!(body_string(response).await, header);
    }

    #[tokio::test]
    async fn passes_through_inbound_id() {
        let service = CorrelationLayer::new().layer(tower::service_fn(echo_id));

        let req = Request::builder()
            .uri("/test")
            .header("X-Acme-Request-ID", "test-request-123")
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(req).await.unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "test-request-123"
        );
        assert_eq!(body_string(response).await, "test-request-123");
    }

    #[tokio::test]
    async fn accepts_deprecated_header() {
        let service = CorrelationLayer::new().layer(tower::service_fn(echo_id));

        let req = Request::builder()
            .uri("/test")
            .header("X-Request-ID", "old-style-id")
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(req).await.unwrap();

        assert_eq!(
            response.headers().get(REQUEST_ID_HEADER).unwrap(),
            "old-style-id"
        );
    }

    #[test]
    fn current_header_wins_over_deprecated() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("current"));
        headers.insert(DEPRECATED_REQUEST_ID_HEADER, HeaderValue::from_static("old"));
        assert_eq!(CorrelationId::assign(&headers).as_str(), "current");
    }

    #[test]
    fn empty_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(""));
        headers.insert(DEPRECATED_REQUEST_ID_HEADER, HeaderValue::from_static("old"));
        assert_eq!(CorrelationId::assign(&headers).as_str(), "old");
    }

    #[test]
    fn inbound_id_is_kept_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" padded-id "));
        assert_eq!(CorrelationId::assign(&headers).as_str(), " padded-id ");
    }

    #[test]
    fn blank_header_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("   "));
        assert_ne!(CorrelationId::assign(&headers).as_str().trim(), "");
    }

    #[tokio::test]
    async fn overrides_header_set_downstream() {
        let inner = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(
                Response::builder()
                    .header("x-acme-request-id", "from-backend")
                    .body(Body::empty())
                    .unwrap(),
            )
        });
        let service = CorrelationLayer::new().layer(inner);

        let req = Request::builder()
            .uri("/test")
            .header("X-Acme-Request-ID", "from-client")
            .body(Body::empty())
            .unwrap();
        let response = service.oneshot(req).await.unwrap();

        let values: Vec<_> = response
            .headers()
            .get_all(REQUEST_ID_HEADER)
            .iter()
            .collect();
        assert_eq!(values, vec!["from-client"]);
    }
}
