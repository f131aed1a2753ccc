//! Access log span for every request.

use http::{Request, Response};
use std::task::{Context, Poll};
use tokio::time::Instant;
use tower::{Layer, Service};
use tracing::Instrument;

use super::correlation::CorrelationId;

/// Tower layer that wraps each request in an `http.server.request` span.
///
/// Must sit inside the correlation layer so the span can carry the request id.
#[derive(Clone, Default)]
pub struct AccessLogLayer;

impl AccessLogLayer {
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for AccessLogLayer {
    type Service = AccessLogService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AccessLogService { inner }
    }
}

#[derive(Clone)]
pub struct AccessLogService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for AccessLogService<S>
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

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();
        let path = req.uri().path();

        // Probes are too chatty to log
        if path == "/health" || path == "/ready" {
            return Box::pin(async move { inner.call(req).await });
        }

        let request_id = CorrelationId::from_extensions(req.extensions())
            .map(ToString::to_string)
            .unwrap_or_default();

        let span = tracing::info_span!(
            "http.server.request",
            http.request.method = %req.method(),
            url.path = %path,
            request_id = %request_id,
            http.response.status_code = tracing::field::Empty,
            duration_ms = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let start = Instant::now();
                let response = inner.call(req).await;
                let elapsed = start.elapsed();

                let span = tracing::Span::current();
                span.record("duration_ms", elapsed.as_millis() as u64);

                if let Ok(ref resp) = response {
                    let status = resp.status().as_u16();
                    span.record("http.response.status_code", status);

                    if resp.status().is_server_error() {
                        tracing::warn!(status, "Request completed");
                    } else {
                        tracing::info!(status, "Request completed");
                    }
                }

                response
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn passes_response_through() {
        let service = AccessLogLayer::new().layer(tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, std::convert::Infallible>(
                Response::builder()
                    .status(StatusCode::IM_A_TEAPOT)
                    .body(Body::empty())
                    .unwrap(),
            )
        }));

        let mut req = Request::builder()
            .uri("/api/v2/orders/1")
            .body(Body::empty())
            .unwrap();
        req.extensions_mut().insert(CorrelationId::generate());

        let response = service.oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }
}
