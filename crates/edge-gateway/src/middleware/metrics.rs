//! Prometheus request metrics.

use http::{Request, Response};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};

use crate::error::GatewayError;

/// Tower layer that records request metrics.
#[derive(Clone, Default)]
pub struct MetricsLayer;

impl MetricsLayer {
    pub const fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
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
        let method = req.method().to_string();
        let service = service_label(req.uri().path());

        gauge!("gateway.active_requests").increment(1.0);

        let start = Instant::now();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let result = inner.call(req).await;

            gauge!("gateway.active_requests").decrement(1.0);

            if let Ok(ref response) = result {
                let status = response.status().as_u16().to_string();

                counter!(
                    "gateway.requests",
                    "service" => service.clone(),
                    "method" => method.clone(),
                    "status" => status
                )
                .increment(1);

                histogram!(
                    "gateway.request.duration",
                    "service" => service,
                    "method" => method
                )
                .record(start.elapsed().as_secs_f64());
            }

            result
        })
    }
}

/// Backend entity a path addresses, e.g. `orders` for `/api/v2/orders/42`.
fn service_label(path: &str) -> String {
    let mut segments = path.trim_start_matches('/').split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some("api"), Some("v1" | "v2"), Some(entity)) if !entity.is_empty() => entity.to_owned(),
        (Some("auth"), _, _) => "auth".to_owned(),
        _ => "gateway".to_owned(),
    }
}

/// Installs the global Prometheus recorder.
///
/// Fails if another recorder is already installed for this process.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, GatewayError> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| GatewayError::Config(format!("metrics recorder: {e}")))
}
