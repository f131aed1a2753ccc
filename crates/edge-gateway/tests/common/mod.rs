//! Common test utilities for gateway integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use edge_gateway::backend::{Upstream, UpstreamRequest, UpstreamResponse};
use edge_gateway::identity::{IdentityResolver, TokenCodec};
use edge_gateway::{Gateway, GatewayConfig, GatewayError};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_SECRET: &str = "integration-test-secret";

/// In-memory backend that records every outbound call.
#[derive(Debug)]
pub struct RecordingUpstream {
    requests: Mutex<Vec<UpstreamRequest>>,
    reply: Mutex<Result<UpstreamResponse, String>>,
}

impl RecordingUpstream {
    pub fn replying(status: StatusCode, body: &'static str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(Ok(UpstreamResponse {
                status,
                headers: HeaderMap::new(),
                body: Bytes::from_static(body.as_bytes()),
            })),
        }
    }

    pub fn failing(detail: &str) -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
            reply: Mutex::new(Err(detail.to_owned())),
        }
    }

    pub fn requests(&self) -> Vec<UpstreamRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> UpstreamRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("an outbound request was recorded")
    }
}

#[async_trait]
impl Upstream for RecordingUpstream {
    async fn send(&self, request: UpstreamRequest) -> Result<UpstreamResponse, GatewayError> {
        self.requests.lock().push(request);
        self.reply
            .lock()
            .clone()
            .map_err(GatewayError::UpstreamUnavailable)
    }
}

/// `extra` is appended inside the `[auth]` table; start it with a table
/// header to configure another section.
pub fn test_config(extra: &str) -> GatewayConfig {
    let toml = format!(
        r#"
[backends]
users = "http://users.test:8081"
orders = "http://orders.test:8082"
payments = "http://payments.test:8083"
notifications = "http://notifications.test:8084"

[auth]
secret = "{TEST_SECRET}"
{extra}
"#
    );
    GatewayConfig::parse(&toml).expect("valid test configuration")
}

/// A fully wired router in front of a recording upstream.
pub struct TestGateway {
    pub router: Router,
    pub upstream: Arc<RecordingUpstream>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with(test_config(""), RecordingUpstream::replying(StatusCode::OK, "{}"))
    }

    pub fn with(config: GatewayConfig, upstream: RecordingUpstream) -> Self {
        let upstream = Arc::new(upstream);
        let gateway = Gateway::build(&config, upstream.clone(), None);
        Self {
            router: gateway.router,
            upstream,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }
}

pub fn token(user_id: &str, role: &str) -> String {
    let config = test_config("");
    IdentityResolver::new(TokenCodec::new(&config.auth))
        .codec()
        .issue(user_id, None, role)
        .unwrap()
}

pub fn bearer(user_id: &str, role: &str) -> String {
    format!("Bearer {}", token(user_id, role))
}

pub async fn body_bytes(response: Response) -> Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
