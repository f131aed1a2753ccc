//! Terminal request handlers.
//!
//! Entity handlers are thin: pull the path parameters and body, pick the
//! backend path, and hand the call to the dispatcher. Whatever the backend
//! answers is relayed.

pub mod auth;
pub mod health;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod users;

use axum::body::Bytes;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::response::Response;
use http::request::Parts;
use http::{HeaderName, HeaderValue, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::config::LegacyConfig;
use crate::error::GatewayError;
use crate::identity::IdentityResolver;
use crate::proxy::{Backend, Dispatcher, ServiceProxy};

/// Marks every v1 response.
pub const DEPRECATED_HEADER: HeaderName = HeaderName::from_static("x-api-deprecated");

/// Announces the v1 removal date, when one is configured.
pub const SUNSET_HEADER: HeaderName = HeaderName::from_static("x-api-sunset");

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub resolver: Arc<IdentityResolver>,
    pub legacy: Arc<LegacyConfig>,
    pub metrics: Option<PrometheusHandle>,
    pub started_at: Instant,
}

impl AppState {
    pub fn service(&self, backend: Backend) -> ServiceProxy<'_> {
        self.dispatcher.service(backend)
    }

    /// Adds the deprecation markers to a v1 response.
    pub fn deprecated(&self, mut response: Response) -> Response {
        let headers = response.headers_mut();
        headers.insert(DEPRECATED_HEADER, HeaderValue::from_static("true"));

        if let Some(value) = self
            .legacy
            .sunset_date
            .as_deref()
            .and_then(|date| HeaderValue::from_str(date).ok())
        {
            headers.insert(SUNSET_HEADER, value);
        }

        response
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("dispatcher", &self.dispatcher)
            .field("metrics", &self.metrics.is_some())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}

/// A single path segment naming a resource.
///
/// Rejects empty values and anything that would change the shape of the
/// backend path once re-inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceId(pub String);

impl ResourceId {
    fn validate(raw: String) -> Result<Self, GatewayError> {
        let id = raw.trim();
        if id.is_empty() {
            return Err(GatewayError::MalformedRequest("ID required".into()));
        }
        if id.contains(['/', '?', '#']) || id == "." || id == ".." {
            return Err(GatewayError::MalformedRequest("Invalid ID".into()));
        }
        Ok(Self(id.to_owned()))
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S> FromRequestParts<S> for ResourceId
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|_| GatewayError::MalformedRequest("ID required".into()))?;
        Self::validate(raw)
    }
}

/// A request body that must decode as a JSON object.
///
/// No schema is applied; backends own validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JsonBody(pub Map<String, Value>);

impl JsonBody {
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) {
        self.0.insert(key.to_owned(), value.into());
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl<S> FromRequest<S> for JsonBody
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => GatewayError::PayloadTooLarge,
                _ => GatewayError::MalformedRequest("Invalid request body".into()),
            })?;

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(Self(map)),
            Ok(_) => Err(GatewayError::MalformedRequest(
                "Request body must be a JSON object".into(),
            )),
            Err(_) => Err(GatewayError::MalformedRequest("Invalid request body".into())),
        }
    }
}

/// Appends the inbound query string, if any, to a backend path.
pub fn with_query(path: String, query: Option<String>) -> String {
    match query {
        Some(query) if !query.is_empty() => format!("{path}?{query}"),
        _ => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use rstest::rstest;

    async fn body(raw: &'static str) -> Result<JsonBody, GatewayError> {
        let req = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::from(raw))
            .unwrap();
        JsonBody::from_request(req, &()).await
    }

    #[tokio::test]
    async fn accepts_json_object() {
        let body = body(r#"{"amount": 10, "currency": "EUR"}"#).await.unwrap();
        assert_eq!(body.0["amount"], 10);
    }

    #[rstest]
    #[case("")]
    #[case("not json")]
    #[case("[1, 2, 3]")]
    #[case("\"text\"")]
    #[case("null")]
    #[tokio::test]
    async fn rejects_non_objects(#[case] raw: &'static str) {
        assert!(matches!(
            body(raw).await,
            Err(GatewayError::MalformedRequest(_))
        ));
    }

    #[test]
    fn insert_overrides_client_value() {
        let mut body = JsonBody::default();
        body.insert("user_id", "spoofed");
        body.insert("user_id", "u1");
        assert_eq!(body.into_value(), serde_json::json!({"user_id": "u1"}));
    }

    #[rstest]
    #[case("42", Ok("42"))]
    #[case(" 42 ", Ok("42"))]
    #[case("", Err(()))]
    #[case("a/b", Err(()))]
    #[case("a?b=1", Err(()))]
    #[case(".", Err(()))]
    #[case("..", Err(()))]
    #[case("..x", Ok("..x"))]
    fn resource_id_validation(#[case] raw: &str, #[case] expected: Result<&str, ()>) {
        let result = ResourceId::validate(raw.to_owned()).map(|id| id.0).map_err(|_| ());
        assert_eq!(result, expected.map(str::to_owned));
    }

    #[test]
    fn query_appended_only_when_present() {
        assert_eq!(with_query("/a".into(), None), "/a");
        assert_eq!(with_query("/a".into(), Some(String::new())), "/a");
        assert_eq!(with_query("/a".into(), Some("page=2".into())), "/a?page=2");
    }
}
