//! Gateway error types.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

/// Errors that terminate a request locally.
///
/// Backend error statuses are not represented here: they are relayed to the
/// caller unchanged by the dispatcher.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Authentication required")]
    Unauthenticated,

    #[error("Insufficient permissions")]
    Forbidden,

    #[error("Not found")]
    NotFound,

    #[error("Request body too large")]
    PayloadTooLarge,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::MalformedRequest(_) => "malformed_request",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::NotFound => "not_found",
            Self::PayloadTooLarge => "payload_too_large",
            Self::RateLimited => "rate_limit_exceeded",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::Token(_) | Self::Config(_) | Self::Io(_) => "internal_error",
        }
    }

    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Token(_) | Self::Config(_) | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body of every locally generated error response.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'static str,
    message: &'a str,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // Sanitise error messages for external responses
        let message = match &self {
            Self::MalformedRequest(reason) => reason.clone(),
            Self::Unauthenticated => "Authentication required".to_owned(),
            Self::Forbidden => "Insufficient permissions".to_owned(),
            Self::NotFound => "Not found".to_owned(),
            Self::PayloadTooLarge => "Request body too large".to_owned(),
            Self::RateLimited => "Rate limit exceeded".to_owned(),

            // Hide internal details for security
            Self::UpstreamUnavailable(_) => "Service unavailable".to_owned(),
            Self::Token(_) | Self::Config(_) | Self::Io(_) => "Internal server error".to_owned(),
        };

        let body = ErrorBody {
            error: self.error_type(),
            message: &message,
        };
        let mut response = (status, Json(body)).into_response();

        if matches!(self, Self::Unauthenticated) {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Bearer realm=\"edge-gateway\""),
            );
        }

        response
    }
}
