//! Health, readiness and metrics endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header;
use serde::Serialize;

use super::AppState;
use crate::error::GatewayError;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub uptime: String,
    pub version: &'static str,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.started_at.elapsed();

    Json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime: format!("{}s", uptime.as_secs()),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// The gateway holds no connections of its own, so it is ready once serving.
pub async fn ready() -> impl IntoResponse {
    Json(serde_json::json!({
        "ready": true,
        "checks": { "gateway": true }
    }))
}

pub async fn metrics(State(state): State<AppState>) -> Result<Response, GatewayError> {
    let handle = state.metrics.as_ref().ok_or(GatewayError::NotFound)?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
        .into_response())
}
