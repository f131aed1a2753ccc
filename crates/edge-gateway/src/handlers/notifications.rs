//! Notifications service routes.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::Method;

use super::{AppState, JsonBody, ResourceId};
use crate::error::GatewayError;
use crate::proxy::{Backend, RequestContext};

async fn send(
    state: &AppState,
    ctx: &RequestContext,
    path: &str,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Notifications)
        .forward(ctx, Method::POST, path, Some(body.into_value()))
        .await?;
    Ok(response.into_response())
}

pub async fn send_notification(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    send(&state, &ctx, "/api/v2/notifications", body).await
}

pub async fn get_notification(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Notifications)
        .forward(
            &ctx,
            Method::GET,
            &format!("/api/v2/notifications/{id}"),
            None,
        )
        .await?;
    Ok(response.into_response())
}

pub async fn send_email(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    send(&state, &ctx, "/api/v2/notifications/email", body).await
}

pub async fn send_sms(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    send(&state, &ctx, "/api/v2/notifications/sms", body).await
}

pub async fn send_email_v1(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    tracing::warn!("V1 API called: send_email_v1");

    let response = send(&state, &ctx, "/api/v1/email/send", body).await?;
    Ok(state.deprecated(response))
}
