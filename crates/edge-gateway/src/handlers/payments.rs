//! Payments service routes.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use http::Method;

use super::{AppState, JsonBody, ResourceId};
use crate::error::GatewayError;
use crate::identity::Identity;
use crate::proxy::{Backend, RequestContext};

pub async fn process_payment(
    State(state): State<AppState>,
    identity: Identity,
    ctx: RequestContext,
    mut body: JsonBody,
) -> Result<Response, GatewayError> {
    body.insert("user_id", identity.user_id.as_str());
    tracing::info!(
        user_id = %identity.user_id,
        order_id = ?body.0.get("order_id"),
        "Processing payment"
    );

    let response = state
        .service(Backend::Payments)
        .forward(&ctx, Method::POST, "/api/v2/payments", Some(body.into_value()))
        .await?;
    Ok(response.into_response())
}

pub async fn get_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Payments)
        .forward(&ctx, Method::GET, &format!("/api/v2/payments/{id}"), None)
        .await?;
    Ok(response.into_response())
}

pub async fn refund_payment(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    tracing::info!(payment_id = %id, "Refunding payment");

    let response = state
        .service(Backend::Payments)
        .forward(
            &ctx,
            Method::POST,
            &format!("/api/v2/payments/{id}/refund"),
            Some(body.into_value()),
        )
        .await?;
    Ok(response.into_response())
}

pub async fn process_payment_v1(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    tracing::warn!("V1 API called: process_payment_v1");

    let response = state
        .service(Backend::Payments)
        .forward(&ctx, Method::POST, "/api/v1/payments", Some(body.into_value()))
        .await?;
    Ok(state.deprecated(response.into_response()))
}
