//! Orders service routes.

use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use http::Method;

use super::{with_query, AppState, JsonBody, ResourceId};
use crate::error::GatewayError;
use crate::identity::Identity;
use crate::proxy::{Backend, RequestContext};

pub async fn get_order(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    tracing::info!(order_id = %id, "Getting order");

    let response = state
        .service(Backend::Orders)
        .forward(&ctx, Method::GET, &format!("/api/v2/orders/{id}"), None)
        .await?;
    Ok(response.into_response())
}

/// The caller's user id is written into the order, replacing any client value.
pub async fn create_order(
    State(state): State<AppState>,
    identity: Identity,
    ctx: RequestContext,
    mut body: JsonBody,
) -> Result<Response, GatewayError> {
    body.insert("user_id", identity.user_id.as_str());
    tracing::info!(user_id = %identity.user_id, "Creating order");

    let response = state
        .service(Backend::Orders)
        .forward(&ctx, Method::POST, "/api/v2/orders", Some(body.into_value()))
        .await?;
    Ok(response.into_response())
}

pub async fn update_order_status(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Orders)
        .forward(
            &ctx,
            Method::PATCH,
            &format!("/api/v2/orders/{id}/status"),
            Some(body.into_value()),
        )
        .await?;
    Ok(response.into_response())
}

/// Lists the caller's own orders.
pub async fn list_user_orders(
    State(state): State<AppState>,
    identity: Identity,
    ctx: RequestContext,
    RawQuery(query): RawQuery,
) -> Result<Response, GatewayError> {
    let path = with_query(format!("/api/v2/users/{}/orders", identity.user_id), query);
    let response = state
        .service(Backend::Orders)
        .forward(&ctx, Method::GET, &path, None)
        .await?;
    Ok(response.into_response())
}

pub async fn get_order_v1(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    tracing::warn!(order_id = %id, "V1 API called: get_order_v1");

    let response = state
        .service(Backend::Orders)
        .forward(&ctx, Method::GET, &format!("/api/v1/orders/{id}"), None)
        .await?;
    Ok(state.deprecated(response.into_response()))
}
