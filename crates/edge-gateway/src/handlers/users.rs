//! Users service routes.

use axum::extract::{RawQuery, State};
use axum::response::{IntoResponse, Response};
use http::Method;

use super::{with_query, AppState, JsonBody, ResourceId};
use crate::error::GatewayError;
use crate::proxy::{Backend, RequestContext};

pub async fn get_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    tracing::info!(user_id = %id, "Getting user");

    let response = state
        .service(Backend::Users)
        .forward(&ctx, Method::GET, &format!("/api/v2/users/{id}"), None)
        .await?;
    Ok(response.into_response())
}

pub async fn create_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Users)
        .forward(&ctx, Method::POST, "/api/v2/users", Some(body.into_value()))
        .await?;
    Ok(response.into_response())
}

pub async fn update_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Users)
        .forward(
            &ctx,
            Method::PUT,
            &format!("/api/v2/users/{id}"),
            Some(body.into_value()),
        )
        .await?;
    Ok(response.into_response())
}

pub async fn delete_user(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    let response = state
        .service(Backend::Users)
        .forward(&ctx, Method::DELETE, &format!("/api/v2/users/{id}"), None)
        .await?;
    Ok(response.into_response())
}

pub async fn list_users(
    State(state): State<AppState>,
    ctx: RequestContext,
    RawQuery(query): RawQuery,
) -> Result<Response, GatewayError> {
    let path = with_query("/api/v2/users".to_owned(), query);
    let response = state
        .service(Backend::Users)
        .forward(&ctx, Method::GET, &path, None)
        .await?;
    Ok(response.into_response())
}

/// v1: served by the users service under its legacy path prefix.
pub async fn get_user_v1(
    State(state): State<AppState>,
    ctx: RequestContext,
    id: ResourceId,
) -> Result<Response, GatewayError> {
    tracing::warn!(user_id = %id, "V1 API called: get_user_v1");

    let response = state
        .service(Backend::Users)
        .forward_legacy(&ctx, Method::GET, &format!("/users/{id}"), None)
        .await?;
    Ok(state.deprecated(response.into_response()))
}

pub async fn create_user_v1(
    State(state): State<AppState>,
    ctx: RequestContext,
    body: JsonBody,
) -> Result<Response, GatewayError> {
    tracing::warn!("V1 API called: create_user_v1");

    let response = state
        .service(Backend::Users)
        .forward_legacy(&ctx, Method::POST, "/users", Some(body.into_value()))
        .await?;
    Ok(state.deprecated(response.into_response()))
}
