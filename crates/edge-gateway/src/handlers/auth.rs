//! Token issuance endpoints.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use super::{AppState, JsonBody};
use crate::error::GatewayError;
use crate::identity::{Identity, DEFAULT_ROLE};
use crate::proxy::LEGACY_USER_ID_HEADER;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

impl TryFrom<JsonBody> for LoginRequest {
    type Error = GatewayError;

    fn try_from(body: JsonBody) -> Result<Self, Self::Error> {
        let request: Self = serde_json::from_value(body.into_value())
            .map_err(|_| GatewayError::MalformedRequest("Invalid request body".into()))?;
        if request.username.trim().is_empty() {
            return Err(GatewayError::MalformedRequest("Username required".into()));
        }
        Ok(request)
    }
}

/// Issues a customer token. Credentials are not checked here: the route is
/// only registered when `auth.enable_login` is set.
pub async fn login(
    State(state): State<AppState>,
    body: JsonBody,
) -> Result<Json<TokenResponse>, GatewayError> {
    let request = LoginRequest::try_from(body)?;
    tracing::info!(username = %request.username, "Login attempt");

    let token = state
        .resolver
        .codec()
        .issue(&request.username, None, DEFAULT_ROLE)
        .inspect_err(|e| tracing::error!(error = %e, "Token generation failed"))?;

    Ok(Json(TokenResponse { token }))
}

/// Echoes the username back as the v1 user id header.
pub async fn login_legacy(body: JsonBody) -> Result<Response, GatewayError> {
    let request = LoginRequest::try_from(body)?;
    tracing::warn!(username = %request.username, "Legacy login");

    let header_value = HeaderValue::from_str(&request.username)
        .map_err(|_| GatewayError::MalformedRequest("Invalid username".into()))?;

    let mut response = Json(serde_json::json!({ "user_id": request.username })).into_response();
    response
        .headers_mut()
        .insert(LEGACY_USER_ID_HEADER, header_value);
    Ok(response)
}

/// Re-issues a token for the authenticated caller, keeping their role.
pub async fn refresh(
    State(state): State<AppState>,
    identity: Identity,
) -> Result<Json<TokenResponse>, GatewayError> {
    tracing::info!(user_id = %identity.user_id, "Token refresh");

    let token = state
        .resolver
        .codec()
        .issue(&identity.user_id, None, &identity.role)?;
    Ok(Json(TokenResponse { token }))
}

/// Tokens are stateless; there is nothing to revoke.
pub async fn logout() -> StatusCode {
    tracing::info!("Logout");
    StatusCode::OK
}
