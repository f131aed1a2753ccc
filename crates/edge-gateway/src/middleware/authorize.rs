//! Role-based authorization.

use axum::response::{IntoResponse, Response};
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::error::GatewayError;
use crate::identity::Identity;

/// Admits a request only when its [`Identity`] holds one of the allowed roles.
///
/// Roles are compared exactly and case-sensitively. A request that reaches
/// this layer without an identity is treated as forbidden.
#[derive(Debug, Clone)]
pub struct RequireRoleLayer {
    roles: Arc<[String]>,
}

impl RequireRoleLayer {
    pub fn new<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn roles(&self) -> &[String] {
        &self.roles
    }
}

impl<S> Layer<S> for RequireRoleLayer {
    type Service = RequireRoleService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireRoleService {
            inner,
            roles: self.roles.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequireRoleService<S> {
    inner: S,
    roles: Arc<[String]>,
}

fn is_allowed(roles: &[String], identity: Option<&Identity>) -> bool {
    identity.is_some_and(|identity| roles.iter().any(|role| *role == identity.role))
}

impl<S, ReqBody> Service<Request<ReqBody>> for RequireRoleService<S>
where
    S: Service<Request<ReqBody>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
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
        let identity = Identity::from_extensions(req.extensions());

        if !is_allowed(&self.roles, identity) {
            tracing::warn!(
                user_id = identity.map(|i| i.user_id.as_str()),
                role = identity.map(|i| i.role.as_str()),
                path = %req.uri().path(),
                "Access denied"
            );
            return Box::pin(async { Ok(GatewayError::Forbidden.into_response()) });
        }

        let mut inner = self.inner.clone();
        Box::pin(async move { inner.call(req).await })
    }
}
