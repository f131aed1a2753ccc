//! Identity resolution middleware.

use axum::response::{IntoResponse, Response};
use http::Request;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::identity::{AuthScheme, Credentials, IdentityResolver};

/// Tower layer that resolves the caller's identity for one credential scheme.
///
/// On success the [`Identity`](crate::identity::Identity) is stored in the
/// request extensions; on failure the request ends with `401`.
#[derive(Clone)]
pub struct AuthLayer {
    scheme: AuthScheme,
    resolver: Arc<IdentityResolver>,
    bypass_paths: Arc<[String]>,
}

impl AuthLayer {
    pub fn new(scheme: AuthScheme, resolver: Arc<IdentityResolver>) -> Self {
        Self {
            scheme,
            resolver,
            bypass_paths: Arc::from([]),
        }
    }

    /// Path prefixes that skip identity resolution. Empty unless configured.
    pub fn with_bypass_paths(mut self, paths: impl Into<Arc<[String]>>) -> Self {
        self.bypass_paths = paths.into();
        self
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            scheme: self.scheme,
            resolver: self.resolver.clone(),
            bypass_paths: self.bypass_paths.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    scheme: AuthScheme,
    resolver: Arc<IdentityResolver>,
    bypass_paths: Arc<[String]>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AuthService<S>
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

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let mut inner = self.inner.clone();

        let path = req.uri().path();
        if self.bypass_paths.iter().any(|prefix| path.starts_with(prefix.as_str())) {
            tracing::warn!(path = %path, "Auth bypass for legacy path");
            return Box::pin(async move { inner.call(req).await });
        }

        let resolved = self
            .scheme
            .credentials(req.headers())
            .and_then(|credentials| {
                let identity = self.resolver.resolve(&credentials)?;
                if matches!(credentials, Credentials::LegacyHeader(_)) {
                    tracing::info!(user_id = %identity.user_id, "Legacy auth");
                }
                Ok(identity)
            });

        match resolved {
            Ok(identity) => {
                tracing::debug!(
                    user_id = %identity.user_id,
                    role = %identity.role,
                    scheme = self.scheme.as_str(),
                    "Identity resolved"
                );
                req.extensions_mut().insert(identity);
                Box::pin(async move { inner.call(req).await })
            }
            Err(e) => {
                tracing::debug!(
                    scheme = self.scheme.as_str(),
                    path = %req.uri().path(),
                    "Authentication failed"
                );
                Box::pin(async move { Ok(e.into_response()) })
            }
        }
    }
}
