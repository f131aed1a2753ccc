//! Ordered composition of the admission stages.
//!
//! Stages are described as data and applied by [`Pipeline`] in a fixed global
//! order, whatever order they were listed in:
//!
//! ```text
//! Correlation -> AccessLog -> Metrics -> RateLimit -> Authenticate -> Authorize -> handler
//! ```
//!
//! The first four wrap the whole router. Authentication and authorization are
//! bound per route, since the credential scheme and the allowed roles differ
//! between routes.

use axum::routing::MethodRouter;
use axum::Router;
use std::sync::Arc;

use crate::identity::{AuthScheme, IdentityResolver};
use crate::middleware::{
    AccessLogLayer, AuthLayer, CorrelationLayer, MetricsLayer, RateLimitLayer, RateLimiter,
    RequireRoleLayer,
};

/// One admission stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Correlation,
    AccessLog,
    Metrics,
    RateLimit,
    Authenticate(AuthScheme),
    Authorize(Vec<String>),
}

impl Stage {
    /// Position in the global order. Lower runs first (outermost).
    pub const fn rank(&self) -> u8 {
        match self {
            Self::Correlation => 0,
            Self::AccessLog => 1,
            Self::Metrics => 2,
            Self::RateLimit => 3,
            Self::Authenticate(_) => 4,
            Self::Authorize(_) => 5,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            Self::Correlation => "correlation",
            Self::AccessLog => "access_log",
            Self::Metrics => "metrics",
            Self::RateLimit => "rate_limit",
            Self::Authenticate(_) => "authenticate",
            Self::Authorize(_) => "authorize",
        }
    }

    /// Whether the stage wraps the whole router rather than a single route.
    pub const fn is_router_scoped(&self) -> bool {
        matches!(
            self,
            Self::Correlation | Self::AccessLog | Self::Metrics | Self::RateLimit
        )
    }

    pub fn authorize<I, R>(roles: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: Into<String>,
    {
        Self::Authorize(roles.into_iter().map(Into::into).collect())
    }
}

/// Shared collaborators the stages are built from.
#[derive(Clone)]
pub struct PipelineContext {
    pub resolver: Arc<IdentityResolver>,
    pub limiter: Arc<RateLimiter>,
    pub auth_bypass_paths: Arc<[String]>,
}

/// An ordered list of stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Orders `stages` by rank. Input order is irrelevant.
    pub fn new(stages: impl IntoIterator<Item = Stage>) -> Self {
        let mut stages: Vec<Stage> = stages.into_iter().collect();
        stages.sort_by_key(Stage::rank);
        Self { stages }
    }

    /// Router-wide stages, with or without request metrics.
    pub fn global(with_metrics: bool) -> Self {
        let mut stages = vec![Stage::Correlation, Stage::AccessLog, Stage::RateLimit];
        if with_metrics {
            stages.push(Stage::Metrics);
        }
        Self::new(stages)
    }

    /// Bearer authentication, optionally restricted to `roles`.
    pub fn bearer(roles: &[&str]) -> Self {
        let mut stages = vec![Stage::Authenticate(AuthScheme::Bearer)];
        if !roles.is_empty() {
            stages.push(Stage::authorize(roles.iter().copied()));
        }
        Self::new(stages)
    }

    /// Legacy header authentication.
    pub fn legacy() -> Self {
        Self::new([Stage::Authenticate(AuthScheme::Legacy)])
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Applies the router-scoped stages. Call after every route is registered.
    pub fn layer_router<S>(&self, mut router: Router<S>, ctx: &PipelineContext) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        // Each layer wraps the previous one, so the highest rank goes on first.
        for stage in self.stages.iter().rev().filter(|s| s.is_router_scoped()) {
            router = match stage {
                Stage::Correlation => router.layer(CorrelationLayer::new()),
                Stage::AccessLog => router.layer(AccessLogLayer::new()),
                Stage::Metrics => router.layer(MetricsLayer::new()),
                Stage::RateLimit => router.layer(RateLimitLayer::new(ctx.limiter.clone())),
                Stage::Authenticate(_) | Stage::Authorize(_) => router,
            };
        }
        router
    }

    /// Applies the route-scoped stages to a single route.
    pub fn layer_route<S>(&self, mut route: MethodRouter<S>, ctx: &PipelineContext) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        for stage in self.stages.iter().rev().filter(|s| !s.is_router_scoped()) {
            route = match stage {
                Stage::Authenticate(scheme) => route.layer(
                    AuthLayer::new(*scheme, ctx.resolver.clone())
                        .with_bypass_paths(ctx.auth_bypass_paths.clone()),
                ),
                Stage::Authorize(roles) => route.layer(RequireRoleLayer::new(roles.iter().cloned())),
                _ => route,
            };
        }
        route
    }
}
