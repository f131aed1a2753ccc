//! Route table.

use axum::extract::DefaultBodyLimit;
use axum::routing::{delete, get, patch, post};
use axum::Router;

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::handlers::{auth, health, notifications, orders, payments, users, AppState};
use crate::pipeline::{Pipeline, PipelineContext};

/// Builds the complete application router with every stage applied.
pub fn router(config: &GatewayConfig, state: AppState, ctx: &PipelineContext) -> Router {
    let bearer = Pipeline::bearer(&[]);
    let admin = Pipeline::bearer(&["admin"]);

    let mut router = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics))
        .route("/auth/refresh", bearer.layer_route(post(auth::refresh), ctx))
        .route("/auth/logout", post(auth::logout))
        // users
        .route(
            "/api/v2/users",
            admin.layer_route(get(users::list_users).post(users::create_user), ctx),
        )
        .route(
            "/api/v2/users/{id}",
            bearer.layer_route(get(users::get_user).put(users::update_user), ctx),
        )
        .route(
            "/api/v2/users/{id}",
            admin.layer_route(delete(users::delete_user), ctx),
        )
        // orders
        .route(
            "/api/v2/orders",
            bearer.layer_route(
                get(orders::list_user_orders).post(orders::create_order),
                ctx,
            ),
        )
        .route(
            "/api/v2/orders/{id}",
            bearer.layer_route(get(orders::get_order), ctx),
        )
        .route(
            "/api/v2/orders/{id}/status",
            bearer.layer_route(patch(orders::update_order_status), ctx),
        )
        // payments
        .route(
            "/api/v2/payments",
            bearer.layer_route(post(payments::process_payment), ctx),
        )
        .route(
            "/api/v2/payments/{id}",
            bearer.layer_route(get(payments::get_payment), ctx),
        )
        .route(
            "/api/v2/payments/{id}/refund",
            bearer.layer_route(post(payments::refund_payment), ctx),
        )
        // notifications
        .route(
            "/api/v2/notifications",
            bearer.layer_route(post(notifications::send_notification), ctx),
        )
        .route(
            "/api/v2/notifications/{id}",
            bearer.layer_route(get(notifications::get_notification), ctx),
        )
        .route(
            "/api/v2/notifications/email",
            bearer.layer_route(post(notifications::send_email), ctx),
        )
        .route(
            "/api/v2/notifications/sms",
            bearer.layer_route(post(notifications::send_sms), ctx),
        );

    if config.auth.enable_login {
        router = router.route("/auth/login", post(auth::login));
    }

    if config.legacy.enable_legacy_login {
        router = router.route("/auth/login/legacy", post(auth::login_legacy));
    }

    if config.legacy.enable_v1_api {
        router = router.merge(legacy_routes(ctx));
    } else {
        tracing::info!("V1 API disabled");
    }

    let router = router
        .fallback(|| async { GatewayError::NotFound })
        .layer(DefaultBodyLimit::max(config.limits.max_body_size))
        .with_state(state);

    Pipeline::global(config.metrics.enabled).layer_router(router, ctx)
}

/// The deprecated v1 surface. Only the legacy header is accepted here.
fn legacy_routes(ctx: &PipelineContext) -> Router<AppState> {
    let legacy = Pipeline::legacy();

    Router::new()
        .route(
            "/api/v1/users",
            legacy.layer_route(post(users::create_user_v1), ctx),
        )
        .route(
            "/api/v1/users/{id}",
            legacy.layer_route(get(users::get_user_v1), ctx),
        )
        .route(
            "/api/v1/orders/{id}",
            legacy.layer_route(get(orders::get_order_v1), ctx),
        )
        .route(
            "/api/v1/payments",
            legacy.layer_route(post(payments::process_payment_v1), ctx),
        )
        .route(
            "/api/v1/email/send",
            legacy.layer_route(post(notifications::send_email_v1), ctx),
        )
}
