pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;

use axum::{
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::middleware::{
    rate_limit::{ip_rate_limit_middleware, IpRateLimiter},
    security_headers::security_headers_middleware,
    tracing::{request_id_middleware, REQUEST_ID_HEADER},
};
use std::sync::Arc;
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::config::PortalConfig;
use crate::services::{backends::UserStore, AuthOrchestrator, Database};

#[derive(Clone)]
pub struct AppState {
    pub config: PortalConfig,
    pub orchestrator: Arc<AuthOrchestrator>,
    /// Portal accounts, managed from the admin API.
    pub users: Arc<dyn UserStore>,
    /// `None` when running on in-memory stores.
    pub db: Option<Database>,
    pub auth_rate_limiter: IpRateLimiter,
}

pub fn build_router(state: AppState) -> Router {
    // Credential-submitting routes share one per-IP budget
    let credential_routes = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/voucher", post(handlers::auth::voucher))
        .route(
            "/auth/social/:provider/callback",
            get(handlers::auth::social_callback),
        )
        .layer(from_fn_with_state(
            state.auth_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let admin_routes = Router::new()
        .route("/admin/sessions", get(handlers::admin::list_sessions))
        .route(
            "/admin/vouchers",
            get(handlers::admin::list_vouchers).post(handlers::admin::generate_vouchers),
        )
        .route(
            "/admin/users",
            get(handlers::admin::list_users).post(handlers::admin::create_user),
        )
        .route("/admin/stats", get(handlers::admin::stats));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/metrics", get(handlers::health::metrics))
        .route("/auth/social/:provider", get(handlers::auth::social_redirect))
        .route("/auth/session", get(handlers::auth::session))
        .route("/auth/logout", post(handlers::auth::logout))
        .merge(credential_routes)
        .merge(admin_routes)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    let request_id = request
                        .headers()
                        .get(REQUEST_ID_HEADER)
                        .and_then(|value| value.to_str().ok())
                        .unwrap_or("-");

                    tracing::info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
}
