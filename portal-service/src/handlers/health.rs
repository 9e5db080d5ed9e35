use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::{services::get_metrics, AppState};

fn status_of<E: std::fmt::Display>(component: &str, result: Result<(), E>) -> &'static str {
    match result {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(component = component, error = %e, "Health check failed");
            "down"
        }
    }
}

/// Router, billing and database reachability.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let router = status_of(
        "router",
        state.orchestrator.coordinator().router().health_check().await,
    );
    let billing = status_of("billing", state.orchestrator.ledger().health_check().await);
    let database = match &state.db {
        Some(db) => status_of("database", db.health_check().await),
        None => "in_memory",
    };

    let healthy = router == "up" && billing == "up" && database != "down";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "healthy" } else { "degraded" },
            "service": state.config.server.service_name,
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "router": router,
                "billing": billing,
                "database": database,
            }
        })),
    )
}

pub async fn metrics() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        get_metrics(),
    )
}
