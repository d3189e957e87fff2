use crate::services::get_metrics;
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

/// Liveness probe.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "receipt-service",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Readiness probe: the receipt store must answer a ping.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.stores().receipts.health_check().await {
        Ok(_) => {
            tracing::debug!("Readiness check passed");
            (
                StatusCode::OK,
                Json(json!({ "status": "ready", "service": "receipt-service" })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unavailable",
                    "service": "receipt-service",
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
pub async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}
