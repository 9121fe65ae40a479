// Observability endpoints: /metrics, /modules/status, /health

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::AppState;

/// Prometheus text-format metrics exposition
#[utoipa::path(
    get,
    path = "/metrics",
    tag = "observability",
    responses((status = 200, description = "Prometheus text exposition"))
)]
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.export_text(),
    )
}

/// Module registry snapshot, deterministically ordered by module_id
#[utoipa::path(
    get,
    path = "/modules/status",
    tag = "observability",
    responses((status = 200, description = "Module registry snapshot"))
)]
pub async fn modules_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.modules.snapshot())
}

/// Substrate health
#[utoipa::path(
    get,
    path = "/health",
    tag = "observability",
    responses((status = 200, description = "Service health"))
)]
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let substrate_healthy = state.ingestor.probe_health().await;
    Json(json!({
        "status": if substrate_healthy { "ok" } else { "degraded" },
        "version": env!("CARGO_PKG_VERSION"),
        "substrate_healthy": substrate_healthy,
        "breakers": state.breakers.stats(),
    }))
}
