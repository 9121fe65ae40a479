// Compliance API routes

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::common::{parse_date, ApiError};
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct ComplianceRangeParams {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub format: Option<String>,
}

/// Compliance report for a date range
#[utoipa::path(
    get,
    path = "/compliance/report",
    tag = "compliance",
    params(
        ("from" = String, Query, description = "Range start (RFC 3339 or YYYY-MM-DD)"),
        ("to" = String, Query, description = "Range end (RFC 3339 or YYYY-MM-DD)"),
    ),
    responses(
        (status = 200, description = "Aggregated compliance report"),
        (status = 400, description = "Invalid date range"),
    )
)]
pub async fn compliance_report(
    State(state): State<AppState>,
    Query(params): Query<ComplianceRangeParams>,
) -> Result<Json<Value>, ApiError> {
    let from = parse_date(&params.from)?;
    let to = parse_date(&params.to)?;
    if from >= to {
        return Err(ApiError::bad_request("'from' must precede 'to'"));
    }

    let report = state
        .reporter
        .generate_report(from, to)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    serde_json::to_value(&report)
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// Raw audit packet export for a date range, sorted by timestamp
#[utoipa::path(
    get,
    path = "/compliance/export",
    tag = "compliance",
    params(
        ("from" = String, Query, description = "Range start"),
        ("to" = String, Query, description = "Range end"),
        ("format" = Option<String>, Query, description = "Export format (json)"),
    ),
    responses(
        (status = 200, description = "Audit packets sorted by timestamp"),
        (status = 400, description = "Invalid parameters"),
    )
)]
pub async fn compliance_export(
    State(state): State<AppState>,
    Query(params): Query<ComplianceRangeParams>,
) -> Result<Json<Value>, ApiError> {
    let from = parse_date(&params.from)?;
    let to = parse_date(&params.to)?;
    if let Some(format) = params.format.as_deref() {
        if format != "json" {
            return Err(ApiError::bad_request(format!(
                "unsupported export format: {format}"
            )));
        }
    }

    let rows = state
        .reporter
        .export_range(from, to)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    let packets: Vec<Value> = rows
        .iter()
        .map(|r| serde_json::to_value(&r.envelope).unwrap_or(Value::Null))
        .collect();

    Ok(Json(json!({
        "count": packets.len(),
        "packets": packets,
    })))
}
