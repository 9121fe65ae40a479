// Research API routes

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use crate::common::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct RunResearchRequest {
    pub query: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunResearchResponse {
    pub thread_id: String,
    #[schema(value_type = Object)]
    pub result: Value,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResumeResearchRequest {
    pub thread_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResearchStatusResponse {
    pub thread_id: String,
    pub refined_goal: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub evidence_count: usize,
    pub critic_score: f64,
    pub retry_count: u32,
    pub has_output: bool,
}

/// Run a research query to completion
#[utoipa::path(
    post,
    path = "/research/run",
    tag = "research",
    request_body = RunResearchRequest,
    responses(
        (status = 200, description = "Research completed", body = RunResearchResponse),
        (status = 400, description = "Invalid request"),
    )
)]
pub async fn run_research(
    State(state): State<AppState>,
    Json(request): Json<RunResearchRequest>,
) -> Result<Json<RunResearchResponse>, ApiError> {
    if request.query.trim().is_empty() {
        return Err(ApiError::bad_request("query must not be empty"));
    }

    let user_id = request.user_id.as_deref().unwrap_or("anonymous");
    let final_state = state
        .research
        .execute(&request.query, user_id, request.thread_id)
        .await;

    Ok(Json(RunResearchResponse {
        thread_id: final_state.thread_id.clone(),
        result: if final_state.has_output() {
            final_state.final_output.clone()
        } else {
            json!({"errors": final_state.errors})
        },
    }))
}

/// Resume a research thread from its checkpoint
#[utoipa::path(
    post,
    path = "/research/resume",
    tag = "research",
    request_body = ResumeResearchRequest,
    responses(
        (status = 200, description = "Research resumed", body = RunResearchResponse),
        (status = 404, description = "No checkpoint for thread"),
    )
)]
pub async fn resume_research(
    State(state): State<AppState>,
    Json(request): Json<ResumeResearchRequest>,
) -> Result<Json<RunResearchResponse>, ApiError> {
    let resumed = state
        .research
        .resume(&request.thread_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;

    match resumed {
        Some(final_state) => Ok(Json(RunResearchResponse {
            thread_id: final_state.thread_id.clone(),
            result: final_state.final_output.clone(),
        })),
        None => Err(ApiError::not_found(format!(
            "no_checkpoint: {}",
            request.thread_id
        ))),
    }
}

/// Status of a research thread
#[utoipa::path(
    get,
    path = "/research/{thread_id}/status",
    tag = "research",
    params(("thread_id" = String, Path, description = "Research thread id")),
    responses(
        (status = 200, description = "Thread status", body = ResearchStatusResponse),
        (status = 404, description = "Unknown thread"),
    )
)]
pub async fn research_status(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ResearchStatusResponse>, ApiError> {
    let status = state
        .research
        .status(&thread_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?
        .ok_or_else(|| ApiError::not_found(format!("unknown thread: {thread_id}")))?;

    Ok(Json(ResearchStatusResponse {
        thread_id: status.thread_id,
        refined_goal: status.refined_goal,
        steps_completed: status.steps_completed,
        total_steps: status.total_steps,
        evidence_count: status.evidence_count,
        critic_score: status.critic_score,
        retry_count: status.retry_count,
        has_output: status.has_output,
    }))
}
