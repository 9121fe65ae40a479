// Tool routes and wiring-level tools
//
// POST /tools/dispatch is a thin boundary over the process-internal dispatch
// API. The self-modify tool is registered here because it glues the graph's
// governed mutation protocol into the dispatcher's registry.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use utoipa::ToSchema;

use agentops_core::dispatch::DispatchContext;
use agentops_dispatch::{DispatchError, Tool, ToolExecutionResult};
use agentops_graph::{AgentSelfModify, Directive, Severity};

use crate::common::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize, ToSchema)]
pub struct DispatchToolRequest {
    pub tool_id: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub arguments: Map<String, Value>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
}

/// Dispatch a tool through the audited chokepoint
#[utoipa::path(
    post,
    path = "/tools/dispatch",
    tag = "tools",
    request_body = DispatchToolRequest,
    responses(
        (status = 200, description = "Dispatch outcome with call_id for audit correlation"),
        (status = 400, description = "Validation failure"),
    )
)]
pub async fn dispatch_tool(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DispatchToolRequest>,
) -> Result<Json<Value>, ApiError> {
    let traceparent = headers
        .get("traceparent")
        .and_then(|v| v.to_str().ok());
    let trace = state.observability.context_from_traceparent(traceparent);

    let mut ctx = DispatchContext::new(
        request.agent_id.as_deref().unwrap_or("L"),
        trace,
    );
    if let Some(task_id) = request.task_id {
        ctx = ctx.with_task(task_id);
    }

    let outcome = state
        .dispatcher
        .dispatch(&request.tool_id, request.arguments, &ctx)
        .await
        .map_err(|e| match e {
            DispatchError::Validation(errors) => {
                ApiError::bad_request(format!("validation failed: {}", errors.join("; ")))
            }
        })?;

    serde_json::to_value(&outcome)
        .map(Json)
        .map_err(|e| ApiError::internal(e.to_string()))
}

/// The governed self-modification protocol surfaced as a dispatchable tool.
pub struct SelfModifyTool {
    inner: Arc<AgentSelfModify>,
}

impl SelfModifyTool {
    pub fn new(inner: Arc<AgentSelfModify>) -> Self {
        Self { inner }
    }

    fn parse_severity(raw: &str) -> Option<Severity> {
        match raw {
            "LOW" => Some(Severity::Low),
            "MEDIUM" => Some(Severity::Medium),
            "HIGH" => Some(Severity::High),
            "CRITICAL" => Some(Severity::Critical),
            _ => None,
        }
    }
}

#[async_trait]
impl Tool for SelfModifyTool {
    fn id(&self) -> &str {
        "agent_self_modify"
    }

    fn description(&self) -> &str {
        "Modify the agent's own graph state within governance constraints"
    }

    fn required_args(&self) -> Vec<String> {
        vec!["action".to_string(), "agent_id".to_string()]
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolExecutionResult {
        let arg = |key: &str| arguments.get(key).and_then(Value::as_str).unwrap_or_default();
        let action = arg("action");
        let agent_id = arg("agent_id");

        let result = match action {
            "add_directive" => {
                let Some(severity) = Self::parse_severity(arg("severity")) else {
                    return ToolExecutionResult::tool_error(format!(
                        "invalid severity: {}",
                        arg("severity")
                    ));
                };
                self.inner
                    .add_directive(
                        agent_id,
                        Directive {
                            text: arg("text").to_string(),
                            context_category: arg("context_category").to_string(),
                            severity,
                            created_by: agent_id.to_string(),
                        },
                        arguments
                            .get("approved")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                    )
                    .await
            }
            "update_responsibility" => {
                self.inner
                    .update_responsibility(agent_id, arg("title"), arg("new_description"))
                    .await
            }
            "add_sop_step" => {
                self.inner
                    .add_sop_step(agent_id, arg("sop_name"), arg("step"))
                    .await
            }
            other => {
                return ToolExecutionResult::tool_error(format!(
                    "unknown self-modify action: {other}"
                ))
            }
        };

        match result {
            Ok(outcome) => ToolExecutionResult::success(json!({
                "action": outcome.action,
                "details": outcome.detail,
            })),
            Err(e) => ToolExecutionResult::tool_error(e.to_string()),
        }
    }
}
