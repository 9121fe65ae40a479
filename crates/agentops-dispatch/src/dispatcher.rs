// The dispatch protocol
//
// dispatch(tool_id, arguments, context):
//   1. validate (unknown tool id is a warning, bad arguments are an error)
//   2. classify safety by set membership
//   3. consult governance when the context carries an engine
//   4. execute under the per-tool timeout
//   5. audit: background packet + synchronous metrics + dedicated table row
//   6. return the outcome; the call_id correlates with the audit trail

use std::sync::Arc;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use agentops_core::dispatch::{
    DispatchContext, DispatchOutcome, DispatchStatus, GovernanceDecision, GovernanceRequest,
};
use agentops_observability::MemoryMetrics;
use agentops_storage::PacketStore;

use crate::audit::{emit_audit, AuditEntry};
use crate::registry::{ToolExecutionResult, ToolRegistry};
use crate::validator::validate_call;

/// Error type for dispatch failures that never reach execution.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The call failed validation; nothing was executed or audited.
    #[error("invalid tool call: {0:?}")]
    Validation(Vec<String>),
}

/// The audited tool dispatcher.
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    store: Arc<dyn PacketStore>,
    metrics: Arc<MemoryMetrics>,
}

impl ToolDispatcher {
    pub fn new(
        registry: Arc<ToolRegistry>,
        store: Arc<dyn PacketStore>,
        metrics: Arc<MemoryMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            metrics,
        }
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Dispatch a tool call. Callers receive the outcome (success, failure,
    /// timeout, or denial) with the call_id for audit correlation; only
    /// validation failures return an error.
    pub async fn dispatch(
        &self,
        tool_id: &str,
        arguments: Map<String, Value>,
        ctx: &DispatchContext,
    ) -> Result<DispatchOutcome, DispatchError> {
        // 1-2. Validate and classify.
        let validation = validate_call(&self.registry, tool_id, &arguments);
        for warning in &validation.warnings {
            warn!(%tool_id, agent_id = %ctx.agent_id, "{warning}");
        }
        if !validation.valid {
            return Err(DispatchError::Validation(validation.errors));
        }

        let call_id = Uuid::new_v4();
        let started = Instant::now();

        // 3. Governance.
        if let Some(engine) = &ctx.governance {
            let request = GovernanceRequest {
                tool_id: tool_id.to_string(),
                agent_id: ctx.agent_id.clone(),
                arguments: arguments.clone(),
                requires_approval: validation.requires_approval,
            };
            if let GovernanceDecision::Deny { reason } = engine.evaluate(&request).await {
                warn!(%tool_id, agent_id = %ctx.agent_id, %reason, "dispatch denied by governance");
                return Ok(self.complete(
                    call_id,
                    tool_id,
                    ctx,
                    arguments,
                    DispatchStatus::Denied,
                    None,
                    Some(reason),
                    started.elapsed().as_millis() as u64,
                ));
            }
        }

        // 4. Execute under the per-tool timeout.
        let (status, output, error) = match self.registry.get(tool_id) {
            Some(tool) => {
                match tokio::time::timeout(tool.timeout(), tool.execute(&arguments)).await {
                    Ok(result) => {
                        let error = result.surface_error(tool_id);
                        match result {
                            ToolExecutionResult::Success(value) => {
                                (DispatchStatus::Success, Some(value), None)
                            }
                            _ => (DispatchStatus::Failure, None, error),
                        }
                    }
                    Err(_) => (
                        DispatchStatus::Timeout,
                        None,
                        Some(format!(
                            "tool execution exceeded {}ms",
                            tool.timeout().as_millis()
                        )),
                    ),
                }
            }
            None => (
                DispatchStatus::Failure,
                None,
                Some(format!("tool not registered: {tool_id}")),
            ),
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            %call_id,
            %tool_id,
            agent_id = %ctx.agent_id,
            status = %status,
            duration_ms,
            "tool dispatch complete"
        );

        // 5-6. Audit and return.
        Ok(self.complete(call_id, tool_id, ctx, arguments, status, output, error, duration_ms))
    }

    /// Shared completion path: audit packet (background), metrics
    /// (synchronous, observed before return), audit table row (background).
    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        call_id: Uuid,
        tool_id: &str,
        ctx: &DispatchContext,
        arguments: Map<String, Value>,
        status: DispatchStatus,
        output: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    ) -> DispatchOutcome {
        let result_summary = output
            .as_ref()
            .and_then(|v| serde_json::to_string(v).ok())
            .map(|s| s.chars().take(200).collect::<String>());

        emit_audit(
            self.store.clone(),
            AuditEntry {
                call_id,
                tool_id: tool_id.to_string(),
                agent_id: ctx.agent_id.clone(),
                task_id: ctx.task_id.clone(),
                trace_id: Some(ctx.trace.trace_id.clone()),
                status,
                duration_ms,
                error: error.clone(),
                arguments,
                result_summary,
            },
        );

        // Metrics are synchronous: observed before dispatch returns.
        self.metrics
            .record_tool_invocation(tool_id, status.as_str(), duration_ms as f64);

        DispatchOutcome {
            call_id,
            tool_id: tool_id.to_string(),
            status,
            output,
            error,
            duration_ms,
        }
    }
}
