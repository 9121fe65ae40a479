// End-to-end dispatch scenarios against the in-memory store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use agentops_core::dispatch::{
    DispatchContext, DispatchStatus, GovernanceDecision, GovernanceEngine, GovernanceRequest,
};
use agentops_core::packet::MemorySegment;
use agentops_core::trace::TraceContext;
use agentops_dispatch::{
    DispatchError, FnTool, Tool, ToolDispatcher, ToolExecutionResult, ToolRegistry,
};
use agentops_observability::MemoryMetrics;
use agentops_storage::{InMemoryPacketStore, PacketStore};

struct AllowAll;

#[async_trait]
impl GovernanceEngine for AllowAll {
    async fn evaluate(&self, _request: &GovernanceRequest) -> GovernanceDecision {
        GovernanceDecision::Allow
    }
}

struct DenyHighRisk;

#[async_trait]
impl GovernanceEngine for DenyHighRisk {
    async fn evaluate(&self, request: &GovernanceRequest) -> GovernanceDecision {
        if request.requires_approval {
            GovernanceDecision::Deny {
                reason: "high-risk tool without approval".to_string(),
            }
        } else {
            GovernanceDecision::Allow
        }
    }
}

struct SlowTool;

#[async_trait]
impl Tool for SlowTool {
    fn id(&self) -> &str {
        "slow_tool"
    }
    fn description(&self) -> &str {
        "sleeps past its deadline"
    }
    fn timeout(&self) -> Duration {
        Duration::from_millis(50)
    }
    async fn execute(&self, _arguments: &Map<String, Value>) -> ToolExecutionResult {
        tokio::time::sleep(Duration::from_secs(5)).await;
        ToolExecutionResult::success(json!({"never": "reached"}))
    }
}

fn harness() -> (Arc<InMemoryPacketStore>, Arc<MemoryMetrics>, ToolDispatcher) {
    let store = Arc::new(InMemoryPacketStore::new());
    let metrics = Arc::new(MemoryMetrics::new());
    let registry = Arc::new(ToolRegistry::with_builtins());

    registry.register(Arc::new(
        FnTool::new("gmp_run", "run a governed maintenance plan", |args| {
            ToolExecutionResult::success(json!({"executed_plan": args.get("plan")}))
        })
        .with_required_args(&["plan"]),
    ));
    registry.register(Arc::new(
        FnTool::new("file_read", "read a file", |args| {
            ToolExecutionResult::success(json!({"path": args.get("path")}))
        })
        .with_required_args(&["path"]),
    ));
    registry.register(Arc::new(SlowTool));

    let dispatcher = ToolDispatcher::new(registry, store.clone(), metrics.clone());
    (store, metrics, dispatcher)
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// Wait for the background audit task to land.
async fn await_audit_packet(
    store: &Arc<InMemoryPacketStore>,
    call_id: Uuid,
) -> agentops_storage::PacketRow {
    for _ in 0..100 {
        let rows = store
            .find_by_type(MemorySegment::ToolAudit, None, None, 50)
            .await
            .unwrap();
        if let Some(row) = rows
            .iter()
            .find(|r| r.envelope.payload["call_id"] == json!(call_id))
        {
            return row.clone();
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("audit packet for call {call_id} never appeared");
}

#[tokio::test]
async fn high_risk_tool_dispatch_logs_audit() {
    let (store, metrics, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled())
        .with_governance(Arc::new(AllowAll));

    let outcome = dispatcher
        .dispatch("gmp_run", args(json!({"plan": "deploy"})), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.status, DispatchStatus::Success);
    assert_eq!(outcome.output.as_ref().unwrap()["executed_plan"], json!("deploy"));

    // Metrics were recorded synchronously.
    assert_eq!(metrics.tool_invocation_count("gmp_run", "success"), 1);
    assert_eq!(metrics.tool_duration_observations("gmp_run"), 1);

    // The audit packet appears (eventually) with the expected identity.
    let row = await_audit_packet(&store, outcome.call_id).await;
    assert_eq!(row.envelope.payload["tool_id"], json!("gmp_run"));
    assert_eq!(row.envelope.payload["agent_id"], json!("L"));
    for tag in ["tool:gmp_run", "agent:L", "status:success"] {
        assert!(row.tags.contains(&tag.to_string()), "missing tag {tag}");
    }

    // And the dedicated audit table row cross-references the call.
    for _ in 0..100 {
        if store.get_tool_audit(outcome.call_id).await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let record = store.get_tool_audit(outcome.call_id).await.unwrap().unwrap();
    assert_eq!(record.tool_id, "gmp_run");
    assert_eq!(record.status, "success");
}

#[tokio::test]
async fn sensitive_arguments_are_redacted_in_audit() {
    let (store, _, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled());

    let outcome = dispatcher
        .dispatch(
            "file_read",
            args(json!({"path": "/x", "api_key": "sk-ABC"})),
            &ctx,
        )
        .await
        .unwrap();

    let row = await_audit_packet(&store, outcome.call_id).await;
    let persisted_args = &row.envelope.payload["arguments"];
    assert_eq!(persisted_args["path"], json!("/x"));
    assert_eq!(persisted_args["api_key"], json!("[REDACTED]"));

    // The raw key never appears anywhere in the persisted packet.
    let serialized = serde_json::to_string(&row.envelope).unwrap();
    assert!(!serialized.contains("sk-ABC"));
}

#[tokio::test]
async fn governance_deny_aborts_with_typed_denial() {
    let (store, metrics, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled())
        .with_governance(Arc::new(DenyHighRisk));

    let outcome = dispatcher
        .dispatch("gmp_run", args(json!({"plan": "deploy"})), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.status, DispatchStatus::Denied);
    assert!(outcome.error.as_ref().unwrap().contains("approval"));
    assert_eq!(metrics.tool_invocation_count("gmp_run", "denied"), 1);

    // Denials are audited too.
    let row = await_audit_packet(&store, outcome.call_id).await;
    assert!(row.tags.contains(&"status:denied".to_string()));

    // Safe tools pass the same engine.
    let ok = dispatcher
        .dispatch("file_read", args(json!({"path": "/x"})), &ctx)
        .await
        .unwrap();
    assert_eq!(ok.status, DispatchStatus::Success);
}

#[tokio::test]
async fn timeout_transitions_to_timeout_status() {
    let (store, metrics, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled());

    let outcome = dispatcher.dispatch("slow_tool", Map::new(), &ctx).await.unwrap();

    assert_eq!(outcome.status, DispatchStatus::Timeout);
    assert!(outcome.error.as_ref().unwrap().contains("50ms"));
    assert_eq!(metrics.tool_invocation_count("slow_tool", "timeout"), 1);

    let row = await_audit_packet(&store, outcome.call_id).await;
    assert!(row.tags.contains(&"status:timeout".to_string()));
}

#[tokio::test]
async fn validation_failures_never_execute() {
    let (store, metrics, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled());

    // Empty tool id.
    let err = dispatcher.dispatch("", Map::new(), &ctx).await.unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));

    // Missing required argument.
    let err = dispatcher
        .dispatch("gmp_run", Map::new(), &ctx)
        .await
        .unwrap_err();
    let DispatchError::Validation(errors) = err;
    assert!(errors[0].contains("plan"));

    // No metrics, no audit for rejected calls.
    assert_eq!(metrics.tool_invocation_count("gmp_run", "failure"), 0);
    tokio::time::sleep(Duration::from_millis(20)).await;
    let rows = store
        .find_by_type(MemorySegment::ToolAudit, None, None, 50)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn unregistered_tool_fails_with_audit() {
    let (store, _, dispatcher) = harness();
    let ctx = DispatchContext::new("L", TraceContext::sampled());

    let outcome = dispatcher
        .dispatch("dynamic_tool", Map::new(), &ctx)
        .await
        .unwrap();

    assert_eq!(outcome.status, DispatchStatus::Failure);
    assert!(outcome.error.as_ref().unwrap().contains("not registered"));
    let row = await_audit_packet(&store, outcome.call_id).await;
    assert_eq!(row.envelope.payload["tool_id"], json!("dynamic_tool"));
}
