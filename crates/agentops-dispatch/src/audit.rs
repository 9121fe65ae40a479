// Tool audit emission
//
// Builds the tool_audit packet and the dedicated table row for a completed
// dispatch, and ingests both from a detached background task. Errors here are
// logged and never reach the tool caller.

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use agentops_core::dispatch::{sanitize_arguments, DispatchStatus};
use agentops_core::packet::{MemorySegment, PacketEnvelope, PacketProvenance};
use agentops_storage::{PacketStore, ToolAuditRecord};

/// Audit packets expire after 24 hours; being immutable they are never
/// actually pruned, the TTL is a retention hint.
pub const TOOL_AUDIT_TTL_HOURS: i64 = 24;

const MAX_ERROR_LEN: usize = 500;
const MAX_SUMMARY_LEN: usize = 200;

/// Everything known about a completed dispatch, for the audit trail.
pub struct AuditEntry {
    pub call_id: Uuid,
    pub tool_id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub trace_id: Option<String>,
    pub status: DispatchStatus,
    pub duration_ms: u64,
    pub error: Option<String>,
    pub arguments: Map<String, Value>,
    pub result_summary: Option<String>,
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

/// Construct the `tool_audit` packet for a completed dispatch.
pub fn build_audit_packet(entry: &AuditEntry) -> PacketEnvelope {
    let sanitized = sanitize_arguments(&entry.arguments);

    let mut payload = json!({
        "call_id": entry.call_id,
        "tool_id": entry.tool_id,
        "agent_id": entry.agent_id,
        "status": entry.status.as_str(),
        "duration_ms": entry.duration_ms,
        "execution_timestamp": Utc::now(),
        "arguments": Value::Object(sanitized),
    });
    if let Some(task_id) = &entry.task_id {
        payload["task_id"] = json!(task_id);
    }
    if let Some(error) = &entry.error {
        payload["error"] = json!(truncate(error, MAX_ERROR_LEN));
    }
    if let Some(summary) = &entry.result_summary {
        payload["result_summary"] = json!(truncate(summary, MAX_SUMMARY_LEN));
    }

    let mut packet = PacketEnvelope::new(MemorySegment::ToolAudit, payload)
        .with_provenance(PacketProvenance {
            source: "tool_dispatcher".to_string(),
            parent_packet: None,
            tool: Some(entry.tool_id.clone()),
        })
        // Tool audit is always full confidence: direct observation.
        .with_confidence(1.0, "Direct tool invocation observation")
        .with_tags(vec![
            format!("tool:{}", entry.tool_id),
            format!("agent:{}", entry.agent_id),
            format!("status:{}", entry.status),
        ])
        .with_ttl(Utc::now() + Duration::hours(TOOL_AUDIT_TTL_HOURS));

    packet.metadata.agent_id = Some(entry.agent_id.clone());
    packet.metadata.domain = Some("tool_audit".to_string());
    packet.metadata.trace_id = entry.trace_id.clone();
    packet.metadata.immutable = true;
    packet
}

/// Construct the dedicated tool_audit_log row.
pub fn build_audit_record(entry: &AuditEntry) -> ToolAuditRecord {
    ToolAuditRecord {
        call_id: entry.call_id,
        tool_id: entry.tool_id.clone(),
        agent_id: entry.agent_id.clone(),
        task_id: entry.task_id.clone(),
        status: entry.status.as_str().to_string(),
        duration_ms: entry.duration_ms as i64,
        error: entry.error.as_deref().map(|e| truncate(e, MAX_ERROR_LEN)),
        arguments: Some(Value::Object(sanitize_arguments(&entry.arguments))),
        result_summary: entry
            .result_summary
            .as_deref()
            .map(|s| truncate(s, MAX_SUMMARY_LEN)),
        timestamp: Utc::now(),
    }
}

/// Schedule the audit writes as a detached background task. Fire-and-forget:
/// the caller never waits and never sees an error.
pub fn emit_audit(store: Arc<dyn PacketStore>, entry: AuditEntry) {
    let packet = build_audit_packet(&entry);
    let record = build_audit_record(&entry);
    let call_id = entry.call_id;
    let tool_id = entry.tool_id.clone();

    tokio::spawn(async move {
        if let Err(e) = store.insert_packet(&packet).await {
            warn!(%call_id, %tool_id, error = %e, "tool audit packet write failed");
        }
        if let Err(e) = store.record_tool_audit(&record).await {
            warn!(%call_id, %tool_id, error = %e, "tool audit table write failed");
        }
        debug!(%call_id, %tool_id, "tool audit persisted");
    });
}
