// Tool dispatch value types and governance contract
//
// The dispatcher itself lives in agentops-dispatch; these are the shared
// types that cross crate boundaries: the dispatch context handed in by the
// caller, the outcome handed back, the governance engine seam, and the
// argument sanitizer applied before anything reaches the audit trail.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::trace::TraceContext;

/// Terminal status of a tool dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Success,
    Failure,
    Timeout,
    Denied,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
            Self::Denied => "denied",
        }
    }
}

impl std::fmt::Display for DispatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A governance evaluation request for a proposed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceRequest {
    pub tool_id: String,
    pub agent_id: String,
    pub arguments: Map<String, Value>,
    pub requires_approval: bool,
}

/// Decision returned by a governance engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum GovernanceDecision {
    Allow,
    Deny { reason: String },
    Review { reason: String },
}

impl GovernanceDecision {
    pub fn is_deny(&self) -> bool {
        matches!(self, GovernanceDecision::Deny { .. })
    }
}

/// Policy evaluation seam. The active agent context may carry one; when it
/// does, every dispatch consults it before execution.
#[async_trait]
pub trait GovernanceEngine: Send + Sync {
    async fn evaluate(&self, request: &GovernanceRequest) -> GovernanceDecision;
}

/// Caller-provided context for a dispatch.
#[derive(Clone)]
pub struct DispatchContext {
    pub agent_id: String,
    pub task_id: Option<String>,
    pub trace: TraceContext,
    pub governance: Option<Arc<dyn GovernanceEngine>>,
}

impl DispatchContext {
    pub fn new(agent_id: impl Into<String>, trace: TraceContext) -> Self {
        Self {
            agent_id: agent_id.into(),
            task_id: None,
            trace,
            governance: None,
        }
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_governance(mut self, engine: Arc<dyn GovernanceEngine>) -> Self {
        self.governance = Some(engine);
        self
    }
}

impl std::fmt::Debug for DispatchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("agent_id", &self.agent_id)
            .field("task_id", &self.task_id)
            .field("trace_id", &self.trace.trace_id)
            .field("has_governance", &self.governance.is_some())
            .finish()
    }
}

/// What the dispatcher returns to the caller. The call_id correlates with the
/// audit packet written in the background.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub call_id: Uuid,
    pub tool_id: String,
    pub status: DispatchStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

const SENSITIVE_KEY_FRAGMENTS: [&str; 7] = [
    "password",
    "api_key",
    "token",
    "secret",
    "credential",
    "auth",
    "key",
];

const MAX_STRING_LEN: usize = 500;

/// Sanitize tool arguments for the audit trail.
///
/// Values under keys containing a sensitive fragment (case-insensitive) are
/// replaced with `[REDACTED]`; long strings are truncated; nested maps are
/// sanitized recursively.
pub fn sanitize_arguments(arguments: &Map<String, Value>) -> Map<String, Value> {
    let mut sanitized = Map::new();

    for (key, value) in arguments {
        let key_lower = key.to_lowercase();
        if SENSITIVE_KEY_FRAGMENTS.iter().any(|s| key_lower.contains(s)) {
            sanitized.insert(key.clone(), Value::String("[REDACTED]".to_string()));
            continue;
        }

        let cleaned = match value {
            Value::String(s) if s.chars().count() > MAX_STRING_LEN => {
                let truncated: String = s.chars().take(MAX_STRING_LEN).collect();
                Value::String(format!("{truncated}...[truncated]"))
            }
            Value::Object(inner) => Value::Object(sanitize_arguments(inner)),
            other => other.clone(),
        };
        sanitized.insert(key.clone(), cleaned);
    }

    sanitized
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_redacts_sensitive_keys() {
        let args = as_map(json!({
            "path": "/x",
            "api_key": "sk-ABC",
            "AuthToken": "bearer xyz",
            "database_password": "hunter2"
        }));
        let sanitized = sanitize_arguments(&args);
        assert_eq!(sanitized["path"], json!("/x"));
        assert_eq!(sanitized["api_key"], json!("[REDACTED]"));
        assert_eq!(sanitized["AuthToken"], json!("[REDACTED]"));
        assert_eq!(sanitized["database_password"], json!("[REDACTED]"));
    }

    #[test]
    fn test_truncates_long_strings() {
        let long = "x".repeat(900);
        let args = as_map(json!({"content": long}));
        let sanitized = sanitize_arguments(&args);
        let out = sanitized["content"].as_str().unwrap();
        assert!(out.ends_with("...[truncated]"));
        assert_eq!(out.len(), 500 + "...[truncated]".len());
    }

    #[test]
    fn test_sanitizes_nested_maps() {
        let args = as_map(json!({
            "config": {"secret": "shh", "timeout": 5},
            "plan": "deploy"
        }));
        let sanitized = sanitize_arguments(&args);
        assert_eq!(sanitized["config"]["secret"], json!("[REDACTED]"));
        assert_eq!(sanitized["config"]["timeout"], json!(5));
        assert_eq!(sanitized["plan"], json!("deploy"));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(DispatchStatus::Success.to_string(), "success");
        assert_eq!(DispatchStatus::Timeout.to_string(), "timeout");
        assert_eq!(DispatchStatus::Denied.to_string(), "denied");
    }
}
