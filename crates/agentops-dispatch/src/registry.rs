// Tool abstraction and registry
//
// Tools are defined via a trait; the registry is the lookup used by the
// dispatcher and the research orchestrator. Error handling distinguishes
// tool-level errors (safe to surface) from internal errors (logged, replaced
// with a generic message).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tracing::error;

/// Default per-tool execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result of a tool execution.
///
/// `InternalError` details are logged but never surfaced to the caller or the
/// audit trail verbatim.
#[derive(Debug)]
pub enum ToolExecutionResult {
    /// Successful execution with a JSON result
    Success(Value),

    /// Tool-level error that is safe to surface
    ToolError(String),

    /// System-level error; details are hidden behind a generic message
    InternalError(String),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    /// The error text to expose, if any. Internal errors are logged here and
    /// replaced.
    pub fn surface_error(&self, tool_id: &str) -> Option<String> {
        match self {
            ToolExecutionResult::Success(_) => None,
            ToolExecutionResult::ToolError(message) => Some(message.clone()),
            ToolExecutionResult::InternalError(detail) => {
                error!(%tool_id, error = %detail, "tool internal error (hidden from caller)");
                Some("An internal error occurred while executing the tool".to_string())
            }
        }
    }
}

/// A tool executable through the dispatcher.
#[async_trait]
pub trait Tool: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Argument keys that must be present for dispatch to proceed.
    fn required_args(&self) -> Vec<String> {
        Vec::new()
    }

    /// Per-tool execution deadline.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolExecutionResult;
}

/// Function-style tool adapter for simple synchronous handlers.
pub struct FnTool {
    id: String,
    description: String,
    required: Vec<String>,
    timeout: Duration,
    handler: Arc<dyn Fn(&Map<String, Value>) -> ToolExecutionResult + Send + Sync>,
}

impl FnTool {
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        handler: impl Fn(&Map<String, Value>) -> ToolExecutionResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            required: Vec::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            handler: Arc::new(handler),
        }
    }

    pub fn with_required_args(mut self, args: &[&str]) -> Self {
        self.required = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Tool for FnTool {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn required_args(&self) -> Vec<String> {
        self.required.clone()
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn execute(&self, arguments: &Map<String, Value>) -> ToolExecutionResult {
        (self.handler)(arguments)
    }
}

/// Registry of executable tools. Tools may also be registered dynamically at
/// runtime, which is why an unknown id at validation time is a warning, not
/// an error.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
        }
    }

    /// Registry pre-loaded with the safe builtins.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(FnTool::new(
            "health_check",
            "Report substrate liveness",
            |_| ToolExecutionResult::success(json!({"status": "ok"})),
        )));
        registry.register(Arc::new(FnTool::new(
            "get_status",
            "Report dispatcher status",
            |_| ToolExecutionResult::success(json!({"dispatcher": "ready"})),
        )));
        registry
    }

    pub fn register(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.id().to_string(), tool);
    }

    pub fn get(&self, tool_id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(tool_id).cloned()
    }

    pub fn contains(&self, tool_id: &str) -> bool {
        self.tools.read().contains_key(tool_id)
    }

    pub fn tool_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_tool_executes() {
        let tool = FnTool::new("echo", "echo arguments", |args| {
            ToolExecutionResult::success(Value::Object(args.clone()))
        });
        let mut args = Map::new();
        args.insert("x".to_string(), json!(1));

        match tool.execute(&args).await {
            ToolExecutionResult::Success(value) => assert_eq!(value["x"], json!(1)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_registry_builtins() {
        let registry = ToolRegistry::with_builtins();
        assert!(registry.contains("health_check"));
        assert!(registry.contains("get_status"));
        assert_eq!(registry.tool_ids(), vec!["get_status", "health_check"]);
    }

    #[test]
    fn test_internal_error_is_masked() {
        let result = ToolExecutionResult::InternalError("db password leaked".to_string());
        let surfaced = result.surface_error("echo").unwrap();
        assert!(!surfaced.contains("password"));
    }
}
