// Tool call validation and safety classification
//
// Safety is classified by set membership; unknown tools default to requiring
// approval. A tool id missing from the registry is a warning only, because
// tools may be registered dynamically.

use serde_json::{Map, Value};

use crate::registry::ToolRegistry;

/// Tools with direct side effects on code, data, or infrastructure.
pub const DANGEROUS_TOOLS: [&str; 7] = [
    "shell_exec",
    "file_write",
    "file_delete",
    "database_write",
    "git_commit",
    "git_push",
    "gmp_run",
];

/// Tools that additionally require human approval before execution.
pub const APPROVAL_REQUIRED_TOOLS: [&str; 4] = ["git_push", "gmp_run", "deploy", "database_migrate"];

/// Tools safe to execute without approval.
pub const SAFE_TOOLS: [&str; 5] = [
    "file_read",
    "search",
    "list_directory",
    "get_status",
    "health_check",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyLevel {
    Safe,
    RequiresApproval,
    Dangerous,
}

impl SafetyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::RequiresApproval => "requires_approval",
            Self::Dangerous => "dangerous",
        }
    }
}

/// Result of validating a proposed tool call.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub valid: bool,
    pub tool_id: String,
    pub safety_level: SafetyLevel,
    pub requires_approval: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Classify a tool id by set membership.
pub fn classify_safety(tool_id: &str) -> (SafetyLevel, bool) {
    if DANGEROUS_TOOLS.contains(&tool_id) {
        return (SafetyLevel::Dangerous, true);
    }
    if APPROVAL_REQUIRED_TOOLS.contains(&tool_id) {
        return (SafetyLevel::RequiresApproval, true);
    }
    if SAFE_TOOLS.contains(&tool_id) {
        return (SafetyLevel::Safe, false);
    }
    // Unknown tools default to requiring approval.
    (SafetyLevel::RequiresApproval, true)
}

/// Validate a tool call against the registry and the tool's argument schema.
pub fn validate_call(
    registry: &ToolRegistry,
    tool_id: &str,
    arguments: &Map<String, Value>,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if tool_id.is_empty() {
        return ValidationResult {
            valid: false,
            tool_id: String::new(),
            safety_level: SafetyLevel::RequiresApproval,
            requires_approval: true,
            errors: vec!["tool id is required".to_string()],
            warnings,
        };
    }

    let (safety_level, requires_approval) = classify_safety(tool_id);

    match registry.get(tool_id) {
        Some(tool) => {
            for required in tool.required_args() {
                if !arguments.contains_key(&required) {
                    errors.push(format!("missing required argument: {required}"));
                }
            }
        }
        None => {
            // Not a hard error - the tool may be registered dynamically.
            warnings.push(format!("tool '{tool_id}' not found in registry"));
        }
    }

    ValidationResult {
        valid: errors.is_empty(),
        tool_id: tool_id.to_string(),
        safety_level,
        requires_approval,
        errors,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FnTool, ToolExecutionResult};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_safety_classification() {
        assert_eq!(classify_safety("shell_exec"), (SafetyLevel::Dangerous, true));
        assert_eq!(classify_safety("deploy"), (SafetyLevel::RequiresApproval, true));
        assert_eq!(classify_safety("file_read"), (SafetyLevel::Safe, false));
        // Unknown tools require approval by default.
        assert_eq!(
            classify_safety("brand_new_tool"),
            (SafetyLevel::RequiresApproval, true)
        );
    }

    #[test]
    fn test_empty_tool_id_invalid() {
        let registry = ToolRegistry::new();
        let result = validate_call(&registry, "", &Map::new());
        assert!(!result.valid);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn test_missing_required_argument() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(
            FnTool::new("file_read", "read a file", |_| {
                ToolExecutionResult::success(json!({}))
            })
            .with_required_args(&["path"]),
        ));

        let result = validate_call(&registry, "file_read", &Map::new());
        assert!(!result.valid);
        assert!(result.errors[0].contains("path"));

        let mut args = Map::new();
        args.insert("path".to_string(), json!("/x"));
        let result = validate_call(&registry, "file_read", &args);
        assert!(result.valid);
    }

    #[test]
    fn test_unknown_tool_is_warning_only() {
        let registry = ToolRegistry::new();
        let result = validate_call(&registry, "dynamic_tool", &Map::new());
        assert!(result.valid);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.requires_approval);
    }
}
