// Failure classification and the static recovery table
//
// `classify_span` is a pure function over a finished span; the recovery table
// maps each failure class to an ordered list of remediation actions. The
// executor that walks the chain lives in the observability crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::span::{PolicyResult, Span, SpanDetail, SpanKind, SpanStatus};

/// Tool calls running longer than this are classified as timeouts.
pub const TOOL_TIMEOUT_MS: f64 = 30_000.0;

/// LLM generations costing more than this trip the cost-constraint class.
pub const COST_BREACH_USD: f64 = 1.0;

/// Classification of failures detected from spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    ToolTimeout,
    ToolError,
    ContextWindowExceeded,
    LlmHallucination,
    GovernanceDenied,
    ExternalApiTimeout,
    PlanningFailure,
    CostConstraintBreach,
    LlmContentFilter,
    Unknown,
}

/// A detected failure event, consumed by the recovery executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureSignal {
    pub failure_class: FailureClass,
    pub span_id: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub context: serde_json::Map<String, Value>,
}

impl FailureSignal {
    fn from_span(failure_class: FailureClass, span: &Span, context: Value) -> Self {
        Self {
            failure_class,
            span_id: span.span_id.clone(),
            trace_id: span.trace_id.clone(),
            timestamp: Utc::now(),
            context: context.as_object().cloned().unwrap_or_default(),
        }
    }
}

/// Available recovery actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    Retry,
    Fallback,
    Summarize,
    Degrade,
    Escalate,
    FailFast,
}

/// One step in a recovery chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemediationAction {
    pub action: RecoveryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default)]
    pub parameters: serde_json::Map<String, Value>,
}

impl RemediationAction {
    fn new(action: RecoveryAction, parameters: Value) -> Self {
        Self {
            action,
            target: None,
            parameters: parameters.as_object().cloned().unwrap_or_default(),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.parameters
            .get("max_retries")
            .and_then(Value::as_u64)
            .unwrap_or(1) as u32
    }

    pub fn backoff_ms(&self) -> u64 {
        self.parameters
            .get("backoff_ms")
            .and_then(Value::as_u64)
            .unwrap_or(1000)
    }
}

/// Detect a failure from a finished span. Pure: same span, same answer.
pub fn classify_span(span: &Span) -> Option<FailureSignal> {
    // Tool spans: timeout takes precedence over the generic error class.
    let is_tool = matches!(span.detail, SpanDetail::ToolCall { .. }) || span.name.starts_with("tool.");
    if is_tool {
        if let Some(duration) = span.duration_ms {
            if duration > TOOL_TIMEOUT_MS {
                return Some(FailureSignal::from_span(
                    FailureClass::ToolTimeout,
                    span,
                    json!({"tool": span.name, "duration_ms": duration}),
                ));
            }
        }
        if span.status == SpanStatus::Error {
            return Some(FailureSignal::from_span(
                FailureClass::ToolError,
                span,
                json!({"tool": span.name, "error": span.error}),
            ));
        }
    }

    if let SpanDetail::ContextAssembly { overflow_event: true, tokens_used, .. } = span.detail {
        return Some(FailureSignal::from_span(
            FailureClass::ContextWindowExceeded,
            span,
            json!({"tokens_used": tokens_used}),
        ));
    }

    if let SpanDetail::GovernanceCheck { policy_result: PolicyResult::Deny, ref policy_name, .. } =
        span.detail
    {
        return Some(FailureSignal::from_span(
            FailureClass::GovernanceDenied,
            span,
            json!({"policy": policy_name}),
        ));
    }

    if span.status == SpanStatus::Error {
        let error = span.error.as_deref().unwrap_or("").to_ascii_lowercase();

        if error.contains("content filter") || error.contains("content_filter") {
            return Some(FailureSignal::from_span(
                FailureClass::LlmContentFilter,
                span,
                json!({"error": span.error}),
            ));
        }

        // Outbound client calls that ran out of deadline.
        if span.kind == SpanKind::Client
            && (error.contains("deadline") || error.contains("timed out") || error.contains("timeout"))
        {
            return Some(FailureSignal::from_span(
                FailureClass::ExternalApiTimeout,
                span,
                json!({"operation": span.name, "error": span.error}),
            ));
        }
    }

    // A planner that produced no plan.
    if span.name.starts_with("planner") {
        let steps = span
            .attributes
            .get("plan_steps")
            .and_then(Value::as_u64);
        if steps == Some(0) || span.status == SpanStatus::Error {
            return Some(FailureSignal::from_span(
                FailureClass::PlanningFailure,
                span,
                json!({"operation": span.name}),
            ));
        }
    }

    if let SpanDetail::LlmGeneration { cost_usd, ref model, .. } = span.detail {
        if cost_usd > COST_BREACH_USD {
            return Some(FailureSignal::from_span(
                FailureClass::CostConstraintBreach,
                span,
                json!({"model": model, "cost_usd": cost_usd}),
            ));
        }
    }

    None
}

/// The ordered recovery chain for a failure class. First successful action
/// stops the chain; exhaustion must end in escalation, never silent success.
pub fn recovery_actions_for(class: FailureClass) -> Vec<RemediationAction> {
    match class {
        FailureClass::ToolTimeout => vec![
            RemediationAction::new(
                RecoveryAction::Retry,
                json!({"max_retries": 3, "backoff_ms": 1000}),
            ),
            RemediationAction::new(
                RecoveryAction::Fallback,
                json!({"fallback_tool": "cached_results"}),
            ),
            RemediationAction::new(RecoveryAction::Escalate, json!({"channel": "ops"})),
        ],
        FailureClass::ContextWindowExceeded => vec![RemediationAction::new(
            RecoveryAction::Summarize,
            json!({"compression_ratio": 0.25}),
        )],
        FailureClass::GovernanceDenied => vec![
            RemediationAction::new(
                RecoveryAction::FailFast,
                json!({"reason": "policy_violation"}),
            ),
            RemediationAction::new(RecoveryAction::Escalate, json!({"channel": "admin_review"})),
        ],
        FailureClass::CostConstraintBreach => vec![RemediationAction::new(
            RecoveryAction::Degrade,
            json!({"degraded_model": "gpt-4o-mini"}),
        )],
        FailureClass::ExternalApiTimeout => vec![
            RemediationAction::new(
                RecoveryAction::Retry,
                json!({"max_retries": 2, "backoff_ms": 2000}),
            ),
            RemediationAction::new(
                RecoveryAction::Fallback,
                json!({"fallback_source": "cache"}),
            ),
        ],
        FailureClass::PlanningFailure => vec![RemediationAction::new(
            RecoveryAction::Degrade,
            json!({"degraded_strategy": "decompose_task"}),
        )],
        FailureClass::LlmHallucination => vec![RemediationAction::new(
            RecoveryAction::Retry,
            json!({"max_retries": 1, "temperature_adjustment": -0.2}),
        )],
        _ => vec![RemediationAction::new(
            RecoveryAction::Escalate,
            json!({"channel": "ops"}),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::tool_span_name;
    use crate::trace::TraceContext;

    fn finished_span(name: &str, kind: SpanKind, status: SpanStatus, error: Option<&str>) -> Span {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, name, kind);
        span.finish(status, error.map(String::from));
        span
    }

    #[test]
    fn test_tool_error_classified() {
        let span = finished_span(
            &tool_span_name("shell_exec"),
            SpanKind::Internal,
            SpanStatus::Error,
            Some("exit 1"),
        );
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::ToolError);
        assert_eq!(signal.trace_id, span.trace_id);
    }

    #[test]
    fn test_tool_timeout_takes_precedence() {
        let mut span = finished_span(
            &tool_span_name("web_search"),
            SpanKind::Internal,
            SpanStatus::Error,
            Some("slow"),
        );
        span.duration_ms = Some(45_000.0);
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::ToolTimeout);
    }

    #[test]
    fn test_context_overflow_classified() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, "context.assemble", SpanKind::Internal).with_detail(
            SpanDetail::ContextAssembly {
                strategy: "recency_biased_window".into(),
                tokens_used: 9000,
                tokens_available: 8000,
                truncation_occurred: true,
                overflow_event: true,
            },
        );
        span.finish_ok();
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::ContextWindowExceeded);
    }

    #[test]
    fn test_governance_deny_classified() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, "governance.high_risk", SpanKind::Internal).with_detail(
            SpanDetail::GovernanceCheck {
                policy_name: "high_risk".into(),
                policy_result: PolicyResult::Deny,
                policy_reason: Some("unapproved".into()),
            },
        );
        span.finish_ok();
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::GovernanceDenied);
    }

    #[test]
    fn test_external_api_deadline_classified() {
        let span = finished_span(
            "llm.gpt-4",
            SpanKind::Client,
            SpanStatus::Error,
            Some("deadline exceeded"),
        );
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::ExternalApiTimeout);
    }

    #[test]
    fn test_planner_without_plan_classified() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, "planner.refine", SpanKind::Internal)
            .with_attribute("plan_steps", serde_json::json!(0));
        span.finish_ok();
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::PlanningFailure);
    }

    #[test]
    fn test_content_filter_classified() {
        let span = finished_span(
            "llm.gpt-4",
            SpanKind::Client,
            SpanStatus::Error,
            Some("blocked by content filter"),
        );
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::LlmContentFilter);
    }

    #[test]
    fn test_cost_breach_classified() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, "llm.gpt-4", SpanKind::Client).with_detail(
            SpanDetail::LlmGeneration {
                model: "gpt-4".into(),
                prompt_tokens: 100_000,
                completion_tokens: 20_000,
                total_tokens: 120_000,
                cost_usd: 3.4,
                temperature: None,
            },
        );
        span.finish_ok();
        let signal = classify_span(&span).unwrap();
        assert_eq!(signal.failure_class, FailureClass::CostConstraintBreach);
    }

    #[test]
    fn test_healthy_span_not_classified() {
        let span = finished_span("tool.file_read", SpanKind::Internal, SpanStatus::Ok, None);
        assert!(classify_span(&span).is_none());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let span = finished_span(
            &tool_span_name("shell_exec"),
            SpanKind::Internal,
            SpanStatus::Error,
            Some("exit 1"),
        );
        let a = classify_span(&span).unwrap();
        let b = classify_span(&span).unwrap();
        assert_eq!(a.failure_class, b.failure_class);
        assert_eq!(a.span_id, b.span_id);
    }

    #[test]
    fn test_recovery_table_shapes() {
        let timeout_chain = recovery_actions_for(FailureClass::ToolTimeout);
        assert_eq!(timeout_chain.len(), 3);
        assert_eq!(timeout_chain[0].action, RecoveryAction::Retry);
        assert_eq!(timeout_chain[0].max_retries(), 3);
        assert_eq!(timeout_chain[0].backoff_ms(), 1000);
        assert_eq!(timeout_chain[2].action, RecoveryAction::Escalate);

        let denied_chain = recovery_actions_for(FailureClass::GovernanceDenied);
        assert_eq!(denied_chain[0].action, RecoveryAction::FailFast);
        assert_eq!(denied_chain[1].action, RecoveryAction::Escalate);

        let unknown_chain = recovery_actions_for(FailureClass::Unknown);
        assert_eq!(unknown_chain.len(), 1);
        assert_eq!(unknown_chain[0].action, RecoveryAction::Escalate);
    }
}
