// Typed spans for the observability plane
//
// A span is the unit of telemetry for one operation. Specializations carry
// extra typed attributes as a sum type rather than subclassing, so failure
// classification can match on the variant instead of probing attribute maps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::trace::{new_span_id, TraceContext};

/// Span kind, mirroring the OpenTelemetry taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanKind {
    Internal,
    Server,
    Client,
    Producer,
    Consumer,
}

/// Span execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanStatus {
    Unset,
    Ok,
    Error,
}

/// Governance policy outcome recorded on a governance span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyResult {
    Allow,
    Deny,
    Review,
}

/// Operation-specific span attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "detail_type", rename_all = "snake_case")]
pub enum SpanDetail {
    None,
    LlmGeneration {
        model: String,
        prompt_tokens: u32,
        completion_tokens: u32,
        total_tokens: u32,
        cost_usd: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temperature: Option<f32>,
    },
    ToolCall {
        tool_name: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    ContextAssembly {
        strategy: String,
        tokens_used: u32,
        tokens_available: u32,
        truncation_occurred: bool,
        overflow_event: bool,
    },
    RagRetrieval {
        query: String,
        top_k: usize,
        chunks_retrieved: usize,
        relevance_scores: Vec<f64>,
    },
    GovernanceCheck {
        policy_name: String,
        policy_result: PolicyResult,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy_reason: Option<String>,
    },
    AgentTrajectory {
        agent_name: String,
        task_kind: String,
        iterations: u32,
    },
}

impl Default for SpanDetail {
    fn default() -> Self {
        SpanDetail::None
    }
}

/// A single timed operation within a trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub name: String,
    pub kind: SpanKind,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub detail: SpanDetail,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub attributes: serde_json::Map<String, Value>,
}

impl Span {
    /// Start a span as a child of the given trace context.
    pub fn start(ctx: &TraceContext, name: impl Into<String>, kind: SpanKind) -> Self {
        Self {
            trace_id: ctx.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(ctx.span_id.clone()),
            name: name.into(),
            kind,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status: SpanStatus::Unset,
            error: None,
            detail: SpanDetail::None,
            attributes: serde_json::Map::new(),
        }
    }

    pub fn with_detail(mut self, detail: SpanDetail) -> Self {
        self.detail = detail;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Finish the span with a status and optional error message.
    pub fn finish(&mut self, status: SpanStatus, error: Option<String>) {
        let end = Utc::now();
        self.duration_ms = Some((end - self.start_time).num_microseconds().unwrap_or(0) as f64 / 1000.0);
        self.end_time = Some(end);
        self.status = status;
        self.error = error;
    }

    pub fn finish_ok(&mut self) {
        self.finish(SpanStatus::Ok, None);
    }

    pub fn finish_error(&mut self, error: impl Into<String>) {
        self.finish(SpanStatus::Error, Some(error.into()));
    }

    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// Span name for tool execution: `tool.{tool_id}`.
pub fn tool_span_name(tool_id: &str) -> String {
    format!("tool.{tool_id}")
}

/// Span name for governance checks: `governance.{policy}`.
pub fn governance_span_name(policy: &str) -> String {
    format!("governance.{policy}")
}

/// Span name for LLM generation: `llm.{model}`.
pub fn llm_span_name(model: &str) -> String {
    format!("llm.{model}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_span_lifecycle() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, tool_span_name("file_read"), SpanKind::Internal);
        assert_eq!(span.status, SpanStatus::Unset);
        assert!(!span.is_finished());

        span.finish_ok();
        assert_eq!(span.status, SpanStatus::Ok);
        assert!(span.is_finished());
        assert!(span.duration_ms.unwrap() >= 0.0);
        assert_eq!(span.trace_id, ctx.trace_id);
        assert_eq!(span.parent_span_id.as_deref(), Some(ctx.span_id.as_str()));
    }

    #[test]
    fn test_span_names() {
        assert_eq!(tool_span_name("gmp_run"), "tool.gmp_run");
        assert_eq!(governance_span_name("high_risk"), "governance.high_risk");
        assert_eq!(llm_span_name("gpt-4"), "llm.gpt-4");
    }

    #[test]
    fn test_span_serde_round_trip() {
        let ctx = TraceContext::sampled();
        let mut span = Span::start(&ctx, "llm.gpt-4", SpanKind::Client).with_detail(
            SpanDetail::LlmGeneration {
                model: "gpt-4".into(),
                prompt_tokens: 120,
                completion_tokens: 30,
                total_tokens: 150,
                cost_usd: 0.012,
                temperature: Some(0.2),
            },
        );
        span.finish_error("rate limited");

        let encoded = serde_json::to_value(&span).unwrap();
        assert_eq!(encoded["detail"]["detail_type"], json!("llm_generation"));
        let decoded: Span = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, span);
    }
}
