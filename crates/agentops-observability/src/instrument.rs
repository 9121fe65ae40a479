//! Instrumentation wrappers
//!
//! Span-wrapping helpers for the common operation shapes: a generic internal
//! operation, a tool call (captures input/output on the typed span), and an
//! outbound chat completion (captures token counts and cost, kind CLIENT).
//! Trace context is passed explicitly; there are no implicit globals.

use std::future::Future;

use serde_json::Value;

use agentops_core::llm::{ChatModel, ChatRequest, ChatResponse, LlmError};
use agentops_core::span::{llm_span_name, tool_span_name, SpanDetail, SpanKind};
use agentops_core::trace::TraceContext;

use crate::service::ObservabilityService;

/// Run an operation inside a span of the given kind.
pub async fn traced<T, E, Fut>(
    service: &ObservabilityService,
    ctx: &TraceContext,
    name: &str,
    kind: SpanKind,
    op: Fut,
) -> Result<T, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<T, E>>,
{
    let mut span = service.start_span(ctx, name, kind);
    let result = op.await;
    match &result {
        Ok(_) => span.finish_ok(),
        Err(e) => span.finish_error(e.to_string()),
    }
    service.record(ctx, span);
    result
}

/// Run a tool call inside a `tool.{name}` span, capturing input and output
/// (or error) on the typed span.
pub async fn traced_tool_call<E, Fut>(
    service: &ObservabilityService,
    ctx: &TraceContext,
    tool_name: &str,
    input: Value,
    op: Fut,
) -> Result<Value, E>
where
    E: std::fmt::Display,
    Fut: Future<Output = Result<Value, E>>,
{
    let mut span = service.start_span(ctx, &tool_span_name(tool_name), SpanKind::Internal);
    let result = op.await;

    span.detail = SpanDetail::ToolCall {
        tool_name: tool_name.to_string(),
        input,
        output: result.as_ref().ok().cloned(),
        error: result.as_ref().err().map(|e| e.to_string()),
    };
    match &result {
        Ok(_) => span.finish_ok(),
        Err(e) => span.finish_error(e.to_string()),
    }
    service.record(ctx, span);
    result
}

/// Per-1k-token pricing used to attribute cost to LLM generation spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenPricing {
    pub input_per_1k_usd: f64,
    pub output_per_1k_usd: f64,
}

impl Default for TokenPricing {
    fn default() -> Self {
        Self {
            input_per_1k_usd: 0.0,
            output_per_1k_usd: 0.0,
        }
    }
}

impl TokenPricing {
    pub fn cost_usd(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 * self.input_per_1k_usd
            + completion_tokens as f64 * self.output_per_1k_usd)
            / 1000.0
    }
}

/// Run a chat completion inside an `llm.{model}` CLIENT span, capturing token
/// counts and attributed cost. A cancelled call reports ERROR with reason
/// `cancelled`.
pub async fn traced_chat(
    service: &ObservabilityService,
    ctx: &TraceContext,
    model: &dyn ChatModel,
    request: ChatRequest,
    pricing: TokenPricing,
) -> Result<ChatResponse, LlmError> {
    let model_name = request.model.clone();
    let temperature = request.temperature;
    let mut span = service.start_span(ctx, &llm_span_name(&model_name), SpanKind::Client);

    let result = model.complete(request).await;
    match &result {
        Ok(response) => {
            span.detail = SpanDetail::LlmGeneration {
                model: model_name,
                prompt_tokens: response.prompt_tokens,
                completion_tokens: response.completion_tokens,
                total_tokens: response.total_tokens(),
                cost_usd: pricing.cost_usd(response.prompt_tokens, response.completion_tokens),
                temperature,
            };
            span.finish_ok();
        }
        Err(LlmError::Cancelled) => span.finish_error("cancelled"),
        Err(e) => span.finish_error(e.to_string()),
    }
    service.record(ctx, span);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporters::CompositeExporter;
    use crate::metrics::MemoryMetrics;
    use agentops_core::config::ObservabilitySettings;
    use agentops_core::llm::{ChatMessage, MockChatModel};
    use std::sync::Arc;

    fn service() -> Arc<ObservabilityService> {
        ObservabilityService::new(
            ObservabilitySettings {
                sampling_rate: 1.0,
                ..ObservabilitySettings::default()
            },
            CompositeExporter::new(vec![]),
            Arc::new(MemoryMetrics::new()),
        )
    }

    #[tokio::test]
    async fn test_traced_records_ok_and_error() {
        let service = service();
        let ctx = service.root_context();

        let ok: Result<u32, String> =
            traced(&service, &ctx, "atom.compute", SpanKind::Internal, async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err: Result<u32, String> = traced(&service, &ctx, "atom.compute", SpanKind::Internal, async {
            Err("boom".to_string())
        })
        .await;
        assert!(err.is_err());
        assert_eq!(service.pending_spans(), 2);
    }

    #[tokio::test]
    async fn test_traced_tool_call_captures_output() {
        let service = service();
        let ctx = service.root_context();

        let result: Result<Value, String> = traced_tool_call(
            &service,
            &ctx,
            "file_read",
            serde_json::json!({"path": "/x"}),
            async { Ok(serde_json::json!({"bytes": 12})) },
        )
        .await;
        assert_eq!(result.unwrap()["bytes"], 12);
        assert_eq!(service.pending_spans(), 1);
    }

    #[tokio::test]
    async fn test_traced_chat_attributes_tokens_and_cost() {
        let service = service();
        let ctx = service.root_context();
        let model = MockChatModel::new().with_response("echo", "four char reply here");

        let request = ChatRequest::new(
            "mock-chat",
            vec![ChatMessage::system("mode:echo"), ChatMessage::user("hi")],
        );
        let pricing = TokenPricing {
            input_per_1k_usd: 1.0,
            output_per_1k_usd: 2.0,
        };

        let response = traced_chat(&service, &ctx, &model, request, pricing)
            .await
            .unwrap();
        assert_eq!(response.content, "four char reply here");
        assert_eq!(service.pending_spans(), 1);
    }
}
