// Boundary recovery hooks
//
// At the composition root we cannot re-execute arbitrary failed operations,
// so the in-place actions decline and every unrecovered failure lands in the
// escalation sink: a governance_meta packet plus a warning log. Components
// that own re-executable operations supply richer hooks.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use agentops_core::failure::{FailureSignal, RemediationAction};
use agentops_core::packet::{MemorySegment, PacketEnvelope, PacketProvenance};
use agentops_observability::{RecoveryHooks, SubstrateIngestor};

pub struct EscalationHooks {
    ingestor: Arc<SubstrateIngestor>,
}

impl EscalationHooks {
    pub fn new(ingestor: Arc<SubstrateIngestor>) -> Self {
        Self { ingestor }
    }
}

#[async_trait]
impl RecoveryHooks for EscalationHooks {
    async fn retry(&self, _signal: &FailureSignal, _attempt: u32) -> bool {
        false
    }

    async fn fallback(&self, _signal: &FailureSignal, _action: &RemediationAction) -> bool {
        false
    }

    async fn summarize(&self, _signal: &FailureSignal, _ratio: f64) -> bool {
        false
    }

    async fn degrade(&self, _signal: &FailureSignal, _action: &RemediationAction) -> bool {
        false
    }

    async fn escalate(&self, signal: &FailureSignal, channel: &str) {
        warn!(
            class = ?signal.failure_class,
            trace_id = %signal.trace_id,
            span_id = %signal.span_id,
            %channel,
            "failure escalated"
        );

        let mut packet = PacketEnvelope::new(
            MemorySegment::GovernanceMeta,
            json!({
                "event": "failure_escalation",
                "failure_class": signal.failure_class,
                "trace_id": signal.trace_id,
                "span_id": signal.span_id,
                "channel": channel,
                "context": signal.context,
            }),
        )
        .with_provenance(PacketProvenance {
            source: "recovery_engine".to_string(),
            parent_packet: None,
            tool: None,
        })
        .with_tags(vec!["escalation".to_string(), format!("channel:{channel}")]);
        packet.metadata.trace_id = Some(signal.trace_id.clone());
        packet.metadata.immutable = true;

        // Escalation bookkeeping must never fail the recovery path.
        let _ = self.ingestor.ingest(&packet).await;
    }
}
