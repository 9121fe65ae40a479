// Insight extraction
//
// Converts finalized research into substrate packets: one `conclusion`
// insight for the summary plus one `finding` per top-N evidence item. Tags
// come from domain keyword matches; confidence is the critic score, scaled
// down for evidence-derived findings.

use chrono::Utc;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use agentops_core::packet::{MemorySegment, PacketEnvelope, PacketProvenance};
use agentops_observability::SubstrateIngestor;
use agentops_storage::IngestStatus;

use crate::state::ResearchGraphState;

/// Domains matched against query/content for tagging.
const DOMAIN_KEYWORDS: [&str; 12] = [
    "memory",
    "governance",
    "tooling",
    "research",
    "observability",
    "agents",
    "security",
    "compliance",
    "infrastructure",
    "market",
    "pricing",
    "regulatory",
];

const MAX_TAGS: usize = 5;
const FINDING_CONFIDENCE_SCALE: f64 = 0.9;

/// A structured insight ready to become a packet.
#[derive(Debug, Clone)]
pub struct InsightDraft {
    pub insight_type: &'static str,
    pub content: String,
    pub summary: String,
    pub evidence_refs: Vec<String>,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub rationale: String,
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

fn extract_tags(query: &str, content: &str) -> Vec<String> {
    let combined = format!("{query} {content}").to_lowercase();
    DOMAIN_KEYWORDS
        .iter()
        .filter(|k| combined.contains(*k))
        .take(MAX_TAGS)
        .map(|k| k.to_string())
        .collect()
}

/// Extract structured insights from a finalized research state.
pub fn extract_insights(state: &ResearchGraphState, top_n: usize) -> Vec<InsightDraft> {
    if state.final_summary.is_empty() || state.final_summary == "No evidence gathered" {
        warn!(thread_id = %state.thread_id, "no summary to extract insights from");
        return Vec::new();
    }

    let mut insights = vec![InsightDraft {
        insight_type: "conclusion",
        content: state.final_summary.clone(),
        summary: truncate(&state.final_summary, 300),
        evidence_refs: state
            .evidence
            .iter()
            .take(5)
            .map(|e| e.source.clone())
            .collect(),
        tags: extract_tags(&state.original_query, &state.final_summary),
        confidence: state.critic_score,
        rationale: format!(
            "Primary research conclusion with {} evidence sources",
            state.evidence.len()
        ),
    }];

    for (i, evidence) in state.evidence.iter().take(top_n).enumerate() {
        if evidence.content.is_empty() {
            continue;
        }
        insights.push(InsightDraft {
            insight_type: "finding",
            content: evidence.content.clone(),
            summary: truncate(&evidence.content, 200),
            evidence_refs: vec![if evidence.source.is_empty() {
                format!("evidence_{i}")
            } else {
                evidence.source.clone()
            }],
            tags: extract_tags(&state.original_query, &evidence.content),
            confidence: if evidence.confidence > 0.0 {
                evidence.confidence
            } else {
                state.critic_score * FINDING_CONFIDENCE_SCALE
            },
            rationale: format!("Evidence finding from {}", evidence.source),
        });
    }

    insights
}

/// Store the extracted insights as packets; returns the packet ids that
/// landed. Per-insight failures are logged and skipped.
pub async fn store_insights(
    ingestor: &SubstrateIngestor,
    state: &ResearchGraphState,
    top_n: usize,
) -> Vec<Uuid> {
    let mut stored = Vec::new();

    for insight in extract_insights(state, top_n) {
        let mut packet = PacketEnvelope::new(
            MemorySegment::Insight,
            json!({
                "type": insight.insight_type,
                "content": insight.content,
                "summary": insight.summary,
                "evidence_refs": insight.evidence_refs,
                "query": state.original_query,
                "timestamp": Utc::now(),
            }),
        )
        .with_provenance(PacketProvenance {
            source: "research_orchestrator".to_string(),
            parent_packet: None,
            tool: None,
        })
        .with_confidence(insight.confidence, insight.rationale)
        .with_thread(state.thread_id.clone())
        .with_tags(
            std::iter::once(format!("insight:{}", insight.insight_type))
                .chain(insight.tags.into_iter().map(|t| format!("domain:{t}")))
                .collect(),
        );
        packet.metadata.domain = Some("research".to_string());

        let receipt = ingestor.ingest(&packet).await;
        if receipt.status == IngestStatus::Failed {
            warn!(
                thread_id = %state.thread_id,
                error = ?receipt.error,
                "insight packet failed to store"
            );
            continue;
        }
        stored.push(receipt.packet_id);
    }

    stored
}
