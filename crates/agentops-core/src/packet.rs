// Packet envelope - the universal persisted record
//
// Every significant event in the substrate (reasoning steps, tool calls,
// approvals, research checkpoints, spans) is persisted as a packet. Packets
// are immutable once written; corrections are new packets referencing the
// original via lineage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Closed set of packet segments used as the primary categorical index.
///
/// Label cardinality discipline: metric labels and index scans are keyed on
/// this set, so new segments are added here rather than as free-form strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySegment {
    GovernanceMeta,
    ProjectHistory,
    ToolAudit,
    SessionContext,
    ResearchState,
    AuditCommand,
    AuditApproval,
    AuditMemoryWrite,
    Insight,
    ReasoningBlock,
    TraceSpan,
    AgentSelfModify,
    KnowledgeFact,
}

impl MemorySegment {
    /// All segments, for iteration and closed-set validation.
    pub const ALL: [MemorySegment; 13] = [
        MemorySegment::GovernanceMeta,
        MemorySegment::ProjectHistory,
        MemorySegment::ToolAudit,
        MemorySegment::SessionContext,
        MemorySegment::ResearchState,
        MemorySegment::AuditCommand,
        MemorySegment::AuditApproval,
        MemorySegment::AuditMemoryWrite,
        MemorySegment::Insight,
        MemorySegment::ReasoningBlock,
        MemorySegment::TraceSpan,
        MemorySegment::AgentSelfModify,
        MemorySegment::KnowledgeFact,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GovernanceMeta => "governance_meta",
            Self::ProjectHistory => "project_history",
            Self::ToolAudit => "tool_audit",
            Self::SessionContext => "session_context",
            Self::ResearchState => "research_state",
            Self::AuditCommand => "audit_command",
            Self::AuditApproval => "audit_approval",
            Self::AuditMemoryWrite => "audit_memory_write",
            Self::Insight => "insight",
            Self::ReasoningBlock => "reasoning_block",
            Self::TraceSpan => "trace_span",
            Self::AgentSelfModify => "agent_self_modify",
            Self::KnowledgeFact => "knowledge_fact",
        }
    }
}

impl fmt::Display for MemorySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemorySegment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|seg| seg.as_str() == s)
            .ok_or_else(|| format!("unknown packet segment: {s}"))
    }
}

/// Packet metadata: schema versioning, routing, and index hints.
///
/// Unknown keys are preserved in `extra` so late schema additions survive
/// round-trips through the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketMetadata {
    pub schema_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// "shared" or "private"; defaults to shared.
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    /// Importance in [0, 1]; falls back to confidence.score at index time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,
    /// Immutable packets are never pruned, regardless of TTL.
    #[serde(default)]
    pub immutable: bool,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_scope() -> String {
    "shared".to_string()
}

impl Default for PacketMetadata {
    fn default() -> Self {
        Self {
            schema_version: "1.0.0".to_string(),
            agent_id: None,
            domain: None,
            content_hash: None,
            session_id: None,
            scope: default_scope(),
            trace_id: None,
            importance: None,
            immutable: false,
            extra: BTreeMap::new(),
        }
    }
}

/// Where a packet came from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PacketProvenance {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_packet: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// Confidence of the recorded observation. Audit packets always carry 1.0
/// (direct observation, not inference).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketConfidence {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// DAG lineage: ordered predecessor packet ids.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PacketLineage {
    #[serde(default)]
    pub parent_ids: Vec<Uuid>,
}

/// The universal record envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketEnvelope {
    pub packet_id: Uuid,
    pub packet_type: MemorySegment,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    #[serde(default)]
    pub metadata: PacketMetadata,
    #[serde(default)]
    pub provenance: PacketProvenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<PacketConfidence>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub lineage: PacketLineage,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<DateTime<Utc>>,
}

impl PacketEnvelope {
    /// Create a new envelope with a server-assigned time-ordered id.
    pub fn new(packet_type: MemorySegment, payload: Value) -> Self {
        Self {
            packet_id: Uuid::now_v7(),
            packet_type,
            timestamp: Utc::now(),
            payload,
            metadata: PacketMetadata::default(),
            provenance: PacketProvenance::default(),
            confidence: None,
            thread_id: None,
            lineage: PacketLineage::default(),
            tags: Vec::new(),
            ttl: None,
        }
    }

    pub fn with_metadata(mut self, metadata: PacketMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_provenance(mut self, provenance: PacketProvenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_confidence(mut self, score: f64, rationale: impl Into<String>) -> Self {
        self.confidence = Some(PacketConfidence {
            score,
            rationale: Some(rationale.into()),
        });
        self
    }

    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_parents(mut self, parent_ids: Vec<Uuid>) -> Self {
        self.lineage.parent_ids = parent_ids;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_ttl(mut self, ttl: DateTime<Utc>) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Enforce the envelope invariants in place: tags are a set (stable order,
    /// no duplicates) and lineage never contains the packet itself.
    pub fn normalize(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.tags.retain(|t| seen.insert(t.clone()));
        let own = self.packet_id;
        self.lineage.parent_ids.retain(|p| *p != own);
    }

    /// The importance used for the dedicated index column: metadata importance
    /// when present, otherwise the confidence score.
    pub fn importance_score(&self) -> Option<f64> {
        self.metadata
            .importance
            .or_else(|| self.confidence.as_ref().map(|c| c.score))
    }

    /// Whether pruning must skip this packet even past its TTL.
    pub fn is_immutable(&self) -> bool {
        self.metadata.immutable
    }
}
