//! PacketStore trait definition and row types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use agentops_core::packet::{MemorySegment, PacketEnvelope};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Packet not found
    #[error("packet not found: {0}")]
    PacketNotFound(Uuid),

    /// Embedding vector length does not match the configured dimension
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A stored packet: the envelope plus its dedicated index columns.
///
/// Index columns can be richer than the envelope (COALESCE-merged from
/// repeated writes) which is why they are carried separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRow {
    pub packet_id: Uuid,
    pub packet_type: MemorySegment,
    pub envelope: PacketEnvelope,
    pub timestamp: DateTime<Utc>,
    pub thread_id: Option<String>,
    pub parent_ids: Vec<Uuid>,
    pub tags: Vec<String>,
    pub ttl: Option<DateTime<Utc>>,
    pub content_hash: Option<String>,
    pub session_id: Option<String>,
    pub scope: String,
    pub trace_id: Option<String>,
    pub importance_score: Option<f64>,
}

impl PacketRow {
    /// Derive the row from a (normalized) envelope at insert time.
    pub fn from_envelope(envelope: &PacketEnvelope) -> Self {
        Self {
            packet_id: envelope.packet_id,
            packet_type: envelope.packet_type,
            timestamp: envelope.timestamp,
            thread_id: envelope.thread_id.clone(),
            parent_ids: envelope.lineage.parent_ids.clone(),
            tags: envelope.tags.clone(),
            ttl: envelope.ttl,
            content_hash: envelope.metadata.content_hash.clone(),
            session_id: envelope.metadata.session_id.clone(),
            scope: envelope.metadata.scope.clone(),
            trace_id: envelope.metadata.trace_id.clone(),
            importance_score: envelope.importance_score(),
            envelope: envelope.clone(),
        }
    }
}

/// A semantic search hit, ordered by decreasing cosine similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticHit {
    pub embedding_id: Uuid,
    pub score: f64,
    pub payload: Value,
}

/// A row in the dedicated tool-audit table, indexed on call_id for fast
/// cross-reference with the audit packet stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolAuditRecord {
    pub call_id: Uuid,
    pub tool_id: String,
    pub agent_id: String,
    pub task_id: Option<String>,
    pub status: String,
    pub duration_ms: i64,
    pub error: Option<String>,
    pub arguments: Option<Value>,
    pub result_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A knowledge fact: subject - predicate - object triple with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFact {
    pub fact_id: Uuid,
    pub subject: String,
    pub predicate: String,
    pub object: Value,
    pub confidence: f64,
    pub source_packet: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// An agent memory event, optionally linked to a packet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: Uuid,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub packet_id: Option<Uuid>,
    pub event_type: String,
    pub content: Value,
}

/// Store connectivity snapshot; drives the substrate health gauge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHealth {
    pub healthy: bool,
    pub backend: String,
    pub detail: Option<String>,
}

/// Outcome of a multi-sink ingestion. A partial write (for example the
/// vector index succeeded but the main row failed) is reported rather than
/// escalated so the caller can decide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub packet_id: Uuid,
    pub status: IngestStatus,
    pub written_sinks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Ok,
    Partial,
    Failed,
}

/// The packet store contract shared by the Postgres and in-memory backends.
#[async_trait]
pub trait PacketStore: Send + Sync {
    /// Insert a packet. Idempotent on packet_id: a repeated write never
    /// duplicates the record, and dedicated index columns are COALESCE-merged
    /// so late-arriving index fields are never lost.
    async fn insert_packet(&self, envelope: &PacketEnvelope) -> Result<Uuid, StoreError>;

    /// Retrieve a packet by id.
    async fn get_packet(&self, packet_id: Uuid) -> Result<Option<PacketRow>, StoreError>;

    /// Packets in a thread, ordered by timestamp ascending. Unknown threads
    /// return an empty list.
    async fn find_by_thread(
        &self,
        thread_id: &str,
        packet_type: Option<MemorySegment>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PacketRow>, StoreError>;

    /// Packets of a type, ordered by timestamp descending.
    async fn find_by_type(
        &self,
        packet_type: MemorySegment,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<PacketRow>, StoreError>;

    /// Remove packets whose TTL lapsed before `now`, except those marked
    /// immutable. Returns the number removed.
    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Upsert a semantic embedding with its payload.
    async fn upsert_embedding(
        &self,
        embedding_id: Uuid,
        vector: &[f32],
        payload: Value,
        agent_id: Option<&str>,
    ) -> Result<Uuid, StoreError>;

    /// Cosine nearest-neighbor search; `top_k == 0` returns an empty list.
    async fn search_semantic(
        &self,
        query: &[f32],
        top_k: usize,
        agent_id: Option<&str>,
    ) -> Result<Vec<SemanticHit>, StoreError>;

    /// Write a row to the dedicated tool-audit table.
    async fn record_tool_audit(&self, record: &ToolAuditRecord) -> Result<(), StoreError>;

    /// Tool-audit rows by call id.
    async fn get_tool_audit(&self, call_id: Uuid) -> Result<Option<ToolAuditRecord>, StoreError>;

    /// Upsert a graph checkpoint under a stable key.
    async fn save_checkpoint(&self, key: &str, state: Value) -> Result<(), StoreError>;

    /// Load the latest checkpoint for a key.
    async fn load_checkpoint(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Upsert a knowledge fact on fact_id.
    async fn insert_knowledge_fact(&self, fact: &KnowledgeFact) -> Result<Uuid, StoreError>;

    /// Facts by subject, newest first, optionally filtered by predicate.
    async fn facts_by_subject(
        &self,
        subject: &str,
        predicate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<KnowledgeFact>, StoreError>;

    /// Record an agent memory event.
    async fn insert_memory_event(&self, event: &MemoryEvent) -> Result<Uuid, StoreError>;

    /// Memory events for an agent, newest first, optionally filtered by type.
    async fn memory_events(
        &self,
        agent_id: &str,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MemoryEvent>, StoreError>;

    /// Connectivity probe.
    async fn health(&self) -> StoreHealth;
}

/// COALESCE-merge semantics shared by both backends: the incoming value wins
/// when present, otherwise the stored one is kept.
pub(crate) fn coalesce<T>(incoming: Option<T>, existing: Option<T>) -> Option<T> {
    incoming.or(existing)
}

/// Array flavor: empty incoming arrays keep the stored value, matching the
/// SQL COALESCE of a NULL-when-empty bind.
pub(crate) fn coalesce_vec<T>(incoming: Vec<T>, existing: Vec<T>) -> Vec<T> {
    if incoming.is_empty() {
        existing
    } else {
        incoming
    }
}
