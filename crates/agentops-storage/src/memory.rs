//! In-memory implementation of PacketStore for testing
//!
//! Stores everything in process memory with the same semantics as the
//! PostgreSQL implementation, so the scenario tests run without a database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use agentops_core::packet::{MemorySegment, PacketEnvelope};

use super::store::*;

struct StoredEmbedding {
    vector: Vec<f32>,
    payload: Value,
    agent_id: Option<String>,
}

/// In-memory implementation of PacketStore
pub struct InMemoryPacketStore {
    dimension: usize,
    packets: RwLock<HashMap<Uuid, PacketRow>>,
    embeddings: RwLock<HashMap<Uuid, StoredEmbedding>>,
    tool_audits: RwLock<HashMap<Uuid, ToolAuditRecord>>,
    checkpoints: RwLock<HashMap<String, Value>>,
    facts: RwLock<HashMap<Uuid, KnowledgeFact>>,
    events: RwLock<Vec<MemoryEvent>>,
}

impl InMemoryPacketStore {
    pub fn new() -> Self {
        Self::with_dimension(1536)
    }

    /// Create a store with a non-default embedding dimension (tests use small
    /// vectors).
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            packets: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(HashMap::new()),
            tool_audits: RwLock::new(HashMap::new()),
            checkpoints: RwLock::new(HashMap::new()),
            facts: RwLock::new(HashMap::new()),
            events: RwLock::new(Vec::new()),
        }
    }

    pub fn packet_count(&self) -> usize {
        self.packets.read().len()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.packets.write().clear();
        self.embeddings.write().clear();
        self.tool_audits.write().clear();
        self.checkpoints.write().clear();
        self.facts.write().clear();
        self.events.write().clear();
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<(), StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
        let dot: f64 = a.iter().zip(b).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
        let norm_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        let norm_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        dot / (norm_a * norm_b)
    }
}

impl Default for InMemoryPacketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PacketStore for InMemoryPacketStore {
    async fn insert_packet(&self, envelope: &PacketEnvelope) -> Result<Uuid, StoreError> {
        let mut envelope = envelope.clone();
        envelope.normalize();
        let incoming = PacketRow::from_envelope(&envelope);
        let packet_id = incoming.packet_id;

        let mut packets = self.packets.write();
        match packets.remove(&packet_id) {
            Some(existing) => {
                // Same merge the SQL upsert performs: envelope and timestamp
                // are replaced, index columns are COALESCE-merged.
                let merged = PacketRow {
                    packet_id,
                    packet_type: incoming.packet_type,
                    envelope: incoming.envelope,
                    timestamp: incoming.timestamp,
                    thread_id: coalesce(incoming.thread_id, existing.thread_id),
                    parent_ids: coalesce_vec(incoming.parent_ids, existing.parent_ids),
                    tags: coalesce_vec(incoming.tags, existing.tags),
                    ttl: coalesce(incoming.ttl, existing.ttl),
                    content_hash: coalesce(incoming.content_hash, existing.content_hash),
                    session_id: coalesce(incoming.session_id, existing.session_id),
                    scope: incoming.scope,
                    trace_id: coalesce(incoming.trace_id, existing.trace_id),
                    importance_score: coalesce(incoming.importance_score, existing.importance_score),
                };
                packets.insert(packet_id, merged);
            }
            None => {
                packets.insert(packet_id, incoming);
            }
        }

        Ok(packet_id)
    }

    async fn get_packet(&self, packet_id: Uuid) -> Result<Option<PacketRow>, StoreError> {
        Ok(self.packets.read().get(&packet_id).cloned())
    }

    async fn find_by_thread(
        &self,
        thread_id: &str,
        packet_type: Option<MemorySegment>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PacketRow>, StoreError> {
        let mut rows: Vec<PacketRow> = self
            .packets
            .read()
            .values()
            .filter(|p| p.thread_id.as_deref() == Some(thread_id))
            .filter(|p| packet_type.map_or(true, |pt| p.packet_type == pt))
            .cloned()
            .collect();
        rows.sort_by_key(|p| p.timestamp);
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn find_by_type(
        &self,
        packet_type: MemorySegment,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<PacketRow>, StoreError> {
        let mut rows: Vec<PacketRow> = self
            .packets
            .read()
            .values()
            .filter(|p| p.packet_type == packet_type)
            .filter(|p| {
                agent_id.map_or(true, |a| p.envelope.metadata.agent_id.as_deref() == Some(a))
            })
            .filter(|p| since.map_or(true, |s| p.timestamp > s))
            .cloned()
            .collect();
        rows.sort_by_key(|p| std::cmp::Reverse(p.timestamp));
        Ok(rows.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut packets = self.packets.write();
        let before = packets.len();
        packets.retain(|_, p| {
            let expired = p.ttl.map_or(false, |ttl| ttl < now);
            !expired || p.envelope.is_immutable()
        });
        Ok((before - packets.len()) as u64)
    }

    async fn upsert_embedding(
        &self,
        embedding_id: Uuid,
        vector: &[f32],
        payload: Value,
        agent_id: Option<&str>,
    ) -> Result<Uuid, StoreError> {
        self.check_dimension(vector)?;
        self.embeddings.write().insert(
            embedding_id,
            StoredEmbedding {
                vector: vector.to_vec(),
                payload,
                agent_id: agent_id.map(String::from),
            },
        );
        Ok(embedding_id)
    }

    async fn search_semantic(
        &self,
        query: &[f32],
        top_k: usize,
        agent_id: Option<&str>,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query)?;

        let embeddings = self.embeddings.read();
        let mut hits: Vec<SemanticHit> = embeddings
            .iter()
            .filter(|(_, e)| agent_id.map_or(true, |a| e.agent_id.as_deref() == Some(a)))
            .map(|(id, e)| SemanticHit {
                embedding_id: *id,
                score: Self::cosine_similarity(query, &e.vector),
                payload: e.payload.clone(),
            })
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn record_tool_audit(&self, record: &ToolAuditRecord) -> Result<(), StoreError> {
        self.tool_audits
            .write()
            .entry(record.call_id)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn get_tool_audit(&self, call_id: Uuid) -> Result<Option<ToolAuditRecord>, StoreError> {
        Ok(self.tool_audits.read().get(&call_id).cloned())
    }

    async fn save_checkpoint(&self, key: &str, state: Value) -> Result<(), StoreError> {
        self.checkpoints.write().insert(key.to_string(), state);
        Ok(())
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.checkpoints.read().get(key).cloned())
    }

    async fn insert_knowledge_fact(&self, fact: &KnowledgeFact) -> Result<Uuid, StoreError> {
        let mut facts = self.facts.write();
        match facts.get_mut(&fact.fact_id) {
            Some(existing) => {
                existing.object = fact.object.clone();
                existing.confidence = fact.confidence;
            }
            None => {
                facts.insert(fact.fact_id, fact.clone());
            }
        }
        Ok(fact.fact_id)
    }

    async fn facts_by_subject(
        &self,
        subject: &str,
        predicate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<KnowledgeFact>, StoreError> {
        let mut rows: Vec<KnowledgeFact> = self
            .facts
            .read()
            .values()
            .filter(|f| f.subject == subject)
            .filter(|f| predicate.map_or(true, |p| f.predicate == p))
            .cloned()
            .collect();
        rows.sort_by_key(|f| std::cmp::Reverse(f.created_at));
        Ok(rows.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn insert_memory_event(&self, event: &MemoryEvent) -> Result<Uuid, StoreError> {
        self.events.write().push(event.clone());
        Ok(event.event_id)
    }

    async fn memory_events(
        &self,
        agent_id: &str,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MemoryEvent>, StoreError> {
        let mut rows: Vec<MemoryEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect();
        rows.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        Ok(rows.into_iter().take(limit.max(0) as usize).collect())
    }

    async fn health(&self) -> StoreHealth {
        StoreHealth {
            healthy: true,
            backend: "memory".to_string(),
            detail: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn envelope(packet_type: MemorySegment) -> PacketEnvelope {
        PacketEnvelope::new(packet_type, json!({"k": "v"}))
    }

    #[tokio::test]
    async fn test_insert_then_get_round_trips() {
        let store = InMemoryPacketStore::new();
        let mut env = envelope(MemorySegment::SessionContext).with_thread("t-1");
        env.metadata.agent_id = Some("L".to_string());

        let id = store.insert_packet(&env).await.unwrap();
        let row = store.get_packet(id).await.unwrap().unwrap();
        assert_eq!(row.envelope, env);
        assert_eq!(row.thread_id.as_deref(), Some("t-1"));
    }

    #[tokio::test]
    async fn test_repeated_insert_is_idempotent_and_merges() {
        let store = InMemoryPacketStore::new();
        let env = envelope(MemorySegment::SessionContext).with_thread("t-1");
        store.insert_packet(&env).await.unwrap();

        // Second write with the same id but no thread: thread survives,
        // new tags land.
        let mut second = env.clone();
        second.thread_id = None;
        second.tags = vec!["late".to_string()];
        store.insert_packet(&second).await.unwrap();

        assert_eq!(store.packet_count(), 1);
        let row = store.get_packet(env.packet_id).await.unwrap().unwrap();
        assert_eq!(row.thread_id.as_deref(), Some("t-1"));
        assert_eq!(row.tags, vec!["late".to_string()]);
    }

    #[tokio::test]
    async fn test_find_by_thread_orders_ascending() {
        let store = InMemoryPacketStore::new();
        let mut first = envelope(MemorySegment::SessionContext).with_thread("t");
        first.timestamp = Utc::now() - Duration::seconds(10);
        let second = envelope(MemorySegment::SessionContext).with_thread("t");
        store.insert_packet(&second).await.unwrap();
        store.insert_packet(&first).await.unwrap();

        let rows = store.find_by_thread("t", None, 100, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows[0].timestamp <= rows[1].timestamp);
    }

    #[tokio::test]
    async fn test_find_by_unknown_thread_returns_empty() {
        let store = InMemoryPacketStore::new();
        let rows = store.find_by_thread("missing", None, 100, 0).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_find_by_type_filters_agent() {
        let store = InMemoryPacketStore::new();
        let mut a = envelope(MemorySegment::ToolAudit);
        a.metadata.agent_id = Some("L".to_string());
        let mut b = envelope(MemorySegment::ToolAudit);
        b.metadata.agent_id = Some("M".to_string());
        store.insert_packet(&a).await.unwrap();
        store.insert_packet(&b).await.unwrap();

        let rows = store
            .find_by_type(MemorySegment::ToolAudit, Some("L"), None, 100)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].envelope.metadata.agent_id.as_deref(), Some("L"));
    }

    #[tokio::test]
    async fn test_prune_skips_immutable() {
        let store = InMemoryPacketStore::new();
        let expired_at = Utc::now() - Duration::hours(1);

        let mutable = envelope(MemorySegment::SessionContext).with_ttl(expired_at);
        let mut immutable = envelope(MemorySegment::ToolAudit).with_ttl(expired_at);
        immutable.metadata.immutable = true;
        let fresh = envelope(MemorySegment::SessionContext).with_ttl(Utc::now() + Duration::hours(1));

        store.insert_packet(&mutable).await.unwrap();
        store.insert_packet(&immutable).await.unwrap();
        store.insert_packet(&fresh).await.unwrap();

        let removed = store.prune_expired(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_packet(mutable.packet_id).await.unwrap().is_none());
        assert!(store.get_packet(immutable.packet_id).await.unwrap().is_some());
        assert!(store.get_packet(fresh.packet_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_semantic_search_orders_by_similarity() {
        let store = InMemoryPacketStore::with_dimension(3);
        let close = Uuid::new_v4();
        let far = Uuid::new_v4();
        store
            .upsert_embedding(close, &[1.0, 0.0, 0.0], json!({"name": "close"}), None)
            .await
            .unwrap();
        store
            .upsert_embedding(far, &[0.0, 1.0, 0.0], json!({"name": "far"}), None)
            .await
            .unwrap();

        let hits = store.search_semantic(&[1.0, 0.1, 0.0], 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].embedding_id, close);
        assert!(hits[0].score > hits[1].score);
    }

    #[tokio::test]
    async fn test_semantic_search_top_k_zero_is_empty() {
        let store = InMemoryPacketStore::with_dimension(3);
        store
            .upsert_embedding(Uuid::new_v4(), &[1.0, 0.0, 0.0], json!({}), None)
            .await
            .unwrap();
        let hits = store.search_semantic(&[1.0, 0.0, 0.0], 0, None).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_dimension_enforced() {
        let store = InMemoryPacketStore::with_dimension(3);
        let err = store
            .upsert_embedding(Uuid::new_v4(), &[1.0, 0.0], json!({}), None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn test_semantic_agent_scoping() {
        let store = InMemoryPacketStore::with_dimension(2);
        store
            .upsert_embedding(Uuid::new_v4(), &[1.0, 0.0], json!({"a": 1}), Some("L"))
            .await
            .unwrap();
        store
            .upsert_embedding(Uuid::new_v4(), &[1.0, 0.0], json!({"a": 2}), Some("M"))
            .await
            .unwrap();

        let hits = store.search_semantic(&[1.0, 0.0], 10, Some("L")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].payload, json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_checkpoint_upsert() {
        let store = InMemoryPacketStore::new();
        store
            .save_checkpoint("research_graph:t1", json!({"retry_count": 0}))
            .await
            .unwrap();
        store
            .save_checkpoint("research_graph:t1", json!({"retry_count": 1}))
            .await
            .unwrap();

        let state = store.load_checkpoint("research_graph:t1").await.unwrap().unwrap();
        assert_eq!(state["retry_count"], json!(1));
        assert!(store.load_checkpoint("research_graph:t2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_knowledge_fact_upsert_refreshes_object() {
        let store = InMemoryPacketStore::new();
        let fact = KnowledgeFact {
            fact_id: Uuid::new_v4(),
            subject: "substrate".to_string(),
            predicate: "status".to_string(),
            object: json!("healthy"),
            confidence: 0.8,
            source_packet: None,
            created_at: Utc::now(),
        };
        store.insert_knowledge_fact(&fact).await.unwrap();

        let updated = KnowledgeFact {
            object: json!("degraded"),
            confidence: 0.9,
            ..fact.clone()
        };
        store.insert_knowledge_fact(&updated).await.unwrap();

        let rows = store.facts_by_subject("substrate", Some("status"), 10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].object, json!("degraded"));
        assert_eq!(rows[0].confidence, 0.9);
    }
}
