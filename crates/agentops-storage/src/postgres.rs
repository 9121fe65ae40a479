//! PostgreSQL implementation of PacketStore
//!
//! Production persistence using PostgreSQL with:
//! - Idempotent packet upserts with COALESCE-merged index columns
//! - pgvector cosine search for the semantic index
//! - Dedicated tool_audit_log table keyed on call_id

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error};
use uuid::Uuid;

use agentops_core::packet::{MemorySegment, PacketEnvelope};

use super::store::*;

/// Connection pool bounds (shared-resource policy).
const POOL_MIN: u32 = 5;
const POOL_MAX: u32 = 15;

/// PostgreSQL implementation of PacketStore
///
/// The embedding dimension is fixed at construction and enforced on every
/// upsert and search.
#[derive(Clone)]
pub struct PostgresPacketStore {
    pool: PgPool,
    dimension: usize,
}

impl PostgresPacketStore {
    /// Create a store over an existing connection pool.
    pub fn new(pool: PgPool, dimension: usize) -> Self {
        Self { pool, dimension }
    }

    /// Connect to the given DSN with the substrate pool bounds.
    pub async fn connect(database_url: &str, dimension: usize) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .min_connections(POOL_MIN)
            .max_connections(POOL_MAX)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool, dimension))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the bundled migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    fn row_to_packet(row: &sqlx::postgres::PgRow) -> Result<PacketRow, StoreError> {
        let envelope_json: Value = row.get("envelope");
        let envelope: PacketEnvelope = serde_json::from_value(envelope_json)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let packet_type: String = row.get("packet_type");
        let packet_type: MemorySegment = packet_type
            .parse()
            .map_err(StoreError::Serialization)?;

        Ok(PacketRow {
            packet_id: row.get("packet_id"),
            packet_type,
            envelope,
            timestamp: row.get("timestamp"),
            thread_id: row.get("thread_id"),
            parent_ids: row.get("parent_ids"),
            tags: row.get("tags"),
            ttl: row.get("ttl"),
            content_hash: row.get("content_hash"),
            session_id: row.get("session_id"),
            scope: row.get("scope"),
            trace_id: row.get("trace_id"),
            importance_score: row.get("importance_score"),
        })
    }

    fn vector_literal(vector: &[f32]) -> String {
        let joined = vector
            .iter()
            .map(f32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("[{joined}]")
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
}

#[async_trait]
impl PacketStore for PostgresPacketStore {
    async fn insert_packet(&self, envelope: &PacketEnvelope) -> Result<Uuid, StoreError> {
        let mut envelope = envelope.clone();
        envelope.normalize();
        let indexed = PacketRow::from_envelope(&envelope);

        let envelope_json = serde_json::to_value(&envelope)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        // Empty arrays bind as NULL so the stored value survives the merge.
        let parent_ids = (!indexed.parent_ids.is_empty()).then_some(&indexed.parent_ids);
        let tags = (!indexed.tags.is_empty()).then_some(&indexed.tags);

        sqlx::query(
            r#"
            INSERT INTO packet_store (
                packet_id, packet_type, envelope, timestamp,
                thread_id, parent_ids, tags, ttl, content_hash, session_id, scope,
                trace_id, importance_score
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (packet_id) DO UPDATE SET
                envelope = EXCLUDED.envelope,
                timestamp = EXCLUDED.timestamp,
                thread_id = COALESCE(EXCLUDED.thread_id, packet_store.thread_id),
                parent_ids = COALESCE(EXCLUDED.parent_ids, packet_store.parent_ids),
                tags = COALESCE(EXCLUDED.tags, packet_store.tags),
                ttl = COALESCE(EXCLUDED.ttl, packet_store.ttl),
                content_hash = COALESCE(EXCLUDED.content_hash, packet_store.content_hash),
                session_id = COALESCE(EXCLUDED.session_id, packet_store.session_id),
                scope = COALESCE(EXCLUDED.scope, packet_store.scope),
                trace_id = COALESCE(EXCLUDED.trace_id, packet_store.trace_id),
                importance_score = COALESCE(EXCLUDED.importance_score, packet_store.importance_score)
            "#,
        )
        .bind(indexed.packet_id)
        .bind(indexed.packet_type.as_str())
        .bind(&envelope_json)
        .bind(indexed.timestamp)
        .bind(&indexed.thread_id)
        .bind(parent_ids)
        .bind(tags)
        .bind(indexed.ttl)
        .bind(&indexed.content_hash)
        .bind(&indexed.session_id)
        .bind(&indexed.scope)
        .bind(&indexed.trace_id)
        .bind(indexed.importance_score)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(packet_id = %indexed.packet_id, "failed to insert packet: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(
            packet_id = %indexed.packet_id,
            packet_type = %indexed.packet_type,
            thread_id = ?indexed.thread_id,
            "inserted packet"
        );
        Ok(indexed.packet_id)
    }

    async fn get_packet(&self, packet_id: Uuid) -> Result<Option<PacketRow>, StoreError> {
        let row = sqlx::query("SELECT * FROM packet_store WHERE packet_id = $1")
            .bind(packet_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        row.as_ref().map(Self::row_to_packet).transpose()
    }

    async fn find_by_thread(
        &self,
        thread_id: &str,
        packet_type: Option<MemorySegment>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PacketRow>, StoreError> {
        let rows = match packet_type {
            Some(pt) => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE thread_id = $1 AND packet_type = $2
                    ORDER BY timestamp ASC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(thread_id)
                .bind(pt.as_str())
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE thread_id = $1
                    ORDER BY timestamp ASC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(thread_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_packet).collect()
    }

    async fn find_by_type(
        &self,
        packet_type: MemorySegment,
        agent_id: Option<&str>,
        since: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<PacketRow>, StoreError> {
        let rows = match (agent_id, since) {
            (Some(agent), Some(since)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE packet_type = $1
                      AND envelope->'metadata'->>'agent_id' = $2
                      AND timestamp > $3
                    ORDER BY timestamp DESC
                    LIMIT $4
                    "#,
                )
                .bind(packet_type.as_str())
                .bind(agent)
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (Some(agent), None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE packet_type = $1
                      AND envelope->'metadata'->>'agent_id' = $2
                    ORDER BY timestamp DESC
                    LIMIT $3
                    "#,
                )
                .bind(packet_type.as_str())
                .bind(agent)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (None, Some(since)) => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE packet_type = $1 AND timestamp > $2
                    ORDER BY timestamp DESC
                    LIMIT $3
                    "#,
                )
                .bind(packet_type.as_str())
                .bind(since)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            (None, None) => {
                sqlx::query(
                    r#"
                    SELECT * FROM packet_store
                    WHERE packet_type = $1
                    ORDER BY timestamp DESC
                    LIMIT $2
                    "#,
                )
                .bind(packet_type.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.iter().map(Self::row_to_packet).collect()
    }

    async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            DELETE FROM packet_store
            WHERE ttl IS NOT NULL
              AND ttl < $1
              AND NOT COALESCE((envelope->'metadata'->>'immutable')::boolean, false)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn upsert_embedding(
        &self,
        embedding_id: Uuid,
        vector: &[f32],
        payload: Value,
        agent_id: Option<&str>,
    ) -> Result<Uuid, StoreError> {
        self.check_dimension(vector)?;

        sqlx::query(
            r#"
            INSERT INTO semantic_memory (embedding_id, agent_id, vector, payload, created_at)
            VALUES ($1, $2, $3::vector, $4, $5)
            ON CONFLICT (embedding_id) DO UPDATE SET
                vector = EXCLUDED.vector,
                payload = EXCLUDED.payload,
                agent_id = COALESCE(EXCLUDED.agent_id, semantic_memory.agent_id)
            "#,
        )
        .bind(embedding_id)
        .bind(agent_id)
        .bind(Self::vector_literal(vector))
        .bind(&payload)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

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

        let literal = Self::vector_literal(query);
        let rows = match agent_id {
            Some(agent) => {
                sqlx::query(
                    r#"
                    SELECT embedding_id, payload, 1 - (vector <=> $1::vector) AS score
                    FROM semantic_memory
                    WHERE agent_id = $2
                    ORDER BY vector <=> $1::vector
                    LIMIT $3
                    "#,
                )
                .bind(&literal)
                .bind(agent)
                .bind(top_k as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT embedding_id, payload, 1 - (vector <=> $1::vector) AS score
                    FROM semantic_memory
                    ORDER BY vector <=> $1::vector
                    LIMIT $2
                    "#,
                )
                .bind(&literal)
                .bind(top_k as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| SemanticHit {
                embedding_id: row.get("embedding_id"),
                score: row.get::<f64, _>("score"),
                payload: row.get("payload"),
            })
            .collect())
    }

    async fn record_tool_audit(&self, record: &ToolAuditRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tool_audit_log (
                call_id, tool_id, agent_id, task_id, status, duration_ms,
                error, arguments, result_summary, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (call_id) DO NOTHING
            "#,
        )
        .bind(record.call_id)
        .bind(&record.tool_id)
        .bind(&record.agent_id)
        .bind(&record.task_id)
        .bind(&record.status)
        .bind(record.duration_ms)
        .bind(&record.error)
        .bind(&record.arguments)
        .bind(&record.result_summary)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn get_tool_audit(&self, call_id: Uuid) -> Result<Option<ToolAuditRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM tool_audit_log WHERE call_id = $1")
            .bind(call_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(|row| ToolAuditRecord {
            call_id: row.get("call_id"),
            tool_id: row.get("tool_id"),
            agent_id: row.get("agent_id"),
            task_id: row.get("task_id"),
            status: row.get("status"),
            duration_ms: row.get("duration_ms"),
            error: row.get("error"),
            arguments: row.get("arguments"),
            result_summary: row.get("result_summary"),
            timestamp: row.get("timestamp"),
        }))
    }

    async fn save_checkpoint(&self, key: &str, state: Value) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO graph_checkpoints (checkpoint_id, checkpoint_key, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (checkpoint_key) DO UPDATE SET
                state = EXCLUDED.state,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(key)
        .bind(&state)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    async fn load_checkpoint(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let row = sqlx::query(
            "SELECT state FROM graph_checkpoints WHERE checkpoint_key = $1 ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(row.map(|r| r.get("state")))
    }

    async fn insert_knowledge_fact(&self, fact: &KnowledgeFact) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_facts (fact_id, subject, predicate, object, confidence, source_packet, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (fact_id) DO UPDATE SET
                object = EXCLUDED.object,
                confidence = EXCLUDED.confidence
            "#,
        )
        .bind(fact.fact_id)
        .bind(&fact.subject)
        .bind(&fact.predicate)
        .bind(&fact.object)
        .bind(fact.confidence)
        .bind(fact.source_packet)
        .bind(fact.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(fact.fact_id)
    }

    async fn facts_by_subject(
        &self,
        subject: &str,
        predicate: Option<&str>,
        limit: i64,
    ) -> Result<Vec<KnowledgeFact>, StoreError> {
        let rows = match predicate {
            Some(pred) => {
                sqlx::query(
                    r#"
                    SELECT * FROM knowledge_facts
                    WHERE subject = $1 AND predicate = $2
                    ORDER BY created_at DESC LIMIT $3
                    "#,
                )
                .bind(subject)
                .bind(pred)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM knowledge_facts
                    WHERE subject = $1
                    ORDER BY created_at DESC LIMIT $2
                    "#,
                )
                .bind(subject)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| KnowledgeFact {
                fact_id: row.get("fact_id"),
                subject: row.get("subject"),
                predicate: row.get("predicate"),
                object: row.get("object"),
                confidence: row.get("confidence"),
                source_packet: row.get("source_packet"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn insert_memory_event(&self, event: &MemoryEvent) -> Result<Uuid, StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_memory_events (event_id, agent_id, timestamp, packet_id, event_type, content)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(event.event_id)
        .bind(&event.agent_id)
        .bind(event.timestamp)
        .bind(event.packet_id)
        .bind(&event.event_type)
        .bind(&event.content)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(event.event_id)
    }

    async fn memory_events(
        &self,
        agent_id: &str,
        event_type: Option<&str>,
        limit: i64,
    ) -> Result<Vec<MemoryEvent>, StoreError> {
        let rows = match event_type {
            Some(et) => {
                sqlx::query(
                    r#"
                    SELECT * FROM agent_memory_events
                    WHERE agent_id = $1 AND event_type = $2
                    ORDER BY timestamp DESC LIMIT $3
                    "#,
                )
                .bind(agent_id)
                .bind(et)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM agent_memory_events
                    WHERE agent_id = $1
                    ORDER BY timestamp DESC LIMIT $2
                    "#,
                )
                .bind(agent_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| MemoryEvent {
                event_id: row.get("event_id"),
                agent_id: row.get("agent_id"),
                timestamp: row.get("timestamp"),
                packet_id: row.get("packet_id"),
                event_type: row.get("event_type"),
                content: row.get("content"),
            })
            .collect())
    }

    async fn health(&self) -> StoreHealth {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => StoreHealth {
                healthy: true,
                backend: "postgres".to_string(),
                detail: None,
            },
            Err(e) => StoreHealth {
                healthy: false,
                backend: "postgres".to_string(),
                detail: Some(e.to_string()),
            },
        }
    }
}
