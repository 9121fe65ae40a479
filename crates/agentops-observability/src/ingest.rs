//! Metric-covered substrate ingestion
//!
//! The single entry point components use to write packets: wraps the store
//! with write metrics, multi-sink receipts, and the health gauge. Callers
//! that must not fail on audit errors inspect the receipt instead of
//! handling an error.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;
use uuid::Uuid;

use agentops_core::packet::PacketEnvelope;
use agentops_storage::{IngestReceipt, IngestStatus, PacketStore, SemanticHit, StoreError};

use crate::metrics::MemoryMetrics;

/// Ingestion facade over the packet store.
pub struct SubstrateIngestor {
    store: Arc<dyn PacketStore>,
    metrics: Arc<MemoryMetrics>,
}

impl SubstrateIngestor {
    pub fn new(store: Arc<dyn PacketStore>, metrics: Arc<MemoryMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn store(&self) -> &Arc<dyn PacketStore> {
        &self.store
    }

    /// Ingest a packet, optionally with a semantic embedding. Never raises:
    /// sink failures are reported through the receipt.
    pub async fn ingest(&self, envelope: &PacketEnvelope) -> IngestReceipt {
        self.ingest_with_embedding(envelope, None).await
    }

    pub async fn ingest_with_embedding(
        &self,
        envelope: &PacketEnvelope,
        embedding: Option<&[f32]>,
    ) -> IngestReceipt {
        let segment = envelope.packet_type.as_str();
        let started = Instant::now();
        let mut written_sinks = Vec::new();
        let mut error: Option<String> = None;

        match self.store.insert_packet(envelope).await {
            Ok(_) => written_sinks.push("packet_store".to_string()),
            Err(e) => error = Some(e.to_string()),
        }

        let mut embedding_failed = false;
        if let Some(vector) = embedding {
            match self
                .store
                .upsert_embedding(
                    Uuid::new_v4(),
                    vector,
                    envelope.payload.clone(),
                    envelope.metadata.agent_id.as_deref(),
                )
                .await
            {
                Ok(_) => written_sinks.push("semantic_index".to_string()),
                Err(e) => {
                    embedding_failed = true;
                    error.get_or_insert_with(|| e.to_string());
                }
            }
        }

        let status = if error.is_none() && !embedding_failed {
            IngestStatus::Ok
        } else if written_sinks.is_empty() {
            IngestStatus::Failed
        } else {
            IngestStatus::Partial
        };

        let metric_status = match status {
            IngestStatus::Ok => "ok",
            IngestStatus::Partial => "partial",
            IngestStatus::Failed => "error",
        };
        self.metrics
            .record_memory_write(segment, metric_status, started.elapsed().as_secs_f64());

        if status != IngestStatus::Ok {
            warn!(
                packet_id = %envelope.packet_id,
                segment,
                status = metric_status,
                error = ?error,
                "packet ingestion incomplete"
            );
        }

        IngestReceipt {
            packet_id: envelope.packet_id,
            status,
            written_sinks,
            error,
        }
    }

    /// Semantic search with search metrics attached.
    pub async fn search_semantic(
        &self,
        segment: &str,
        query: &[f32],
        top_k: usize,
        agent_id: Option<&str>,
    ) -> Result<Vec<SemanticHit>, StoreError> {
        let hits = self.store.search_semantic(query, top_k, agent_id).await?;
        self.metrics
            .record_memory_search(segment, "semantic", hits.len());
        Ok(hits)
    }

    /// Probe store health and publish the gauge.
    pub async fn probe_health(&self) -> bool {
        let health = self.store.health().await;
        self.metrics.set_substrate_healthy(health.healthy);
        health.healthy
    }
}
