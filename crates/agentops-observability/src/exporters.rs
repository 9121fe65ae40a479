//! Span exporters
//!
//! A composite exporter fans batches out to sinks; sinks that fail
//! individually never prevent other sinks from receiving the batch.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use agentops_core::packet::{MemorySegment, PacketEnvelope, PacketProvenance};
use agentops_core::span::{Span, SpanStatus};
use agentops_storage::PacketStore;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export io error: {0}")]
    Io(String),

    #[error("export sink error: {0}")]
    Sink(String),
}

/// One export sink.
#[async_trait]
pub trait SpanExporter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn export(&self, spans: &[Span]) -> Result<(), ExportError>;
}

/// Development sink: one log line per span.
pub struct ConsoleExporter;

#[async_trait]
impl SpanExporter for ConsoleExporter {
    fn name(&self) -> &'static str {
        "console"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        for span in spans {
            let status = match span.status {
                SpanStatus::Ok => "ok",
                SpanStatus::Error => "error",
                SpanStatus::Unset => "unset",
            };
            info!(
                target: "agentops::spans",
                name = %span.name,
                trace_id = %span.trace_id,
                span_id = %span.span_id,
                status,
                duration_ms = span.duration_ms,
                "span"
            );
        }
        Ok(())
    }
}

/// JSON-lines file sink.
pub struct JsonFileExporter {
    path: PathBuf,
}

impl JsonFileExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl SpanExporter for JsonFileExporter {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ExportError::Io(e.to_string()))?;

        for span in spans {
            let line = serde_json::to_string(span).map_err(|e| ExportError::Io(e.to_string()))?;
            writeln!(file, "{line}").map_err(|e| ExportError::Io(e.to_string()))?;
        }
        Ok(())
    }
}

/// Packet-store sink: each span becomes a `trace_span` packet keyed
/// `traces/{trace_id}/{span_id}`. The packet id is derived from that key so
/// re-exports are idempotent.
pub struct SubstrateExporter {
    store: Arc<dyn PacketStore>,
}

impl SubstrateExporter {
    pub fn new(store: Arc<dyn PacketStore>) -> Self {
        Self { store }
    }

    fn packet_id_for(key: &str) -> Uuid {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Uuid::from_bytes(bytes)
    }
}

#[async_trait]
impl SpanExporter for SubstrateExporter {
    fn name(&self) -> &'static str {
        "substrate"
    }

    async fn export(&self, spans: &[Span]) -> Result<(), ExportError> {
        for span in spans {
            let key = format!("traces/{}/{}", span.trace_id, span.span_id);
            let payload =
                serde_json::to_value(span).map_err(|e| ExportError::Sink(e.to_string()))?;

            let mut packet = PacketEnvelope::new(MemorySegment::TraceSpan, payload)
                .with_provenance(PacketProvenance {
                    source: "span_exporter".to_string(),
                    parent_packet: None,
                    tool: None,
                })
                .with_tags(vec![format!("span:{}", span.name)]);
            packet.packet_id = Self::packet_id_for(&key);
            packet.metadata.trace_id = Some(span.trace_id.clone());
            packet.metadata.session_id = Some(key);

            self.store
                .insert_packet(&packet)
                .await
                .map_err(|e| ExportError::Sink(e.to_string()))?;
        }
        Ok(())
    }
}

/// Fan-out to all configured sinks with per-sink isolation.
pub struct CompositeExporter {
    exporters: Vec<Arc<dyn SpanExporter>>,
}

impl CompositeExporter {
    pub fn new(exporters: Vec<Arc<dyn SpanExporter>>) -> Self {
        Self { exporters }
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.exporters.iter().map(|e| e.name()).collect()
    }

    /// Export to every sink; a failing sink is logged and skipped.
    pub async fn export(&self, spans: &[Span]) {
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(spans).await {
                warn!(sink = exporter.name(), error = %e, "span export sink failed");
            }
        }
    }
}
