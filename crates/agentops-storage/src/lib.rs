//! # Packet Store
//!
//! Durable, append-mostly storage for packet envelopes with dedicated index
//! columns (thread, lineage, tags, TTL, trace, importance), a pgvector-backed
//! semantic index, the dedicated tool-audit table, graph checkpoints,
//! knowledge facts, and agent memory events.
//!
//! Two implementations share semantics behind the [`PacketStore`] trait:
//!
//! - [`PostgresPacketStore`]: production persistence over sqlx
//! - [`InMemoryPacketStore`]: test twin, no database required

pub mod memory;
pub mod postgres;
pub mod store;

pub use memory::InMemoryPacketStore;
pub use postgres::PostgresPacketStore;
pub use store::{
    IngestReceipt, IngestStatus, KnowledgeFact, MemoryEvent, PacketRow, PacketStore, SemanticHit,
    StoreError, StoreHealth, ToolAuditRecord,
};
