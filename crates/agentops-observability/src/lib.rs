//! # Observability Plane
//!
//! Everything the substrate knows about itself at runtime:
//!
//! - **Metrics**: process-wide Prometheus counters/histograms/gauges for
//!   writes, searches, tool calls, and substrate health. Recording never
//!   raises and never blocks.
//! - **Spans**: collection, sticky per-trace sampling, and composite batched
//!   export to console / JSON-lines file / packet store.
//! - **Failures**: classification of finished spans (pure, in core) feeding a
//!   recovery executor that walks the remediation chain.
//! - **Circuit breakers**: named three-state breakers with a sliding failure
//!   window.
//! - **Ingestion**: the single metric-covered entry point for packet writes.

pub mod circuit_breaker;
pub mod exporters;
pub mod ingest;
pub mod instrument;
pub mod metrics;
pub mod recovery;
pub mod service;

pub use circuit_breaker::{
    BreakerRegistry, BreakerStats, CircuitBreaker, CircuitBreakerConfig, CircuitOpenError,
    CircuitState,
};
pub use exporters::{
    CompositeExporter, ConsoleExporter, ExportError, JsonFileExporter, SpanExporter,
    SubstrateExporter,
};
pub use ingest::SubstrateIngestor;
pub use instrument::{traced, traced_chat, traced_tool_call, TokenPricing};
pub use metrics::MemoryMetrics;
pub use recovery::{execute_recovery, RecoveryHooks, RecoveryOutcome};
pub use service::ObservabilityService;
