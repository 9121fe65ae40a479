//! Process-wide substrate metrics
//!
//! Counter names carry the `_total` suffix explicitly (the prometheus crate
//! exposes names exactly as provided, no auto-suffix). Labels are drawn from
//! closed sets: `segment` from the packet segments, `tool_id` from the tool
//! registry, `status` from the dispatch statuses.
//!
//! All recorders are fire-and-forget: they never raise and never block. If
//! registration fails at construction the whole registry degrades to no-op.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry, TextEncoder,
};
use tracing::{debug, warn};

/// Buckets for tool invocation durations, in milliseconds.
const TOOL_DURATION_BUCKETS_MS: [f64; 15] = [
    1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0,
    60000.0, 300000.0,
];

/// Buckets for search hit counts.
const SEARCH_HITS_BUCKETS: [f64; 8] = [0.0, 1.0, 2.0, 5.0, 10.0, 25.0, 50.0, 100.0];

struct Recorders {
    memory_write_total: IntCounterVec,
    memory_search_total: IntCounterVec,
    tool_invocation_total: IntCounterVec,
    memory_write_duration_seconds: HistogramVec,
    memory_search_hits: HistogramVec,
    tool_invocation_duration_ms: HistogramVec,
    memory_substrate_healthy: IntGauge,
    packet_store_size: IntGaugeVec,
    spans_dropped_total: IntCounter,
    export_duration_seconds: Histogram,
}

impl Recorders {
    fn build(registry: &Registry) -> prometheus::Result<Self> {
        let memory_write_total = IntCounterVec::new(
            Opts::new("memory_write_total", "Packet writes by segment and status"),
            &["segment", "status"],
        )?;
        registry.register(Box::new(memory_write_total.clone()))?;

        let memory_search_total = IntCounterVec::new(
            Opts::new(
                "memory_search_total",
                "Memory searches by segment and search type",
            ),
            &["segment", "search_type"],
        )?;
        registry.register(Box::new(memory_search_total.clone()))?;

        let tool_invocation_total = IntCounterVec::new(
            Opts::new(
                "tool_invocation_total",
                "Tool invocations by tool and status",
            ),
            &["tool_id", "status"],
        )?;
        registry.register(Box::new(tool_invocation_total.clone()))?;

        let memory_write_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "memory_write_duration_seconds",
                "Packet write latency by segment",
            ),
            &["segment"],
        )?;
        registry.register(Box::new(memory_write_duration_seconds.clone()))?;

        let memory_search_hits = HistogramVec::new(
            HistogramOpts::new("memory_search_hits", "Hits per memory search by segment")
                .buckets(SEARCH_HITS_BUCKETS.to_vec()),
            &["segment"],
        )?;
        registry.register(Box::new(memory_search_hits.clone()))?;

        let tool_invocation_duration_ms = HistogramVec::new(
            HistogramOpts::new(
                "tool_invocation_duration_ms",
                "Tool invocation latency in milliseconds",
            )
            .buckets(TOOL_DURATION_BUCKETS_MS.to_vec()),
            &["tool_id"],
        )?;
        registry.register(Box::new(tool_invocation_duration_ms.clone()))?;

        let memory_substrate_healthy = IntGauge::new(
            "memory_substrate_healthy",
            "1 when the packet store is reachable, 0 otherwise",
        )?;
        registry.register(Box::new(memory_substrate_healthy.clone()))?;

        let packet_store_size = IntGaugeVec::new(
            Opts::new("packet_store_size", "Packet count by segment"),
            &["segment"],
        )?;
        registry.register(Box::new(packet_store_size.clone()))?;

        let spans_dropped_total = IntCounter::new(
            "spans_dropped_total",
            "Spans dropped by exporter backpressure",
        )?;
        registry.register(Box::new(spans_dropped_total.clone()))?;

        let export_duration_seconds = Histogram::with_opts(HistogramOpts::new(
            "span_export_duration_seconds",
            "Latency of span export batches",
        ))?;
        registry.register(Box::new(export_duration_seconds.clone()))?;

        Ok(Self {
            memory_write_total,
            memory_search_total,
            tool_invocation_total,
            memory_write_duration_seconds,
            memory_search_hits,
            tool_invocation_duration_ms,
            memory_substrate_healthy,
            packet_store_size,
            spans_dropped_total,
            export_duration_seconds,
        })
    }
}

/// The substrate metrics registry.
pub struct MemoryMetrics {
    registry: Registry,
    recorders: Option<Recorders>,
}

impl MemoryMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();
        let recorders = match Recorders::build(&registry) {
            Ok(recorders) => Some(recorders),
            Err(e) => {
                warn!(error = %e, "metric registration failed, metrics degraded to no-op");
                None
            }
        };
        Self { registry, recorders }
    }

    pub fn record_memory_write(&self, segment: &str, status: &str, duration_secs: f64) {
        if let Some(r) = &self.recorders {
            r.memory_write_total
                .with_label_values(&[segment, status])
                .inc();
            r.memory_write_duration_seconds
                .with_label_values(&[segment])
                .observe(duration_secs);
        }
    }

    pub fn record_memory_search(&self, segment: &str, search_type: &str, hits: usize) {
        if let Some(r) = &self.recorders {
            r.memory_search_total
                .with_label_values(&[segment, search_type])
                .inc();
            r.memory_search_hits
                .with_label_values(&[segment])
                .observe(hits as f64);
        }
    }

    pub fn record_tool_invocation(&self, tool_id: &str, status: &str, duration_ms: f64) {
        if let Some(r) = &self.recorders {
            r.tool_invocation_total
                .with_label_values(&[tool_id, status])
                .inc();
            r.tool_invocation_duration_ms
                .with_label_values(&[tool_id])
                .observe(duration_ms);
        }
    }

    pub fn set_substrate_healthy(&self, healthy: bool) {
        if let Some(r) = &self.recorders {
            r.memory_substrate_healthy.set(i64::from(healthy));
        }
    }

    pub fn set_packet_store_size(&self, segment: &str, size: i64) {
        if let Some(r) = &self.recorders {
            r.packet_store_size.with_label_values(&[segment]).set(size);
        }
    }

    pub fn record_spans_dropped(&self, count: u64) {
        if let Some(r) = &self.recorders {
            r.spans_dropped_total.inc_by(count);
        }
    }

    pub fn observe_export_duration(&self, duration_secs: f64) {
        if let Some(r) = &self.recorders {
            r.export_duration_seconds.observe(duration_secs);
        }
    }

    /// Counter value, for tests and admin snapshots.
    pub fn tool_invocation_count(&self, tool_id: &str, status: &str) -> u64 {
        self.recorders
            .as_ref()
            .map(|r| {
                r.tool_invocation_total
                    .with_label_values(&[tool_id, status])
                    .get()
            })
            .unwrap_or(0)
    }

    /// Number of duration observations recorded for a tool.
    pub fn tool_duration_observations(&self, tool_id: &str) -> u64 {
        self.recorders
            .as_ref()
            .map(|r| {
                r.tool_invocation_duration_ms
                    .with_label_values(&[tool_id])
                    .get_sample_count()
            })
            .unwrap_or(0)
    }

    /// Prometheus text-format exposition of the whole registry.
    pub fn export_text(&self) -> String {
        let encoder = TextEncoder::new();
        match encoder.encode_to_string(&self.registry.gather()) {
            Ok(text) => text,
            Err(e) => {
                debug!(error = %e, "failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for MemoryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_invocation_recording() {
        let metrics = MemoryMetrics::new();
        metrics.record_tool_invocation("gmp_run", "success", 42.0);
        metrics.record_tool_invocation("gmp_run", "success", 17.0);
        metrics.record_tool_invocation("gmp_run", "failure", 5.0);

        assert_eq!(metrics.tool_invocation_count("gmp_run", "success"), 2);
        assert_eq!(metrics.tool_invocation_count("gmp_run", "failure"), 1);
        assert_eq!(metrics.tool_duration_observations("gmp_run"), 3);
    }

    #[test]
    fn test_text_exposition_contains_families() {
        let metrics = MemoryMetrics::new();
        metrics.record_memory_write("tool_audit", "ok", 0.002);
        metrics.record_memory_search("session_context", "semantic", 5);
        metrics.set_substrate_healthy(true);

        let text = metrics.export_text();
        assert!(text.contains("memory_write_total"));
        assert!(text.contains("memory_search_hits"));
        assert!(text.contains("memory_substrate_healthy 1"));
    }

    #[test]
    fn test_recording_never_panics_on_empty_labels() {
        let metrics = MemoryMetrics::new();
        metrics.record_tool_invocation("", "", 0.0);
        metrics.record_memory_write("", "", 0.0);
    }
}
