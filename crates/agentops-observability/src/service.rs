//! Span collection service
//!
//! Process-scoped service that hands out trace contexts, collects finished
//! spans, applies the sampling policy, and drives the batched export
//! pipeline. Classification of failures happens on every finished span
//! (regardless of sampling) and feeds the recovery engine through a channel.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use agentops_core::config::ObservabilitySettings;
use agentops_core::failure::{classify_span, FailureSignal};
use agentops_core::span::{Span, SpanKind, SpanStatus};
use agentops_core::trace::TraceContext;

use crate::exporters::CompositeExporter;
use crate::metrics::MemoryMetrics;

/// Batches never grow beyond this multiple of batch_size; beyond it the
/// oldest spans are dropped rather than blocking the hot path.
const BATCH_OVERFLOW_FACTOR: usize = 2;

struct BatchState {
    spans: Vec<Span>,
}

/// The observability service. Cheap to share; all methods take `&self`.
pub struct ObservabilityService {
    settings: ObservabilitySettings,
    exporter: CompositeExporter,
    metrics: Arc<MemoryMetrics>,
    batch: Mutex<BatchState>,
    batch_full: tokio::sync::Notify,
    failure_tx: Mutex<Option<mpsc::UnboundedSender<FailureSignal>>>,
}

impl ObservabilityService {
    pub fn new(
        settings: ObservabilitySettings,
        exporter: CompositeExporter,
        metrics: Arc<MemoryMetrics>,
    ) -> Arc<Self> {
        Arc::new(Self {
            settings,
            exporter,
            metrics,
            batch: Mutex::new(BatchState { spans: Vec::new() }),
            batch_full: tokio::sync::Notify::new(),
            failure_tx: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &ObservabilitySettings {
        &self.settings
    }

    /// Subscribe the recovery engine to the failure-signal stream.
    pub fn failure_signals(&self) -> mpsc::UnboundedReceiver<FailureSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.failure_tx.lock() = Some(tx);
        rx
    }

    /// New root context; the sticky sampling decision is made here from the
    /// base rate.
    pub fn root_context(&self) -> TraceContext {
        TraceContext::root(self.settings.sampling_rate)
    }

    /// Hydrate a context from an incoming traceparent header, falling back to
    /// a fresh root.
    pub fn context_from_traceparent(&self, header: Option<&str>) -> TraceContext {
        header
            .and_then(TraceContext::from_traceparent)
            .unwrap_or_else(|| self.root_context())
    }

    /// Start a typed span as a child of the given context.
    pub fn start_span(&self, ctx: &TraceContext, name: &str, kind: SpanKind) -> Span {
        Span::start(ctx, name, kind)
    }

    /// Record a finished span: classify it, apply the sampling policy, and
    /// enqueue it for export.
    pub fn record(&self, ctx: &TraceContext, span: Span) {
        if !self.settings.enabled {
            return;
        }

        // Failure detection sees every span, sampled or not.
        if let Some(signal) = classify_span(&span) {
            if let Some(tx) = self.failure_tx.lock().as_ref() {
                let _ = tx.send(signal);
            }
        }

        let export = match span.status {
            // Error spans are force-exported at the error sampling rate
            // regardless of the per-trace decision.
            SpanStatus::Error => {
                self.settings.error_sampling_rate >= 1.0
                    || rand::thread_rng().gen::<f64>() < self.settings.error_sampling_rate
            }
            _ => ctx.is_sampled,
        };

        if !export {
            return;
        }

        let should_flush = {
            let mut batch = self.batch.lock();
            batch.spans.push(span);

            // Backpressure: drop oldest instead of blocking.
            let cap = self.settings.batch_size * BATCH_OVERFLOW_FACTOR;
            if batch.spans.len() > cap {
                let overflow = batch.spans.len() - cap;
                batch.spans.drain(..overflow);
                self.metrics.record_spans_dropped(overflow as u64);
            }

            batch.spans.len() >= self.settings.batch_size
        };

        if should_flush {
            debug!("span batch full, waking flusher");
            self.batch_full.notify_one();
        }
    }

    /// Number of spans waiting for export.
    pub fn pending_spans(&self) -> usize {
        self.batch.lock().spans.len()
    }

    /// Flush the pending batch to all sinks.
    pub async fn flush(&self) {
        let spans = {
            let mut batch = self.batch.lock();
            std::mem::take(&mut batch.spans)
        };
        if spans.is_empty() {
            return;
        }

        let started = std::time::Instant::now();
        self.exporter.export(&spans).await;
        self.metrics
            .observe_export_duration(started.elapsed().as_secs_f64());
    }

    /// Background flusher: flushes when the batch fills or the batch timeout
    /// elapses, whichever comes first.
    pub fn spawn_flusher(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let timeout = Duration::from_secs(service.settings.batch_timeout_sec.max(1));
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {}
                    _ = service.batch_full.notified() => {}
                }
                if service.pending_spans() > 0 {
                    service.flush().await;
                }
            }
        })
    }

    /// Shutdown flush.
    pub async fn shutdown(&self) {
        self.flush().await;
    }
}
