//! Circuit breakers
//!
//! Named three-state breakers protect external resources from cascade
//! failures. Failures are counted in a sliding window; at the threshold the
//! circuit opens and protected operations fast-fail until the reset timeout
//! admits a half-open probe.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation - all calls allowed
    Closed,

    /// Failure threshold exceeded - all calls rejected
    Open,

    /// Testing if the resource recovered - a single probe allowed
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Circuit breaker configuration
///
/// # State Machine
///
/// ```text
/// ┌─────────┐  failure threshold  ┌─────────┐  reset timeout  ┌──────────┐
/// │ Closed  │ ─────────────────► │  Open   │ ──────────────► │ HalfOpen │
/// └─────────┘                     └─────────┘                 └──────────┘
///      ▲                               ▲         probe fails      │
///      │         probe succeeds        └──────────────────────────┤
///      └──────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Breaker name for logging and the registry key
    pub name: String,

    /// Number of failures within the window required to open the circuit
    pub failure_threshold: u32,

    /// Sliding window for failure counting
    pub window: Duration,

    /// Time to wait in Open before admitting a half-open probe
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }
}

/// Raised when an operation is blocked by an open circuit.
#[derive(Debug, thiserror::Error)]
#[error("circuit_open: {name}")]
pub struct CircuitOpenError {
    pub name: String,
}

/// Point-in-time breaker statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failures_in_window: usize,
    pub failure_threshold: u32,
    pub total_failures: u64,
    pub total_successes: u64,
    pub total_trips: u64,
}

struct BreakerInner {
    state: CircuitState,
    failures: Vec<Instant>,
    last_failure: Option<Instant>,
    total_failures: u64,
    total_successes: u64,
    total_trips: u64,
}

/// A three-state circuit breaker with a sliding failure window.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: Vec::new(),
                last_failure: None,
                total_failures: 0,
                total_successes: 0,
                total_trips: 0,
            }),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Admission check before a protected operation. Handles the
    /// Open -> HalfOpen transition when the reset timeout has elapsed.
    pub fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .last_failure
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::MAX);
                if elapsed >= self.config.reset_timeout {
                    info!(
                        breaker = %self.config.name,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "circuit half-open, admitting probe"
                    );
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    Err(CircuitOpenError {
                        name: self.config.name.clone(),
                    })
                }
            }
        }
    }

    /// Record a successful operation. In HalfOpen this closes the circuit.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.total_successes += 1;
        if inner.state == CircuitState::HalfOpen {
            info!(breaker = %self.config.name, "probe succeeded, circuit closed");
            inner.state = CircuitState::Closed;
            inner.failures.clear();
        }
    }

    /// Record a failed operation; trips the circuit at the threshold.
    pub fn record_failure(&self, error: &str) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.total_failures += 1;
        inner.last_failure = Some(now);
        inner.failures.push(now);

        // Prune the sliding window.
        let window = self.config.window;
        inner.failures.retain(|t| now.duration_since(*t) <= window);

        if inner.state == CircuitState::HalfOpen {
            warn!(breaker = %self.config.name, error = %error, "probe failed, circuit re-opened");
            inner.state = CircuitState::Open;
            return;
        }

        if inner.state == CircuitState::Closed
            && inner.failures.len() >= self.config.failure_threshold as usize
        {
            inner.total_trips += 1;
            warn!(
                breaker = %self.config.name,
                failures = inner.failures.len(),
                threshold = self.config.failure_threshold,
                error = %error,
                "circuit opened"
            );
            inner.state = CircuitState::Open;
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.inner.lock();
        BreakerStats {
            name: self.config.name.clone(),
            state: inner.state,
            failures_in_window: inner.failures.len(),
            failure_threshold: self.config.failure_threshold,
            total_failures: inner.total_failures,
            total_successes: inner.total_successes,
            total_trips: inner.total_trips,
        }
    }

    /// Privileged administrative reset to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        info!(
            breaker = %self.config.name,
            previous_state = %inner.state,
            "circuit manually reset"
        );
        inner.state = CircuitState::Closed;
        inner.failures.clear();
    }
}

/// Per-named-resource breaker registry. State is process-global; reads are
/// cheap and admission is checked on the protecting code path only.
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// The breaker for a named resource, created on first use.
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(name) {
            return existing.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = CircuitBreakerConfig {
                    name: name.to_string(),
                    ..self.defaults.clone()
                };
                Arc::new(CircuitBreaker::new(config))
            })
            .clone()
    }

    pub fn stats(&self) -> Vec<BreakerStats> {
        let mut stats: Vec<BreakerStats> = self
            .breakers
            .read()
            .values()
            .map(|b| b.stats())
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            CircuitBreakerConfig::new("test")
                .with_failure_threshold(threshold)
                .with_window(Duration::from_secs(60))
                .with_reset_timeout(Duration::from_millis(reset_ms)),
        )
    }

    #[test]
    fn test_opens_at_threshold_and_fast_fails() {
        let breaker = fast_breaker(3, 30_000);

        for _ in 0..3 {
            breaker.try_acquire().unwrap();
            breaker.record_failure("boom");
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        // The next call short-circuits without touching the resource.
        let err = breaker.try_acquire().unwrap_err();
        assert!(err.to_string().contains("circuit_open"));
    }

    #[test]
    fn test_half_open_probe_after_reset_timeout() {
        let breaker = fast_breaker(2, 50);
        breaker.record_failure("a");
        breaker.record_failure("b");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());

        std::thread::sleep(Duration::from_millis(70));

        // Reset timeout elapsed: next call observes HalfOpen and is admitted.
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = fast_breaker(1, 20);
        breaker.record_failure("a");
        std::thread::sleep(Duration::from_millis(30));
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure("probe failed");
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire().is_err());
    }

    #[test]
    fn test_manual_reset() {
        let breaker = fast_breaker(1, 60_000);
        breaker.record_failure("a");
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.try_acquire().unwrap();
    }

    #[test]
    fn test_registry_returns_same_instance() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default());
        let a = registry.breaker("llm");
        let b = registry.breaker("llm");
        assert!(Arc::ptr_eq(&a, &b));

        a.record_failure("x");
        assert_eq!(registry.stats()[0].total_failures, 1);
    }

    #[test]
    fn test_stats_track_trips() {
        let breaker = fast_breaker(2, 10);
        breaker.record_failure("a");
        breaker.record_failure("b");
        let stats = breaker.stats();
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.total_trips, 1);
        assert_eq!(stats.failures_in_window, 2);
    }
}
