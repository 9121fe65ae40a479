//! Recovery orchestration
//!
//! Walks the static remediation chain for a classified failure: retries with
//! exponential backoff, fallback, summarize, degrade, escalate, fail-fast.
//! The first successful action stops the chain; exhaustion always terminates
//! with an escalation signal, never a silent success.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use agentops_core::failure::{
    recovery_actions_for, FailureSignal, RecoveryAction, RemediationAction,
};

/// Hooks the executor calls to apply actions. Implementations re-execute the
/// failed operation, swap in fallbacks, and route escalations.
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    /// Re-execute the failed operation; true means recovered.
    async fn retry(&self, signal: &FailureSignal, attempt: u32) -> bool;

    /// Use a fallback tool / source; true means recovered.
    async fn fallback(&self, signal: &FailureSignal, action: &RemediationAction) -> bool;

    /// Compress the context and re-run; true means recovered.
    async fn summarize(&self, signal: &FailureSignal, compression_ratio: f64) -> bool;

    /// Degrade to a cheaper model / simpler strategy; true means recovered.
    async fn degrade(&self, signal: &FailureSignal, action: &RemediationAction) -> bool;

    /// Route to a human / ops channel. Terminal; has no success value.
    async fn escalate(&self, signal: &FailureSignal, channel: &str);
}

/// Terminal outcome of a recovery chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// An action recovered the operation.
    Recovered { action: RecoveryAction },

    /// The failure was configured to fail fast (policy violations).
    FailedFast,

    /// The chain exhausted (or was configured to escalate); a human owns it
    /// now.
    Escalated,
}

/// Execute the recovery chain for a failure signal.
pub async fn execute_recovery(
    hooks: &dyn RecoveryHooks,
    signal: &FailureSignal,
) -> RecoveryOutcome {
    let chain = recovery_actions_for(signal.failure_class);
    let mut escalated = false;

    for action in &chain {
        match action.action {
            RecoveryAction::Retry => {
                let max_retries = action.max_retries();
                let mut backoff = Duration::from_millis(action.backoff_ms());
                for attempt in 1..=max_retries {
                    tokio::time::sleep(backoff).await;
                    debug!(
                        class = ?signal.failure_class,
                        attempt,
                        max_retries,
                        "recovery retry"
                    );
                    if hooks.retry(signal, attempt).await {
                        return RecoveryOutcome::Recovered {
                            action: RecoveryAction::Retry,
                        };
                    }
                    backoff *= 2;
                }
            }
            RecoveryAction::Fallback => {
                if hooks.fallback(signal, action).await {
                    return RecoveryOutcome::Recovered {
                        action: RecoveryAction::Fallback,
                    };
                }
            }
            RecoveryAction::Summarize => {
                let ratio = action
                    .parameters
                    .get("compression_ratio")
                    .and_then(serde_json::Value::as_f64)
                    .unwrap_or(0.25);
                if hooks.summarize(signal, ratio).await {
                    return RecoveryOutcome::Recovered {
                        action: RecoveryAction::Summarize,
                    };
                }
            }
            RecoveryAction::Degrade => {
                if hooks.degrade(signal, action).await {
                    return RecoveryOutcome::Recovered {
                        action: RecoveryAction::Degrade,
                    };
                }
            }
            RecoveryAction::Escalate => {
                let channel = action
                    .parameters
                    .get("channel")
                    .and_then(serde_json::Value::as_str)
                    .unwrap_or("ops");
                hooks.escalate(signal, channel).await;
                return RecoveryOutcome::Escalated;
            }
            RecoveryAction::FailFast => {
                warn!(class = ?signal.failure_class, "failing fast");
                // FAIL_FAST stops recovery; a following Escalate still runs.
                if chain
                    .iter()
                    .any(|a| a.action == RecoveryAction::Escalate)
                {
                    escalated = true;
                    continue;
                }
                return RecoveryOutcome::FailedFast;
            }
        }
    }

    if escalated {
        return RecoveryOutcome::Escalated;
    }

    // Chain exhausted without success: never silent, always escalate.
    warn!(class = ?signal.failure_class, "recovery chain exhausted, escalating");
    hooks.escalate(signal, "ops").await;
    RecoveryOutcome::Escalated
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentops_core::failure::FailureClass;
    use chrono::Utc;
    use parking_lot::Mutex;

    struct Scripted {
        retry_succeeds_on: Option<u32>,
        fallback_succeeds: bool,
        summarize_succeeds: bool,
        degrade_succeeds: bool,
        retries_seen: Mutex<Vec<u32>>,
        escalations: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn failing() -> Self {
            Self {
                retry_succeeds_on: None,
                fallback_succeeds: false,
                summarize_succeeds: false,
                degrade_succeeds: false,
                retries_seen: Mutex::new(vec![]),
                escalations: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl RecoveryHooks for Scripted {
        async fn retry(&self, _signal: &FailureSignal, attempt: u32) -> bool {
            self.retries_seen.lock().push(attempt);
            self.retry_succeeds_on == Some(attempt)
        }

        async fn fallback(&self, _signal: &FailureSignal, _action: &RemediationAction) -> bool {
            self.fallback_succeeds
        }

        async fn summarize(&self, _signal: &FailureSignal, _ratio: f64) -> bool {
            self.summarize_succeeds
        }

        async fn degrade(&self, _signal: &FailureSignal, _action: &RemediationAction) -> bool {
            self.degrade_succeeds
        }

        async fn escalate(&self, _signal: &FailureSignal, channel: &str) {
            self.escalations.lock().push(channel.to_string());
        }
    }

    fn signal(class: FailureClass) -> FailureSignal {
        FailureSignal {
            failure_class: class,
            span_id: "abcdef0123456789".to_string(),
            trace_id: "0".repeat(32),
            timestamp: Utc::now(),
            context: serde_json::Map::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_on_second_attempt() {
        let hooks = Scripted {
            retry_succeeds_on: Some(2),
            ..Scripted::failing()
        };
        let outcome = execute_recovery(&hooks, &signal(FailureClass::ToolTimeout)).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { action: RecoveryAction::Retry });
        assert_eq!(*hooks.retries_seen.lock(), vec![1, 2]);
        assert!(hooks.escalations.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout_falls_back_then_escalates() {
        let hooks = Scripted {
            fallback_succeeds: true,
            ..Scripted::failing()
        };
        let outcome = execute_recovery(&hooks, &signal(FailureClass::ToolTimeout)).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { action: RecoveryAction::Fallback });
        // All 3 retries were attempted first.
        assert_eq!(hooks.retries_seen.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_chain_escalates_not_silent() {
        let hooks = Scripted::failing();
        let outcome = execute_recovery(&hooks, &signal(FailureClass::ToolTimeout)).await;
        assert_eq!(outcome, RecoveryOutcome::Escalated);
        assert_eq!(hooks.escalations.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_governance_denied_fails_fast_and_escalates() {
        let hooks = Scripted::failing();
        let outcome = execute_recovery(&hooks, &signal(FailureClass::GovernanceDenied)).await;
        assert_eq!(outcome, RecoveryOutcome::Escalated);
        assert_eq!(hooks.escalations.lock().as_slice(), &["admin_review".to_string()]);
        // No retries for policy failures.
        assert!(hooks.retries_seen.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_context_overflow_summarizes() {
        let hooks = Scripted {
            summarize_succeeds: true,
            ..Scripted::failing()
        };
        let outcome =
            execute_recovery(&hooks, &signal(FailureClass::ContextWindowExceeded)).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { action: RecoveryAction::Summarize });
    }

    #[tokio::test(start_paused = true)]
    async fn test_cost_breach_degrades() {
        let hooks = Scripted {
            degrade_succeeds: true,
            ..Scripted::failing()
        };
        let outcome =
            execute_recovery(&hooks, &signal(FailureClass::CostConstraintBreach)).await;
        assert_eq!(outcome, RecoveryOutcome::Recovered { action: RecoveryAction::Degrade });
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_timeout_retries_twice() {
        let hooks = Scripted::failing();
        let outcome =
            execute_recovery(&hooks, &signal(FailureClass::ExternalApiTimeout)).await;
        assert_eq!(outcome, RecoveryOutcome::Escalated);
        assert_eq!(*hooks.retries_seen.lock(), vec![1, 2]);
    }
}
