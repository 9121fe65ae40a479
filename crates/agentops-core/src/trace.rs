// Trace context - W3C-compatible distributed trace propagation
//
// The sampling decision is sticky per trace: it is made once at root context
// creation and inherited by every child context. Error spans are force-exported
// downstream regardless of this decision.

use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const TRACEPARENT_VERSION: &str = "00";

/// Request-scoped trace context, convertible to/from a W3C `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// 128-bit id as 32 lowercase hex chars.
    pub trace_id: String,
    /// 64-bit id as 16 lowercase hex chars.
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub is_sampled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl TraceContext {
    /// Create a root context, deciding sampling from the base rate.
    pub fn root(sampling_rate: f64) -> Self {
        let is_sampled = if sampling_rate >= 1.0 {
            true
        } else if sampling_rate <= 0.0 {
            false
        } else {
            rand::thread_rng().gen::<f64>() < sampling_rate
        };

        Self {
            trace_id: new_trace_id(),
            span_id: new_span_id(),
            parent_span_id: None,
            is_sampled,
            user_id: None,
            task_id: None,
            agent_id: None,
        }
    }

    /// Create an always-sampled root context (tests and administrative flows).
    pub fn sampled() -> Self {
        Self::root(1.0)
    }

    /// Create a child context with a fresh span id; the sampling decision and
    /// identity fields are inherited.
    pub fn child(&self) -> Self {
        Self {
            trace_id: self.trace_id.clone(),
            span_id: new_span_id(),
            parent_span_id: Some(self.span_id.clone()),
            is_sampled: self.is_sampled,
            user_id: self.user_id.clone(),
            task_id: self.task_id.clone(),
            agent_id: self.agent_id.clone(),
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_task(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Render the W3C `traceparent` header value: `00-{trace}-{span}-{flags}`.
    pub fn to_traceparent(&self) -> String {
        let flags = if self.is_sampled { "01" } else { "00" };
        format!(
            "{TRACEPARENT_VERSION}-{}-{}-{flags}",
            self.trace_id, self.span_id
        )
    }

    /// Hydrate a context from an incoming `traceparent` header. Returns None
    /// for malformed headers; callers fall back to a fresh root context.
    pub fn from_traceparent(header: &str) -> Option<Self> {
        let mut parts = header.trim().split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;

        if version != TRACEPARENT_VERSION || parts.next().is_some() {
            return None;
        }
        if trace_id.len() != 32 || !trace_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        if span_id.len() != 16 || !span_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            span_id: span_id.to_ascii_lowercase(),
            parent_span_id: None,
            is_sampled: flags == "01",
            user_id: None,
            task_id: None,
            agent_id: None,
        })
    }
}

/// Generate a 32-hex-char trace id.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Generate a 16-hex-char span id.
pub fn new_span_id() -> String {
    Uuid::new_v4().simple().to_string()[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_shapes() {
        assert_eq!(new_trace_id().len(), 32);
        assert_eq!(new_span_id().len(), 16);
    }

    #[test]
    fn test_traceparent_round_trip() {
        let ctx = TraceContext::sampled();
        let header = ctx.to_traceparent();
        let parsed = TraceContext::from_traceparent(&header).unwrap();
        assert_eq!(parsed.trace_id, ctx.trace_id);
        assert_eq!(parsed.span_id, ctx.span_id);
        assert!(parsed.is_sampled);
    }

    #[test]
    fn test_traceparent_unsampled_flags() {
        let ctx = TraceContext::root(0.0);
        assert!(!ctx.is_sampled);
        assert!(ctx.to_traceparent().ends_with("-00"));
    }

    #[test]
    fn test_traceparent_rejects_malformed() {
        assert!(TraceContext::from_traceparent("garbage").is_none());
        assert!(TraceContext::from_traceparent("01-abc-def-01").is_none());
        let short = format!("00-{}-{}-01", "a".repeat(31), "b".repeat(16));
        assert!(TraceContext::from_traceparent(&short).is_none());
    }

    #[test]
    fn test_child_inherits_sampling_and_links_parent() {
        let root = TraceContext::sampled().with_agent("L");
        let child = root.child();
        assert_eq!(child.trace_id, root.trace_id);
        assert_eq!(child.parent_span_id.as_deref(), Some(root.span_id.as_str()));
        assert_ne!(child.span_id, root.span_id);
        assert!(child.is_sampled);
        assert_eq!(child.agent_id.as_deref(), Some("L"));
    }
}
