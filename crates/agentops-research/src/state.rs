// Research graph state
//
// The shared state carried across all nodes, serialized to the graph
// checkpoint under `research_graph:{thread_id}` after every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Which agent executes a planned step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAgent {
    Researcher,
    Critic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// A single step in a research plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchStep {
    pub step_id: String,
    pub agent: StepAgent,
    pub description: String,
    pub query: String,
    #[serde(default)]
    pub tools: Vec<String>,
    pub status: StepStatus,
}

impl ResearchStep {
    pub fn researcher(description: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            step_id: Uuid::new_v4().to_string(),
            agent: StepAgent::Researcher,
            description: description.into(),
            query: query.into(),
            tools: Vec::new(),
            status: StepStatus::Pending,
        }
    }

    pub fn with_tools(mut self, tools: Vec<String>) -> Self {
        self.tools = tools;
        self
    }
}

/// Structured fields attached to a piece of evidence.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EvidenceMetadata {
    #[serde(default)]
    pub key_facts: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub gaps: Vec<String>,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

/// Evidence gathered by the researcher for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub source: String,
    pub content: String,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: EvidenceMetadata,
}

/// Shared state across all research graph nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchGraphState {
    // Identity
    pub thread_id: String,
    pub request_id: String,
    pub user_id: String,

    // Input
    pub original_query: String,
    pub refined_goal: String,

    // Planning
    pub plan: Vec<ResearchStep>,
    pub current_step_idx: usize,

    // Research results
    pub evidence: Vec<Evidence>,
    pub sources: Vec<String>,

    // Quality control
    pub critic_score: f64,
    pub critic_feedback: String,
    pub retry_count: u32,

    // Output
    pub final_summary: String,
    pub final_output: Value,

    // Errors
    pub errors: Vec<String>,

    // Metadata
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub stored_insights: Vec<Uuid>,
}

impl ResearchGraphState {
    pub fn new(query: impl Into<String>, thread_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            thread_id: thread_id.into(),
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            refined_goal: query.clone(),
            original_query: query,
            plan: Vec::new(),
            current_step_idx: 0,
            evidence: Vec::new(),
            sources: Vec::new(),
            critic_score: 0.0,
            critic_feedback: String::new(),
            retry_count: 0,
            final_summary: String::new(),
            final_output: Value::Null,
            errors: Vec::new(),
            timestamp: Utc::now(),
            stored_insights: Vec::new(),
        }
    }

    /// The stable checkpoint key for a thread.
    pub fn checkpoint_key(thread_id: &str) -> String {
        format!("research_graph:{thread_id}")
    }

    pub fn steps_completed(&self) -> usize {
        self.plan
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    pub fn has_output(&self) -> bool {
        !self.final_output.is_null()
    }

    /// Record a source if it is new; the list stays de-duplicated.
    pub fn record_source(&mut self, source: &str) {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
    }
}
