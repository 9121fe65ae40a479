// Research runtime
//
// Execution wrapper around the graph: fresh runs, checkpoint resume, and
// thread status summaries.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use agentops_observability::SubstrateIngestor;

use crate::graph::ResearchGraph;
use crate::state::ResearchGraphState;

/// Error type for research runs.
#[derive(Debug, thiserror::Error)]
pub enum ResearchError {
    #[error("LLM error: {0}")]
    Llm(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Status summary for a research thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchStatus {
    pub thread_id: String,
    pub refined_goal: String,
    pub steps_completed: usize,
    pub total_steps: usize,
    pub evidence_count: usize,
    pub critic_score: f64,
    pub retry_count: u32,
    pub has_output: bool,
}

/// Runtime for research graph execution.
pub struct ResearchRuntime {
    graph: ResearchGraph,
    ingestor: Arc<SubstrateIngestor>,
}

impl ResearchRuntime {
    pub fn new(graph: ResearchGraph, ingestor: Arc<SubstrateIngestor>) -> Self {
        Self { graph, ingestor }
    }

    /// Run research for a query. Returns the final state; on node failure the
    /// partial state (with its errors list) is returned alongside the error
    /// having been recorded in it.
    pub async fn execute(
        &self,
        query: &str,
        user_id: &str,
        thread_id: Option<String>,
    ) -> ResearchGraphState {
        let thread_id = thread_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        info!(%thread_id, query = %truncated(query), "starting research run");

        let mut state = ResearchGraphState::new(query, thread_id, user_id);
        if let Err(e) = self.graph.run(&mut state).await {
            warn!(thread_id = %state.thread_id, error = %e, "research run failed");
        }
        state
    }

    /// Resume a thread from its checkpoint. Returns None when no checkpoint
    /// exists.
    pub async fn resume(&self, thread_id: &str) -> Result<Option<ResearchGraphState>, ResearchError> {
        let Some(mut state) = self.load_state(thread_id).await? else {
            warn!(%thread_id, "no checkpoint to resume");
            return Ok(None);
        };

        info!(%thread_id, "resuming research from checkpoint");
        if let Err(e) = self.graph.run(&mut state).await {
            warn!(%thread_id, error = %e, "resumed research run failed");
        }
        Ok(Some(state))
    }

    /// Status of a research thread, from its checkpoint.
    pub async fn status(&self, thread_id: &str) -> Result<Option<ResearchStatus>, ResearchError> {
        Ok(self.load_state(thread_id).await?.map(|state| ResearchStatus {
            thread_id: state.thread_id.clone(),
            refined_goal: state.refined_goal.clone(),
            steps_completed: state.steps_completed(),
            total_steps: state.plan.len(),
            evidence_count: state.evidence.len(),
            critic_score: state.critic_score,
            retry_count: state.retry_count,
            has_output: state.has_output(),
        }))
    }

    async fn load_state(&self, thread_id: &str) -> Result<Option<ResearchGraphState>, ResearchError> {
        let key = ResearchGraphState::checkpoint_key(thread_id);
        let value = self
            .ingestor
            .store()
            .load_checkpoint(&key)
            .await
            .map_err(|e| ResearchError::Store(e.to_string()))?;

        value
            .map(|v| serde_json::from_value(v).map_err(|e| ResearchError::Serialization(e.to_string())))
            .transpose()
    }
}

fn truncated(text: &str) -> String {
    text.chars().take(50).collect()
}
