// The research DAG
//
// START -> planning -> research -> critic -> (retry | finalize) ->
// store_insights -> END. The conditional edge after the critic is a pure
// function of (score, retry_count, threshold, max_retries). State is
// checkpointed after every node transition.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use agentops_dispatch::{ToolExecutionResult, ToolRegistry};
use agentops_observability::SubstrateIngestor;

use crate::agents::{Critic, Planner, Researcher};
use crate::insights::store_insights;
use crate::runtime::ResearchError;
use crate::state::{ResearchGraphState, StepStatus};

/// Nodes of the research graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphNode {
    Planning,
    Research,
    Critic,
    Finalize,
    StoreInsights,
    End,
}

/// The conditional edge after the critic. Pure and deterministic.
pub fn decide_after_critic(
    score: f64,
    retry_count: u32,
    threshold: f64,
    max_retries: u32,
) -> GraphNode {
    if retry_count < max_retries && score < threshold {
        GraphNode::Planning
    } else {
        GraphNode::Finalize
    }
}

#[derive(Debug, Clone)]
pub struct ResearchGraphConfig {
    /// Critic score required for approval.
    pub critic_threshold: f64,
    /// Maximum planning retries before finalizing regardless.
    pub max_retries: u32,
    /// Evidence items converted into finding packets.
    pub top_n_findings: usize,
}

impl Default for ResearchGraphConfig {
    fn default() -> Self {
        Self {
            critic_threshold: 0.7,
            max_retries: 2,
            top_n_findings: 5,
        }
    }
}

/// The compiled research graph.
pub struct ResearchGraph {
    planner: Arc<dyn Planner>,
    researcher: Arc<dyn Researcher>,
    critic: Arc<dyn Critic>,
    tools: Arc<ToolRegistry>,
    ingestor: Arc<SubstrateIngestor>,
    config: ResearchGraphConfig,
}

impl ResearchGraph {
    pub fn new(
        planner: Arc<dyn Planner>,
        researcher: Arc<dyn Researcher>,
        critic: Arc<dyn Critic>,
        tools: Arc<ToolRegistry>,
        ingestor: Arc<SubstrateIngestor>,
        config: ResearchGraphConfig,
    ) -> Self {
        Self {
            planner,
            researcher,
            critic,
            tools,
            ingestor,
            config,
        }
    }

    pub fn config(&self) -> &ResearchGraphConfig {
        &self.config
    }

    /// Where to (re-)enter the graph for a given state.
    pub fn entry_node(state: &ResearchGraphState) -> GraphNode {
        if state.has_output() {
            GraphNode::End
        } else if state.plan.is_empty() {
            GraphNode::Planning
        } else if state.current_step_idx < state.plan.len() {
            GraphNode::Research
        } else {
            GraphNode::Critic
        }
    }

    /// Drive the graph from the state's entry node to END. On node failure
    /// the error is recorded in the state (which is checkpointed) and
    /// returned.
    pub async fn run(&self, state: &mut ResearchGraphState) -> Result<(), ResearchError> {
        let mut node = Self::entry_node(state);

        while node != GraphNode::End {
            debug!(thread_id = %state.thread_id, node = ?node, "executing research node");
            let next = match self.execute_node(node, state).await {
                Ok(next) => next,
                Err(e) => {
                    state.errors.push(e.to_string());
                    self.checkpoint(state).await;
                    return Err(e);
                }
            };
            self.checkpoint(state).await;
            node = next;
        }

        Ok(())
    }

    async fn execute_node(
        &self,
        node: GraphNode,
        state: &mut ResearchGraphState,
    ) -> Result<GraphNode, ResearchError> {
        match node {
            GraphNode::Planning => self.planning_node(state).await,
            GraphNode::Research => self.research_node(state).await,
            GraphNode::Critic => self.critic_node(state).await,
            GraphNode::Finalize => self.finalize_node(state),
            GraphNode::StoreInsights => self.store_insights_node(state).await,
            GraphNode::End => Ok(GraphNode::End),
        }
    }

    async fn planning_node(
        &self,
        state: &mut ResearchGraphState,
    ) -> Result<GraphNode, ResearchError> {
        let outcome = self.planner.plan(state).await?;

        // Retry-scoped fields reset on every (re-)plan; evidence survives so
        // later passes build on earlier ones.
        state.refined_goal = outcome.refined_goal;
        state.plan = outcome.steps;
        state.current_step_idx = 0;
        state.critic_feedback.clear();
        state.final_summary.clear();

        info!(
            thread_id = %state.thread_id,
            steps = state.plan.len(),
            retry = state.retry_count,
            "plan ready"
        );
        Ok(GraphNode::Research)
    }

    async fn research_node(
        &self,
        state: &mut ResearchGraphState,
    ) -> Result<GraphNode, ResearchError> {
        while state.current_step_idx < state.plan.len() {
            let idx = state.current_step_idx;
            state.plan[idx].status = StepStatus::InProgress;
            let step = state.plan[idx].clone();

            // Run the step's tools; a failing tool is logged and skipped.
            let mut tool_outputs = Vec::new();
            for tool_id in &step.tools {
                match self.tools.get(tool_id) {
                    Some(tool) => {
                        let mut args = Map::new();
                        args.insert("query".to_string(), Value::String(step.query.clone()));
                        match tool.execute(&args).await {
                            ToolExecutionResult::Success(value) => tool_outputs.push(value),
                            other => {
                                warn!(
                                    thread_id = %state.thread_id,
                                    %tool_id,
                                    error = ?other.surface_error(tool_id),
                                    "step tool failed, skipping"
                                );
                            }
                        }
                    }
                    None => {
                        warn!(thread_id = %state.thread_id, %tool_id, "step tool not registered, skipping");
                    }
                }
            }

            let evidence = self.researcher.research(&step, &tool_outputs).await?;
            state.record_source(&evidence.source);
            for source in &evidence.metadata.sources {
                state.record_source(source);
            }
            state.evidence.push(evidence);

            state.plan[idx].status = StepStatus::Completed;
            state.current_step_idx += 1;
        }

        Ok(GraphNode::Critic)
    }

    async fn critic_node(
        &self,
        state: &mut ResearchGraphState,
    ) -> Result<GraphNode, ResearchError> {
        let critique = self.critic.evaluate(state).await?;
        state.critic_score = critique.score;
        state.critic_feedback = critique.feedback;

        let next = decide_after_critic(
            state.critic_score,
            state.retry_count,
            self.config.critic_threshold,
            self.config.max_retries,
        );

        if next == GraphNode::Planning {
            state.retry_count += 1;
            info!(
                thread_id = %state.thread_id,
                score = state.critic_score,
                retry = state.retry_count,
                "critic rejected, replanning"
            );
        }

        Ok(next)
    }

    fn finalize_node(&self, state: &mut ResearchGraphState) -> Result<GraphNode, ResearchError> {
        state.final_summary = if state.evidence.is_empty() {
            "No evidence gathered".to_string()
        } else {
            state
                .evidence
                .iter()
                .map(|e| e.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        };

        state.final_output = json!({
            "query": state.original_query,
            "refined_goal": state.refined_goal,
            "summary": state.final_summary,
            "evidence_count": state.evidence.len(),
            "sources": state.sources,
            "critic_score": state.critic_score,
            "retry_count": state.retry_count,
        });

        Ok(GraphNode::StoreInsights)
    }

    async fn store_insights_node(
        &self,
        state: &mut ResearchGraphState,
    ) -> Result<GraphNode, ResearchError> {
        let stored = store_insights(&self.ingestor, state, self.config.top_n_findings).await;
        state.stored_insights = stored;
        info!(
            thread_id = %state.thread_id,
            insights = state.stored_insights.len(),
            "research complete"
        );
        Ok(GraphNode::End)
    }

    async fn checkpoint(&self, state: &ResearchGraphState) {
        let key = ResearchGraphState::checkpoint_key(&state.thread_id);
        match serde_json::to_value(state) {
            Ok(value) => {
                if let Err(e) = self.ingestor.store().save_checkpoint(&key, value).await {
                    warn!(thread_id = %state.thread_id, error = %e, "checkpoint write failed");
                }
            }
            Err(e) => warn!(thread_id = %state.thread_id, error = %e, "checkpoint serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decide_after_critic_is_deterministic() {
        // Below threshold with retries left: replan.
        assert_eq!(decide_after_critic(0.5, 0, 0.7, 2), GraphNode::Planning);
        assert_eq!(decide_after_critic(0.5, 1, 0.7, 2), GraphNode::Planning);
        // Retries exhausted: finalize even below threshold.
        assert_eq!(decide_after_critic(0.5, 2, 0.7, 2), GraphNode::Finalize);
        // Above threshold: finalize immediately.
        assert_eq!(decide_after_critic(0.9, 0, 0.7, 2), GraphNode::Finalize);
        // Exactly at threshold counts as approved.
        assert_eq!(decide_after_critic(0.7, 0, 0.7, 2), GraphNode::Finalize);
    }

    #[test]
    fn test_entry_node_resumes_mid_run() {
        let mut state = ResearchGraphState::new("q", "t", "u");
        assert_eq!(ResearchGraph::entry_node(&state), GraphNode::Planning);

        state.plan.push(crate::state::ResearchStep::researcher("a", "b"));
        assert_eq!(ResearchGraph::entry_node(&state), GraphNode::Research);

        state.current_step_idx = 1;
        assert_eq!(ResearchGraph::entry_node(&state), GraphNode::Critic);

        state.final_output = json!({"done": true});
        assert_eq!(ResearchGraph::entry_node(&state), GraphNode::End);
    }
}
