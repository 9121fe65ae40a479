// Research agents
//
// Planner, researcher, and critic are traits so the graph is testable with
// scripted doubles; the Llm* implementations drive any ChatModel and parse
// its JSON replies defensively (a malformed reply degrades to a safe
// fallback rather than failing the run).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::warn;

use agentops_core::llm::{ChatMessage, ChatModel, ChatRequest};

use crate::runtime::ResearchError;
use crate::state::{Evidence, EvidenceMetadata, ResearchGraphState, ResearchStep};

/// What planning produces: a refined goal and an ordered list of steps.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub refined_goal: String,
    pub steps: Vec<ResearchStep>,
}

/// The critic's judgment of the gathered evidence.
#[derive(Debug, Clone)]
pub struct Critique {
    pub score: f64,
    pub feedback: String,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, state: &ResearchGraphState) -> Result<PlanOutcome, ResearchError>;
}

#[async_trait]
pub trait Researcher: Send + Sync {
    /// Synthesize evidence for one step from the raw tool outputs.
    async fn research(
        &self,
        step: &ResearchStep,
        tool_outputs: &[Value],
    ) -> Result<Evidence, ResearchError>;
}

#[async_trait]
pub trait Critic: Send + Sync {
    async fn evaluate(&self, state: &ResearchGraphState) -> Result<Critique, ResearchError>;
}

// ============================================================================
// Chat-model-backed implementations
// ============================================================================

pub struct LlmPlanner {
    model: Arc<dyn ChatModel>,
}

impl LlmPlanner {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, state: &ResearchGraphState) -> Result<PlanOutcome, ResearchError> {
        let mut prompt = format!(
            "Refine this research query into a goal and an ordered plan.\n\
             Query: {}\nReply as JSON: {{\"refined_goal\": str, \
             \"steps\": [{{\"description\": str, \"query\": str, \"tools\": [str]}}]}}",
            state.original_query
        );
        if state.retry_count > 0 {
            prompt.push_str(&format!(
                "\nPrevious attempt scored {:.2}. Critic feedback: {}",
                state.critic_score, state.critic_feedback
            ));
        }

        let response = self
            .model
            .complete(ChatRequest::new(
                "research-planner",
                vec![
                    ChatMessage::system("You are a research planner. mode:planner"),
                    ChatMessage::user(prompt),
                ],
            ))
            .await
            .map_err(|e| ResearchError::Llm(e.to_string()))?;

        match serde_json::from_str::<Value>(&response.content) {
            Ok(parsed) => {
                let refined_goal = parsed["refined_goal"]
                    .as_str()
                    .unwrap_or(&state.original_query)
                    .to_string();
                let steps = parsed["steps"]
                    .as_array()
                    .map(|steps| {
                        steps
                            .iter()
                            .map(|s| {
                                ResearchStep::researcher(
                                    s["description"].as_str().unwrap_or("research"),
                                    s["query"].as_str().unwrap_or(&refined_goal),
                                )
                                .with_tools(
                                    s["tools"]
                                        .as_array()
                                        .map(|t| {
                                            t.iter()
                                                .filter_map(|v| v.as_str().map(String::from))
                                                .collect()
                                        })
                                        .unwrap_or_default(),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                Ok(PlanOutcome { refined_goal, steps })
            }
            Err(e) => {
                // Degrade to a single-step plan rather than failing the run.
                warn!(error = %e, "planner reply was not JSON, using single-step fallback");
                Ok(PlanOutcome {
                    refined_goal: state.original_query.clone(),
                    steps: vec![ResearchStep::researcher(
                        "research the query directly",
                        state.original_query.clone(),
                    )],
                })
            }
        }
    }
}

pub struct LlmResearcher {
    model: Arc<dyn ChatModel>,
}

impl LlmResearcher {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Researcher for LlmResearcher {
    async fn research(
        &self,
        step: &ResearchStep,
        tool_outputs: &[Value],
    ) -> Result<Evidence, ResearchError> {
        let outputs = serde_json::to_string(tool_outputs)
            .map_err(|e| ResearchError::Serialization(e.to_string()))?;

        let response = self
            .model
            .complete(ChatRequest::new(
                "research-researcher",
                vec![
                    ChatMessage::system("You synthesize evidence from tool output. mode:researcher"),
                    ChatMessage::user(format!(
                        "Step: {}\nQuery: {}\nTool outputs: {outputs}\n\
                         Reply as JSON: {{\"content\": str, \"confidence\": float, \
                         \"key_facts\": [str], \"gaps\": [str]}}",
                        step.description, step.query
                    )),
                ],
            ))
            .await
            .map_err(|e| ResearchError::Llm(e.to_string()))?;

        let parsed: Value = serde_json::from_str(&response.content).unwrap_or_default();
        let content = parsed["content"]
            .as_str()
            .map(String::from)
            .unwrap_or(response.content);

        Ok(Evidence {
            source: "researcher".to_string(),
            content,
            confidence: parsed["confidence"].as_f64().unwrap_or(0.7).clamp(0.0, 1.0),
            timestamp: Utc::now(),
            metadata: EvidenceMetadata {
                key_facts: string_list(&parsed["key_facts"]),
                sources: vec!["llm_synthesis".to_string()],
                gaps: string_list(&parsed["gaps"]),
                tools_used: step.tools.clone(),
            },
        })
    }
}

pub struct LlmCritic {
    model: Arc<dyn ChatModel>,
}

impl LlmCritic {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl Critic for LlmCritic {
    async fn evaluate(&self, state: &ResearchGraphState) -> Result<Critique, ResearchError> {
        let evidence = state
            .evidence
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n---\n");

        let response = self
            .model
            .complete(ChatRequest::new(
                "research-critic",
                vec![
                    ChatMessage::system("You grade research quality 0.0-1.0. mode:critic"),
                    ChatMessage::user(format!(
                        "Goal: {}\nEvidence:\n{evidence}\n\
                         Reply as JSON: {{\"score\": float, \"feedback\": str, \
                         \"strengths\": [str], \"weaknesses\": [str], \"suggestions\": [str]}}",
                        state.refined_goal
                    )),
                ],
            ))
            .await
            .map_err(|e| ResearchError::Llm(e.to_string()))?;

        let parsed: Value = serde_json::from_str(&response.content).unwrap_or_default();
        Ok(Critique {
            score: parsed["score"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0),
            feedback: parsed["feedback"].as_str().unwrap_or("").to_string(),
            strengths: string_list(&parsed["strengths"]),
            weaknesses: string_list(&parsed["weaknesses"]),
            suggestions: string_list(&parsed["suggestions"]),
        })
    }
}

fn string_list(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default()
}
