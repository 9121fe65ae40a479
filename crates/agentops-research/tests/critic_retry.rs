// End-to-end research graph scenarios with scripted agents

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use agentops_core::packet::MemorySegment;
use agentops_dispatch::{FnTool, ToolExecutionResult, ToolRegistry};
use agentops_observability::{MemoryMetrics, SubstrateIngestor};
use agentops_research::{
    Critic, Critique, Evidence, EvidenceMetadata, PlanOutcome, Planner, ResearchError,
    ResearchGraph, ResearchGraphConfig, ResearchGraphState, ResearchRuntime, ResearchStep,
    Researcher,
};
use agentops_storage::{InMemoryPacketStore, PacketStore};

struct OneStepPlanner {
    plans_issued: Mutex<u32>,
}

#[async_trait]
impl Planner for OneStepPlanner {
    async fn plan(&self, state: &ResearchGraphState) -> Result<PlanOutcome, ResearchError> {
        *self.plans_issued.lock() += 1;
        Ok(PlanOutcome {
            refined_goal: format!("refined: {}", state.original_query),
            steps: vec![
                ResearchStep::researcher("gather evidence", &state.original_query)
                    .with_tools(vec!["search".to_string(), "broken_tool".to_string()]),
            ],
        })
    }
}

struct FixedResearcher;

#[async_trait]
impl Researcher for FixedResearcher {
    async fn research(
        &self,
        step: &ResearchStep,
        tool_outputs: &[Value],
    ) -> Result<Evidence, ResearchError> {
        Ok(Evidence {
            source: "researcher".to_string(),
            content: format!("evidence for '{}' ({} tool outputs)", step.query, tool_outputs.len()),
            confidence: 0.4,
            timestamp: Utc::now(),
            metadata: EvidenceMetadata {
                tools_used: step.tools.clone(),
                ..EvidenceMetadata::default()
            },
        })
    }
}

struct FixedCritic {
    score: f64,
}

#[async_trait]
impl Critic for FixedCritic {
    async fn evaluate(&self, _state: &ResearchGraphState) -> Result<Critique, ResearchError> {
        Ok(Critique {
            score: self.score,
            feedback: "needs more depth".to_string(),
            strengths: vec![],
            weaknesses: vec!["shallow".to_string()],
            suggestions: vec!["add sources".to_string()],
        })
    }
}

fn tool_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    registry.register(Arc::new(FnTool::new("search", "search the web", |args| {
        ToolExecutionResult::success(json!({"results": [args.get("query")]}))
    })));
    registry.register(Arc::new(FnTool::new("broken_tool", "always fails", |_| {
        ToolExecutionResult::tool_error("backend unavailable")
    })));
    registry
}

fn harness(critic_score: f64) -> (Arc<InMemoryPacketStore>, ResearchRuntime) {
    let store = Arc::new(InMemoryPacketStore::new());
    let ingestor = Arc::new(SubstrateIngestor::new(
        store.clone(),
        Arc::new(MemoryMetrics::new()),
    ));

    let graph = ResearchGraph::new(
        Arc::new(OneStepPlanner {
            plans_issued: Mutex::new(0),
        }),
        Arc::new(FixedResearcher),
        Arc::new(FixedCritic { score: critic_score }),
        tool_registry(),
        ingestor.clone(),
        ResearchGraphConfig {
            critic_threshold: 0.7,
            max_retries: 2,
            top_n_findings: 5,
        },
    );

    (store, ResearchRuntime::new(graph, ingestor))
}

#[tokio::test]
async fn critic_retry_loop_finalizes_after_max_retries() {
    let (store, runtime) = harness(0.5);

    let state = runtime
        .execute("substrate memory governance", "user-1", Some("t-retry".to_string()))
        .await;

    // planning -> research -> critic looped until retry_count hit the cap.
    assert_eq!(state.retry_count, 2);
    assert_eq!(state.critic_score, 0.5);
    assert!(state.has_output());
    assert_eq!(state.final_output["critic_score"], json!(0.5));
    assert_eq!(state.final_output["retry_count"], json!(2));
    // One evidence per research pass (3 passes), tool failures skipped.
    assert_eq!(state.evidence.len(), 3);
    assert!(state.errors.is_empty());

    // Checkpoint reflects the final state.
    let checkpoint = store
        .load_checkpoint("research_graph:t-retry")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint["retry_count"], json!(2));
    assert_eq!(checkpoint["final_output"]["critic_score"], json!(0.5));
}

#[tokio::test]
async fn approved_run_finalizes_without_retry() {
    let (_, runtime) = harness(0.9);

    let state = runtime
        .execute("quick question", "user-1", Some("t-ok".to_string()))
        .await;

    assert_eq!(state.retry_count, 0);
    assert_eq!(state.critic_score, 0.9);
    assert!(state.has_output());
    assert_eq!(state.evidence.len(), 1);
}

#[tokio::test]
async fn insights_stored_as_packets() {
    let (store, runtime) = harness(0.9);

    let state = runtime
        .execute("memory governance research", "user-1", Some("t-ins".to_string()))
        .await;

    // One conclusion plus one finding for the single evidence item.
    assert_eq!(state.stored_insights.len(), 2);

    let insights = store
        .find_by_type(MemorySegment::Insight, None, None, 10)
        .await
        .unwrap();
    assert_eq!(insights.len(), 2);

    let conclusion = insights
        .iter()
        .find(|p| p.envelope.payload["type"] == json!("conclusion"))
        .unwrap();
    assert_eq!(conclusion.envelope.confidence.as_ref().unwrap().score, 0.9);
    assert_eq!(conclusion.thread_id.as_deref(), Some("t-ins"));
    assert!(conclusion.tags.iter().any(|t| t.starts_with("domain:")));

    let finding = insights
        .iter()
        .find(|p| p.envelope.payload["type"] == json!("finding"))
        .unwrap();
    // Findings inherit the evidence confidence.
    assert_eq!(finding.envelope.confidence.as_ref().unwrap().score, 0.4);
}

#[tokio::test]
async fn resume_from_checkpoint_completes_the_run() {
    let (store, runtime) = harness(0.9);

    // Seed a mid-run checkpoint: plan exists, research not yet done.
    let mut partial = ResearchGraphState::new("resumable query", "t-res", "user-1");
    partial.refined_goal = "refined: resumable query".to_string();
    partial
        .plan
        .push(ResearchStep::researcher("gather evidence", "resumable query"));
    store
        .save_checkpoint(
            "research_graph:t-res",
            serde_json::to_value(&partial).unwrap(),
        )
        .await
        .unwrap();

    let resumed = runtime.resume("t-res").await.unwrap().unwrap();
    assert!(resumed.has_output());
    assert_eq!(resumed.evidence.len(), 1);

    // Status reflects the completed run.
    let status = runtime.status("t-res").await.unwrap().unwrap();
    assert!(status.has_output);
    assert_eq!(status.total_steps, 1);
    assert_eq!(status.steps_completed, 1);
    assert_eq!(status.evidence_count, 1);

    // Unknown thread: no checkpoint.
    assert!(runtime.resume("t-missing").await.unwrap().is_none());
    assert!(runtime.status("t-missing").await.unwrap().is_none());
}
