// Research orchestration DAG
//
// planning -> research -> critic -> (retry loop | finalize) -> store_insights
//
// Node execution is strictly sequential per thread; the full state is
// checkpointed to the packet store after every node transition and can be
// resumed from the last checkpoint.

pub mod agents;
pub mod graph;
pub mod insights;
pub mod runtime;
pub mod state;

pub use agents::{
    Critic, Critique, LlmCritic, LlmPlanner, LlmResearcher, PlanOutcome, Planner, Researcher,
};
pub use graph::{decide_after_critic, GraphNode, ResearchGraph, ResearchGraphConfig};
pub use insights::extract_insights;
pub use runtime::{ResearchError, ResearchRuntime, ResearchStatus};
pub use state::{Evidence, EvidenceMetadata, ResearchGraphState, ResearchStep, StepAgent, StepStatus};
