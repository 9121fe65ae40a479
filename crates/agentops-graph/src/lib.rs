// Graph-backed agent state
//
// The live, mutable description of each agent: responsibilities, directives,
// SOPs, and authorized tools, held as id-keyed nodes with explicit edges.
// Mutations flow through the governed self-modify protocol, which audits
// every change and invalidates cached hydrations. The hydrator fuses this
// mutable state with the immutable kernel stack into a runtime agent context.

pub mod bootstrap;
pub mod hydrator;
pub mod queries;
pub mod self_modify;
pub mod state;
pub mod store;

pub use bootstrap::bootstrap_canonical_graph;
pub use hydrator::{CacheInvalidation, GraphHydrator, HydratedAgentContext};
pub use self_modify::{AgentSelfModify, SelfModifyOutcome};
pub use state::{
    AgentGraphState, AgentSpec, Directive, Responsibility, RiskLevel, Severity, Sop, ToolGrant,
};
pub use store::{GraphError, GraphStateStore, InMemoryGraphStore, Neo4jGraphStore};
