// Canonical graph bootstrap
//
// Seeds the agent state graph once from the code-declared canonical set.
// Every operation is an idempotent MERGE, so re-running against an already
// bootstrapped graph is a no-op.

use tracing::info;

use crate::state::{AgentSpec, Responsibility, RiskLevel, Sop, ToolGrant};
use crate::store::{GraphError, GraphStateStore};

/// The canonical root agent every other agent reports to.
pub const ROOT_AGENT_ID: &str = "overseer";

/// The canonical primary executor agent.
pub const PRIMARY_AGENT_ID: &str = "L";

fn canonical_agents() -> Vec<AgentSpec> {
    vec![
        AgentSpec {
            agent_id: ROOT_AGENT_ID.to_string(),
            designation: "Overseer".to_string(),
            role: "supervisor".to_string(),
            mission: "Approve high-risk actions and own escalations".to_string(),
            authority_level: "ROOT".to_string(),
            status: "ACTIVE".to_string(),
        },
        AgentSpec {
            agent_id: PRIMARY_AGENT_ID.to_string(),
            designation: "L".to_string(),
            role: "executor".to_string(),
            mission: "Operate the substrate: research, tooling, memory governance".to_string(),
            authority_level: "SUPERVISED".to_string(),
            status: "ACTIVE".to_string(),
        },
    ]
}

fn canonical_responsibilities() -> Vec<Responsibility> {
    vec![
        Responsibility {
            title: "memory_governance".to_string(),
            description: "Keep the packet store consistent, pruned, and auditable".to_string(),
            priority: 1,
        },
        Responsibility {
            title: "tool_stewardship".to_string(),
            description: "Dispatch tools only through the audited chokepoint".to_string(),
            priority: 1,
        },
        Responsibility {
            title: "research_quality".to_string(),
            description: "Run research loops until the critic threshold is met".to_string(),
            priority: 2,
        },
    ]
}

fn canonical_sops() -> Vec<Sop> {
    vec![
        Sop {
            name: "code_deployment".to_string(),
            steps: vec![
                "Open a pull request".to_string(),
                "Wait for review approval".to_string(),
                "Merge and monitor".to_string(),
            ],
        },
        Sop {
            name: "incident_response".to_string(),
            steps: vec![
                "Capture the failing trace".to_string(),
                "Classify the failure".to_string(),
                "Apply the recovery chain".to_string(),
                "Escalate if the chain exhausts".to_string(),
            ],
        },
    ]
}

fn canonical_tools() -> Vec<ToolGrant> {
    vec![
        ToolGrant {
            name: "file_read".to_string(),
            risk_level: RiskLevel::Low,
            requires_approval: false,
            approval_source: None,
        },
        ToolGrant {
            name: "search".to_string(),
            risk_level: RiskLevel::Low,
            requires_approval: false,
            approval_source: None,
        },
        ToolGrant {
            name: "memory_write".to_string(),
            risk_level: RiskLevel::Medium,
            requires_approval: false,
            approval_source: None,
        },
        ToolGrant {
            name: "git_push".to_string(),
            risk_level: RiskLevel::High,
            requires_approval: true,
            approval_source: Some(ROOT_AGENT_ID.to_string()),
        },
        ToolGrant {
            name: "gmp_run".to_string(),
            risk_level: RiskLevel::High,
            requires_approval: true,
            approval_source: Some(ROOT_AGENT_ID.to_string()),
        },
    ]
}

/// Seed the canonical agent graph. Idempotent.
pub async fn bootstrap_canonical_graph(store: &dyn GraphStateStore) -> Result<(), GraphError> {
    for agent in canonical_agents() {
        store.ensure_agent(&agent).await?;
    }

    for responsibility in canonical_responsibilities() {
        store
            .attach_responsibility(PRIMARY_AGENT_ID, &responsibility)
            .await?;
    }

    for sop in canonical_sops() {
        store.attach_sop(PRIMARY_AGENT_ID, &sop).await?;
    }

    for tool in canonical_tools() {
        store.grant_tool(PRIMARY_AGENT_ID, &tool).await?;
    }

    store.set_supervisor(PRIMARY_AGENT_ID, ROOT_AGENT_ID).await?;

    info!("canonical agent graph bootstrapped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryGraphStore;

    #[tokio::test]
    async fn test_bootstrap_seeds_primary_agent() {
        let store = InMemoryGraphStore::new();
        bootstrap_canonical_graph(&store).await.unwrap();

        let state = store.load_agent_state(PRIMARY_AGENT_ID).await.unwrap();
        assert_eq!(state.supervisor_id.as_deref(), Some(ROOT_AGENT_ID));
        assert_eq!(state.responsibilities.len(), 3);
        assert_eq!(state.sops.len(), 2);
        assert!(state.tools_requiring_approval().len() >= 2);
    }

    #[tokio::test]
    async fn test_bootstrap_is_idempotent() {
        let store = InMemoryGraphStore::new();
        bootstrap_canonical_graph(&store).await.unwrap();
        bootstrap_canonical_graph(&store).await.unwrap();

        assert_eq!(store.agent_count(), 2);
        let state = store.load_agent_state(PRIMARY_AGENT_ID).await.unwrap();
        assert_eq!(state.responsibilities.len(), 3);
        assert_eq!(state.tools.len(), 5);
    }
}
