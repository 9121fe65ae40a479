// Graph state store - Bolt-backed with an in-memory twin for tests
//
// The Neo4j implementation acquires a session per operation and never holds
// long-running transactions. The in-memory implementation mirrors semantics
// closely enough for the governance and hydration tests to run without a
// graph database.

use std::collections::HashMap;

use async_trait::async_trait;
use neo4rs::{query, Graph, Node};
use parking_lot::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::queries;
use crate::state::{
    AgentGraphState, AgentSpec, Directive, Responsibility, RiskLevel, Severity, Sop, ToolGrant,
};

/// Error type for graph state operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("agent not found in graph: {0}")]
    AgentNotFound(String),

    #[error("responsibility not found: {0}")]
    ResponsibilityNotFound(String),

    #[error("SOP not found: {0}")]
    SopNotFound(String),

    #[error("{severity} directives require approval")]
    ApprovalRequired { severity: Severity },

    #[error("graph driver error: {0}")]
    Driver(String),

    #[error("audit write failed: {0}")]
    Audit(String),
}

/// The agent state graph contract.
///
/// The three governed mutations (add_directive, update_responsibility,
/// add_sop_step) are the only runtime changes; the attach/grant operations
/// exist for the one-time canonical bootstrap. Removing a CRITICAL directive,
/// changing REPORTS_TO, or downgrading a Tool's requires_approval have no
/// API, anywhere.
#[async_trait]
pub trait GraphStateStore: Send + Sync {
    /// Idempotent upsert on agent_id (MERGE semantics, never a duplicate).
    async fn ensure_agent(&self, spec: &AgentSpec) -> Result<(), GraphError>;

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, GraphError>;

    /// Load the full agent state in one query.
    async fn load_agent_state(&self, agent_id: &str) -> Result<AgentGraphState, GraphError>;

    /// Append a directive; returns the new directive id. Approval gating is
    /// enforced by the self-modify protocol above this call.
    async fn add_directive(
        &self,
        agent_id: &str,
        directive: &Directive,
    ) -> Result<String, GraphError>;

    /// Update a responsibility's description. Title and priority are
    /// immutable.
    async fn update_responsibility(
        &self,
        agent_id: &str,
        title: &str,
        new_description: &str,
    ) -> Result<(), GraphError>;

    /// Append a step at the tail of an SOP; returns the new step count.
    async fn add_sop_step(
        &self,
        agent_id: &str,
        sop_name: &str,
        step: &str,
    ) -> Result<usize, GraphError>;

    // Bootstrap-only operations.

    async fn attach_responsibility(
        &self,
        agent_id: &str,
        responsibility: &Responsibility,
    ) -> Result<(), GraphError>;

    async fn attach_sop(&self, agent_id: &str, sop: &Sop) -> Result<(), GraphError>;

    async fn grant_tool(&self, agent_id: &str, tool: &ToolGrant) -> Result<(), GraphError>;

    async fn set_supervisor(&self, agent_id: &str, supervisor_id: &str) -> Result<(), GraphError>;

    async fn add_collaborator(
        &self,
        agent_id: &str,
        collaborator_id: &str,
    ) -> Result<(), GraphError>;
}

// ============================================================================
// Neo4j implementation
// ============================================================================

/// Bolt-backed graph state store.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    /// Connect to the graph database.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self, GraphError> {
        let graph = Graph::new(uri, user, password)
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;
        info!(%uri, "connected to graph store");
        Ok(Self { graph })
    }

    fn node_string(node: &Node, key: &str) -> String {
        node.get::<String>(key).unwrap_or_default()
    }

    fn parse_severity(raw: &str) -> Severity {
        match raw {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "LOW" => Severity::Low,
            _ => Severity::Medium,
        }
    }

    fn parse_risk(raw: &str) -> RiskLevel {
        match raw {
            "HIGH" => RiskLevel::High,
            "MEDIUM" => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

#[async_trait]
impl GraphStateStore for Neo4jGraphStore {
    async fn ensure_agent(&self, spec: &AgentSpec) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::ENSURE_AGENT)
                    .param("agent_id", spec.agent_id.as_str())
                    .param("designation", spec.designation.as_str())
                    .param("role", spec.role.as_str())
                    .param("mission", spec.mission.as_str())
                    .param("authority_level", spec.authority_level.as_str())
                    .param("status", spec.status.as_str()),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;
        debug!(agent_id = %spec.agent_id, "ensured agent node");
        Ok(())
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, GraphError> {
        let mut result = self
            .graph
            .execute(query(queries::AGENT_EXISTS).param("agent_id", agent_id))
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;

        let row = result
            .next()
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;
        Ok(row.and_then(|r| r.get::<bool>("exists").ok()).unwrap_or(false))
    }

    async fn load_agent_state(&self, agent_id: &str) -> Result<AgentGraphState, GraphError> {
        let mut result = self
            .graph
            .execute(query(queries::LOAD_AGENT_STATE).param("agent_id", agent_id))
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;

        let row = result
            .next()
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;

        let agent: Node = row
            .get("a")
            .map_err(|_| GraphError::AgentNotFound(agent_id.to_string()))?;

        let responsibilities = row
            .get::<Vec<Node>>("responsibilities")
            .unwrap_or_default()
            .iter()
            .map(|n| Responsibility {
                title: Self::node_string(n, "title"),
                description: Self::node_string(n, "description"),
                priority: n.get::<i64>("priority").unwrap_or(1) as u32,
            })
            .collect();

        let directives = row
            .get::<Vec<Node>>("directives")
            .unwrap_or_default()
            .iter()
            .map(|n| Directive {
                text: Self::node_string(n, "text"),
                context_category: Self::node_string(n, "context_category"),
                severity: Self::parse_severity(&Self::node_string(n, "severity")),
                created_by: Self::node_string(n, "created_by"),
            })
            .collect();

        let sops = row
            .get::<Vec<Node>>("sops")
            .unwrap_or_default()
            .iter()
            .map(|n| Sop {
                name: Self::node_string(n, "name"),
                steps: n.get::<Vec<String>>("steps").unwrap_or_default(),
            })
            .collect();

        let tools = row
            .get::<Vec<Node>>("tools")
            .unwrap_or_default()
            .iter()
            .map(|n| ToolGrant {
                name: Self::node_string(n, "name"),
                risk_level: Self::parse_risk(&Self::node_string(n, "risk_level")),
                requires_approval: n.get::<bool>("requires_approval").unwrap_or(false),
                approval_source: n.get::<String>("approval_source").ok(),
            })
            .collect();

        let supervisor_id = row
            .get::<Node>("supervisor")
            .ok()
            .map(|n| Self::node_string(&n, "agent_id"));

        let collaborator_ids = row.get::<Vec<String>>("collaborator_ids").unwrap_or_default();

        Ok(AgentGraphState {
            agent_id: Self::node_string(&agent, "agent_id"),
            designation: Self::node_string(&agent, "designation"),
            role: Self::node_string(&agent, "role"),
            mission: Self::node_string(&agent, "mission"),
            authority_level: Self::node_string(&agent, "authority_level"),
            status: Self::node_string(&agent, "status"),
            responsibilities,
            directives,
            sops,
            tools,
            supervisor_id,
            collaborator_ids,
        })
    }

    async fn add_directive(
        &self,
        agent_id: &str,
        directive: &Directive,
    ) -> Result<String, GraphError> {
        let directive_id = Uuid::new_v4().to_string();
        let mut result = self
            .graph
            .execute(
                query(queries::ADD_DIRECTIVE)
                    .param("agent_id", agent_id)
                    .param("directive_id", directive_id.as_str())
                    .param("text", directive.text.as_str())
                    .param("context_category", directive.context_category.as_str())
                    .param("severity", directive.severity.as_str())
                    .param("created_by", directive.created_by.as_str()),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;

        result
            .next()
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;

        Ok(directive_id)
    }

    async fn update_responsibility(
        &self,
        agent_id: &str,
        title: &str,
        new_description: &str,
    ) -> Result<(), GraphError> {
        let mut result = self
            .graph
            .execute(
                query(queries::UPDATE_RESPONSIBILITY)
                    .param("agent_id", agent_id)
                    .param("title", title)
                    .param("new_description", new_description),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;

        result
            .next()
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?
            .ok_or_else(|| GraphError::ResponsibilityNotFound(title.to_string()))?;
        Ok(())
    }

    async fn add_sop_step(
        &self,
        agent_id: &str,
        sop_name: &str,
        step: &str,
    ) -> Result<usize, GraphError> {
        let mut result = self
            .graph
            .execute(
                query(queries::ADD_SOP_STEP)
                    .param("agent_id", agent_id)
                    .param("sop_name", sop_name)
                    .param("step", vec![step.to_string()]),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?;

        let row = result
            .next()
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))?
            .ok_or_else(|| GraphError::SopNotFound(sop_name.to_string()))?;

        Ok(row.get::<i64>("step_count").unwrap_or(0) as usize)
    }

    async fn attach_responsibility(
        &self,
        agent_id: &str,
        responsibility: &Responsibility,
    ) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::ATTACH_RESPONSIBILITY)
                    .param("agent_id", agent_id)
                    .param("title", responsibility.title.as_str())
                    .param("description", responsibility.description.as_str())
                    .param("priority", responsibility.priority as i64),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))
    }

    async fn attach_sop(&self, agent_id: &str, sop: &Sop) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::ATTACH_SOP)
                    .param("agent_id", agent_id)
                    .param("name", sop.name.as_str())
                    .param("steps", sop.steps.clone()),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))
    }

    async fn grant_tool(&self, agent_id: &str, tool: &ToolGrant) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::GRANT_TOOL)
                    .param("agent_id", agent_id)
                    .param("name", tool.name.as_str())
                    .param("risk_level", tool.risk_level.as_str())
                    .param("requires_approval", tool.requires_approval)
                    .param(
                        "approval_source",
                        tool.approval_source.clone().unwrap_or_default(),
                    ),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))
    }

    async fn set_supervisor(&self, agent_id: &str, supervisor_id: &str) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::SET_SUPERVISOR)
                    .param("agent_id", agent_id)
                    .param("supervisor_id", supervisor_id),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))
    }

    async fn add_collaborator(
        &self,
        agent_id: &str,
        collaborator_id: &str,
    ) -> Result<(), GraphError> {
        self.graph
            .run(
                query(queries::ADD_COLLABORATOR)
                    .param("agent_id", agent_id)
                    .param("collaborator_id", collaborator_id),
            )
            .await
            .map_err(|e| GraphError::Driver(e.to_string()))
    }
}

// ============================================================================
// In-memory implementation (tests)
// ============================================================================

/// In-memory graph state store with the same semantics as the Bolt backend.
pub struct InMemoryGraphStore {
    agents: RwLock<HashMap<String, AgentGraphState>>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
        }
    }

    pub fn agent_count(&self) -> usize {
        self.agents.read().len()
    }
}

impl Default for InMemoryGraphStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GraphStateStore for InMemoryGraphStore {
    async fn ensure_agent(&self, spec: &AgentSpec) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        // MERGE semantics: an existing node is left untouched.
        agents
            .entry(spec.agent_id.clone())
            .or_insert_with(|| AgentGraphState {
                agent_id: spec.agent_id.clone(),
                designation: spec.designation.clone(),
                role: spec.role.clone(),
                mission: spec.mission.clone(),
                authority_level: spec.authority_level.clone(),
                status: spec.status.clone(),
                responsibilities: vec![],
                directives: vec![],
                sops: vec![],
                tools: vec![],
                supervisor_id: None,
                collaborator_ids: vec![],
            });
        Ok(())
    }

    async fn agent_exists(&self, agent_id: &str) -> Result<bool, GraphError> {
        Ok(self.agents.read().contains_key(agent_id))
    }

    async fn load_agent_state(&self, agent_id: &str) -> Result<AgentGraphState, GraphError> {
        self.agents
            .read()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))
    }

    async fn add_directive(
        &self,
        agent_id: &str,
        directive: &Directive,
    ) -> Result<String, GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        agent.directives.push(directive.clone());
        Ok(Uuid::new_v4().to_string())
    }

    async fn update_responsibility(
        &self,
        agent_id: &str,
        title: &str,
        new_description: &str,
    ) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        let responsibility = agent
            .responsibilities
            .iter_mut()
            .find(|r| r.title == title)
            .ok_or_else(|| GraphError::ResponsibilityNotFound(title.to_string()))?;
        responsibility.description = new_description.to_string();
        Ok(())
    }

    async fn add_sop_step(
        &self,
        agent_id: &str,
        sop_name: &str,
        step: &str,
    ) -> Result<usize, GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        let sop = agent
            .sops
            .iter_mut()
            .find(|s| s.name == sop_name)
            .ok_or_else(|| GraphError::SopNotFound(sop_name.to_string()))?;
        sop.steps.push(step.to_string());
        Ok(sop.steps.len())
    }

    async fn attach_responsibility(
        &self,
        agent_id: &str,
        responsibility: &Responsibility,
    ) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        // Title is unique per agent.
        match agent
            .responsibilities
            .iter_mut()
            .find(|r| r.title == responsibility.title)
        {
            Some(existing) => *existing = responsibility.clone(),
            None => agent.responsibilities.push(responsibility.clone()),
        }
        Ok(())
    }

    async fn attach_sop(&self, agent_id: &str, sop: &Sop) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        match agent.sops.iter_mut().find(|s| s.name == sop.name) {
            Some(existing) => *existing = sop.clone(),
            None => agent.sops.push(sop.clone()),
        }
        Ok(())
    }

    async fn grant_tool(&self, agent_id: &str, tool: &ToolGrant) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        match agent.tools.iter_mut().find(|t| t.name == tool.name) {
            Some(existing) => *existing = tool.clone(),
            None => agent.tools.push(tool.clone()),
        }
        Ok(())
    }

    async fn set_supervisor(&self, agent_id: &str, supervisor_id: &str) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        if !agents.contains_key(supervisor_id) {
            return Err(GraphError::AgentNotFound(supervisor_id.to_string()));
        }
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        agent.supervisor_id = Some(supervisor_id.to_string());
        Ok(())
    }

    async fn add_collaborator(
        &self,
        agent_id: &str,
        collaborator_id: &str,
    ) -> Result<(), GraphError> {
        let mut agents = self.agents.write();
        if !agents.contains_key(collaborator_id) {
            return Err(GraphError::AgentNotFound(collaborator_id.to_string()));
        }
        let agent = agents
            .get_mut(agent_id)
            .ok_or_else(|| GraphError::AgentNotFound(agent_id.to_string()))?;
        if !agent.collaborator_ids.contains(&collaborator_id.to_string()) {
            agent.collaborator_ids.push(collaborator_id.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(agent_id: &str) -> AgentSpec {
        AgentSpec {
            agent_id: agent_id.to_string(),
            designation: agent_id.to_string(),
            role: "executor".to_string(),
            mission: "test".to_string(),
            authority_level: "SUPERVISED".to_string(),
            status: "ACTIVE".to_string(),
        }
    }

    #[tokio::test]
    async fn test_ensure_agent_is_idempotent() {
        let store = InMemoryGraphStore::new();
        store.ensure_agent(&spec("L")).await.unwrap();

        let mut changed = spec("L");
        changed.role = "other".to_string();
        store.ensure_agent(&changed).await.unwrap();

        assert_eq!(store.agent_count(), 1);
        let state = store.load_agent_state("L").await.unwrap();
        // MERGE keeps the original node.
        assert_eq!(state.role, "executor");
    }

    #[tokio::test]
    async fn test_sop_step_appends_at_tail() {
        let store = InMemoryGraphStore::new();
        store.ensure_agent(&spec("L")).await.unwrap();
        store
            .attach_sop(
                "L",
                &Sop {
                    name: "code_deployment".into(),
                    steps: vec!["Open PR".into(), "Merge".into()],
                },
            )
            .await
            .unwrap();

        let count = store.add_sop_step("L", "code_deployment", "Run smoke tests").await.unwrap();
        assert_eq!(count, 3);

        let state = store.load_agent_state("L").await.unwrap();
        assert_eq!(
            state.sop_steps("code_deployment").unwrap().last().unwrap(),
            "Run smoke tests"
        );
    }

    #[tokio::test]
    async fn test_update_responsibility_keeps_title_and_priority() {
        let store = InMemoryGraphStore::new();
        store.ensure_agent(&spec("L")).await.unwrap();
        store
            .attach_responsibility(
                "L",
                &Responsibility {
                    title: "memory_governance".into(),
                    description: "old".into(),
                    priority: 2,
                },
            )
            .await
            .unwrap();

        store
            .update_responsibility("L", "memory_governance", "new description")
            .await
            .unwrap();

        let state = store.load_agent_state("L").await.unwrap();
        assert_eq!(state.responsibilities[0].description, "new description");
        assert_eq!(state.responsibilities[0].priority, 2);

        let missing = store.update_responsibility("L", "absent", "x").await;
        assert!(matches!(missing, Err(GraphError::ResponsibilityNotFound(_))));
    }

    #[tokio::test]
    async fn test_unknown_agent_errors() {
        let store = InMemoryGraphStore::new();
        assert!(matches!(
            store.load_agent_state("ghost").await,
            Err(GraphError::AgentNotFound(_))
        ));
    }
}
