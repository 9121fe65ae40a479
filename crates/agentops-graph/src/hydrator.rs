// Graph-state hydrator
//
// Fuses the agent's immutable kernels with its mutable graph state into a
// runtime context, cached per agent. The cache is invalidated on every
// successful self-modify and on kernel hot-reload; readers get either the
// previous value or a freshly loaded one, never a partial update.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use agentops_core::llm::{ChatMessage, ChatModel, ChatRequest};
use agentops_kernel::KernelStack;

use crate::state::Severity;
use crate::store::{GraphError, GraphStateStore};

/// Fan-out seam for cache invalidation: self-modify and kernel reload call
/// through this, every holder of agent-state-derived values subscribes.
pub trait CacheInvalidation: Send + Sync {
    fn invalidate(&self, agent_id: &str);
    fn invalidate_all(&self);
}

/// Runtime agent context combining graph state and kernel law.
#[derive(Debug, Clone, PartialEq)]
pub struct HydratedAgentContext {
    pub agent_id: String,
    pub designation: String,
    pub role: String,
    pub mission: String,
    pub authority_level: String,

    // From the graph (mutable state)
    pub responsibilities: Vec<String>,
    pub critical_directives: Vec<String>,
    pub sops: HashMap<String, Vec<String>>,
    pub available_tools: Vec<String>,
    pub tools_requiring_approval: Vec<String>,

    // From the kernels (immutable law)
    pub system_prompt: String,
    pub safety_constraints: Vec<String>,

    pub supervisor_id: Option<String>,
}

impl HydratedAgentContext {
    /// Stable textual rendering suitable for prepending to LLM prompts.
    pub fn to_system_prompt_context(&self) -> String {
        let mut lines = vec![
            format!("# Agent Identity: {}", self.designation),
            format!("Role: {}", self.role),
            format!("Mission: {}", self.mission),
            format!("Authority Level: {}", self.authority_level),
            String::new(),
            "## Responsibilities".to_string(),
        ];

        for responsibility in &self.responsibilities {
            lines.push(format!("- {responsibility}"));
        }

        lines.push(String::new());
        lines.push("## Critical Directives (NEVER violate)".to_string());
        for directive in &self.critical_directives {
            lines.push(format!("- {directive}"));
        }

        lines.push(String::new());
        lines.push("## Available Tools".to_string());
        for tool in &self.available_tools {
            let approval = if self.tools_requiring_approval.contains(tool) {
                " [REQUIRES APPROVAL]"
            } else {
                ""
            };
            lines.push(format!("- {tool}{approval}"));
        }

        if let Some(supervisor) = &self.supervisor_id {
            lines.push(String::new());
            lines.push(format!("## Supervisor: {supervisor}"));
            lines.push("You MUST respect supervisor authority on all decisions.".to_string());
        }

        lines.join("\n")
    }
}

/// Hydrates agent state from the graph, fused with the kernel stack.
pub struct GraphHydrator {
    graph: Arc<dyn GraphStateStore>,
    kernels: RwLock<Option<Arc<KernelStack>>>,
    cache: RwLock<HashMap<String, Arc<HydratedAgentContext>>>,
    adjudicator: Option<Arc<dyn ChatModel>>,
}

impl GraphHydrator {
    pub fn new(graph: Arc<dyn GraphStateStore>) -> Self {
        Self {
            graph,
            kernels: RwLock::new(None),
            cache: RwLock::new(HashMap::new()),
            adjudicator: None,
        }
    }

    /// Attach a chat model used to adjudicate ambiguous directive-compliance
    /// checks. Without one, only the deterministic prefilter runs.
    pub fn with_adjudicator(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.adjudicator = Some(model);
        self
    }

    /// Install (or replace) the kernel stack; called at boot and on hot
    /// reload. Replacing the stack drops every cached hydration.
    pub fn set_kernels(&self, stack: Arc<KernelStack>) {
        *self.kernels.write() = Some(stack);
        self.invalidate_all();
    }

    /// Hydrate the runtime context for an agent, from cache when warm.
    pub async fn hydrate(&self, agent_id: &str) -> Result<Arc<HydratedAgentContext>, GraphError> {
        if let Some(cached) = self.cache.read().get(agent_id) {
            debug!(%agent_id, "using cached hydration");
            return Ok(cached.clone());
        }

        let state = self.graph.load_agent_state(agent_id).await?;

        let (system_prompt, safety_constraints) = {
            let kernels = self.kernels.read();
            match kernels.as_ref() {
                Some(stack) => (
                    stack.system_prompt().unwrap_or_default().to_string(),
                    stack.safety_constraints(),
                ),
                None => (String::new(), Vec::new()),
            }
        };

        let context = Arc::new(HydratedAgentContext {
            agent_id: state.agent_id.clone(),
            designation: state.designation.clone(),
            role: state.role.clone(),
            mission: state.mission.clone(),
            authority_level: state.authority_level.clone(),
            responsibilities: state
                .responsibilities
                .iter()
                .map(|r| format!("{}: {}", r.title, r.description))
                .collect(),
            critical_directives: state
                .directives
                .iter()
                .filter(|d| d.severity == Severity::Critical)
                .map(|d| d.text.clone())
                .collect(),
            sops: state
                .sops
                .iter()
                .map(|s| (s.name.clone(), s.steps.clone()))
                .collect(),
            available_tools: state.tools.iter().map(|t| t.name.clone()).collect(),
            tools_requiring_approval: state
                .tools
                .iter()
                .filter(|t| t.requires_approval)
                .map(|t| t.name.clone())
                .collect(),
            system_prompt,
            safety_constraints,
            supervisor_id: state.supervisor_id.clone(),
        });

        self.cache
            .write()
            .insert(agent_id.to_string(), context.clone());

        info!(
            %agent_id,
            responsibilities = context.responsibilities.len(),
            critical_directives = context.critical_directives.len(),
            tools = context.available_tools.len(),
            "hydrated agent context"
        );

        Ok(context)
    }

    /// Whether a tool requires approval for this agent, and from whom.
    /// Unknown tools require approval by default.
    pub async fn check_tool_approval(
        &self,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<(bool, Option<String>), GraphError> {
        let state = self.graph.load_agent_state(agent_id).await?;
        for tool in &state.tools {
            if tool.name == tool_name {
                return Ok((tool.requires_approval, tool.approval_source.clone()));
            }
        }
        Ok((true, None))
    }

    /// Pre-execution check of a proposed action against the agent's CRITICAL
    /// directives. The deterministic prefilter catches obvious violations;
    /// ambiguous cases go to the adjudicator when configured.
    ///
    /// Returns `(is_compliant, violated_directive_texts)`.
    pub async fn validate_directive_compliance(
        &self,
        agent_id: &str,
        proposed_action: &str,
    ) -> Result<(bool, Vec<String>), GraphError> {
        let context = self.hydrate(agent_id).await?;
        let action = proposed_action.to_lowercase();

        let mut violations: Vec<String> = context
            .critical_directives
            .iter()
            .filter(|directive| prefilter_violates(directive, &action))
            .cloned()
            .collect();

        if violations.is_empty() {
            if let Some(adjudicator) = &self.adjudicator {
                violations = self
                    .adjudicate(adjudicator, &context.critical_directives, proposed_action)
                    .await;
            }
        }

        Ok((violations.is_empty(), violations))
    }

    async fn adjudicate(
        &self,
        model: &Arc<dyn ChatModel>,
        directives: &[String],
        proposed_action: &str,
    ) -> Vec<String> {
        if directives.is_empty() {
            return Vec::new();
        }

        let request = ChatRequest::new(
            "directive-adjudicator",
            vec![
                ChatMessage::system(
                    "You review a proposed agent action against critical directives. \
                     Reply COMPLIANT, or one line per violated directive prefixed \
                     'VIOLATION: '. mode:directive_adjudicator",
                ),
                ChatMessage::user(format!(
                    "Directives:\n{}\n\nProposed action: {proposed_action}",
                    directives.join("\n")
                )),
            ],
        );

        match model.complete(request).await {
            Ok(response) => response
                .content
                .lines()
                .filter_map(|line| line.strip_prefix("VIOLATION: "))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                // The adjudicator is advisory; its failure never blocks.
                warn!(error = %e, "directive adjudication failed, treating as compliant");
                Vec::new()
            }
        }
    }
}

/// Deterministic substring prefilter for directive violations.
fn prefilter_violates(directive: &str, action_lower: &str) -> bool {
    let directive_lower = directive.to_lowercase();

    if directive_lower.contains("no deletion") && action_lower.contains("delete") {
        return true;
    }
    if directive_lower.contains("must respect supervisor")
        && action_lower.contains("override supervisor")
    {
        return true;
    }
    // "NEVER <verb> ..." directives: flag actions mentioning the verb.
    if let Some(rest) = directive_lower.strip_prefix("never ") {
        if let Some(verb) = rest.split_whitespace().next() {
            if action_lower.contains(verb) {
                return true;
            }
        }
    }

    false
}

impl CacheInvalidation for GraphHydrator {
    fn invalidate(&self, agent_id: &str) {
        self.cache.write().remove(agent_id);
        debug!(%agent_id, "invalidated hydration cache");
    }

    fn invalidate_all(&self) {
        self.cache.write().clear();
        debug!("invalidated all hydration caches");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentSpec, Directive, Responsibility, RiskLevel, Sop, ToolGrant};
    use crate::store::InMemoryGraphStore;
    use agentops_core::llm::MockChatModel;

    async fn seeded_graph() -> Arc<InMemoryGraphStore> {
        let graph = Arc::new(InMemoryGraphStore::new());
        graph
            .ensure_agent(&AgentSpec {
                agent_id: "L".into(),
                designation: "L".into(),
                role: "executor".into(),
                mission: "govern the substrate".into(),
                authority_level: "SUPERVISED".into(),
                status: "ACTIVE".into(),
            })
            .await
            .unwrap();
        graph
            .attach_responsibility(
                "L",
                &Responsibility {
                    title: "memory_governance".into(),
                    description: "keep the packet store clean".into(),
                    priority: 1,
                },
            )
            .await
            .unwrap();
        graph
            .add_directive(
                "L",
                &Directive {
                    text: "NO deletion of substrate records".into(),
                    context_category: "safety".into(),
                    severity: Severity::Critical,
                    created_by: "bootstrap".into(),
                },
            )
            .await
            .unwrap();
        graph
            .attach_sop(
                "L",
                &Sop {
                    name: "code_deployment".into(),
                    steps: vec!["Open PR".into()],
                },
            )
            .await
            .unwrap();
        graph
            .grant_tool(
                "L",
                &ToolGrant {
                    name: "gmp_run".into(),
                    risk_level: RiskLevel::High,
                    requires_approval: true,
                    approval_source: Some("supervisor".into()),
                },
            )
            .await
            .unwrap();
        graph
            .grant_tool(
                "L",
                &ToolGrant {
                    name: "file_read".into(),
                    risk_level: RiskLevel::Low,
                    requires_approval: false,
                    approval_source: None,
                },
            )
            .await
            .unwrap();
        graph
    }

    #[tokio::test]
    async fn test_hydrate_is_idempotent() {
        let hydrator = GraphHydrator::new(seeded_graph().await);
        let first = hydrator.hydrate("L").await.unwrap();
        let second = hydrator.hydrate("L").await.unwrap();
        assert_eq!(*first, *second);
    }

    #[tokio::test]
    async fn test_hydrated_context_content() {
        let hydrator = GraphHydrator::new(seeded_graph().await);
        let context = hydrator.hydrate("L").await.unwrap();

        assert_eq!(context.critical_directives, vec!["NO deletion of substrate records".to_string()]);
        assert_eq!(context.tools_requiring_approval, vec!["gmp_run".to_string()]);
        assert_eq!(context.sops["code_deployment"], vec!["Open PR".to_string()]);

        let prompt = context.to_system_prompt_context();
        assert!(prompt.contains("# Agent Identity: L"));
        assert!(prompt.contains("- gmp_run [REQUIRES APPROVAL]"));
        assert!(prompt.contains("- file_read\n") || prompt.ends_with("- file_read"));
    }

    #[tokio::test]
    async fn test_invalidation_reloads_fresh_state() {
        let graph = seeded_graph().await;
        let hydrator = GraphHydrator::new(graph.clone());

        let before = hydrator.hydrate("L").await.unwrap();
        assert_eq!(before.sops["code_deployment"].len(), 1);

        graph.add_sop_step("L", "code_deployment", "Merge").await.unwrap();
        // Cache still serves the old value until invalidated.
        assert_eq!(hydrator.hydrate("L").await.unwrap().sops["code_deployment"].len(), 1);

        hydrator.invalidate("L");
        assert_eq!(hydrator.hydrate("L").await.unwrap().sops["code_deployment"].len(), 2);
    }

    #[tokio::test]
    async fn test_tool_approval_defaults_for_unknown() {
        let hydrator = GraphHydrator::new(seeded_graph().await);
        let (requires, source) = hydrator.check_tool_approval("L", "gmp_run").await.unwrap();
        assert!(requires);
        assert_eq!(source.as_deref(), Some("supervisor"));

        let (requires, source) = hydrator.check_tool_approval("L", "unknown_tool").await.unwrap();
        assert!(requires);
        assert!(source.is_none());
    }

    #[tokio::test]
    async fn test_directive_prefilter_catches_deletion() {
        let hydrator = GraphHydrator::new(seeded_graph().await);

        let (compliant, violations) = hydrator
            .validate_directive_compliance("L", "delete all packets older than a day")
            .await
            .unwrap();
        assert!(!compliant);
        assert_eq!(violations, vec!["NO deletion of substrate records".to_string()]);

        let (compliant, violations) = hydrator
            .validate_directive_compliance("L", "summarize the last session")
            .await
            .unwrap();
        assert!(compliant);
        assert!(violations.is_empty());
    }

    #[tokio::test]
    async fn test_ambiguous_case_escalates_to_adjudicator() {
        let adjudicator = Arc::new(
            MockChatModel::new().with_response(
                "directive_adjudicator",
                "VIOLATION: NO deletion of substrate records",
            ),
        );
        let hydrator = GraphHydrator::new(seeded_graph().await).with_adjudicator(adjudicator);

        // "purge" slips past the substring prefilter; the adjudicator flags it.
        let (compliant, violations) = hydrator
            .validate_directive_compliance("L", "purge stale records")
            .await
            .unwrap();
        assert!(!compliant);
        assert_eq!(violations.len(), 1);
    }
}
