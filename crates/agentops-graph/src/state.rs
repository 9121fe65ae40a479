// Agent graph state types
//
// Id-keyed records with explicit edges; relationships are expressed through
// the store, not through shared ownership.

use serde::{Deserialize, Serialize};

/// Directive severity. HIGH and CRITICAL additions require approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
        }
    }

    /// HIGH and CRITICAL directives can only be added through the
    /// approval-gated path.
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tool risk classification in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// A responsibility assigned to an agent. Title is unique per agent; title
/// and priority are immutable after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Responsibility {
    pub title: String,
    pub description: String,
    pub priority: u32,
}

/// A behavioral directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Directive {
    pub text: String,
    pub context_category: String,
    pub severity: Severity,
    pub created_by: String,
}

/// A standard operating procedure: a named, ordered list of steps. Name is
/// unique per agent; steps are append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sop {
    pub name: String,
    pub steps: Vec<String>,
}

/// A tool the agent is authorized to execute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolGrant {
    pub name: String,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub approval_source: Option<String>,
}

/// Identity attributes of an agent node; used for the idempotent MERGE so the
/// tool graph and the agent state graph never duplicate a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub agent_id: String,
    pub designation: String,
    pub role: String,
    pub mission: String,
    pub authority_level: String,
    pub status: String,
}

/// Complete agent state loaded from the graph in one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentGraphState {
    pub agent_id: String,
    pub designation: String,
    pub role: String,
    pub mission: String,
    pub authority_level: String,
    pub status: String,

    pub responsibilities: Vec<Responsibility>,
    pub directives: Vec<Directive>,
    pub sops: Vec<Sop>,
    pub tools: Vec<ToolGrant>,

    pub supervisor_id: Option<String>,
    pub collaborator_ids: Vec<String>,
}

impl AgentGraphState {
    pub fn critical_directives(&self) -> Vec<&Directive> {
        self.directives
            .iter()
            .filter(|d| d.severity == Severity::Critical)
            .collect()
    }

    pub fn tools_requiring_approval(&self) -> Vec<&ToolGrant> {
        self.tools.iter().filter(|t| t.requires_approval).collect()
    }

    pub fn sop_steps(&self, sop_name: &str) -> Option<&[String]> {
        self.sops
            .iter()
            .find(|s| s.name == sop_name)
            .map(|s| s.steps.as_slice())
    }
}
