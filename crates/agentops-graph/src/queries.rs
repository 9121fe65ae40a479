// Cypher query constants for the agent state graph
//
// One eager query loads the full agent state; mutations are single-statement
// and idempotent where the schema requires it (MERGE on agent_id).

/// Load the agent node with eagerly-expanded children in one round trip.
pub const LOAD_AGENT_STATE: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
OPTIONAL MATCH (a)-[:HAS_RESPONSIBILITY]->(r:Responsibility)
OPTIONAL MATCH (a)-[:HAS_DIRECTIVE]->(d:Directive)
OPTIONAL MATCH (a)-[:HAS_SOP]->(s:SOP)
OPTIONAL MATCH (a)-[:CAN_EXECUTE]->(t:Tool)
OPTIONAL MATCH (a)-[:REPORTS_TO]->(sup:Agent)
OPTIONAL MATCH (a)-[:COLLABORATES_WITH]->(c:Agent)
RETURN a,
       collect(DISTINCT r) AS responsibilities,
       collect(DISTINCT d) AS directives,
       collect(DISTINCT s) AS sops,
       collect(DISTINCT t) AS tools,
       sup AS supervisor,
       collect(DISTINCT c.agent_id) AS collaborator_ids
"#;

pub const AGENT_EXISTS: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
RETURN count(a) > 0 AS exists
"#;

/// Idempotent upsert on agent_id: the tool graph and the agent state graph
/// MERGE on this key so no duplicate Agent nodes can exist.
pub const ENSURE_AGENT: &str = r#"
MERGE (a:Agent {agent_id: $agent_id})
ON CREATE SET a.designation = $designation,
              a.role = $role,
              a.mission = $mission,
              a.authority_level = $authority_level,
              a.status = $status,
              a.created_at = datetime()
RETURN a.agent_id AS agent_id
"#;

pub const ADD_DIRECTIVE: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
CREATE (d:Directive {
    directive_id: $directive_id,
    text: $text,
    context_category: $context_category,
    severity: $severity,
    created_by: $created_by,
    created_at: datetime()
})
CREATE (a)-[:HAS_DIRECTIVE]->(d)
RETURN d.directive_id AS directive_id
"#;

/// Title and priority are immutable; only the description changes.
pub const UPDATE_RESPONSIBILITY: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})-[:HAS_RESPONSIBILITY]->(r:Responsibility {title: $title})
SET r.description = $new_description
RETURN r.title AS title
"#;

/// Steps are appended at the tail, never reordered.
pub const ADD_SOP_STEP: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})-[:HAS_SOP]->(s:SOP {name: $sop_name})
SET s.steps = s.steps + $step
RETURN size(s.steps) AS step_count
"#;

pub const ATTACH_RESPONSIBILITY: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
MERGE (a)-[:HAS_RESPONSIBILITY]->(r:Responsibility {title: $title})
SET r.description = $description,
    r.priority = $priority
RETURN r.title AS title
"#;

pub const ATTACH_SOP: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
MERGE (a)-[:HAS_SOP]->(s:SOP {name: $name})
SET s.steps = $steps
RETURN s.name AS name
"#;

pub const GRANT_TOOL: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
MERGE (t:Tool {name: $name})
SET t.risk_level = $risk_level,
    t.requires_approval = $requires_approval,
    t.approval_source = $approval_source
MERGE (a)-[:CAN_EXECUTE]->(t)
RETURN t.name AS name
"#;

pub const SET_SUPERVISOR: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
MATCH (sup:Agent {agent_id: $supervisor_id})
MERGE (a)-[:REPORTS_TO]->(sup)
RETURN sup.agent_id AS supervisor_id
"#;

pub const ADD_COLLABORATOR: &str = r#"
MATCH (a:Agent {agent_id: $agent_id})
MATCH (c:Agent {agent_id: $collaborator_id})
MERGE (a)-[:COLLABORATES_WITH]->(c)
RETURN c.agent_id AS collaborator_id
"#;
