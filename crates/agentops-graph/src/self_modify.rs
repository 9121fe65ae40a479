// Governed self-modification protocol
//
// The only runtime mutation surface for agent graph state. Every successful
// mutation writes an agent_self_modify audit packet and invalidates the
// hydrator cache for that agent. Approval gating:
//
//   - add_directive: HIGH/CRITICAL require prior approval, LOW/MEDIUM do not
//   - update_responsibility: never requires approval (description only)
//   - add_sop_step: never requires approval (appended at the tail)

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use agentops_core::packet::{MemorySegment, PacketEnvelope, PacketProvenance};
use agentops_storage::PacketStore;

use crate::hydrator::CacheInvalidation;
use crate::state::{Directive, Severity};
use crate::store::{GraphError, GraphStateStore};

/// Result of a successful self-modification.
#[derive(Debug, Clone)]
pub struct SelfModifyOutcome {
    pub action: String,
    pub detail: serde_json::Value,
}

/// Governed mutation service over the graph state store.
pub struct AgentSelfModify {
    graph: Arc<dyn GraphStateStore>,
    store: Arc<dyn PacketStore>,
    invalidation: Arc<dyn CacheInvalidation>,
}

impl AgentSelfModify {
    pub fn new(
        graph: Arc<dyn GraphStateStore>,
        store: Arc<dyn PacketStore>,
        invalidation: Arc<dyn CacheInvalidation>,
    ) -> Self {
        Self {
            graph,
            store,
            invalidation,
        }
    }

    /// Add a directive. HIGH and CRITICAL severities are rejected unless
    /// `approved` is set; on rejection no Directive node is created.
    pub async fn add_directive(
        &self,
        agent_id: &str,
        directive: Directive,
        approved: bool,
    ) -> Result<SelfModifyOutcome, GraphError> {
        if directive.severity.requires_approval() && !approved {
            warn!(
                %agent_id,
                severity = %directive.severity,
                "directive rejected: requires approval"
            );
            return Err(GraphError::ApprovalRequired {
                severity: directive.severity,
            });
        }

        let directive_id = self.graph.add_directive(agent_id, &directive).await?;

        let detail = json!({
            "directive_id": directive_id,
            "text": directive.text,
            "context_category": directive.context_category,
            "severity": directive.severity.as_str(),
            "approved": approved,
        });
        self.finish(agent_id, "add_directive", detail.clone()).await;

        info!(%agent_id, %directive_id, severity = %directive.severity, "agent added directive");
        Ok(SelfModifyOutcome {
            action: "add_directive".to_string(),
            detail,
        })
    }

    /// Update a responsibility description. Low risk; never gated.
    pub async fn update_responsibility(
        &self,
        agent_id: &str,
        title: &str,
        new_description: &str,
    ) -> Result<SelfModifyOutcome, GraphError> {
        self.graph
            .update_responsibility(agent_id, title, new_description)
            .await?;

        let detail = json!({
            "title": title,
            "new_description": new_description,
        });
        self.finish(agent_id, "update_responsibility", detail.clone())
            .await;

        info!(%agent_id, %title, "agent updated responsibility");
        Ok(SelfModifyOutcome {
            action: "update_responsibility".to_string(),
            detail,
        })
    }

    /// Append a step to an existing SOP. Low risk; never gated.
    pub async fn add_sop_step(
        &self,
        agent_id: &str,
        sop_name: &str,
        step: &str,
    ) -> Result<SelfModifyOutcome, GraphError> {
        let step_count = self.graph.add_sop_step(agent_id, sop_name, step).await?;

        let detail = json!({
            "sop_name": sop_name,
            "step": step,
            "step_count": step_count,
        });
        self.finish(agent_id, "add_sop_step", detail.clone()).await;

        info!(%agent_id, sop = %sop_name, step_count, "agent added SOP step");
        Ok(SelfModifyOutcome {
            action: "add_sop_step".to_string(),
            detail,
        })
    }

    /// Audit + cache invalidation shared by every successful mutation. Audit
    /// failures are logged and never fail the mutation itself.
    async fn finish(&self, agent_id: &str, action: &str, detail: serde_json::Value) {
        let mut packet = PacketEnvelope::new(
            MemorySegment::AgentSelfModify,
            json!({
                "action": action,
                "details": detail,
                "timestamp": Utc::now(),
            }),
        )
        .with_provenance(PacketProvenance {
            source: format!("agent_self_modify:{agent_id}"),
            parent_packet: None,
            tool: None,
        })
        .with_tags(vec!["self_modify".to_string(), action.to_string()]);
        packet.metadata.agent_id = Some(agent_id.to_string());
        packet.metadata.immutable = true;

        if let Err(e) = self.store.insert_packet(&packet).await {
            warn!(%agent_id, %action, error = %e, "failed to write self-modify audit packet");
        }

        self.invalidation.invalidate(agent_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{AgentSpec, Sop};
    use crate::store::InMemoryGraphStore;
    use agentops_storage::InMemoryPacketStore;
    use parking_lot::Mutex;

    struct RecordingInvalidation {
        invalidated: Mutex<Vec<String>>,
    }

    impl CacheInvalidation for RecordingInvalidation {
        fn invalidate(&self, agent_id: &str) {
            self.invalidated.lock().push(agent_id.to_string());
        }

        fn invalidate_all(&self) {}
    }

    async fn setup() -> (
        Arc<InMemoryGraphStore>,
        Arc<InMemoryPacketStore>,
        Arc<RecordingInvalidation>,
        AgentSelfModify,
    ) {
        let graph = Arc::new(InMemoryGraphStore::new());
        let store = Arc::new(InMemoryPacketStore::new());
        let invalidation = Arc::new(RecordingInvalidation {
            invalidated: Mutex::new(vec![]),
        });

        graph
            .ensure_agent(&AgentSpec {
                agent_id: "L".into(),
                designation: "L".into(),
                role: "executor".into(),
                mission: "test".into(),
                authority_level: "SUPERVISED".into(),
                status: "ACTIVE".into(),
            })
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

        let modify = AgentSelfModify::new(graph.clone(), store.clone(), invalidation.clone());
        (graph, store, invalidation, modify)
    }

    fn directive(severity: Severity) -> Directive {
        Directive {
            text: "always checkpoint before deploy".into(),
            context_category: "execution".into(),
            severity,
            created_by: "L".into(),
        }
    }

    #[tokio::test]
    async fn test_unapproved_critical_directive_rejected() {
        let (graph, store, _, modify) = setup().await;

        for severity in [Severity::High, Severity::Critical] {
            let result = modify.add_directive("L", directive(severity), false).await;
            assert!(matches!(result, Err(GraphError::ApprovalRequired { .. })));
        }

        // No directive node created, no audit packet written.
        let state = graph.load_agent_state("L").await.unwrap();
        assert!(state.directives.is_empty());
        let audits = store
            .find_by_type(MemorySegment::AgentSelfModify, None, None, 10)
            .await
            .unwrap();
        assert!(audits.is_empty());
    }

    #[tokio::test]
    async fn test_approved_critical_directive_lands() {
        let (graph, _, _, modify) = setup().await;
        modify
            .add_directive("L", directive(Severity::Critical), true)
            .await
            .unwrap();
        let state = graph.load_agent_state("L").await.unwrap();
        assert_eq!(state.critical_directives().len(), 1);
    }

    #[tokio::test]
    async fn test_low_directive_needs_no_approval() {
        let (graph, _, _, modify) = setup().await;
        modify
            .add_directive("L", directive(Severity::Low), false)
            .await
            .unwrap();
        assert_eq!(graph.load_agent_state("L").await.unwrap().directives.len(), 1);
    }

    #[tokio::test]
    async fn test_add_sop_step_audits_and_invalidates() {
        let (graph, store, invalidation, modify) = setup().await;

        let outcome = modify
            .add_sop_step("L", "code_deployment", "Run smoke tests")
            .await
            .unwrap();
        assert_eq!(outcome.detail["step_count"], serde_json::json!(2));

        // Step appended at the tail.
        let state = graph.load_agent_state("L").await.unwrap();
        assert_eq!(
            state.sop_steps("code_deployment").unwrap(),
            &["Open PR".to_string(), "Run smoke tests".to_string()]
        );

        // Audit packet of type agent_self_modify with action=add_sop_step.
        let audits = store
            .find_by_type(MemorySegment::AgentSelfModify, Some("L"), None, 10)
            .await
            .unwrap();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].envelope.payload["action"], serde_json::json!("add_sop_step"));
        assert!(audits[0].tags.contains(&"self_modify".to_string()));

        // Hydrator cache invalidated for L.
        assert_eq!(invalidation.invalidated.lock().as_slice(), &["L".to_string()]);
    }
}
