//! Kernel manifest schemas
//!
//! Each kernel kind has a YAML manifest validated at load time. The manifest
//! struct is shared across kinds; kind-specific required fields are enforced
//! by `validate`.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error type for kernel operations
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    /// A required manifest file is absent
    #[error("kernel manifest missing: {0}")]
    Missing(KernelKind),

    /// Manifest could not be read
    #[error("failed to read kernel manifest {kind}: {source}")]
    Io {
        kind: KernelKind,
        #[source]
        source: std::io::Error,
    },

    /// Manifest could not be parsed as YAML
    #[error("failed to parse kernel manifest {kind}: {message}")]
    Parse { kind: KernelKind, message: String },

    /// Schema validation failed (hard failure, no partial load)
    #[error("kernel schema violation in {kind}: {issues:?}")]
    Schema {
        kind: KernelKind,
        issues: Vec<String>,
    },

    /// Integrity check refused activation
    #[error("kernel integrity violation: {0}")]
    Integrity(String),

    /// Stored hash map could not be read or written
    #[error("kernel hash store error: {0}")]
    HashStore(String),
}

/// The bounded, ordered set of kernel kinds. Later kernels may reference
/// constants declared by earlier ones, so activation order matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KernelKind {
    Master,
    Safety,
    Identity,
    Cognitive,
    Behavioral,
    Memory,
    WorldModel,
    Execution,
    Developer,
    PacketProtocol,
}

impl KernelKind {
    /// Activation order.
    pub const ORDERED: [KernelKind; 10] = [
        KernelKind::Master,
        KernelKind::Safety,
        KernelKind::Identity,
        KernelKind::Cognitive,
        KernelKind::Behavioral,
        KernelKind::Memory,
        KernelKind::WorldModel,
        KernelKind::Execution,
        KernelKind::Developer,
        KernelKind::PacketProtocol,
    ];

    /// Manifest file name under the kernel root.
    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Master => "master.yaml",
            Self::Safety => "safety.yaml",
            Self::Identity => "identity.yaml",
            Self::Cognitive => "cognitive.yaml",
            Self::Behavioral => "behavioral.yaml",
            Self::Memory => "memory.yaml",
            Self::WorldModel => "world_model.yaml",
            Self::Execution => "execution.yaml",
            Self::Developer => "developer.yaml",
            Self::PacketProtocol => "packet_protocol.yaml",
        }
    }

    /// Sensitive kernels refuse activation when modified on disk without a
    /// privileged override.
    pub fn is_sensitive(&self) -> bool {
        matches!(self, Self::Master | Self::Safety)
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Master => "master",
            Self::Safety => "safety",
            Self::Identity => "identity",
            Self::Cognitive => "cognitive",
            Self::Behavioral => "behavioral",
            Self::Memory => "memory",
            Self::WorldModel => "world_model",
            Self::Execution => "execution",
            Self::Developer => "developer",
            Self::PacketProtocol => "packet_protocol",
        };
        f.write_str(s)
    }
}

/// Kernel activation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelState {
    Inert,
    Loaded,
    Validated,
    Activated,
    Failed,
}

/// A single rule declared by a kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelRule {
    pub id: String,
    pub text: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
}

fn default_true() -> bool {
    true
}

/// A parsed kernel manifest. Kind-specific sections are optional here and
/// enforced by validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KernelManifest {
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Constants visible to later kernels in the activation order.
    #[serde(default)]
    pub constants: BTreeMap<String, Value>,
    #[serde(default)]
    pub rules: Vec<KernelRule>,
    /// Master kernel: the base system prompt injected into agent contexts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Safety kernel: hard constraints surfaced to the hydrator.
    #[serde(default)]
    pub constraints: Vec<String>,
    /// Safety kernel: actions the substrate must never dispatch.
    #[serde(default)]
    pub prohibited_actions: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl KernelManifest {
    /// Rules that are currently enabled.
    pub fn enabled_rules(&self) -> impl Iterator<Item = &KernelRule> {
        self.rules.iter().filter(|r| r.enabled)
    }
}

/// Result of validating one kernel during Phase 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelValidationResult {
    pub kind: KernelKind,
    pub name: String,
    pub valid: bool,
    pub content_hash: String,
    pub issues: Vec<String>,
}

/// Validate a manifest against its kind-specific schema. Returns the list of
/// violations; empty means valid.
pub fn validate_manifest(kind: KernelKind, manifest: &KernelManifest) -> Vec<String> {
    let mut issues = Vec::new();

    if manifest.name.trim().is_empty() {
        issues.push("name must not be empty".to_string());
    }
    if manifest.version.trim().is_empty() {
        issues.push("version must not be empty".to_string());
    }

    match kind {
        KernelKind::Master => {
            if manifest
                .system_prompt
                .as_deref()
                .map_or(true, |p| p.trim().is_empty())
            {
                issues.push("master kernel requires a system_prompt".to_string());
            }
        }
        KernelKind::Safety => {
            if manifest.constraints.is_empty() && manifest.prohibited_actions.is_empty() {
                issues.push(
                    "safety kernel requires constraints or prohibited_actions".to_string(),
                );
            }
        }
        KernelKind::PacketProtocol => {
            if manifest.rules.is_empty() {
                issues.push("packet_protocol kernel requires rules".to_string());
            }
        }
        _ => {}
    }

    for rule in &manifest.rules {
        if rule.id.trim().is_empty() {
            issues.push("rule with empty id".to_string());
        }
        if rule.text.trim().is_empty() {
            issues.push(format!("rule {} has empty text", rule.id));
        }
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(name: &str) -> KernelManifest {
        KernelManifest {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            description: None,
            constants: BTreeMap::new(),
            rules: Vec::new(),
            system_prompt: None,
            constraints: Vec::new(),
            prohibited_actions: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_ordered_set_is_complete() {
        assert_eq!(KernelKind::ORDERED.len(), 10);
        assert_eq!(KernelKind::ORDERED[0], KernelKind::Master);
        assert_eq!(KernelKind::ORDERED[9], KernelKind::PacketProtocol);
    }

    #[test]
    fn test_sensitive_kernels() {
        assert!(KernelKind::Master.is_sensitive());
        assert!(KernelKind::Safety.is_sensitive());
        assert!(!KernelKind::Developer.is_sensitive());
    }

    #[test]
    fn test_master_requires_system_prompt() {
        let manifest = minimal("master");
        let issues = validate_manifest(KernelKind::Master, &manifest);
        assert!(issues.iter().any(|i| i.contains("system_prompt")));

        let mut ok = minimal("master");
        ok.system_prompt = Some("You are the substrate.".to_string());
        assert!(validate_manifest(KernelKind::Master, &ok).is_empty());
    }

    #[test]
    fn test_safety_requires_constraints() {
        let manifest = minimal("safety");
        assert!(!validate_manifest(KernelKind::Safety, &manifest).is_empty());

        let mut ok = minimal("safety");
        ok.prohibited_actions = vec!["rm -rf".to_string()];
        assert!(validate_manifest(KernelKind::Safety, &ok).is_empty());
    }

    #[test]
    fn test_manifest_yaml_round_trip() {
        let yaml = r#"
name: safety
version: 1.2.0
description: guardrails
constraints:
  - "NO deletion of memory substrate records"
  - "MUST respect supervisor authority"
prohibited_actions:
  - shell_exec_unrestricted
rules:
  - id: S-1
    text: refuse unapproved high-risk tools
    severity: CRITICAL
"#;
        let manifest: KernelManifest = serde_yml::from_str(yaml).unwrap();
        assert_eq!(manifest.name, "safety");
        assert_eq!(manifest.constraints.len(), 2);
        assert_eq!(manifest.rules[0].id, "S-1");
        assert!(manifest.rules[0].enabled);
        assert!(validate_manifest(KernelKind::Safety, &manifest).is_empty());
    }
}
