//! Two-phase kernel loading
//!
//! Phase 1 (LOAD) parses, validates, and hashes every manifest; Phase 2
//! (ACTIVATE) injects kernel context into consumers in order. This is the
//! only path by which kernel content reaches the runtime.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{error, info};

use crate::integrity::{
    check_integrity, compute_kernel_hashes, load_stored_hashes, save_hashes,
    verify_activation_allowed, IntegrityChange, KERNEL_HASH_FILE,
};
use crate::manifest::{
    validate_manifest, KernelError, KernelKind, KernelManifest, KernelState,
    KernelValidationResult,
};

/// A kernel that passed Phase 1.
#[derive(Debug, Clone)]
pub struct LoadedKernel {
    pub kind: KernelKind,
    pub manifest: KernelManifest,
    pub content_hash: String,
    pub state: KernelState,
}

/// A component that consumes kernel context during activation.
pub trait KernelConsumer: Send {
    /// Called once per kernel, in activation order. An error fails the kernel
    /// and aborts the remaining activations.
    fn on_activate(&mut self, kernel: &LoadedKernel) -> Result<(), String>;
}

/// Outcome of activating one kernel.
#[derive(Debug, Clone)]
pub struct KernelActivationResult {
    pub kind: KernelKind,
    pub state: KernelState,
    pub error: Option<String>,
}

/// Outcome of a hot reload: the integrity diff plus per-kernel activation
/// results.
#[derive(Debug, Clone)]
pub struct ReloadOutcome {
    pub changes: Vec<IntegrityChange>,
    pub activations: Vec<KernelActivationResult>,
}

/// The complete, ordered set of loaded kernels with their accumulated
/// constants (later kernels shadow earlier ones).
pub struct KernelStack {
    kernels: Vec<LoadedKernel>,
    validations: Vec<KernelValidationResult>,
    constants: BTreeMap<String, Value>,
}

impl KernelStack {
    pub fn get(&self, kind: KernelKind) -> Option<&LoadedKernel> {
        self.kernels.iter().find(|k| k.kind == kind)
    }

    pub fn kernels(&self) -> &[LoadedKernel] {
        &self.kernels
    }

    /// Phase 1 validation records (content is not otherwise exposed until
    /// activation).
    pub fn validations(&self) -> &[KernelValidationResult] {
        &self.validations
    }

    /// A constant declared by any kernel, resolved in activation order.
    pub fn constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    /// The master system prompt, once loaded.
    pub fn system_prompt(&self) -> Option<&str> {
        self.get(KernelKind::Master)
            .and_then(|k| k.manifest.system_prompt.as_deref())
    }

    /// Safety constraints surfaced to the hydrator.
    pub fn safety_constraints(&self) -> Vec<String> {
        self.get(KernelKind::Safety)
            .map(|k| {
                k.manifest
                    .constraints
                    .iter()
                    .chain(k.manifest.prohibited_actions.iter())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all_activated(&self) -> bool {
        self.kernels.iter().all(|k| k.state == KernelState::Activated)
    }

    /// Phase 2 — ACTIVATE. Kernels transition LOADED -> VALIDATED ->
    /// ACTIVATED in order; the first failure transitions that kernel to
    /// FAILED and aborts the remaining activations.
    pub fn activate(&mut self, consumers: &mut [&mut dyn KernelConsumer]) -> Vec<KernelActivationResult> {
        let mut results = Vec::new();

        for kernel in &mut self.kernels {
            kernel.state = KernelState::Validated;

            let mut failure: Option<String> = None;
            for consumer in consumers.iter_mut() {
                if let Err(e) = consumer.on_activate(kernel) {
                    failure = Some(e);
                    break;
                }
            }

            match failure {
                Some(message) => {
                    kernel.state = KernelState::Failed;
                    error!(kernel = %kernel.kind, error = %message, "kernel activation failed");
                    results.push(KernelActivationResult {
                        kind: kernel.kind,
                        state: KernelState::Failed,
                        error: Some(message),
                    });
                    break;
                }
                None => {
                    kernel.state = KernelState::Activated;
                    results.push(KernelActivationResult {
                        kind: kernel.kind,
                        state: KernelState::Activated,
                        error: None,
                    });
                }
            }
        }

        results
    }
}

/// Loads kernel manifests from a directory.
pub struct KernelLoader {
    root: PathBuf,
}

impl KernelLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn hash_store_path(&self) -> PathBuf {
        self.root.join(KERNEL_HASH_FILE)
    }

    /// Phase 1 — LOAD. Parses every manifest in the fixed order, validates
    /// against its schema, and computes content hashes. Any violation is a
    /// hard failure.
    pub fn load(&self) -> Result<KernelStack, KernelError> {
        let mut kernels = Vec::new();
        let mut validations = Vec::new();
        let mut constants = BTreeMap::new();

        for kind in KernelKind::ORDERED {
            let path = self.root.join(kind.file_name());
            if !path.exists() {
                return Err(KernelError::Missing(kind));
            }

            let content = std::fs::read(&path).map_err(|source| KernelError::Io { kind, source })?;
            let content_hash = crate::integrity::hash_content(&content);

            let manifest: KernelManifest = serde_yml::from_slice(&content)
                .map_err(|e| KernelError::Parse { kind, message: e.to_string() })?;

            let issues = validate_manifest(kind, &manifest);
            validations.push(KernelValidationResult {
                kind,
                name: manifest.name.clone(),
                valid: issues.is_empty(),
                content_hash: content_hash.clone(),
                issues: issues.clone(),
            });

            if !issues.is_empty() {
                return Err(KernelError::Schema { kind, issues });
            }

            for (key, value) in &manifest.constants {
                constants.insert(key.clone(), value.clone());
            }

            kernels.push(LoadedKernel {
                kind,
                manifest,
                content_hash,
                state: KernelState::Loaded,
            });
        }

        info!(count = kernels.len(), "kernel phase 1 complete");
        Ok(KernelStack {
            kernels,
            validations,
            constants,
        })
    }

    /// Integrity check against the stored hash baseline.
    pub fn check_integrity(&self) -> Result<Vec<IntegrityChange>, KernelError> {
        let current = compute_kernel_hashes(&self.root)?;
        let stored = load_stored_hashes(&self.hash_store_path())?;
        Ok(check_integrity(&current, &stored))
    }

    /// Persist the current hashes as the new baseline (authorized change).
    pub fn commit_hashes(&self) -> Result<(), KernelError> {
        let current = compute_kernel_hashes(&self.root)?;
        save_hashes(&self.hash_store_path(), &current)
    }

    /// Boot path: verify integrity (refusing modified sensitive kernels
    /// without the override), then run both phases.
    pub fn load_and_activate(
        &self,
        consumers: &mut [&mut dyn KernelConsumer],
        privileged_override: bool,
    ) -> Result<(KernelStack, Vec<KernelActivationResult>), KernelError> {
        let changes = self.check_integrity()?;
        verify_activation_allowed(&changes, privileged_override)?;

        let mut stack = self.load()?;
        let activations = stack.activate(consumers);
        self.commit_hashes()?;
        Ok((stack, activations))
    }

    /// Hot reload: re-run Phase 1 + Phase 2 and report the diff. Idempotent
    /// when manifests are unchanged.
    pub fn reload(
        &self,
        consumers: &mut [&mut dyn KernelConsumer],
        privileged_override: bool,
    ) -> Result<(KernelStack, ReloadOutcome), KernelError> {
        let changes = self.check_integrity()?;
        verify_activation_allowed(&changes, privileged_override)?;

        let mut stack = self.load()?;
        let activations = stack.activate(consumers);
        self.commit_hashes()?;

        Ok((stack, ReloadOutcome { changes, activations }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::KernelState;

    struct Recorder {
        seen: Vec<KernelKind>,
        fail_on: Option<KernelKind>,
    }

    impl KernelConsumer for Recorder {
        fn on_activate(&mut self, kernel: &LoadedKernel) -> Result<(), String> {
            if self.fail_on == Some(kernel.kind) {
                return Err("consumer rejected kernel".to_string());
            }
            self.seen.push(kernel.kind);
            Ok(())
        }
    }

    fn write_fixture(root: &Path) {
        std::fs::create_dir_all(root).unwrap();
        for kind in KernelKind::ORDERED {
            let body = match kind {
                KernelKind::Master => {
                    "name: master\nversion: 1.0.0\nsystem_prompt: |\n  You are the substrate.\nconstants:\n  max_authority: SUPERVISED\n"
                        .to_string()
                }
                KernelKind::Safety => {
                    "name: safety\nversion: 1.0.0\nconstraints:\n  - NO deletion of substrate records\n".to_string()
                }
                KernelKind::PacketProtocol => {
                    "name: packet_protocol\nversion: 1.0.0\nrules:\n  - id: P-1\n    text: every side effect emits a packet\n"
                        .to_string()
                }
                other => format!("name: {other}\nversion: 1.0.0\n"),
            };
            std::fs::write(root.join(kind.file_name()), body).unwrap();
        }
    }

    fn fixture_dir() -> PathBuf {
        let dir = std::env::temp_dir()
            .join("agentops-kernel-tests")
            .join(uuid::Uuid::new_v4().to_string());
        write_fixture(&dir);
        dir
    }

    #[test]
    fn test_load_and_activate_in_order() {
        let dir = fixture_dir();
        let loader = KernelLoader::new(&dir);
        let mut recorder = Recorder { seen: vec![], fail_on: None };

        let (stack, activations) = loader
            .load_and_activate(&mut [&mut recorder], false)
            .unwrap();

        assert!(stack.all_activated());
        assert_eq!(activations.len(), 10);
        assert_eq!(recorder.seen, KernelKind::ORDERED.to_vec());
        assert_eq!(stack.system_prompt(), Some("You are the substrate.\n"));
        assert_eq!(stack.safety_constraints(), vec!["NO deletion of substrate records".to_string()]);
        assert_eq!(
            stack.constant("max_authority"),
            Some(&serde_json::json!("SUPERVISED"))
        );
    }

    #[test]
    fn test_missing_manifest_is_hard_failure() {
        let dir = fixture_dir();
        std::fs::remove_file(dir.join(KernelKind::Cognitive.file_name())).unwrap();
        let loader = KernelLoader::new(&dir);
        assert!(matches!(loader.load(), Err(KernelError::Missing(KernelKind::Cognitive))));
    }

    #[test]
    fn test_schema_violation_is_hard_failure() {
        let dir = fixture_dir();
        // Master without a system prompt fails validation, so nothing loads.
        std::fs::write(
            dir.join(KernelKind::Master.file_name()),
            "name: master\nversion: 1.0.0\n",
        )
        .unwrap();
        let loader = KernelLoader::new(&dir);
        assert!(matches!(
            loader.load(),
            Err(KernelError::Schema { kind: KernelKind::Master, .. })
        ));
    }

    #[test]
    fn test_activation_failure_aborts_remaining() {
        let dir = fixture_dir();
        let loader = KernelLoader::new(&dir);
        let mut stack = loader.load().unwrap();
        let mut recorder = Recorder { seen: vec![], fail_on: Some(KernelKind::Identity) };

        let activations = stack.activate(&mut [&mut recorder]);

        // Master and Safety activated, Identity failed, rest never attempted.
        assert_eq!(activations.len(), 3);
        assert_eq!(activations[2].state, KernelState::Failed);
        assert_eq!(recorder.seen, vec![KernelKind::Master, KernelKind::Safety]);
        assert!(!stack.all_activated());
    }

    #[test]
    fn test_modified_safety_detected_and_refused_on_restart() {
        let dir = fixture_dir();
        let loader = KernelLoader::new(&dir);
        let mut recorder = Recorder { seen: vec![], fail_on: None };
        loader.load_and_activate(&mut [&mut recorder], false).unwrap();

        // Tamper with the safety kernel on disk.
        std::fs::write(
            dir.join(KernelKind::Safety.file_name()),
            "name: safety\nversion: 9.9.9\nconstraints:\n  - anything goes\n",
        )
        .unwrap();

        let changes = loader.check_integrity().unwrap();
        assert!(changes.iter().any(|c| c.file == "safety.yaml" && c.kind == crate::integrity::ChangeKind::Modified));

        let mut recorder = Recorder { seen: vec![], fail_on: None };
        let refused = loader.load_and_activate(&mut [&mut recorder], false);
        assert!(matches!(refused, Err(KernelError::Integrity(_))));

        // Privileged override admits the change and commits a new baseline.
        let mut recorder = Recorder { seen: vec![], fail_on: None };
        loader.load_and_activate(&mut [&mut recorder], true).unwrap();
        assert!(loader.check_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_reload_is_idempotent_when_unchanged() {
        let dir = fixture_dir();
        let loader = KernelLoader::new(&dir);
        let mut recorder = Recorder { seen: vec![], fail_on: None };
        loader.load_and_activate(&mut [&mut recorder], false).unwrap();

        let mut recorder = Recorder { seen: vec![], fail_on: None };
        let (_, first) = loader.reload(&mut [&mut recorder], false).unwrap();
        let mut recorder = Recorder { seen: vec![], fail_on: None };
        let (_, second) = loader.reload(&mut [&mut recorder], false).unwrap();

        assert!(first.changes.is_empty());
        assert!(second.changes.is_empty());
        assert_eq!(first.activations.len(), second.activations.len());
        for (a, b) in first.activations.iter().zip(&second.activations) {
            assert_eq!(a.kind, b.kind);
            assert_eq!(a.state, b.state);
        }
    }
}
