//! Kernel integrity verification
//!
//! SHA-256 hashing of kernel manifests with stored-hash comparison for tamper
//! detection. Changes are categorized NEW / MODIFIED / DELETED; sensitive
//! kernels refuse activation on MODIFIED unless a privileged override is
//! supplied.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::manifest::{KernelError, KernelKind};

/// Default file name for the stored hash map, beside the manifests.
pub const KERNEL_HASH_FILE: &str = ".kernel_hashes.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    New,
    Modified,
    Deleted,
}

/// One detected difference between on-disk manifests and the stored map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityChange {
    pub file: String,
    pub kind: ChangeKind,
}

/// SHA-256 hash of a byte slice, hex-encoded.
pub fn hash_content(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Hash every known kernel manifest under `root`. Missing files are simply
/// absent from the map (they show up as DELETED against a stored map).
pub fn compute_kernel_hashes(root: &Path) -> Result<BTreeMap<String, String>, KernelError> {
    let mut hashes = BTreeMap::new();
    for kind in KernelKind::ORDERED {
        let path = root.join(kind.file_name());
        if !path.exists() {
            continue;
        }
        let content = std::fs::read(&path).map_err(|source| KernelError::Io { kind, source })?;
        hashes.insert(kind.file_name().to_string(), hash_content(&content));
    }
    Ok(hashes)
}

/// Load the stored hash map; an absent file yields an empty map (first boot).
pub fn load_stored_hashes(path: &Path) -> Result<BTreeMap<String, String>, KernelError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| KernelError::HashStore(e.to_string()))?;
    serde_json::from_str(&content).map_err(|e| KernelError::HashStore(e.to_string()))
}

/// Persist the hash map (authorized changes update the baseline).
pub fn save_hashes(path: &Path, hashes: &BTreeMap<String, String>) -> Result<(), KernelError> {
    let content = serde_json::to_string_pretty(hashes)
        .map_err(|e| KernelError::HashStore(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| KernelError::HashStore(e.to_string()))
}

/// Compare current hashes against the stored baseline.
pub fn check_integrity(
    current: &BTreeMap<String, String>,
    stored: &BTreeMap<String, String>,
) -> Vec<IntegrityChange> {
    let mut changes = Vec::new();

    for (file, hash) in current {
        match stored.get(file) {
            None => changes.push(IntegrityChange {
                file: file.clone(),
                kind: ChangeKind::New,
            }),
            Some(old) if old != hash => changes.push(IntegrityChange {
                file: file.clone(),
                kind: ChangeKind::Modified,
            }),
            Some(_) => {}
        }
    }

    for file in stored.keys() {
        if !current.contains_key(file) {
            changes.push(IntegrityChange {
                file: file.clone(),
                kind: ChangeKind::Deleted,
            });
        }
    }

    changes
}

/// Refuse activation when a sensitive kernel was modified on disk, unless a
/// privileged override is supplied.
pub fn verify_activation_allowed(
    changes: &[IntegrityChange],
    privileged_override: bool,
) -> Result<(), KernelError> {
    let sensitive_files: Vec<&'static str> = KernelKind::ORDERED
        .iter()
        .filter(|k| k.is_sensitive())
        .map(|k| k.file_name())
        .collect();

    let violations: Vec<&IntegrityChange> = changes
        .iter()
        .filter(|c| c.kind == ChangeKind::Modified && sensitive_files.contains(&c.file.as_str()))
        .collect();

    if violations.is_empty() {
        return Ok(());
    }

    if privileged_override {
        warn!(
            files = ?violations.iter().map(|c| &c.file).collect::<Vec<_>>(),
            "sensitive kernel modified; activation authorized by privileged override"
        );
        return Ok(());
    }

    Err(KernelError::Integrity(format!(
        "sensitive kernel(s) modified without authorization: {}",
        violations
            .iter()
            .map(|c| c.file.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    )))
}
