//! # Kernel Loader
//!
//! Kernels are the immutable law bundles of the substrate: a bounded,
//! known-named set of YAML manifests (Master, Safety, Identity, ...) that are
//! schema-validated, content-hashed, and activated in a fixed order. Loading
//! is two-phase:
//!
//! - **Phase 1 — LOAD**: parse every manifest, validate its schema, compute a
//!   SHA-256 content hash. Any violation is a hard failure; no kernel
//!   partial-loads.
//! - **Phase 2 — ACTIVATE**: inject kernel context into consuming components
//!   in order, transitioning INERT -> LOADED -> VALIDATED -> ACTIVATED. An
//!   activation failure marks that kernel FAILED and aborts the rest.
//!
//! Integrity verification is a separate routine comparing on-disk hashes to a
//! stored map; sensitive kernels (Master, Safety) refuse activation when
//! modified unless a privileged override is supplied.

pub mod integrity;
pub mod loader;
pub mod manifest;

pub use integrity::{
    check_integrity, compute_kernel_hashes, load_stored_hashes, save_hashes,
    verify_activation_allowed, ChangeKind, IntegrityChange,
};
pub use loader::{
    KernelActivationResult, KernelConsumer, KernelLoader, KernelStack, LoadedKernel, ReloadOutcome,
};
pub use manifest::{
    KernelError, KernelKind, KernelManifest, KernelRule, KernelState, KernelValidationResult,
};
