//! Experiment provenance workbench.
//!
//! Ties the digest, registry, and attestation crates into the full
//! pipeline: scaffold an experiment bay, stage inputs, and at
//! finalize time hash both trees, snapshot the environment, write the
//! canonical manifest, sign it, timestamp it, and commit the terminal
//! status. [`Workbench`] is the caller-facing surface; [`Verifier`]
//! re-checks the evidence any time later.

pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod snapshot;
pub mod verify;
pub mod workbench;

pub use config::WorkbenchConfig;
pub use error::{
    ConfigError, FinalizeStep, LayoutError, ManifestError, SnapshotError, WorkbenchError,
};
pub use layout::ExperimentLayout;
pub use manifest::Manifest;
pub use snapshot::{EnvironmentSnapshot, EnvironmentSnapshotter};
pub use verify::{VerificationReport, Verdict, Verifier};
pub use workbench::{FinalizeOutcome, FinalizeWarning, Workbench};
