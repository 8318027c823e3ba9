//! Workbench error types.
//!
//! Each pipeline concern has its own error enum; [`WorkbenchError`]
//! aggregates them at the facade. Finalize failures are additionally
//! wrapped in [`WorkbenchError::FinalizeFailed`], which names the step
//! that failed and whether the experiment's status changed, so a
//! caller always knows what state it was left in.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use labseal_attest::{SignError, TimestampError};
use labseal_digest::TreeHashError;
use labseal_registry::RegistryError;

/// Errors from scaffolding or staging an experiment directory.
#[derive(Debug, Error)]
pub enum LayoutError {
    /// A directory or file could not be created, copied, or removed.
    #[error("experiment layout i/o failed at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The input source to stage from does not exist.
    #[error("input source not found: {0}")]
    SourceMissing(PathBuf),
}

impl LayoutError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from capturing an environment snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// A source or descriptor file could not be read or copied.
    #[error("snapshot i/o failed at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SnapshotError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from building, writing, or reading manifests.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The manifest could not be serialized.
    #[error("failed to encode manifest: {0}")]
    Encode(#[source] serde_json::Error),

    /// A stored manifest does not parse.
    #[error("manifest at {path} is corrupt: {source}")]
    Parse {
        /// The manifest file.
        path: PathBuf,
        /// The parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// No manifest file where the record says one must be.
    #[error("manifest not found at {0}")]
    Missing(PathBuf),

    /// The manifest file could not be read or written.
    #[error("manifest i/o failed at {path}: {source}")]
    Io {
        /// The path involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// Errors from loading workbench configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config {path}: {source}")]
    Io {
        /// The config file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The config file is not valid TOML.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        /// The config file.
        path: PathBuf,
        /// The parse failure.
        #[source]
        source: toml::de::Error,
    },
}

/// Pipeline step at which a finalize failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStep {
    /// Implicit open of a created experiment.
    Open,
    /// Clearing stale attestation artifacts from an earlier attempt.
    Prepare,
    /// Hashing the input tree.
    HashInputs,
    /// Hashing the output tree.
    HashOutputs,
    /// Capturing the environment snapshot.
    Snapshot,
    /// Writing the canonical manifest.
    WriteManifest,
    /// Producing or persisting the detached signature.
    Sign,
    /// Committing the terminal status to the registry.
    Commit,
}

impl FinalizeStep {
    /// Lowercase step name for messages and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Prepare => "prepare",
            Self::HashInputs => "hash-inputs",
            Self::HashOutputs => "hash-outputs",
            Self::Snapshot => "snapshot",
            Self::WriteManifest => "write-manifest",
            Self::Sign => "sign",
            Self::Commit => "commit",
        }
    }
}

impl fmt::Display for FinalizeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate error for all workbench operations.
#[derive(Debug, Error)]
pub enum WorkbenchError {
    /// Registry rejection or storage failure.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Tree hashing failed.
    #[error(transparent)]
    Hash(#[from] TreeHashError),

    /// Signing or identity management failed.
    #[error(transparent)]
    Sign(#[from] SignError),

    /// The timestamp authority's own key could not be opened.
    #[error(transparent)]
    Timestamp(#[from] TimestampError),

    /// Manifest handling failed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// Snapshot capture failed.
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Scaffolding or staging failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A caller-supplied experiment id does not parse.
    #[error("invalid experiment id: {0}")]
    InvalidId(String),

    /// A finalize pipeline failed partway.
    #[error("finalize failed at step {step} (status changed: {state_changed}): {source}")]
    FinalizeFailed {
        /// The step that failed.
        step: FinalizeStep,
        /// Whether the experiment's status differs from before the call.
        state_changed: bool,
        /// The underlying failure.
        source: Box<WorkbenchError>,
    },
}

impl WorkbenchError {
    /// Wraps a pipeline failure with its step and state outcome.
    pub(crate) fn finalize_failed(
        step: FinalizeStep,
        state_changed: bool,
        source: impl Into<WorkbenchError>,
    ) -> Self {
        Self::FinalizeFailed {
            step,
            state_changed,
            source: Box::new(source.into()),
        }
    }

    /// The finalize step that failed, if this is a finalize failure.
    #[must_use]
    pub fn step(&self) -> Option<FinalizeStep> {
        match self {
            Self::FinalizeFailed { step, .. } => Some(*step),
            _ => None,
        }
    }

    /// Whether the operation changed the experiment's status before
    /// failing. Rejections and non-finalize errors never do.
    #[must_use]
    pub fn state_changed(&self) -> bool {
        matches!(self, Self::FinalizeFailed { state_changed: true, .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labseal_registry::ExperimentId;

    #[test]
    fn finalize_wrapper_names_step_and_state() {
        let inner = RegistryError::NotFound(ExperimentId::new());
        let err = WorkbenchError::finalize_failed(FinalizeStep::Sign, true, inner);

        assert_eq!(err.step(), Some(FinalizeStep::Sign));
        assert!(err.state_changed());
        let message = err.to_string();
        assert!(message.contains("at step sign"), "{message}");
        assert!(message.contains("status changed: true"), "{message}");
    }

    #[test]
    fn plain_errors_report_no_step() {
        let err = WorkbenchError::from(RegistryError::NotFound(ExperimentId::new()));
        assert_eq!(err.step(), None);
        assert!(!err.state_changed());
    }
}
