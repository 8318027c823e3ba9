//! Registry error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::record::ExperimentId;
use crate::status::ExperimentStatus;

/// Errors from registry operations.
///
/// The rejection variants (`NotFound`, `DuplicateLocation`,
/// `AlreadyFinalized`, `InvalidTransition`) are raised before any
/// record or file is touched, so a rejected call leaves no trace.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No experiment with the given id exists.
    #[error("experiment not found: {0}")]
    NotFound(ExperimentId),

    /// Another experiment already claims the location.
    #[error("location already in use: {0}")]
    DuplicateLocation(PathBuf),

    /// Experiment locations must be absolute paths.
    #[error("location must be an absolute path: {0}")]
    LocationNotAbsolute(PathBuf),

    /// The experiment is already completed; its record is immutable.
    #[error("experiment {0} is already finalized")]
    AlreadyFinalized(ExperimentId),

    /// The requested status change is not a legal lifecycle step.
    #[error("illegal status transition: {from} -> {to}")]
    InvalidTransition {
        /// Status the experiment is in.
        from: ExperimentStatus,
        /// Status the operation required.
        to: ExperimentStatus,
    },

    /// The store file could not be read or written.
    #[error("registry store i/o failed at {path}: {source}")]
    Store {
        /// The store or temp file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A record failed to serialize for persistence.
    #[error("failed to encode registry store: {0}")]
    Encode(#[source] serde_json::Error),

    /// The store file exists but does not parse.
    #[error("registry store at {path} is corrupt: {source}")]
    Corrupt {
        /// The store file.
        path: PathBuf,
        /// The parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// The store file was written by an incompatible version.
    #[error("registry store at {path} has unsupported version {found}")]
    UnsupportedVersion {
        /// The store file.
        path: PathBuf,
        /// Version number found in the file.
        found: u32,
    },

    /// Two records in the store file claim the same location.
    #[error("registry store at {path} maps one location twice: {location}")]
    ConflictingRecords {
        /// The store file.
        path: PathBuf,
        /// The doubly-claimed location.
        location: PathBuf,
    },
}

impl RegistryError {
    pub(crate) fn store(path: &std::path::Path, source: io::Error) -> Self {
        Self::Store {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether the error is a rejection of the request rather than a
    /// storage failure. Rejections are safe to report to callers
    /// verbatim and never indicate a damaged registry.
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_)
                | Self::DuplicateLocation(_)
                | Self::LocationNotAbsolute(_)
                | Self::AlreadyFinalized(_)
                | Self::InvalidTransition { .. }
        )
    }
}
