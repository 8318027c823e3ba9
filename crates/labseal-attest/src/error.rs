//! Attestation error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors from signing or managing signer identities.
///
/// Signing failures are fatal to a finalize: without a signature the
/// manifest proves nothing about who produced it.
#[derive(Debug, Error)]
pub enum SignError {
    /// No identity file at the configured path. Identities are
    /// provisioned explicitly, never generated on first use.
    #[error("signer identity not found at {path}; run provisioning first")]
    IdentityMissing {
        /// The configured identity path.
        path: PathBuf,
    },

    /// An identity file already exists; provisioning again would
    /// rotate the key and orphan every signature made with it.
    #[error("signer identity already exists at {path}")]
    IdentityExists {
        /// The configured identity path.
        path: PathBuf,
    },

    /// The identity file exists but cannot be used.
    #[error("signer identity at {path} is corrupt: {reason}")]
    KeyCorrupt {
        /// The identity file.
        path: PathBuf,
        /// What failed to parse or check out.
        reason: String,
    },

    /// The signer declined to produce a signature.
    #[error("signer rejected the request: {0}")]
    Rejected(String),

    /// Reading or writing key material failed.
    #[error("identity i/o failed at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl SignError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Errors from requesting a timestamp token.
///
/// These are recoverable by design: a finalize without a timestamp
/// still yields a signed manifest, just a weaker time claim.
#[derive(Debug, Error)]
pub enum TimestampError {
    /// The authority could not be reached or did not answer.
    #[error("timestamp authority unavailable: {0}")]
    Unavailable(String),

    /// The authority answered but declined to issue a token.
    #[error("timestamp authority denied the request: {0}")]
    Denied(String),

    /// The authority key file exists but cannot be used.
    #[error("timestamp authority key at {path} is corrupt: {reason}")]
    KeyCorrupt {
        /// The key file.
        path: PathBuf,
        /// What failed to parse or check out.
        reason: String,
    },

    /// Reading or writing authority key material failed.
    #[error("authority key i/o failed at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },
}

impl TimestampError {
    pub(crate) fn io(path: &std::path::Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
