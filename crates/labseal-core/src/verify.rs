//! Integrity verification of finalized experiments.
//!
//! The verifier is pure read-side: it re-hashes the trees on disk,
//! checks the detached signature over the stored manifest bytes, and
//! checks the timestamp token, then reports a single verdict. It
//! never writes anything and never touches the registry, so it can
//! run any number of times, concurrently, without weakening the
//! evidence it examines.

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use labseal_attest::{DetachedSignature, SignerIdentity, TimestampToken};
use labseal_digest::{Digest, TreeDiff, TreeHasher, TreePath};

use crate::error::WorkbenchError;
use crate::layout::ExperimentLayout;
use crate::manifest::Manifest;

/// Overall outcome of a verification, ordered by severity: comparing
/// two verdicts with `max` keeps the worse one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Content, signature, and timestamp all check out.
    Valid,
    /// No timestamp token on disk. The attestation still binds
    /// identity to content, just without an independent time claim.
    TimestampAbsent,
    /// A token exists but does not bind these manifest bytes.
    TimestampInvalid,
    /// The signature does not verify, or the signing identity cannot
    /// be resolved. Unattributable evidence proves nothing.
    SignatureInvalid,
    /// At least one file on disk disagrees with the manifest.
    ContentMismatch,
}

impl Verdict {
    /// Whether every check passed.
    #[inline]
    #[must_use]
    pub fn is_valid(self) -> bool {
        self == Self::Valid
    }

    /// Lowercase verdict name for messages and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::TimestampAbsent => "timestamp-absent",
            Self::TimestampInvalid => "timestamp-invalid",
            Self::SignatureInvalid => "signature-invalid",
            Self::ContentMismatch => "content-mismatch",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything one verification run observed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    /// The single worst outcome across all checks.
    pub verdict: Verdict,
    /// Input paths that changed, vanished, or appeared since finalize.
    pub input_diff: TreeDiff,
    /// Output paths that changed, vanished, or appeared since finalize.
    pub output_diff: TreeDiff,
    /// Whether the detached signature verified against the resolved
    /// identity.
    pub signature_ok: bool,
    /// Whether a timestamp token was present on disk.
    pub timestamp_present: bool,
}

impl VerificationReport {
    /// Whether every check passed.
    #[inline]
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.verdict.is_valid()
    }

    /// Every path on which disk and manifest disagree, input paths
    /// first, each side in path order.
    #[must_use]
    pub fn mismatched_paths(&self) -> Vec<TreePath> {
        let mut paths = self.input_diff.clone().into_paths();
        paths.extend(self.output_diff.clone().into_paths());
        paths
    }
}

/// Re-checks a finalized experiment against its stored manifest.
#[derive(Debug, Clone, Default)]
pub struct Verifier {
    hasher: TreeHasher,
}

impl Verifier {
    /// Verifier hashing with the given policy.
    #[must_use]
    pub fn new(hasher: TreeHasher) -> Self {
        Self { hasher }
    }

    /// Runs all three checks against the experiment at `layout`.
    ///
    /// `identity` is the resolved analyst identity, or `None` when it
    /// could not be resolved; verification then fails closed with
    /// [`Verdict::SignatureInvalid`].
    ///
    /// # Errors
    ///
    /// Only infrastructure failures are errors: an unreadable tree or
    /// a missing/corrupt manifest file. Every attestation outcome,
    /// including tampering, is a verdict in the report.
    pub async fn verify(
        &self,
        layout: &ExperimentLayout,
        identity: Option<&SignerIdentity>,
    ) -> Result<VerificationReport, WorkbenchError> {
        let (manifest, manifest_bytes) = Manifest::load(&layout.manifest_path()).await?;

        let hasher = self.hasher.clone();
        let input_dir = layout.input_dir();
        let output_dir = layout.output_dir();
        let (observed_inputs, observed_outputs) = tokio::task::spawn_blocking(move || {
            let inputs = hasher.hash_tree(&input_dir)?;
            let outputs = hasher.hash_tree(&output_dir)?;
            Ok::<_, labseal_digest::TreeHashError>((inputs, outputs))
        })
        .await
        .map_err(|e| labseal_digest::TreeHashError::Io {
            path: layout.root().to_path_buf(),
            source: io::Error::other(e),
        })??;

        let input_diff = manifest.input_digests().diff(&observed_inputs);
        let output_diff = manifest.output_digests().diff(&observed_outputs);

        let signature_ok = check_signature(layout, identity, &manifest_bytes).await;
        let timestamp_verdict = check_timestamp(layout, &manifest_bytes).await;

        let mut verdict = Verdict::Valid;
        if !input_diff.is_clean() || !output_diff.is_clean() {
            verdict = verdict.max(Verdict::ContentMismatch);
        }
        if !signature_ok {
            verdict = verdict.max(Verdict::SignatureInvalid);
        }
        verdict = verdict.max(timestamp_verdict);

        let report = VerificationReport {
            verdict,
            input_diff,
            output_diff,
            signature_ok,
            timestamp_present: timestamp_verdict != Verdict::TimestampAbsent,
        };
        info!(
            root = %layout.root().display(),
            verdict = %report.verdict,
            mismatches = report.mismatched_paths().len(),
            "verification finished"
        );
        Ok(report)
    }
}

/// Reads and checks the detached signature. Any failure along the way
/// means the attestation cannot be trusted; none is an error.
async fn check_signature(
    layout: &ExperimentLayout,
    identity: Option<&SignerIdentity>,
    manifest_bytes: &[u8],
) -> bool {
    let Some(identity) = identity else {
        warn!(root = %layout.root().display(), "signing identity unresolved, failing closed");
        return false;
    };
    let path = layout.signature_path();
    let Ok(bytes) = tokio::fs::read(&path).await else {
        warn!(path = %path.display(), "signature file unreadable or absent");
        return false;
    };
    let Ok(envelope) = serde_json::from_slice::<DetachedSignature>(&bytes) else {
        warn!(path = %path.display(), "signature file does not parse");
        return false;
    };
    envelope.verify(&identity.verifying_key(), manifest_bytes)
}

/// Reads and checks the timestamp token, mapping its state straight to
/// a verdict contribution.
async fn check_timestamp(layout: &ExperimentLayout, manifest_bytes: &[u8]) -> Verdict {
    let path = layout.timestamp_path();
    let bytes = match tokio::fs::read(&path).await {
        Ok(b) => b,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Verdict::TimestampAbsent,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "timestamp token unreadable");
            return Verdict::TimestampInvalid;
        }
    };
    let Ok(token) = serde_json::from_slice::<TimestampToken>(&bytes) else {
        warn!(path = %path.display(), "timestamp token does not parse");
        return Verdict::TimestampInvalid;
    };
    if token.verify(&Digest::compute(manifest_bytes)) {
        Verdict::Valid
    } else {
        Verdict::TimestampInvalid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order_puts_content_mismatch_on_top() {
        assert!(Verdict::ContentMismatch > Verdict::SignatureInvalid);
        assert!(Verdict::SignatureInvalid > Verdict::TimestampInvalid);
        assert!(Verdict::TimestampInvalid > Verdict::TimestampAbsent);
        assert!(Verdict::TimestampAbsent > Verdict::Valid);
    }

    #[test]
    fn only_valid_is_valid() {
        assert!(Verdict::Valid.is_valid());
        for verdict in [
            Verdict::TimestampAbsent,
            Verdict::TimestampInvalid,
            Verdict::SignatureInvalid,
            Verdict::ContentMismatch,
        ] {
            assert!(!verdict.is_valid(), "{verdict}");
        }
    }

    #[test]
    fn report_orders_input_paths_before_output_paths() {
        let mut input_diff = TreeDiff::default();
        input_diff.changed.push("z-input.csv".parse().unwrap());
        let mut output_diff = TreeDiff::default();
        output_diff.missing.push("a-output.csv".parse().unwrap());

        let report = VerificationReport {
            verdict: Verdict::ContentMismatch,
            input_diff,
            output_diff,
            signature_ok: true,
            timestamp_present: true,
        };
        let names: Vec<String> = report
            .mismatched_paths()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(names, ["z-input.csv", "a-output.csv"]);
    }
}
