//! The workbench facade.
//!
//! [`Workbench`] is what callers see: the five experiment operations
//! plus identity provisioning, wired over the registry, hasher,
//! snapshotter, and attestation capabilities. The finalize pipeline
//! lives here; each step is strictly sequential and every failure is
//! wrapped with the step that failed and whether the experiment's
//! status changed.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use labseal_attest::{
    DetachedSignature, Ed25519Signer, KeyId, LocalTimestampAuthority, Signer, SignerIdentity,
    TimestampAuthority, TimestampToken,
};
use labseal_digest::{Digest, TreeDigests, TreeHashError, TreeHasher};
use labseal_registry::{
    ExperimentId, ExperimentRecord, ExperimentStatus, Registry, RegistryError,
};

use crate::config::WorkbenchConfig;
use crate::error::{FinalizeStep, LayoutError, WorkbenchError};
use crate::layout::ExperimentLayout;
use crate::manifest::Manifest;
use crate::snapshot::EnvironmentSnapshotter;
use crate::verify::{VerificationReport, Verifier};

/// Non-fatal degradation noticed during a finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeWarning {
    /// No timestamp token could be obtained or persisted. The
    /// manifest is still signed; only the independent time claim is
    /// missing.
    TimestampUnavailable {
        /// What went wrong, verbatim from the authority or filesystem.
        reason: String,
    },
}

impl std::fmt::Display for FinalizeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TimestampUnavailable { reason } => {
                write!(f, "timestamp unavailable: {reason}")
            }
        }
    }
}

/// Everything a successful finalize produced.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    /// The completed registry record.
    pub record: ExperimentRecord,
    /// The manifest that was written and attested.
    pub manifest: Manifest,
    /// The detached signature over the manifest bytes.
    pub signature: DetachedSignature,
    /// The timestamp token, when the authority answered.
    pub timestamp_token: Option<TimestampToken>,
    /// Degradations the caller should surface, empty on a clean run.
    pub warnings: Vec<FinalizeWarning>,
}

/// The experiment provenance workbench.
///
/// Owns the registry and the pipeline subsystems. Signing and
/// timestamping default to the local identity and authority named in
/// the config and can be swapped for any [`Signer`] /
/// [`TimestampAuthority`] implementation.
pub struct Workbench {
    config: WorkbenchConfig,
    registry: Registry,
    hasher: TreeHasher,
    snapshotter: EnvironmentSnapshotter,
    verifier: Verifier,
    signer_override: Option<Arc<dyn Signer>>,
    authority_override: Option<Arc<dyn TimestampAuthority>>,
}

impl std::fmt::Debug for Workbench {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workbench")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Workbench {
    /// Opens the workbench over the registry named in `config`.
    ///
    /// # Errors
    ///
    /// [`WorkbenchError::Registry`] if the store cannot be loaded.
    pub async fn open(config: WorkbenchConfig) -> Result<Self, WorkbenchError> {
        let registry = Registry::load(&config.registry_path).await?;
        let hasher = TreeHasher::new().with_symlink_policy(config.symlink_policy);
        let snapshotter = EnvironmentSnapshotter::new(config.snapshot_extensions.clone());
        let verifier = Verifier::new(hasher.clone());
        Ok(Self {
            config,
            registry,
            hasher,
            snapshotter,
            verifier,
            signer_override: None,
            authority_override: None,
        })
    }

    /// Substitutes the signing capability. Tests inject refusing or
    /// scripted signers here.
    #[must_use]
    pub fn with_signer(mut self, signer: Arc<dyn Signer>) -> Self {
        self.signer_override = Some(signer);
        self
    }

    /// Substitutes the timestamp authority.
    #[must_use]
    pub fn with_authority(mut self, authority: Arc<dyn TimestampAuthority>) -> Self {
        self.authority_override = Some(authority);
        self
    }

    /// The active configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    /// The underlying registry, for audit inspection.
    #[inline]
    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Generates and persists the analyst signing identity. Explicit
    /// by design: nothing in the pipeline creates keys on its own.
    ///
    /// # Errors
    ///
    /// [`labseal_attest::SignError::IdentityExists`] if an identity is
    /// already provisioned at the configured path.
    pub async fn provision_identity(&self) -> Result<KeyId, WorkbenchError> {
        let identity = SignerIdentity::provision(&self.config.identity_path).await?;
        Ok(identity.key_id().clone())
    }

    /// Registers an experiment, scaffolds its directory, and stages
    /// the input set if one is given.
    ///
    /// The location must be absolute, unclaimed in the registry, and
    /// free of prior scaffold evidence on disk. If scaffolding or
    /// staging fails after registration, the record and any partial
    /// scaffold are rolled back so the location is reusable.
    ///
    /// # Errors
    ///
    /// [`RegistryError::DuplicateLocation`],
    /// [`RegistryError::LocationNotAbsolute`], or a
    /// [`LayoutError`](crate::error::LayoutError) from scaffolding.
    #[instrument(skip(self, input_source), fields(location = %location.display()))]
    pub async fn create_experiment(
        &self,
        name: &str,
        location: &Path,
        input_source: Option<&Path>,
    ) -> Result<ExperimentRecord, WorkbenchError> {
        let layout = ExperimentLayout::new(location);
        if layout.has_scaffold_evidence().await {
            return Err(RegistryError::DuplicateLocation(location.to_path_buf()).into());
        }

        let record = self.registry.create(name, location).await?;
        match self.scaffold_and_stage(&layout, &record, input_source).await {
            Ok(()) => Ok(record),
            Err(e) => {
                // Free the location again; best-effort on both sides.
                if let Err(rollback) = layout.remove_scaffold().await {
                    warn!(error = %rollback, "scaffold rollback failed");
                }
                if let Err(rollback) = self.registry.remove(record.id()).await {
                    warn!(error = %rollback, "registry rollback failed");
                }
                Err(e)
            }
        }
    }

    async fn scaffold_and_stage(
        &self,
        layout: &ExperimentLayout,
        record: &ExperimentRecord,
        input_source: Option<&Path>,
    ) -> Result<(), WorkbenchError> {
        layout.scaffold(record.id()).await?;
        if let Some(source) = input_source {
            let staged = layout.stage_inputs(source).await?;
            info!(id = %record.id(), staged, "input set staged");
        }
        Ok(())
    }

    /// Opens an experiment for work. Idempotent while in progress.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] or
    /// [`RegistryError::InvalidTransition`] once completed.
    pub async fn open_experiment(
        &self,
        id: ExperimentId,
    ) -> Result<ExperimentRecord, WorkbenchError> {
        Ok(self.registry.open(id).await?)
    }

    /// All experiment records, in registration order.
    pub async fn list(&self) -> Vec<ExperimentRecord> {
        self.registry.list().await
    }

    /// Runs the full finalize pipeline: hash both trees, capture the
    /// environment, write the manifest, sign it, timestamp it, and
    /// commit the terminal status.
    ///
    /// Steps are strictly sequential. Signing failure is fatal and
    /// leaves the manifest and snapshot on disk for inspection and
    /// retry; timestamping failure degrades to a warning. The registry
    /// commit is the last, single atomic update, so a crash anywhere
    /// earlier leaves the experiment re-finalizable from scratch.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyFinalized`] and
    /// [`RegistryError::NotFound`] reject before any side effect. Any
    /// mid-pipeline failure comes wrapped as
    /// [`WorkbenchError::FinalizeFailed`] naming the step.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn finalize(&self, id: ExperimentId) -> Result<FinalizeOutcome, WorkbenchError> {
        // One finalize per experiment at a time; a second caller waits
        // here and then sees the terminal status.
        let guard = self.registry.finalize_guard(id);
        let _serialized = guard.lock().await;

        let record = self.registry.get(id).await?;
        if record.status().is_terminal() {
            return Err(RegistryError::AlreadyFinalized(id).into());
        }

        let mut state_changed = false;
        if record.status() == ExperimentStatus::Created {
            // Finalizing a never-opened experiment implies opening it.
            self.registry
                .open(id)
                .await
                .map_err(|e| WorkbenchError::finalize_failed(FinalizeStep::Open, false, e))?;
            state_changed = true;
        }

        let layout = ExperimentLayout::new(record.location());
        self.run_pipeline(id, &layout, state_changed).await
    }

    async fn run_pipeline(
        &self,
        id: ExperimentId,
        layout: &ExperimentLayout,
        state_changed: bool,
    ) -> Result<FinalizeOutcome, WorkbenchError> {
        let fail = |step: FinalizeStep| {
            move |e: WorkbenchError| WorkbenchError::finalize_failed(step, state_changed, e)
        };

        // Stale attestation artifacts from a failed attempt must not
        // outlive the manifest they were bound to.
        self.clear_stale_attestation(layout)
            .await
            .map_err(|e| fail(FinalizeStep::Prepare)(e.into()))?;

        let inputs = self
            .hash_dir(layout.input_dir())
            .await
            .map_err(|e| fail(FinalizeStep::HashInputs)(e.into()))?;
        let outputs = self
            .hash_dir(layout.output_dir())
            .await
            .map_err(|e| fail(FinalizeStep::HashOutputs)(e.into()))?;
        info!(
            id = %id,
            inputs = inputs.len(),
            input_root = %inputs.aggregate(),
            outputs = outputs.len(),
            output_root = %outputs.aggregate(),
            "trees hashed"
        );

        let snapshot = self
            .snapshotter
            .capture(layout)
            .await
            .map_err(|e| fail(FinalizeStep::Snapshot)(e.into()))?;

        let manifest = Manifest::build(inputs, outputs, snapshot.description);
        let manifest_path = layout.manifest_path();
        let manifest_bytes = manifest
            .write_to(&manifest_path)
            .await
            .map_err(|e| fail(FinalizeStep::WriteManifest)(e.into()))?;

        let signature = self
            .sign_manifest(layout, &manifest_bytes)
            .await
            .map_err(fail(FinalizeStep::Sign))?;

        let mut warnings = Vec::new();
        let timestamp_token = self
            .timestamp_manifest(layout, &manifest_bytes, &mut warnings)
            .await;

        let record = self
            .registry
            .complete(id, &manifest_path)
            .await
            .map_err(|e| fail(FinalizeStep::Commit)(e.into()))?;
        info!(
            id = %id,
            manifest = %manifest_path.display(),
            timestamped = timestamp_token.is_some(),
            "experiment finalized"
        );

        Ok(FinalizeOutcome {
            record,
            manifest,
            signature,
            timestamp_token,
            warnings,
        })
    }

    async fn clear_stale_attestation(&self, layout: &ExperimentLayout) -> Result<(), LayoutError> {
        for path in [layout.signature_path(), layout.timestamp_path()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LayoutError::io(&path, e)),
            }
        }
        Ok(())
    }

    async fn hash_dir(&self, dir: std::path::PathBuf) -> Result<TreeDigests, TreeHashError> {
        let hasher = self.hasher.clone();
        let reported = dir.clone();
        tokio::task::spawn_blocking(move || hasher.hash_tree(&dir))
            .await
            .map_err(|e| TreeHashError::Io {
                path: reported,
                source: std::io::Error::other(e),
            })?
    }

    async fn sign_manifest(
        &self,
        layout: &ExperimentLayout,
        manifest_bytes: &[u8],
    ) -> Result<DetachedSignature, WorkbenchError> {
        let signature = match &self.signer_override {
            Some(signer) => signer.sign(manifest_bytes).await?,
            None => {
                // Identity resolution is part of the fatal signing
                // step: a missing identity fails here, not at startup.
                let identity = SignerIdentity::load(&self.config.identity_path).await?;
                Ed25519Signer::new(identity).sign(manifest_bytes).await?
            }
        };

        let path = layout.signature_path();
        let bytes = serde_json::to_vec_pretty(&signature)
            .map_err(crate::error::ManifestError::Encode)?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| LayoutError::io(&path, e))?;
        Ok(signature)
    }

    /// Obtains and persists the timestamp token. Every failure mode
    /// degrades to a warning; finalize proceeds regardless.
    async fn timestamp_manifest(
        &self,
        layout: &ExperimentLayout,
        manifest_bytes: &[u8],
        warnings: &mut Vec<FinalizeWarning>,
    ) -> Option<TimestampToken> {
        let digest = Digest::compute(manifest_bytes);
        let result = match &self.authority_override {
            Some(authority) => authority.timestamp(&digest).await,
            None => match LocalTimestampAuthority::open(&self.config.authority_key_path).await {
                Ok(authority) => authority.timestamp(&digest).await,
                Err(e) => Err(e),
            },
        };

        let token = match result {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, "timestamping degraded, finalize continues");
                warnings.push(FinalizeWarning::TimestampUnavailable {
                    reason: e.to_string(),
                });
                return None;
            }
        };

        let path = layout.timestamp_path();
        let persisted = match serde_json::to_vec_pretty(&token) {
            Ok(bytes) => tokio::fs::write(&path, bytes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(reason) = persisted {
            warn!(path = %path.display(), %reason, "timestamp token not persisted");
            warnings.push(FinalizeWarning::TimestampUnavailable { reason });
            return None;
        }
        Some(token)
    }

    /// Verifies a completed experiment against its stored manifest and
    /// attestation. Pure read-side; never mutates the registry.
    ///
    /// The signing identity is resolved fresh from the configured
    /// path on every call; an unresolvable identity fails closed as
    /// [`Verdict::SignatureInvalid`](crate::verify::Verdict).
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for unknown ids;
    /// [`RegistryError::InvalidTransition`] for experiments that are
    /// not yet completed; infrastructure failures from hashing or
    /// manifest loading.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn verify(&self, id: ExperimentId) -> Result<VerificationReport, WorkbenchError> {
        let record = self.registry.get(id).await?;
        if !record.status().is_terminal() {
            return Err(RegistryError::InvalidTransition {
                from: record.status(),
                to: ExperimentStatus::Completed,
            }
            .into());
        }

        let identity = match SignerIdentity::load(&self.config.identity_path).await {
            Ok(identity) => Some(identity),
            Err(e) => {
                warn!(error = %e, "identity unresolved during verify");
                None
            }
        };

        let layout = ExperimentLayout::new(record.location());
        self.verifier.verify(&layout, identity.as_ref()).await
    }
}
