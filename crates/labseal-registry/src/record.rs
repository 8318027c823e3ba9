//! Experiment identifiers and records.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::RegistryError;
use crate::status::{validate_transition, ExperimentStatus};

/// Unique identifier of an experiment.
///
/// ULIDs sort by creation time, so id order doubles as registration
/// order in listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExperimentId(pub Ulid);

impl ExperimentId {
    /// Generates a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for ExperimentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ExperimentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExperimentId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Ulid::from_str(s)?))
    }
}

/// One experiment's registry entry.
///
/// Fields are private; status changes go through [`mark_opened`] and
/// [`mark_completed`], which enforce the one-way lifecycle.
/// `finalized_at` and `manifest_path` are set exactly once, at
/// completion, and never cleared.
///
/// [`mark_opened`]: ExperimentRecord::mark_opened
/// [`mark_completed`]: ExperimentRecord::mark_completed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentRecord {
    id: ExperimentId,
    name: String,
    location: PathBuf,
    status: ExperimentStatus,
    created_at: DateTime<Utc>,
    last_opened_at: DateTime<Utc>,
    finalized_at: Option<DateTime<Utc>>,
    manifest_path: Option<PathBuf>,
}

impl ExperimentRecord {
    pub(crate) fn new(name: impl Into<String>, location: PathBuf) -> Self {
        let now = Utc::now();
        Self {
            id: ExperimentId::new(),
            name: name.into(),
            location,
            status: ExperimentStatus::Created,
            created_at: now,
            last_opened_at: now,
            finalized_at: None,
            manifest_path: None,
        }
    }

    /// Identifier.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ExperimentId {
        self.id
    }

    /// Human-readable name. Not unique; the location is.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute directory the experiment lives in.
    #[inline]
    #[must_use]
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Current lifecycle status.
    #[inline]
    #[must_use]
    pub fn status(&self) -> ExperimentStatus {
        self.status
    }

    /// Registration instant.
    #[inline]
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Most recent open, or the registration instant if never opened.
    #[inline]
    #[must_use]
    pub fn last_opened_at(&self) -> DateTime<Utc> {
        self.last_opened_at
    }

    /// Completion instant, once finalized.
    #[inline]
    #[must_use]
    pub fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    /// Location of the signed manifest, once finalized.
    #[inline]
    #[must_use]
    pub fn manifest_path(&self) -> Option<&Path> {
        self.manifest_path.as_deref()
    }

    /// Moves the record to `InProgress` and stamps the open time.
    /// Idempotent while in progress.
    pub(crate) fn mark_opened(&mut self) -> Result<(), RegistryError> {
        validate_transition(self.status, ExperimentStatus::InProgress)?;
        self.status = ExperimentStatus::InProgress;
        self.last_opened_at = Utc::now();
        Ok(())
    }

    /// Moves the record to `Completed` and pins the manifest path.
    ///
    /// # Errors
    ///
    /// [`RegistryError::AlreadyFinalized`] if the record is already
    /// terminal; [`RegistryError::InvalidTransition`] if it was never
    /// opened.
    pub(crate) fn mark_completed(&mut self, manifest_path: PathBuf) -> Result<(), RegistryError> {
        if self.status.is_terminal() {
            return Err(RegistryError::AlreadyFinalized(self.id));
        }
        validate_transition(self.status, ExperimentStatus::Completed)?;
        self.status = ExperimentStatus::Completed;
        self.finalized_at = Some(Utc::now());
        self.manifest_path = Some(manifest_path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ExperimentRecord {
        ExperimentRecord::new("ph-gradient", PathBuf::from("/lab/ph-gradient"))
    }

    #[test]
    fn new_record_starts_created_and_unfinalized() {
        let rec = record();
        assert_eq!(rec.status(), ExperimentStatus::Created);
        assert_eq!(rec.created_at(), rec.last_opened_at());
        assert!(rec.finalized_at().is_none());
        assert!(rec.manifest_path().is_none());
    }

    #[test]
    fn open_is_idempotent_and_bumps_timestamp() {
        let mut rec = record();
        rec.mark_opened().unwrap();
        assert_eq!(rec.status(), ExperimentStatus::InProgress);
        let first_open = rec.last_opened_at();

        rec.mark_opened().unwrap();
        assert_eq!(rec.status(), ExperimentStatus::InProgress);
        assert!(rec.last_opened_at() >= first_open);
    }

    #[test]
    fn complete_requires_an_open_record() {
        let mut rec = record();
        let err = rec.mark_completed(PathBuf::from("/lab/x/manifest.json")).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert_eq!(rec.status(), ExperimentStatus::Created);
    }

    #[test]
    fn complete_sets_terminal_fields_exactly_once() {
        let mut rec = record();
        rec.mark_opened().unwrap();
        rec.mark_completed(PathBuf::from("/lab/ph-gradient/manifest.json")).unwrap();

        assert_eq!(rec.status(), ExperimentStatus::Completed);
        let finalized = rec.finalized_at().unwrap();
        let manifest = rec.manifest_path().unwrap().to_path_buf();

        let err = rec.mark_completed(PathBuf::from("/elsewhere/manifest.json")).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyFinalized(id) if id == rec.id()));
        assert_eq!(rec.finalized_at().unwrap(), finalized);
        assert_eq!(rec.manifest_path().unwrap(), manifest);
    }

    #[test]
    fn completed_record_cannot_reopen() {
        let mut rec = record();
        rec.mark_opened().unwrap();
        rec.mark_completed(PathBuf::from("/lab/ph-gradient/manifest.json")).unwrap();

        let err = rec.mark_opened().unwrap_err();
        assert!(matches!(
            err,
            RegistryError::InvalidTransition {
                from: ExperimentStatus::Completed,
                to: ExperimentStatus::InProgress,
            }
        ));
    }

    #[test]
    fn ids_parse_back_from_display_form() {
        let id = ExperimentId::new();
        let parsed: ExperimentId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn record_survives_json_round_trip() {
        let mut rec = record();
        rec.mark_opened().unwrap();
        let json = serde_json::to_string(&rec).unwrap();
        let back: ExperimentRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
