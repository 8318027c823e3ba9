//! The provenance manifest.
//!
//! A manifest binds everything finalize attests to: the digest of
//! every input and output file, the environment description, and one
//! creation instant. Its canonical byte form is what gets signed and
//! timestamped, so the same struct must always serialize to the same
//! bytes; field order is fixed by declaration order and the digest
//! maps iterate in path order.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use labseal_digest::{Digest, TreeDigests, TreePath};

use crate::error::ManifestError;

/// The canonical provenance record for one experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Creation instant, UTC at millisecond precision.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Digest per input file, keyed by path relative to `input/`.
    pub input_hashes: BTreeMap<TreePath, Digest>,
    /// Digest per output file, keyed by path relative to `output/`.
    pub output_hashes: BTreeMap<TreePath, Digest>,
    /// Free-form description of the runtime environment.
    pub environment_description: String,
}

impl Manifest {
    /// Assembles a manifest from freshly computed digests, stamping it
    /// with the current instant truncated to milliseconds so the
    /// stored and re-parsed forms agree exactly.
    #[must_use]
    pub fn build(
        inputs: TreeDigests,
        outputs: TreeDigests,
        environment_description: String,
    ) -> Self {
        Self {
            timestamp: Utc::now().trunc_subsecs(3),
            input_hashes: inputs.into_map(),
            output_hashes: outputs.into_map(),
            environment_description,
        }
    }

    /// The recorded input tree.
    #[must_use]
    pub fn input_digests(&self) -> TreeDigests {
        TreeDigests::from_map(self.input_hashes.clone())
    }

    /// The recorded output tree.
    #[must_use]
    pub fn output_digests(&self) -> TreeDigests {
        TreeDigests::from_map(self.output_hashes.clone())
    }

    /// The exact bytes that get signed and timestamped:
    /// pretty-printed JSON with a trailing newline.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Encode`] if serialization fails.
    pub fn to_canonical_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        let mut bytes = serde_json::to_vec_pretty(self).map_err(ManifestError::Encode)?;
        bytes.push(b'\n');
        Ok(bytes)
    }

    /// Writes the canonical bytes to `path` and returns them, so the
    /// caller signs exactly what landed on disk.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Encode`] or [`ManifestError::Io`].
    pub async fn write_to(&self, path: &Path) -> Result<Vec<u8>, ManifestError> {
        let bytes = self.to_canonical_bytes()?;
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| ManifestError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        Ok(bytes)
    }

    /// Reads a stored manifest, returning both the parsed record and
    /// the raw file bytes. Verification checks the signature against
    /// the bytes, not a re-serialization, so a manifest rewritten with
    /// equivalent content still fails attestation.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Missing`] if there is no file at `path`;
    /// [`ManifestError::Parse`] or [`ManifestError::Io`] otherwise.
    pub async fn load(path: &Path) -> Result<(Self, Vec<u8>), ManifestError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ManifestError::Missing(path.to_path_buf()));
            }
            Err(e) => {
                return Err(ManifestError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        let manifest = serde_json::from_slice(&bytes).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok((manifest, bytes))
    }

    /// Digest of the canonical bytes; what the timestamp authority
    /// binds its token to.
    ///
    /// # Errors
    ///
    /// [`ManifestError::Encode`] if serialization fails.
    pub fn digest(&self) -> Result<Digest, ManifestError> {
        Ok(Digest::compute(&self.to_canonical_bytes()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Manifest {
        let mut inputs = BTreeMap::new();
        inputs.insert("a.csv".parse().unwrap(), Digest::compute(b"1,2,3"));
        inputs.insert("runs/b.csv".parse().unwrap(), Digest::compute(b"4,5"));
        Manifest::build(
            TreeDigests::from_map(inputs),
            TreeDigests::default(),
            "platform: linux/x86_64\n".to_owned(),
        )
    }

    #[test]
    fn canonical_bytes_are_reproducible() {
        let manifest = sample();
        assert_eq!(
            manifest.to_canonical_bytes().unwrap(),
            manifest.to_canonical_bytes().unwrap()
        );
    }

    #[test]
    fn field_names_are_stable() {
        let json: serde_json::Value =
            serde_json::from_slice(&sample().to_canonical_bytes().unwrap()).unwrap();
        let object = json.as_object().unwrap();
        let keys: Vec<&String> = object.keys().collect();
        assert_eq!(
            keys,
            ["timestamp", "input_hashes", "output_hashes", "environment_description"]
        );
        assert!(json["timestamp"].is_i64());
        assert_eq!(
            json["input_hashes"]["a.csv"],
            "8a6ae15122001229edb8866f56e342af12ae8187203c3e3b33931743e7c0c48d"
        );
    }

    #[test]
    fn timestamp_is_millisecond_precision() {
        let manifest = sample();
        assert_eq!(manifest.timestamp.timestamp_subsec_micros() % 1000, 0);
    }

    #[tokio::test]
    async fn write_then_load_round_trips_bytes_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        let manifest = sample();

        let written = manifest.write_to(&path).await.unwrap();
        let (loaded, bytes) = Manifest::load(&path).await.unwrap();
        assert_eq!(loaded, manifest);
        assert_eq!(bytes, written);
        assert_eq!(Digest::compute(&bytes), manifest.digest().unwrap());
    }

    #[tokio::test]
    async fn missing_manifest_is_distinct_from_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");

        let err = Manifest::load(&path).await.unwrap_err();
        assert!(matches!(err, ManifestError::Missing(_)));

        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let err = Manifest::load(&path).await.unwrap_err();
        assert!(matches!(err, ManifestError::Parse { .. }));
    }

    #[test]
    fn empty_trees_serialize_as_empty_maps() {
        let manifest = Manifest::build(
            TreeDigests::default(),
            TreeDigests::default(),
            String::new(),
        );
        let json: serde_json::Value =
            serde_json::from_slice(&manifest.to_canonical_bytes().unwrap()).unwrap();
        assert!(json["input_hashes"].as_object().unwrap().is_empty());
        assert!(json["output_hashes"].as_object().unwrap().is_empty());
    }
}
