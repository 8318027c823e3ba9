//! Testing utilities for the labseal workspace
//!
//! Shared fixtures and capability fakes.

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;

use labseal_attest::{
    DetachedSignature, KeyId, SignError, Signer, TimestampAuthority, TimestampError,
    TimestampToken,
};
use labseal_core::{Workbench, WorkbenchConfig};
use labseal_digest::Digest;

/// Builds a workbench whose registry and key files live under
/// `dir/state`, with the analyst identity already provisioned.
pub async fn workbench_at(dir: &Path) -> Workbench {
    let config = WorkbenchConfig::default().with_data_dir(&dir.join("state"));
    let workbench = Workbench::open(config).await.unwrap();
    workbench.provision_identity().await.unwrap();
    workbench
}

/// Same fixture without an identity, for exercising the
/// missing-identity failure paths.
pub async fn workbench_without_identity(dir: &Path) -> Workbench {
    let config = WorkbenchConfig::default().with_data_dir(&dir.join("state"));
    Workbench::open(config).await.unwrap()
}

/// Writes `(relative path, contents)` pairs beneath `root`, creating
/// parent directories as needed.
pub fn write_tree(root: &Path, files: &[(&str, &str)]) {
    for (rel, contents) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }
}

/// A signer that refuses every request, simulating an unavailable or
/// declining signing agent.
#[derive(Debug)]
pub struct RefusingSigner {
    key_id: KeyId,
}

impl RefusingSigner {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let key = SigningKey::generate(&mut OsRng);
        Self {
            key_id: KeyId::of(&key.verifying_key()),
        }
    }
}

#[async_trait]
impl Signer for RefusingSigner {
    fn key_id(&self) -> KeyId {
        self.key_id.clone()
    }

    async fn sign(&self, _message: &[u8]) -> Result<DetachedSignature, SignError> {
        Err(SignError::Rejected("signing agent refused".to_owned()))
    }
}

/// A timestamp authority that can never be reached.
#[derive(Debug, Default)]
pub struct UnreachableAuthority;

#[async_trait]
impl TimestampAuthority for UnreachableAuthority {
    async fn timestamp(&self, _digest: &Digest) -> Result<TimestampToken, TimestampError> {
        Err(TimestampError::Unavailable(
            "connection refused".to_owned(),
        ))
    }
}

/// A timestamp authority whose clock is pinned, so tests can assert
/// exact token contents.
pub struct FixedClockAuthority {
    signing_key: SigningKey,
    issued_at_ms: i64,
}

impl FixedClockAuthority {
    pub fn new(issued_at_ms: i64) -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
            issued_at_ms,
        }
    }

    pub fn key_id(&self) -> KeyId {
        KeyId::of(&self.signing_key.verifying_key())
    }
}

#[async_trait]
impl TimestampAuthority for FixedClockAuthority {
    async fn timestamp(&self, digest: &Digest) -> Result<TimestampToken, TimestampError> {
        Ok(TimestampToken::issue(
            &self.signing_key,
            digest,
            self.issued_at_ms,
        ))
    }
}
