//! Signer identities and their on-disk key files.
//!
//! An identity is an ed25519 keypair persisted as a small JSON file
//! with owner-only permissions. Provisioning is an explicit act:
//! loading a missing identity is an error, never a silent keygen, so a
//! signature can always be traced to a deliberately created key.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::SignError;
use crate::signature::{DetachedSignature, KeyId};

const IDENTITY_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct IdentityFile {
    version: u32,
    algorithm: String,
    secret_key: String,
    public_key: String,
}

/// Serializes a signing key in the shared key-file format.
pub(crate) fn encode_key_file(key: &SigningKey) -> io::Result<Vec<u8>> {
    let file = IdentityFile {
        version: IDENTITY_VERSION,
        algorithm: DetachedSignature::ALGORITHM.to_owned(),
        secret_key: hex::encode(key.to_bytes()),
        public_key: hex::encode(key.verifying_key().as_bytes()),
    };
    serde_json::to_vec_pretty(&file).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Parses a key file, returning a human-readable reason on failure.
pub(crate) fn decode_key_file(bytes: &[u8]) -> Result<SigningKey, String> {
    let file: IdentityFile =
        serde_json::from_slice(bytes).map_err(|e| format!("not valid json: {e}"))?;
    if file.version != IDENTITY_VERSION {
        return Err(format!("unsupported version {}", file.version));
    }
    if file.algorithm != DetachedSignature::ALGORITHM {
        return Err(format!("unsupported algorithm {}", file.algorithm));
    }

    let secret = hex::decode(&file.secret_key).map_err(|e| format!("secret key is not hex: {e}"))?;
    let secret: [u8; 32] = secret
        .try_into()
        .map_err(|_| "secret key has wrong length".to_owned())?;
    let signing_key = SigningKey::from_bytes(&secret);

    let derived = hex::encode(signing_key.verifying_key().as_bytes());
    if derived != file.public_key {
        return Err("public key does not match secret key".to_owned());
    }
    Ok(signing_key)
}

/// A locally held signing identity.
pub struct SignerIdentity {
    signing_key: SigningKey,
    key_id: KeyId,
}

// Debug omits key material.
impl fmt::Debug for SignerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerIdentity")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl SignerIdentity {
    /// Generates a fresh keypair and persists it at `path`.
    ///
    /// # Errors
    ///
    /// [`SignError::IdentityExists`] if a file is already there;
    /// [`SignError::Io`] on write failure.
    pub async fn provision(path: &Path) -> Result<Self, SignError> {
        match tokio::fs::metadata(path).await {
            Ok(_) => {
                return Err(SignError::IdentityExists {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SignError::io(path, e)),
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let bytes = encode_key_file(&signing_key).map_err(|e| SignError::io(path, e))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SignError::io(parent, e))?;
        }
        tokio::fs::write(path, &bytes)
            .await
            .map_err(|e| SignError::io(path, e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| SignError::io(path, e))?;
        }

        let key_id = KeyId::of(&signing_key.verifying_key());
        info!(%key_id, path = %path.display(), "signer identity provisioned");
        Ok(Self { signing_key, key_id })
    }

    /// Loads the identity at `path`.
    ///
    /// # Errors
    ///
    /// [`SignError::IdentityMissing`] if there is no file;
    /// [`SignError::KeyCorrupt`] if the file fails any consistency
    /// check, including the stored public key not matching the secret.
    pub async fn load(path: &Path) -> Result<Self, SignError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(SignError::IdentityMissing {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(SignError::io(path, e)),
        };

        let signing_key = decode_key_file(&bytes).map_err(|reason| corrupt(path, reason))?;
        let key_id = KeyId::of(&signing_key.verifying_key());
        Ok(Self { signing_key, key_id })
    }

    /// Fingerprint of this identity's verifying key.
    #[inline]
    #[must_use]
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// The public half of the keypair.
    #[must_use]
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

fn corrupt(path: &Path, reason: String) -> SignError {
    SignError::KeyCorrupt {
        path: path.to_path_buf(),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provision_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/identity.json");

        let provisioned = SignerIdentity::provision(&path).await.unwrap();
        let loaded = SignerIdentity::load(&path).await.unwrap();
        assert_eq!(loaded.key_id(), provisioned.key_id());
        assert_eq!(loaded.verifying_key(), provisioned.verifying_key());
    }

    #[tokio::test]
    async fn load_without_provisioning_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = SignerIdentity::load(&dir.path().join("identity.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, SignError::IdentityMissing { .. }));
    }

    #[tokio::test]
    async fn provisioning_twice_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        SignerIdentity::provision(&path).await.unwrap();
        let err = SignerIdentity::provision(&path).await.unwrap_err();
        assert!(matches!(err, SignError::IdentityExists { .. }));
    }

    #[tokio::test]
    async fn mismatched_public_key_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        SignerIdentity::provision(&path).await.unwrap();

        let mut file: serde_json::Value =
            serde_json::from_slice(&tokio::fs::read(&path).await.unwrap()).unwrap();
        file["public_key"] = serde_json::Value::String(hex::encode([7u8; 32]));
        tokio::fs::write(&path, serde_json::to_vec(&file).unwrap())
            .await
            .unwrap();

        let err = SignerIdentity::load(&path).await.unwrap_err();
        assert!(matches!(err, SignError::KeyCorrupt { .. }));
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        tokio::fs::write(&path, b"{ truncated").await.unwrap();
        let err = SignerIdentity::load(&path).await.unwrap_err();
        assert!(matches!(err, SignError::KeyCorrupt { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn key_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        SignerIdentity::provision(&path).await.unwrap();

        let mode = tokio::fs::metadata(&path).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
