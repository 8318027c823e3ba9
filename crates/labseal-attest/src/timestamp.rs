//! Trusted timestamp tokens.
//!
//! A timestamp token is the authority's signature over the manifest
//! digest and the issue instant. It proves the manifest existed no
//! later than that instant under a key independent of the analyst's
//! signing identity. Tokens embed the authority's public key, so a
//! verifier needs nothing but the token and the manifest bytes; the
//! fingerprint and self-consistency checks keep a forged token from
//! smuggling in a different digest.

use std::fmt;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use labseal_digest::Digest;

use crate::error::TimestampError;
use crate::identity::{decode_key_file, encode_key_file};
use crate::signature::KeyId;

/// A signed claim that a digest existed at an instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampToken {
    /// Fingerprint of the authority key.
    pub authority_key_id: KeyId,
    /// Hex-encoded authority public key.
    pub authority_public_key: String,
    /// The digest the token binds.
    pub digest: Digest,
    /// Issue instant, epoch milliseconds on the authority clock.
    pub issued_at_ms: i64,
    /// Hex-encoded authority signature over digest and instant.
    pub signature: String,
}

impl TimestampToken {
    /// Issues a token binding `digest` at `issued_at_ms` under
    /// `signing_key`. Authorities call this with their own clock;
    /// tests call it with a pinned instant.
    #[must_use]
    pub fn issue(signing_key: &SigningKey, digest: &Digest, issued_at_ms: i64) -> Self {
        let signature = signing_key.sign(&token_message(digest, issued_at_ms));
        Self {
            authority_key_id: KeyId::of(&signing_key.verifying_key()),
            authority_public_key: hex::encode(signing_key.verifying_key().as_bytes()),
            digest: *digest,
            issued_at_ms,
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// Checks that the token binds `digest` at its claimed instant.
    ///
    /// Returns `false` when the bound digest differs, the embedded key
    /// is malformed or does not match its fingerprint, or the
    /// signature does not verify.
    #[must_use]
    pub fn verify(&self, digest: &Digest) -> bool {
        if self.digest != *digest {
            return false;
        }
        let Ok(key_bytes) = hex::decode(&self.authority_public_key) else {
            return false;
        };
        let Ok(key_bytes) = <[u8; 32]>::try_from(key_bytes) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        if self.authority_key_id != KeyId::of(&key) {
            return false;
        }
        let Ok(sig_bytes) = hex::decode(&self.signature) else {
            return false;
        };
        let Ok(signature) = Signature::from_slice(&sig_bytes) else {
            return false;
        };
        key.verify(&token_message(&self.digest, self.issued_at_ms), &signature)
            .is_ok()
    }
}

fn token_message(digest: &Digest, issued_at_ms: i64) -> Vec<u8> {
    let mut msg = Vec::with_capacity(Digest::LENGTH + 8);
    msg.extend_from_slice(digest.as_bytes());
    msg.extend_from_slice(&issued_at_ms.to_le_bytes());
    msg
}

/// Capability to obtain timestamp tokens.
///
/// Failures here are recoverable: callers degrade to a signed but
/// untimestamped manifest instead of aborting.
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    /// Issues a token binding `digest` to the authority's clock.
    ///
    /// # Errors
    ///
    /// Returns a [`TimestampError`] when no token can be issued.
    async fn timestamp(&self, digest: &Digest) -> Result<TimestampToken, TimestampError>;
}

/// A process-local authority signing with its own persisted key.
///
/// The clock is local, so the time claim is only as strong as the host
/// clock. What the local authority does guarantee is key separation:
/// tokens are never signed by the analyst identity.
pub struct LocalTimestampAuthority {
    signing_key: SigningKey,
}

impl fmt::Debug for LocalTimestampAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTimestampAuthority")
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

impl LocalTimestampAuthority {
    /// Opens the authority key at `path`, generating and persisting a
    /// fresh one on first use. Old tokens stay verifiable across key
    /// rotation because each token embeds its public key.
    ///
    /// # Errors
    ///
    /// [`TimestampError::KeyCorrupt`] if the file exists but cannot be
    /// used; [`TimestampError::Io`] on read or write failure.
    pub async fn open(path: &Path) -> Result<Self, TimestampError> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let signing_key =
                    decode_key_file(&bytes).map_err(|reason| TimestampError::KeyCorrupt {
                        path: path.to_path_buf(),
                        reason,
                    })?;
                Ok(Self { signing_key })
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let signing_key = SigningKey::generate(&mut OsRng);
                let bytes =
                    encode_key_file(&signing_key).map_err(|e| TimestampError::io(path, e))?;
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| TimestampError::io(parent, e))?;
                }
                tokio::fs::write(path, &bytes)
                    .await
                    .map_err(|e| TimestampError::io(path, e))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                        .await
                        .map_err(|e| TimestampError::io(path, e))?;
                }
                let authority = Self { signing_key };
                info!(key_id = %authority.key_id(), path = %path.display(), "timestamp authority key generated");
                Ok(authority)
            }
            Err(e) => Err(TimestampError::io(path, e)),
        }
    }

    /// Authority with a fresh key and no persistence.
    #[must_use]
    pub fn ephemeral() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Fingerprint of the authority key.
    #[must_use]
    pub fn key_id(&self) -> KeyId {
        KeyId::of(&self.signing_key.verifying_key())
    }
}

#[async_trait]
impl TimestampAuthority for LocalTimestampAuthority {
    async fn timestamp(&self, digest: &Digest) -> Result<TimestampToken, TimestampError> {
        Ok(TimestampToken::issue(
            &self.signing_key,
            digest,
            Utc::now().timestamp_millis(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn token_binds_digest_and_instant() {
        let authority = LocalTimestampAuthority::ephemeral();
        let digest = Digest::compute(b"manifest bytes");

        let token = authority.timestamp(&digest).await.unwrap();
        assert!(token.verify(&digest));
        assert!(!token.verify(&Digest::compute(b"other bytes")));
    }

    #[tokio::test]
    async fn tampered_instant_fails_verification() {
        let authority = LocalTimestampAuthority::ephemeral();
        let digest = Digest::compute(b"manifest bytes");

        let mut token = authority.timestamp(&digest).await.unwrap();
        token.issued_at_ms += 1;
        assert!(!token.verify(&digest));
    }

    #[tokio::test]
    async fn swapped_digest_fails_even_with_matching_field() {
        let authority = LocalTimestampAuthority::ephemeral();
        let original = Digest::compute(b"original");
        let forged = Digest::compute(b"forged");

        let mut token = authority.timestamp(&original).await.unwrap();
        // Forge the bound digest without re-signing.
        token.digest = forged;
        assert!(!token.verify(&forged));
    }

    #[tokio::test]
    async fn foreign_key_fails_fingerprint_check() {
        let authority = LocalTimestampAuthority::ephemeral();
        let digest = Digest::compute(b"manifest bytes");

        let mut token = authority.timestamp(&digest).await.unwrap();
        let other = SigningKey::generate(&mut OsRng);
        token.authority_public_key = hex::encode(other.verifying_key().as_bytes());
        assert!(!token.verify(&digest));
    }

    #[tokio::test]
    async fn open_persists_and_reloads_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authority.json");

        let first = LocalTimestampAuthority::open(&path).await.unwrap();
        let second = LocalTimestampAuthority::open(&path).await.unwrap();
        assert_eq!(first.key_id(), second.key_id());
    }

    #[tokio::test]
    async fn corrupt_authority_key_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authority.json");
        tokio::fs::write(&path, b"nonsense").await.unwrap();

        let err = LocalTimestampAuthority::open(&path).await.unwrap_err();
        assert!(matches!(err, TimestampError::KeyCorrupt { .. }));
    }

    #[tokio::test]
    async fn token_survives_json_round_trip() {
        let authority = LocalTimestampAuthority::ephemeral();
        let digest = Digest::compute(b"manifest bytes");
        let token = authority.timestamp(&digest).await.unwrap();

        let json = serde_json::to_string(&token).unwrap();
        let back: TimestampToken = serde_json::from_str(&json).unwrap();
        assert_eq!(back, token);
        assert!(back.verify(&digest));
    }
}
