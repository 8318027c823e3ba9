//! Detached signature envelopes and key fingerprints.

use std::fmt;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::SignError;

/// Short fingerprint of a verifying key: the first eight bytes of the
/// SHA-256 of the raw public key, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Fingerprint of `key`.
    #[must_use]
    pub fn of(key: &VerifyingKey) -> Self {
        let digest = Sha256::digest(key.as_bytes());
        Self(hex::encode(&digest[..8]))
    }

    /// The hex fingerprint.
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A detached ed25519 signature over exact message bytes.
///
/// The envelope is self-describing: it names the algorithm and the
/// fingerprint of the key that must check it, but never embeds the
/// key itself. Verification always goes through a separately resolved
/// identity, so a forged envelope cannot bring its own trust anchor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignature {
    /// Signature algorithm, always `ed25519` today.
    pub algorithm: String,
    /// Fingerprint of the expected verifying key.
    pub key_id: KeyId,
    /// Hex-encoded 64-byte signature.
    pub signature: String,
}

impl DetachedSignature {
    /// The only algorithm currently produced or accepted.
    pub const ALGORITHM: &'static str = "ed25519";

    /// Signs `message` with `key`, producing a detached envelope.
    #[must_use]
    pub fn sign(key: &SigningKey, message: &[u8]) -> Self {
        let signature = key.sign(message);
        Self {
            algorithm: Self::ALGORITHM.to_owned(),
            key_id: KeyId::of(&key.verifying_key()),
            signature: hex::encode(signature.to_bytes()),
        }
    }

    /// Checks the envelope against `message` under `key`.
    ///
    /// Returns `false` for an unknown algorithm, a fingerprint that
    /// does not match `key`, an undecodable signature, or a signature
    /// that does not verify. No distinction is reported: any of these
    /// means the attestation cannot be trusted.
    #[must_use]
    pub fn verify(&self, key: &VerifyingKey, message: &[u8]) -> bool {
        if self.algorithm != Self::ALGORITHM || self.key_id != KeyId::of(key) {
            return false;
        }
        let Ok(signature) = self.decode() else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }

    /// Decodes the hex signature bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SignError::Rejected`] describing the malformed field.
    pub fn decode(&self) -> Result<Signature, SignError> {
        let bytes = hex::decode(&self.signature)
            .map_err(|e| SignError::Rejected(format!("signature is not hex: {e}")))?;
        Signature::from_slice(&bytes)
            .map_err(|e| SignError::Rejected(format!("signature is malformed: {e}")))
    }
}
