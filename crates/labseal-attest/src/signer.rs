//! The signing capability.

use std::fmt;

use async_trait::async_trait;

use crate::error::SignError;
use crate::identity::SignerIdentity;
use crate::signature::{DetachedSignature, KeyId};

/// Capability to produce detached signatures over exact message bytes.
///
/// The finalize pipeline only sees this trait, so tests can substitute
/// a refusing signer and deployments can route signing elsewhere
/// without touching the pipeline.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Fingerprint of the key signatures will cite.
    fn key_id(&self) -> KeyId;

    /// Signs the exact bytes of `message`.
    ///
    /// # Errors
    ///
    /// Returns a [`SignError`] when no signature can be produced. The
    /// caller treats this as fatal to the operation being attested.
    async fn sign(&self, message: &[u8]) -> Result<DetachedSignature, SignError>;
}

/// Signer backed by a locally held [`SignerIdentity`].
pub struct Ed25519Signer {
    identity: SignerIdentity,
}

impl Ed25519Signer {
    /// Wraps a loaded identity.
    #[must_use]
    pub fn new(identity: SignerIdentity) -> Self {
        Self { identity }
    }

    /// The identity behind this signer.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> &SignerIdentity {
        &self.identity
    }
}

impl fmt::Debug for Ed25519Signer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ed25519Signer")
            .field("key_id", self.identity.key_id())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Signer for Ed25519Signer {
    fn key_id(&self) -> KeyId {
        self.identity.key_id().clone()
    }

    async fn sign(&self, message: &[u8]) -> Result<DetachedSignature, SignError> {
        Ok(DetachedSignature::sign(self.identity.signing_key(), message))
    }
}
