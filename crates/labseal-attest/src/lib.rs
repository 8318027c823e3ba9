//! Attestation for experiment manifests.
//!
//! Two independent claims get attached to a finalized manifest: a
//! detached ed25519 signature by the analyst's provisioned identity
//! ([`signer`]), and a timestamp token from an authority with its own
//! key ([`timestamp`]). Both capabilities are traits, so the pipeline
//! that uses them never depends on where keys live.

pub mod error;
pub mod identity;
pub mod signature;
pub mod signer;
pub mod timestamp;

pub use error::{SignError, TimestampError};
pub use identity::SignerIdentity;
pub use signature::{DetachedSignature, KeyId};
pub use signer::{Ed25519Signer, Signer};
pub use timestamp::{LocalTimestampAuthority, TimestampAuthority, TimestampToken};
