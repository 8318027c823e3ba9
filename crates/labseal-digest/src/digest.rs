//! Content digests for experiment evidence.
//!
//! Every file that enters or leaves an experiment is identified by the
//! SHA-256 digest of its bytes. Digests are stored and compared in raw
//! form and rendered as lowercase hex at the serialization boundary.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use thiserror::Error;

/// A 32-byte SHA-256 content digest.
///
/// Equality is byte equality. The `Display` form is the full lowercase
/// hex encoding, which is also the canonical form inside manifests.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest([u8; 32]);

impl Digest {
    /// Digest length in bytes.
    pub const LENGTH: usize = 32;

    /// Wraps raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrows the raw digest bytes.
    #[inline]
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Consumes the digest, returning the raw bytes.
    #[inline]
    #[must_use]
    pub const fn into_bytes(self) -> [u8; 32] {
        self.0
    }

    /// Builds a digest from a byte slice of exactly [`Self::LENGTH`] bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DigestError::InvalidLength`] for any other length.
    pub fn from_slice(slice: &[u8]) -> Result<Self, DigestError> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| DigestError::InvalidLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Hashes a byte buffer.
    #[must_use]
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Hashes everything a reader yields, in fixed-size chunks.
    ///
    /// # Errors
    ///
    /// Propagates any I/O error from the reader.
    pub fn compute_reader<R: std::io::Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(Self(hasher.finalize().into()))
    }

    /// First eight bytes as hex, for logs and error messages.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }

    /// Whether every byte is zero. The all-zero digest is reserved as
    /// the aggregate of an empty tree and never arises from hashing.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.short())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for Digest {
    type Err = DigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s)?;
        Self::from_slice(&decoded)
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct DigestVisitor;

        impl<'de> serde::de::Visitor<'de> for DigestVisitor {
            type Value = Digest;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a hex string or 32 raw bytes")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Digest, E> {
                Digest::from_str(v).map_err(E::custom)
            }

            fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Digest, E> {
                Digest::from_slice(v).map_err(E::custom)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Digest, A::Error>
            where
                A: serde::de::SeqAccess<'de>,
            {
                let mut bytes = Vec::with_capacity(Digest::LENGTH);
                while let Some(b) = seq.next_element::<u8>()? {
                    bytes.push(b);
                }
                Digest::from_slice(&bytes).map_err(serde::de::Error::custom)
            }
        }

        if deserializer.is_human_readable() {
            deserializer.deserialize_str(DigestVisitor)
        } else {
            deserializer.deserialize_bytes(DigestVisitor)
        }
    }
}

/// Errors from constructing or parsing digests.
#[derive(Debug, Error)]
pub enum DigestError {
    /// The byte slice was not exactly 32 bytes long.
    #[error("invalid digest length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    /// The string was not valid hex.
    #[error("invalid hex encoding: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn compute_matches_known_vectors() {
        // Independently verified SHA-256 values.
        assert_eq!(
            Digest::compute(b"").to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            Digest::compute(b"abc").to_string(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            Digest::compute(b"1,2,3").to_string(),
            "8a6ae15122001229edb8866f56e342af12ae8187203c3e3b33931743e7c0c48d"
        );
    }

    #[test]
    fn compute_is_deterministic() {
        let a = Digest::compute(b"replication crisis");
        let b = Digest::compute(b"replication crisis");
        assert_eq!(a, b);
        assert_ne!(a, Digest::compute(b"replication  crisis"));
    }

    #[test]
    fn compute_reader_matches_compute() {
        let data = vec![0xabu8; 200_000];
        let from_reader = Digest::compute_reader(&data[..]).unwrap();
        assert_eq!(from_reader, Digest::compute(&data));
    }

    #[test]
    fn display_from_str_round_trip() {
        let digest = Digest::compute(b"hello world");
        let parsed: Digest = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = Digest::from_slice(&[1, 2, 3]).unwrap_err();
        assert!(matches!(err, DigestError::InvalidLength(3)));
    }

    #[test]
    fn from_str_rejects_bad_hex() {
        assert!("zz".parse::<Digest>().is_err());
        // Valid hex, wrong length.
        assert!("abcd".parse::<Digest>().is_err());
    }

    #[test]
    fn short_is_sixteen_hex_chars() {
        let digest = Digest::compute(b"abc");
        assert_eq!(digest.short().len(), 16);
        assert!(digest.to_string().starts_with(&digest.short()));
    }

    #[test]
    fn json_form_is_hex_string() {
        let digest = Digest::compute(b"hello world");
        let json = serde_json::to_string(&digest).unwrap();
        assert_eq!(
            json,
            "\"b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9\""
        );
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
    }

    #[test]
    fn zero_digest_is_flagged() {
        assert!(Digest::new([0u8; 32]).is_zero());
        assert!(!Digest::compute(b"").is_zero());
    }

    proptest! {
        #[test]
        fn hex_round_trip(bytes in prop::array::uniform32(any::<u8>())) {
            let digest = Digest::new(bytes);
            let parsed: Digest = digest.to_string().parse().unwrap();
            prop_assert_eq!(parsed, digest);
        }
    }
}
