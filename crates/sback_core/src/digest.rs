//! Content digests and blob store path sharding.

use crate::error::{Result, SbError};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 32-byte SHA-256 digest identifying an immutable byte sequence.
///
/// Digests are computed over the *uncompressed* bytes, so the hex form of a
/// `Digest` is exactly `sha256(bytes)` regardless of how the blob is stored
/// on disk.
///
/// # Examples
///
/// ```
/// use sback_core::Digest;
///
/// let d = Digest::of(b"hello, world!");
/// assert_eq!(
///     d.as_hex(),
///     "315f5bdb76d078c43b8ac0064e4a0164612b1fce77c869345bfc94c75894edd3"
/// );
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; 32]);

impl Digest {
    /// The length of a digest in bytes.
    pub const LEN: usize = 32;

    /// The length of a digest as a hex string.
    pub const HEX_LEN: usize = 64;

    /// Computes the SHA-256 digest of the given bytes.
    pub fn of(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(hasher.finalize().into())
    }

    /// Creates a Digest from raw bytes.
    #[inline]
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the underlying 32 bytes.
    #[inline]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Returns this digest as a lowercase 64-character hex string.
    pub fn as_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the two shard directory names (first two byte pairs of hex).
    ///
    /// Blob files live at `blobs/sha256/{aa}/{bb}/{full_hex}.zst`; two
    /// levels cap directory fan-out at 256 entries each.
    ///
    /// # Examples
    ///
    /// ```
    /// use sback_core::Digest;
    ///
    /// let mut bytes = [0u8; 32];
    /// bytes[0] = 0xab;
    /// bytes[1] = 0xcd;
    /// let d = Digest::from_bytes(bytes);
    /// assert_eq!(d.shard(), ("ab".to_string(), "cd".to_string()));
    /// ```
    pub fn shard(&self) -> (String, String) {
        (hex::encode(&self.0[..1]), hex::encode(&self.0[1..2]))
    }

    /// Parses a Digest from a hex string.
    ///
    /// # Errors
    ///
    /// Returns `SbError::InvalidHex` if the string is not valid hex or is
    /// not exactly 64 characters long.
    pub fn from_hex(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != Self::HEX_LEN {
            return Err(SbError::InvalidHex(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }

        let bytes = hex::decode(s).map_err(|e| SbError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SbError::InvalidHex("invalid length".to_string()))?;

        Ok(Self(arr))
    }
}

// Hex on the wire (manifests, journals), raw bytes in compact encodings
// (catalog rows, scratch snapshots).
impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.as_hex())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            Digest::from_hex(&s).map_err(D::Error::custom)
        } else {
            let bytes = Vec::<u8>::deserialize(deserializer)?;
            let arr: [u8; 32] = bytes
                .try_into()
                .map_err(|_| D::Error::custom("digest must be 32 bytes"))?;
            Ok(Self(arr))
        }
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}...)", &self.as_hex()[..12])
    }
}
