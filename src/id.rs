//! 160-bit identifiers and the XOR distance metric.
//!
//! An [`Id`] is either the SHA-1 digest of an opaque key or a uniformly
//! random 160-bit value. Two identifiers support equality, total order,
//! and the XOR metric. [`bit_index`] locates the most-significant bit on
//! which two identifiers differ, which is what [`crate::routing_table`]
//! uses to place a contact into one of `B` buckets.

use std::fmt;

use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};

use crate::B;

const BYTES: usize = B / 8;

/// A 160-bit unsigned identifier.
///
/// Stored big-endian (`0`th byte is most significant), so the derived
/// `Ord` is lexicographic byte comparison, which is also magnitude
/// comparison of the 160-bit unsigned integer — the same property the
/// routing table relies on to sort contacts by XOR distance.
///
/// Serializes as a hex string rather than deriving `serde`'s default array
/// encoding: the wire format is JSON (see [`crate::codec`]), and a hex
/// string keeps the 160-bit value unambiguous and lossless across codecs
/// that don't special-case fixed-size byte arrays.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; BYTES]);

impl Serialize for Id {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Id::from_hex(&s).map_err(de::Error::custom)
    }
}

impl Id {
    /// The all-zero identifier.
    pub const ZERO: Id = Id([0u8; BYTES]);

    /// Derive an identifier from an opaque key as `SHA-1(key)`.
    pub fn from_key(key: &[u8]) -> Self {
        let mut hasher = Sha1::new();
        hasher.update(key);
        let digest = hasher.finalize();
        let mut bytes = [0u8; BYTES];
        bytes.copy_from_slice(&digest);
        Id(bytes)
    }

    /// Generate a uniformly random identifier from a cryptographically
    /// strong source.
    pub fn random() -> Self {
        let mut bytes = [0u8; BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Id(bytes)
    }

    /// Build an identifier from raw big-endian bytes.
    pub fn from_bytes(bytes: [u8; BYTES]) -> Self {
        Id(bytes)
    }

    /// Return the raw big-endian bytes.
    pub fn as_bytes(&self) -> &[u8; BYTES] {
        &self.0
    }

    /// XOR distance between two identifiers.
    pub fn xor(&self, other: &Id) -> Id {
        let mut out = [0u8; BYTES];
        for i in 0..BYTES {
            out[i] = self.0[i] ^ other.0[i];
        }
        Id(out)
    }

    fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// Hex encoding, most significant byte first.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a hex-encoded identifier (as produced by [`Id::to_hex`]).
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let decoded = hex::decode(s)?;
        let mut bytes = [0u8; BYTES];
        if decoded.len() != BYTES {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        bytes.copy_from_slice(&decoded);
        Ok(Id(bytes))
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// The most-significant differing bit between `a` and `b`, zero-based from
/// the least-significant bit (so a difference in the very top bit of the
/// identifier returns `B - 1`, and a difference only in the bottom bit
/// returns `0`). Returns `None` when `a == b` ("coincident").
///
/// This is `floor(log2(a ^ b))` computed by counting bits directly,
/// never via floating-point `log`.
pub fn bit_index(a: &Id, b: &Id) -> Option<usize> {
    let x = a.xor(b);
    if x.is_zero() {
        return None;
    }
    for (byte_pos, byte) in x.0.iter().enumerate() {
        if *byte != 0 {
            let leading = byte.leading_zeros() as usize;
            let bit_from_msb = byte_pos * 8 + leading;
            return Some(B - 1 - bit_from_msb);
        }
    }
    unreachable!("xor was checked non-zero above")
}
