use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// A double-SHA256 digest. Used for transaction ids, block header hashes and
/// Merkle tree nodes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash([u8; 32]);

// Hex-encoded in both the wire protocol and canonical hashing payloads, so
// every JSON rendering of a Hash looks the same regardless of call site.
impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

impl Hash {
    pub fn zero() -> Self {
        Hash([0; 32])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Single SHA256 over raw bytes.
    pub fn sha256(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        Hash(digest.into())
    }

    /// Double SHA256 over raw bytes, the canonical hash used for tx/block identity.
    pub fn double_sha256(data: &[u8]) -> Self {
        let first = Sha256::digest(data);
        let second = Sha256::digest(first);
        Hash(second.into())
    }

    /// Hash two digests together by concatenating their hex encodings, then
    /// SHA256ing the result. This is the Merkle tree's internal-node
    /// combinator: fixing the hex encoding (rather than raw bytes) avoids
    /// ever mixing encodings across implementations.
    pub fn combine(left: &Hash, right: &Hash) -> Self {
        let mut s = left.to_hex();
        s.push_str(&right.to_hex());
        Hash::sha256(s.as_bytes())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(Hash(out))
    }

    /// Number of leading zero hex nibbles, used to check a header hash
    /// against an integer difficulty.
    pub fn leading_zero_nibbles(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte < 0x10 {
                count += 1;
            }
            break;
        }
        count
    }

    /// True if this hash has at least `difficulty` leading zero hex nibbles.
    pub fn meets_difficulty(&self, difficulty: u32) -> bool {
        self.leading_zero_nibbles() >= difficulty
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_sha256_is_stable() {
        let a = Hash::double_sha256(b"hello");
        let b = Hash::double_sha256(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn leading_zero_nibbles_counts_correctly() {
        let h = Hash::from_hex(&"00".repeat(32)).unwrap();
        assert_eq!(h.leading_zero_nibbles(), 64);
        let h = Hash::from_hex(&format!("0a{}", "ff".repeat(31))).unwrap();
        assert_eq!(h.leading_zero_nibbles(), 1);
        let h = Hash::from_hex(&"ff".repeat(32)).unwrap();
        assert_eq!(h.leading_zero_nibbles(), 0);
    }

    #[test]
    fn meets_difficulty_boundary() {
        let h = Hash::from_hex(&format!("000{}", "f".repeat(61))).unwrap();
        assert!(h.meets_difficulty(3));
        assert!(!h.meets_difficulty(4));
    }
}
