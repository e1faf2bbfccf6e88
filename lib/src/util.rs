use crate::sha256::Hash;
use crate::types::Transaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Result as IoResult, Write};
use std::path::Path;

/// Serializes `self` into the single canonical byte form used everywhere a
/// hash is taken over structured data: `serde_json`'s default `Map` is
/// `BTreeMap`-backed, so object keys come out lexicographically sorted with
/// no extra bookkeeping on our part, and every integer field round-trips
/// byte-for-byte. Any `Serialize` type gets this for free; code that needs to
/// exclude fields from a hash (signatures from a txid, say) builds a reduced,
/// purpose-built struct and canonicalizes that instead of the real one.
pub trait CanonicalEncode: Serialize {
    fn canonical_bytes(&self) -> Vec<u8> {
        let value =
            serde_json::to_value(self).expect("ledger types are always representable as JSON");
        serde_json::to_vec(&value).expect("serde_json::Value serialization cannot fail")
    }

    fn canonical_hash(&self) -> Hash {
        Hash::double_sha256(&self.canonical_bytes())
    }
}

impl<T: Serialize> CanonicalEncode for T {}

/// The Merkle root of a block's transactions.
///
/// A Merkle tree is a binary tree where leaf nodes are transaction ids and
/// every other node is the combined hash of its two children. When a level
/// has an odd number of nodes, the last one is duplicated before combining,
/// so `[A, B, C]` becomes `H(H(A,B), H(C,C))`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct MerkleRoot(Hash);

impl MerkleRoot {
    pub fn calculate(transactions: &[Transaction]) -> MerkleRoot {
        let mut layer: Vec<Hash> = transactions.iter().map(Transaction::txid).collect();
        if layer.is_empty() {
            return MerkleRoot(Hash::zero());
        }
        while layer.len() > 1 {
            let mut next = Vec::with_capacity((layer.len() + 1) / 2);
            for pair in layer.chunks(2) {
                let left = &pair[0];
                let right = pair.get(1).unwrap_or(&pair[0]);
                next.push(Hash::combine(left, right));
            }
            layer = next;
        }
        MerkleRoot(layer[0])
    }

    pub fn as_hash(&self) -> Hash {
        self.0
    }
}

pub trait Saveable
where
    Self: Sized + Serialize + DeserializeOwned,
{
    fn load<I: Read>(reader: I) -> IoResult<Self>;
    fn save<O: Write>(&self, writer: O) -> IoResult<()>;

    fn save_to_file<P: AsRef<Path>>(&self, path: P) -> IoResult<()> {
        let file = File::create(&path)?;
        self.save(file)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> IoResult<Self> {
        let file = File::open(&path)?;
        Self::load(file)
    }
}

#[cfg(test)]
mod tests;
