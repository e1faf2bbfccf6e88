use super::Transaction;
use crate::error::{BtcError, Result};
use crate::sha256::Hash;
use crate::util::{CanonicalEncode, MerkleRoot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The eight fields committed to by a block's header hash. `tx_count` is
/// included (alongside the seven named fields) so the header binds the
/// number of transactions without ever hashing their contents directly —
/// `merkle_root` already does that job; this just stops a header from being
/// replayed against a differently-sized transaction list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub version: u32,
    pub height: u64,
    pub timestamp: DateTime<Utc>,
    pub prev_block_hash: Hash,
    pub merkle_root: MerkleRoot,
    pub difficulty: u32,
    pub nonce: u64,
    pub tx_count: u32,
}

#[derive(Serialize)]
struct HeaderPayload {
    version: u32,
    height: u64,
    timestamp: i64,
    prev_block_hash: Hash,
    merkle_root: Hash,
    difficulty: u32,
    nonce: u64,
    tx_count: u32,
}

impl BlockHeader {
    pub fn new(
        version: u32,
        height: u64,
        timestamp: DateTime<Utc>,
        prev_block_hash: Hash,
        merkle_root: MerkleRoot,
        difficulty: u32,
        nonce: u64,
        tx_count: u32,
    ) -> Self {
        BlockHeader {
            version,
            height,
            timestamp,
            prev_block_hash,
            merkle_root,
            difficulty,
            nonce,
            tx_count,
        }
    }

    pub fn hash(&self) -> Hash {
        HeaderPayload {
            version: self.version,
            height: self.height,
            timestamp: self.timestamp.timestamp(),
            prev_block_hash: self.prev_block_hash,
            merkle_root: self.merkle_root.as_hash(),
            difficulty: self.difficulty,
            nonce: self.nonce,
            tx_count: self.tx_count,
        }
        .canonical_hash()
    }

    pub fn meets_target(&self) -> bool {
        self.hash().meets_difficulty(self.difficulty)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Full wire/storage size in bytes.
    pub fn size_bytes(&self) -> usize {
        self.canonical_bytes().len()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first()
    }

    /// Structural checks that don't need a UTXO snapshot: non-empty,
    /// leading coinbase, merkle root, header hash and size. Everything that
    /// needs chain/UTXO context lives in the validator.
    pub fn check_structure(&self, max_bytes: usize) -> Result<()> {
        if self.transactions.is_empty() {
            return Err(BtcError::other("block has no transactions"));
        }
        if !self.transactions[0].is_coinbase() {
            return Err(BtcError::other("first transaction is not coinbase"));
        }
        if self.transactions[0].outputs.len() != 1 {
            return Err(BtcError::other("coinbase must have exactly one output"));
        }
        if self.transactions.iter().skip(1).any(Transaction::is_coinbase) {
            return Err(BtcError::other("only the first transaction may be coinbase"));
        }
        if self.header.tx_count as usize != self.transactions.len() {
            return Err(BtcError::other("tx_count does not match transactions"));
        }
        if MerkleRoot::calculate(&self.transactions) != self.header.merkle_root {
            return Err(BtcError::BadMerkleRoot);
        }
        if !self.header.meets_target() {
            return Err(BtcError::PoWFailure);
        }
        if self.size_bytes() > max_bytes {
            return Err(BtcError::BlockTooLarge);
        }
        Ok(())
    }
}
