use crate::crypto::{Address, PrivateKey, PublicKey, Signature};
use crate::sha256::Hash;
use crate::util::CanonicalEncode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// `(txid, output_index)` — the globally unique key of a UTXO.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    pub txid: Hash,
    pub index: u32,
}

impl Outpoint {
    pub fn new(txid: Hash, index: u32) -> Self {
        Outpoint { txid, index }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionInput {
    pub prev_outpoint: Outpoint,
    pub signature: Signature,
    pub pubkey: PublicKey,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransactionOutput {
    pub amount: u64,
    pub script_pubkey: Address,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub version: u32,
    pub chain_id: u64,
    pub inputs: Vec<TransactionInput>,
    pub outputs: Vec<TransactionOutput>,
    pub locktime: u64,
    pub timestamp: DateTime<Utc>,
}

/// Reduced view hashed in place of the full transaction to compute `txid`
/// and `signing_hash`: signatures are never part of either hash, which is
/// what makes a transaction's identity immune to signature malleability.
#[derive(Serialize)]
struct UnsignedInput<'a> {
    prev_outpoint: Outpoint,
    pubkey: &'a PublicKey,
}

#[derive(Serialize)]
struct UnsignedTransaction<'a> {
    version: u32,
    chain_id: u64,
    // `None` for txid, `Some(i)` for the hash input `i` signs — the two
    // purposes must never collide on the same bytes.
    signing_index: Option<u64>,
    inputs: Vec<UnsignedInput<'a>>,
    outputs: &'a [TransactionOutput],
    locktime: u64,
    timestamp: i64,
}

impl Transaction {
    pub fn new(
        version: u32,
        chain_id: u64,
        inputs: Vec<TransactionInput>,
        outputs: Vec<TransactionOutput>,
        locktime: u64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Transaction {
            version,
            chain_id,
            inputs,
            outputs,
            locktime,
            timestamp,
        }
    }

    /// A coinbase transaction: no inputs, exactly one output paying the
    /// block subsidy (or the fixed genesis pre-mine) to `script_pubkey`.
    pub fn coinbase(chain_id: u64, amount: u64, script_pubkey: Address, timestamp: DateTime<Utc>) -> Self {
        Transaction {
            version: 1,
            chain_id,
            inputs: vec![],
            outputs: vec![TransactionOutput {
                amount,
                script_pubkey,
            }],
            locktime: 0,
            timestamp,
        }
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    fn unsigned_bytes(&self, signing_index: Option<usize>) -> Vec<u8> {
        let inputs = self
            .inputs
            .iter()
            .map(|input| UnsignedInput {
                prev_outpoint: input.prev_outpoint,
                pubkey: &input.pubkey,
            })
            .collect();
        let payload = UnsignedTransaction {
            version: self.version,
            chain_id: self.chain_id,
            signing_index: signing_index.map(|i| i as u64),
            inputs,
            outputs: &self.outputs,
            locktime: self.locktime,
            timestamp: self.timestamp.timestamp(),
        };
        payload.canonical_bytes()
    }

    /// Double-SHA256 over the canonical form with signatures excluded
    /// entirely. This is the transaction's identity.
    pub fn txid(&self) -> Hash {
        Hash::double_sha256(&self.unsigned_bytes(None))
    }

    /// The message ECDSA signs for input `i`: canonical form including the
    /// signing index but, like `txid`, with every signature excluded.
    pub fn signing_hash(&self, index: usize) -> Hash {
        Hash::double_sha256(&self.unsigned_bytes(Some(index)))
    }

    /// Signs input `index` under `sk`, filling in both `signature` and
    /// `pubkey`. Convenience for wallets and tests; the validator re-derives
    /// the same `signing_hash` independently.
    pub fn sign_input(&mut self, index: usize, sk: &PrivateKey) {
        let message = self.signing_hash(index);
        self.inputs[index].signature = Signature::sign_hash(&message, sk);
        self.inputs[index].pubkey = sk.public_key();
    }

    /// Wire/storage size in bytes: the full canonical encoding, signatures
    /// included, since that's what actually crosses the network.
    pub fn size_bytes(&self) -> usize {
        self.canonical_bytes().len()
    }

    pub fn output_sum(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }
}

#[cfg(test)]
mod tests;
