//! The miner (C9): assembles a candidate block from the mempool and
//! searches for a nonce satisfying the active difficulty target. Mining
//! itself never touches a lock for longer than it takes to read a snapshot
//! — the nonce search runs entirely over owned data.

use crate::consensus;
use crate::crypto::Address;
use crate::mempool::Mempool;
use crate::sha256::Hash;
use crate::types::{Block, BlockHeader, Transaction};
use crate::util::MerkleRoot;
use crate::utxo::UtxoSet;
use chrono::Utc;
use rand::RngCore;

/// A block assembled and ready for nonce search, plus the fee total it
/// carries (useful for logging/metrics without recomputing it).
pub struct Candidate {
    pub block: Block,
    pub fees: u64,
}

/// Builds a coinbase paying `subsidy(height) + sum(fees)` to `miner_address`,
/// selects mempool transactions up to the remaining block budget, and
/// computes the merkle root. The nonce field of the returned header is left
/// at its random start; call [`mine`] to search for a valid nonce.
pub fn build_candidate(height: u64, prev_block_hash: Hash, difficulty: u32, miner_address: &Address, mempool: &Mempool) -> Candidate {
    // Reserve room for the coinbase by selecting against an optimistic
    // upper bound, then re-measuring after the coinbase amount is known —
    // the coinbase's own size doesn't depend on which transactions follow
    // it, so one pass is enough.
    let placeholder_coinbase = Transaction::coinbase(crate::DEFAULT_CHAIN_ID, 0, miner_address.clone(), Utc::now());
    let coinbase_size = placeholder_coinbase.size_bytes();
    let budget = crate::MAX_BLOCK_BYTES.saturating_sub(coinbase_size);

    let selected = mempool.select_for_block(budget);
    let fees: u64 = selected
        .iter()
        .filter_map(|tx| mempool.fee_of(&tx.txid()))
        .sum();

    let coinbase = Transaction::coinbase(
        crate::DEFAULT_CHAIN_ID,
        consensus::subsidy(height) + fees,
        miner_address.clone(),
        Utc::now(),
    );

    let mut transactions = Vec::with_capacity(selected.len() + 1);
    transactions.push(coinbase);
    transactions.extend(selected);

    let merkle_root = MerkleRoot::calculate(&transactions);
    let tx_count = transactions.len() as u32;
    let nonce_start = rand::rngs::OsRng.next_u64();
    let header = BlockHeader::new(1, height, Utc::now(), prev_block_hash, merkle_root, difficulty, nonce_start, tx_count);

    Candidate {
        block: Block::new(header, transactions),
        fees,
    }
}

/// Searches for a nonce whose header hash meets `candidate`'s difficulty,
/// starting from the CSPRNG-seeded nonce `build_candidate` picked and
/// counting upward. Returns `None` if `max_attempts` is exhausted first —
/// callers should refresh the candidate's timestamp/mempool selection and
/// retry rather than loop forever on a single snapshot.
pub fn mine(mut candidate: Candidate, max_attempts: u64) -> Option<Block> {
    for _ in 0..max_attempts {
        if candidate.block.header.meets_target() {
            return Some(candidate.block);
        }
        candidate.block.header.nonce = candidate.block.header.nonce.wrapping_add(1);
    }
    None
}

/// Convenience entry point used by tests and the standalone miner binary:
/// build a candidate against the current UTXO-set-free consensus inputs and
/// mine it to completion (bounded by `max_attempts`).
pub fn mine_next_block(
    height: u64,
    prev_block_hash: Hash,
    difficulty: u32,
    miner_address: &Address,
    mempool: &Mempool,
    max_attempts: u64,
) -> Option<Block> {
    let candidate = build_candidate(height, prev_block_hash, difficulty, miner_address, mempool);
    mine(candidate, max_attempts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, spend_tx};

    #[test]
    fn candidate_coinbase_pays_subsidy_plus_fees() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let mempool = Mempool::new(crate::DEFAULT_MEMPOOL_MAX_BYTES, 0.0);

        let funding = coinbase_tx(1_000_000, &addr);
        let (tx, fee) = spend_tx(&funding, 0, &sk, 1000, &addr);
        mempool.add(tx, fee);

        let candidate = build_candidate(1, Hash::zero(), crate::MIN_DIFFICULTY, &addr, &mempool);
        assert_eq!(candidate.fees, fee);
        assert_eq!(
            candidate.block.transactions[0].outputs[0].amount,
            consensus::subsidy(1) + fee
        );
        assert_eq!(candidate.block.transactions.len(), 2);
    }

    #[test]
    fn mine_finds_a_nonce_that_meets_a_low_difficulty() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let mempool = Mempool::new(crate::DEFAULT_MEMPOOL_MAX_BYTES, 0.0);
        let candidate = build_candidate(1, Hash::zero(), crate::MIN_DIFFICULTY, &addr, &mempool);

        let block = mine(candidate, 1_000_000).expect("difficulty 1 should be found quickly");
        assert!(block.header.meets_target());
    }

    #[test]
    fn candidate_merkle_root_matches_its_transactions() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let mempool = Mempool::new(crate::DEFAULT_MEMPOOL_MAX_BYTES, 0.0);
        let candidate = build_candidate(1, Hash::zero(), crate::MIN_DIFFICULTY, &addr, &mempool);

        assert_eq!(
            candidate.block.header.merkle_root,
            MerkleRoot::calculate(&candidate.block.transactions)
        );
    }
}
