//! Chain & fork choice (C8): a DAG of blocks keyed by header hash, each
//! carrying the cumulative proof-of-work of its ancestry. The active chain
//! is always the path of maximum cumulative work; a competing branch that
//! overtakes it triggers a reorg (unwind to the lowest common ancestor,
//! reapply the winning branch). This module owns the outermost lock in the
//! engine's lock order — callers must never hold a guard or UTXO-set lock
//! when calling into it.

use crate::double_spend::DoubleSpendGuard;
use crate::error::{BtcError, Result};
use crate::mempool::Mempool;
use crate::sha256::Hash;
use crate::types::{Block, Outpoint};
use crate::utxo::{Utxo, UtxoSet};
use crate::validator::{self, BlockValidationContext};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainEvent {
    /// The block extended the active tip directly.
    Extended,
    /// The block was accepted but sits on a branch that isn't (yet) the
    /// active chain.
    SideBranch,
    /// The block's branch overtook the active chain; a reorg ran.
    Reorged { unwound: usize, applied: usize },
}

struct BlockNode {
    block: Block,
    cumulative_work: u128,
    first_seen: u64,
    /// The UTXOs consumed by this block's transactions, captured at
    /// application time so a reorg can restore them. `None` for a node that
    /// has never been on the active chain.
    undo: Option<Vec<Utxo>>,
}

fn work_for(difficulty: u32) -> u128 {
    1u128 << difficulty.min(127)
}

struct ChainState {
    nodes: HashMap<Hash, BlockNode>,
    active_tip: Hash,
    next_seen: u64,
}

pub struct Chain {
    state: Mutex<ChainState>,
}

impl Chain {
    /// Bootstraps the chain with `genesis`. The caller is responsible for
    /// crediting genesis's coinbase output to the UTXO set directly —
    /// genesis has no parent to validate against, so it never flows through
    /// [`Chain::submit_block`].
    pub fn new(genesis: Block) -> Self {
        let hash = genesis.hash();
        let work = work_for(genesis.header.difficulty);
        let mut nodes = HashMap::new();
        nodes.insert(
            hash,
            BlockNode {
                block: genesis,
                cumulative_work: work,
                first_seen: 0,
                undo: Some(Vec::new()),
            },
        );
        Chain {
            state: Mutex::new(ChainState {
                nodes,
                active_tip: hash,
                next_seen: 1,
            }),
        }
    }

    pub fn tip_hash(&self) -> Hash {
        self.state.lock().unwrap().active_tip
    }

    pub fn tip_height(&self) -> u64 {
        let state = self.state.lock().unwrap();
        state.nodes[&state.active_tip].block.header.height
    }

    pub fn get_block(&self, hash: &Hash) -> Option<Block> {
        self.state.lock().unwrap().nodes.get(hash).map(|n| n.block.clone())
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.state.lock().unwrap().nodes.contains_key(hash)
    }

    /// Locator hashes for IBD: the active tip, walking back doubling the
    /// gap each step (tip, tip-1, tip-2, tip-4, tip-8, ...), down to
    /// genesis. Mirrors the exponential-backoff locator used to bound
    /// `GETBLOCKS` round trips on a long chain.
    pub fn locator(&self) -> Vec<Hash> {
        let state = self.state.lock().unwrap();
        let mut hashes = Vec::new();
        let mut current = state.active_tip;
        let mut step = 1u64;
        loop {
            hashes.push(current);
            let node = &state.nodes[&current];
            if node.block.header.prev_block_hash == Hash::zero() {
                break;
            }
            let mut next = node.block.header.prev_block_hash;
            for _ in 1..step {
                match state.nodes.get(&next) {
                    Some(n) if n.block.header.prev_block_hash != Hash::zero() => {
                        next = n.block.header.prev_block_hash;
                    }
                    _ => break,
                }
            }
            if !state.nodes.contains_key(&next) {
                break;
            }
            current = next;
            if hashes.len() >= 2 {
                step = step.saturating_mul(2);
            }
        }
        hashes
    }

    /// Submits a new block, validating, applying, or triggering a reorg as
    /// appropriate. Returns an error without mutating any state if the
    /// block, or the reorg it would cause, fails validation.
    pub fn submit_block(
        &self,
        block: Block,
        utxos: &UtxoSet,
        mempool: &Mempool,
        guard: &DoubleSpendGuard,
        chain_id: u64,
    ) -> Result<ChainEvent> {
        let hash = block.hash();
        let height = block.header.height;
        let result = self.submit_block_inner(block, utxos, mempool, guard, chain_id);
        match &result {
            Ok(event) => debug!(%hash, height, ?event, "accepted block"),
            Err(e) => warn!(%hash, height, error = %e, "rejecting submitted block"),
        }
        result
    }

    fn submit_block_inner(
        &self,
        block: Block,
        utxos: &UtxoSet,
        mempool: &Mempool,
        guard: &DoubleSpendGuard,
        chain_id: u64,
    ) -> Result<ChainEvent> {
        let mut state = self.state.lock().unwrap();
        let hash = block.hash();
        if state.nodes.contains_key(&hash) {
            return Err(BtcError::other("block already known"));
        }
        let parent_hash = block.header.prev_block_hash;
        let (parent_height, parent_timestamp, parent_work) = {
            let parent = state
                .nodes
                .get(&parent_hash)
                .ok_or_else(|| BtcError::other("block extends an unknown parent"))?;
            (
                parent.block.header.height,
                parent.block.header.timestamp,
                parent.cumulative_work,
            )
        };
        if block.header.height != parent_height + 1 {
            return Err(BtcError::other("block height does not follow its parent"));
        }

        let cumulative_work = parent_work + work_for(block.header.difficulty);
        let active_work = state.nodes[&state.active_tip].cumulative_work;
        let extends_active = parent_hash == state.active_tip;

        if !extends_active {
            block.check_structure(crate::MAX_BLOCK_BYTES)?;
            if !block.header.meets_target() {
                return Err(BtcError::PoWFailure);
            }
            let seen = state.next_seen;
            state.next_seen += 1;
            state.nodes.insert(
                hash,
                BlockNode {
                    block,
                    cumulative_work,
                    first_seen: seen,
                    undo: None,
                },
            );
            if cumulative_work > active_work {
                return self.reorg_to(&mut state, hash, utxos, mempool, guard, chain_id);
            }
            return Ok(ChainEvent::SideBranch);
        }

        let ctx = BlockValidationContext {
            utxos,
            chain_id,
            prev_header_hash: parent_hash,
            prev_timestamp: parent_timestamp,
        };
        validator::validate_block(&block, &ctx)?;
        let undo = apply_block_effects(&block, utxos, guard, mempool);
        let seen = state.next_seen;
        state.next_seen += 1;
        state.nodes.insert(
            hash,
            BlockNode {
                block,
                cumulative_work,
                first_seen: seen,
                undo: Some(undo),
            },
        );
        state.active_tip = hash;
        Ok(ChainEvent::Extended)
    }

    fn reorg_to(
        &self,
        state: &mut ChainState,
        new_tip: Hash,
        utxos: &UtxoSet,
        mempool: &Mempool,
        guard: &DoubleSpendGuard,
        chain_id: u64,
    ) -> Result<ChainEvent> {
        let old_tip = state.active_tip;
        let lca = find_lca(state, old_tip, new_tip);

        let unwind_path = path_down_to(state, old_tip, lca);
        for hash in &unwind_path {
            let undo = state.nodes[hash].undo.clone().unwrap_or_default();
            let height = state.nodes[hash].block.header.height;
            unwind_block_effects(&state.nodes[hash].block.clone(), &undo, utxos, guard, mempool, chain_id, height);
            state.nodes.get_mut(hash).unwrap().undo = None;
        }

        let apply_path = path_down_to(state, new_tip, lca);
        let apply_path: Vec<Hash> = apply_path.into_iter().rev().collect();

        let mut applied = 0usize;
        for (i, hash) in apply_path.iter().enumerate() {
            let block = state.nodes[hash].block.clone();
            let parent_hash = block.header.prev_block_hash;
            let parent_timestamp = state.nodes[&parent_hash].block.header.timestamp;
            let ctx = BlockValidationContext {
                utxos,
                chain_id,
                prev_header_hash: parent_hash,
                prev_timestamp: parent_timestamp,
            };
            if let Err(e) = validator::validate_block(&block, &ctx) {
                // Abort: undo whatever of the new branch we already applied,
                // then replay the old branch back onto the UTXO set so the
                // previous active tip is fully restored.
                for hash in apply_path[..i].iter().rev() {
                    let undo = state.nodes[hash].undo.clone().unwrap_or_default();
                    let height = state.nodes[hash].block.header.height;
                    let block = state.nodes[hash].block.clone();
                    unwind_block_effects(&block, &undo, utxos, guard, mempool, chain_id, height);
                    state.nodes.get_mut(hash).unwrap().undo = None;
                }
                for hash in unwind_path.iter().rev() {
                    let block = state.nodes[hash].block.clone();
                    let parent_hash = block.header.prev_block_hash;
                    let parent_timestamp = state.nodes[&parent_hash].block.header.timestamp;
                    let ctx = BlockValidationContext {
                        utxos,
                        chain_id,
                        prev_header_hash: parent_hash,
                        prev_timestamp: parent_timestamp,
                    };
                    validator::validate_block(&block, &ctx)
                        .expect("old branch validated before; restoring it must succeed");
                    let undo = apply_block_effects(&block, utxos, guard, mempool);
                    state.nodes.get_mut(hash).unwrap().undo = Some(undo);
                }
                state.active_tip = old_tip;
                return Err(e);
            }
            let undo = apply_block_effects(&block, utxos, guard, mempool);
            state.nodes.get_mut(hash).unwrap().undo = Some(undo);
            applied += 1;
        }

        state.active_tip = new_tip;
        Ok(ChainEvent::Reorged {
            unwound: unwind_path.len(),
            applied,
        })
    }
}

/// Ancestor path from `from` down to (excluding) `to`, closest-first.
fn path_down_to(state: &ChainState, from: Hash, to: Hash) -> Vec<Hash> {
    let mut path = Vec::new();
    let mut current = from;
    while current != to {
        path.push(current);
        current = state.nodes[&current].block.header.prev_block_hash;
    }
    path
}

fn find_lca(state: &ChainState, a: Hash, b: Hash) -> Hash {
    let mut a = a;
    let mut b = b;
    let mut height_a = state.nodes[&a].block.header.height;
    let mut height_b = state.nodes[&b].block.header.height;
    while height_a > height_b {
        a = state.nodes[&a].block.header.prev_block_hash;
        height_a -= 1;
    }
    while height_b > height_a {
        b = state.nodes[&b].block.header.prev_block_hash;
        height_b -= 1;
    }
    while a != b {
        a = state.nodes[&a].block.header.prev_block_hash;
        b = state.nodes[&b].block.header.prev_block_hash;
    }
    a
}

fn block_effects(block: &Block) -> (Vec<Outpoint>, Vec<Utxo>) {
    let mut remove = Vec::new();
    for tx in block.transactions.iter().skip(1) {
        for input in &tx.inputs {
            remove.push(input.prev_outpoint);
        }
    }
    let mut add = Vec::new();
    for tx in &block.transactions {
        let is_coinbase = tx.is_coinbase();
        let txid = tx.txid();
        for (index, output) in tx.outputs.iter().enumerate() {
            add.push(Utxo {
                outpoint: Outpoint::new(txid, index as u32),
                amount: output.amount,
                script_pubkey: output.script_pubkey.clone(),
                height: block.header.height,
                is_coinbase,
            });
        }
    }
    (remove, add)
}

fn apply_block_effects(block: &Block, utxos: &UtxoSet, guard: &DoubleSpendGuard, mempool: &Mempool) -> Vec<Utxo> {
    let (remove, add) = block_effects(block);
    let undo: Vec<Utxo> = remove.iter().filter_map(|o| utxos.get(o)).collect();
    utxos
        .apply_batch(&remove, add)
        .expect("block effects are only applied after validate_block succeeds");
    for tx in block.transactions.iter().skip(1) {
        guard.commit(tx);
        mempool.remove(&tx.txid());
    }
    undo
}

fn unwind_block_effects(
    block: &Block,
    undo: &[Utxo],
    utxos: &UtxoSet,
    guard: &DoubleSpendGuard,
    mempool: &Mempool,
    chain_id: u64,
    height_ctx: u64,
) {
    let (_, added) = block_effects(block);
    let added_outpoints: Vec<Outpoint> = added.iter().map(|u| u.outpoint).collect();
    utxos
        .apply_batch(&added_outpoints, undo.to_vec())
        .expect("undo data must restore the pre-block UTXO state");
    for tx in block.transactions.iter().skip(1) {
        guard.reorg_release(tx);
        if let Ok(fee) = validator::validate_mempool_transaction(tx, utxos, chain_id, height_ctx) {
            mempool.add(tx.clone(), fee);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, mine_block, spend_tx};

    fn genesis_chain() -> (Chain, UtxoSet, Mempool, DoubleSpendGuard, PrivateKey) {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let coinbase = coinbase_tx(consensus::subsidy(0), &addr);
        let genesis = mine_block(0, Hash::zero(), vec![coinbase.clone()], crate::GENESIS_DIFFICULTY);
        let utxos = UtxoSet::new();
        utxos
            .apply_batch(
                &[],
                vec![Utxo {
                    outpoint: Outpoint::new(coinbase.txid(), 0),
                    amount: coinbase.outputs[0].amount,
                    script_pubkey: addr.clone(),
                    height: 0,
                    is_coinbase: true,
                }],
            )
            .unwrap();
        let chain = Chain::new(genesis);
        (chain, utxos, Mempool::new(crate::DEFAULT_MEMPOOL_MAX_BYTES, 0.0), DoubleSpendGuard::new(), sk)
    }

    #[test]
    fn extends_the_active_tip() {
        let (chain, utxos, mempool, guard, sk) = genesis_chain();
        let addr = sk.public_key().address();
        let coinbase = coinbase_tx(consensus::subsidy(1), &addr);
        let block = mine_block(1, chain.tip_hash(), vec![coinbase], crate::MIN_DIFFICULTY);

        let event = chain
            .submit_block(block.clone(), &utxos, &mempool, &guard, crate::DEFAULT_CHAIN_ID)
            .unwrap();
        assert_eq!(event, ChainEvent::Extended);
        assert_eq!(chain.tip_hash(), block.hash());
        assert_eq!(chain.tip_height(), 1);
    }

    #[test]
    fn a_heavier_side_branch_triggers_a_reorg() {
        let (chain, utxos, mempool, guard, sk) = genesis_chain();
        let addr = sk.public_key().address();

        let block_a = mine_block(1, chain.tip_hash(), vec![coinbase_tx(consensus::subsidy(1), &addr)], crate::MIN_DIFFICULTY);
        chain
            .submit_block(block_a.clone(), &utxos, &mempool, &guard, crate::DEFAULT_CHAIN_ID)
            .unwrap();
        assert_eq!(chain.tip_hash(), block_a.hash());

        // Competing block at the same height, heavier difficulty: beats A on
        // cumulative work even though it arrived second.
        let block_b = mine_block(
            1,
            genesis_hash(&chain),
            vec![coinbase_tx(consensus::subsidy(1), &addr)],
            crate::MIN_DIFFICULTY + 3,
        );
        let event = chain
            .submit_block(block_b.clone(), &utxos, &mempool, &guard, crate::DEFAULT_CHAIN_ID)
            .unwrap();
        assert!(matches!(event, ChainEvent::Reorged { .. }));
        assert_eq!(chain.tip_hash(), block_b.hash());
    }

    fn genesis_hash(chain: &Chain) -> Hash {
        let state = chain.state.lock().unwrap();
        let mut current = state.active_tip;
        loop {
            let node = &state.nodes[&current];
            if node.block.header.prev_block_hash == Hash::zero() {
                return current;
            }
            current = node.block.header.prev_block_hash;
        }
    }

    #[test]
    fn reorg_reinjects_unconfirmed_transactions_into_the_mempool() {
        let (chain, utxos, mempool, guard, sk) = genesis_chain();
        let addr = sk.public_key().address();

        let genesis_coinbase_outpoint = {
            let state = chain.state.lock().unwrap();
            let genesis = &state.nodes[&genesis_hash(&chain)].block;
            Outpoint::new(genesis.transactions[0].txid(), 0)
        };
        let funding_tx = {
            let state = chain.state.lock().unwrap();
            state.nodes[&genesis_hash(&chain)].block.transactions[0].clone()
        };
        let (spend, fee) = spend_tx(&funding_tx, 0, &sk, 10, &addr);
        let _ = genesis_coinbase_outpoint;

        let coinbase_a = coinbase_tx(consensus::subsidy(1) + fee, &addr);
        let block_a = mine_block(1, chain.tip_hash(), vec![coinbase_a, spend], crate::MIN_DIFFICULTY);
        chain
            .submit_block(block_a, &utxos, &mempool, &guard, crate::DEFAULT_CHAIN_ID)
            .unwrap();

        let block_b = mine_block(
            1,
            genesis_hash(&chain),
            vec![coinbase_tx(consensus::subsidy(1), &addr)],
            crate::MIN_DIFFICULTY + 3,
        );
        chain
            .submit_block(block_b, &utxos, &mempool, &guard, crate::DEFAULT_CHAIN_ID)
            .unwrap();

        assert_eq!(mempool.len(), 1);
    }
}
