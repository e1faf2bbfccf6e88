//! The validator (C7): transaction and block validation against a UTXO
//! snapshot plus the consensus rules in [`crate::consensus`]. Nothing here
//! mutates state — callers (mempool admission, block application) decide
//! what to do with a validated transaction or block.

use crate::consensus;
use crate::crypto::address_of;
use crate::error::{BtcError, Result};
use crate::types::{Block, Outpoint, Transaction};
use crate::utxo::{Utxo, UtxoSet};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Validates `tx` against whatever UTXO snapshot `lookup` exposes, returning
/// the fee it pays. `lookup` is a seam: mempool admission looks up directly
/// in the live `UtxoSet`; block validation overlays in-block outputs on top
/// of it so a later transaction may spend an earlier one's output.
pub fn validate_transaction<F>(tx: &Transaction, chain_id: u64, height: u64, lookup: F) -> Result<u64>
where
    F: Fn(&Outpoint) -> Option<Utxo>,
{
    let result = validate_transaction_inner(tx, chain_id, height, lookup);
    if let Err(e) = &result {
        debug!(txid = %tx.txid(), error = %e, "rejecting transaction");
    }
    result
}

fn validate_transaction_inner<F>(tx: &Transaction, chain_id: u64, height: u64, lookup: F) -> Result<u64>
where
    F: Fn(&Outpoint) -> Option<Utxo>,
{
    if tx.is_coinbase() {
        return Err(BtcError::other("coinbase transactions validate separately"));
    }
    if tx.inputs.is_empty() || tx.outputs.is_empty() {
        return Err(BtcError::other("transaction must have at least one input and output"));
    }
    if tx.chain_id != chain_id {
        return Err(BtcError::ChainIdMismatch);
    }
    if tx.locktime != 0 && tx.locktime > height {
        return Err(BtcError::LocktimeNotReached);
    }

    let mut seen_outpoints = HashSet::new();
    let mut input_sum = 0u64;
    for (i, input) in tx.inputs.iter().enumerate() {
        if !seen_outpoints.insert(input.prev_outpoint) {
            return Err(BtcError::DoubleSpend);
        }
        let utxo = lookup(&input.prev_outpoint).ok_or(BtcError::UnknownOutpoint)?;
        if utxo.is_coinbase && height < utxo.height + crate::COINBASE_MATURITY {
            return Err(BtcError::other("coinbase output is not yet mature"));
        }
        if address_of(&input.pubkey) != utxo.script_pubkey {
            return Err(BtcError::InvalidSignature);
        }
        let message = tx.signing_hash(i);
        if !input.signature.verify(&message, &input.pubkey) {
            return Err(BtcError::InvalidSignature);
        }
        input_sum = input_sum.saturating_add(utxo.amount);
    }

    for output in &tx.outputs {
        if output.amount == 0 {
            return Err(BtcError::NegativeOrZeroOutput);
        }
    }

    let output_sum = tx.output_sum();
    if output_sum > input_sum {
        return Err(BtcError::InsufficientInputValue);
    }
    Ok(input_sum - output_sum)
}

/// Validates a transaction for mempool admission against the live UTXO set.
/// Double-spend-against-other-mempool-txs is the guard's job (C5), not this
/// function's.
pub fn validate_mempool_transaction(tx: &Transaction, utxos: &UtxoSet, chain_id: u64, height: u64) -> Result<u64> {
    validate_transaction(tx, chain_id, height, |outpoint| utxos.get(outpoint))
}

pub struct BlockValidationContext<'a> {
    pub utxos: &'a UtxoSet,
    pub chain_id: u64,
    pub prev_header_hash: crate::sha256::Hash,
    pub prev_timestamp: DateTime<Utc>,
}

/// Full block validation: structure, PoW, merkle root, timestamp, chain
/// linkage, no double-spend within the block, and every non-coinbase
/// transaction validating under the UTXO snapshot at `height` applied
/// sequentially — an output created by transaction `k` may be spent by
/// transaction `k+1` in the same block.
pub fn validate_block(block: &Block, ctx: &BlockValidationContext) -> Result<()> {
    let result = validate_block_inner(block, ctx);
    if let Err(e) = &result {
        tracing::warn!(hash = %block.hash(), height = block.header.height, error = %e, "block rejected");
    }
    result
}

fn validate_block_inner(block: &Block, ctx: &BlockValidationContext) -> Result<()> {
    block.check_structure(crate::MAX_BLOCK_BYTES)?;

    if block.header.prev_block_hash != ctx.prev_header_hash {
        return Err(BtcError::other("prev_block_hash does not extend the active tip"));
    }
    consensus::validate_timestamp(block.header.timestamp, ctx.prev_timestamp, Utc::now())?;

    let mut spent_in_block: HashSet<Outpoint> = HashSet::new();
    let mut in_block_outputs: HashMap<Outpoint, Utxo> = HashMap::new();
    let mut fees_total = 0u64;

    for tx in block.transactions.iter().skip(1) {
        for input in &tx.inputs {
            if !spent_in_block.insert(input.prev_outpoint) {
                return Err(BtcError::DoubleSpend);
            }
        }

        let height = block.header.height;
        let fee = validate_transaction(tx, ctx.chain_id, height, |outpoint| {
            in_block_outputs
                .get(outpoint)
                .cloned()
                .or_else(|| ctx.utxos.get(outpoint))
        })?;
        fees_total = fees_total.saturating_add(fee);

        for (index, output) in tx.outputs.iter().enumerate() {
            in_block_outputs.insert(
                Outpoint::new(tx.txid(), index as u32),
                Utxo {
                    outpoint: Outpoint::new(tx.txid(), index as u32),
                    amount: output.amount,
                    script_pubkey: output.script_pubkey.clone(),
                    height,
                    is_coinbase: false,
                },
            );
        }
    }

    let coinbase = &block.transactions[0];
    let max_coinbase = consensus::subsidy(block.header.height).saturating_add(fees_total);
    if coinbase.outputs[0].amount > max_coinbase {
        return Err(BtcError::InsufficientInputValue);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, mine_block, spend_tx};
    use crate::types::Outpoint;

    fn seed_utxo_set(amount: u64, sk: &PrivateKey) -> (UtxoSet, Transaction) {
        let addr = sk.public_key().address();
        let funding = coinbase_tx(amount, &addr);
        let utxos = UtxoSet::new();
        utxos
            .apply_batch(
                &[],
                vec![Utxo {
                    outpoint: Outpoint::new(funding.txid(), 0),
                    amount,
                    script_pubkey: addr,
                    height: 0,
                    is_coinbase: false,
                }],
            )
            .unwrap();
        (utxos, funding)
    }

    #[test]
    fn accepts_a_well_formed_spend() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let (utxos, funding) = seed_utxo_set(1000, &sk);
        let (tx, fee) = spend_tx(&funding, 0, &sk, 400, &addr);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID, 1);
        assert_eq!(result, Ok(fee));
    }

    #[test]
    fn rejects_spend_of_an_immature_coinbase() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let utxos = UtxoSet::new();
        utxos
            .apply_batch(
                &[],
                vec![Utxo {
                    outpoint: Outpoint::new(funding.txid(), 0),
                    amount: 1000,
                    script_pubkey: addr.clone(),
                    height: 0,
                    is_coinbase: true,
                }],
            )
            .unwrap();
        let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID, crate::COINBASE_MATURITY - 1);
        assert_eq!(result, Err(BtcError::other("coinbase output is not yet mature")));
    }

    #[test]
    fn accepts_spend_of_a_coinbase_once_mature() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let utxos = UtxoSet::new();
        utxos
            .apply_batch(
                &[],
                vec![Utxo {
                    outpoint: Outpoint::new(funding.txid(), 0),
                    amount: 1000,
                    script_pubkey: addr.clone(),
                    height: 0,
                    is_coinbase: true,
                }],
            )
            .unwrap();
        let (tx, fee) = spend_tx(&funding, 0, &sk, 400, &addr);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID, crate::COINBASE_MATURITY);
        assert_eq!(result, Ok(fee));
    }

    #[test]
    fn rejects_unknown_outpoint() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let utxos = UtxoSet::new(); // empty: funding's output was never applied
        let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID, 1);
        assert_eq!(result, Err(BtcError::UnknownOutpoint));
    }

    #[test]
    fn rejects_wrong_chain_id() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let (utxos, funding) = seed_utxo_set(1000, &sk);
        let (tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID + 1, 1);
        assert_eq!(result, Err(BtcError::ChainIdMismatch));
    }

    #[test]
    fn rejects_signature_over_a_different_message() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let (utxos, funding) = seed_utxo_set(1000, &sk);
        let (mut tx, _) = spend_tx(&funding, 0, &sk, 400, &addr);

        let other_key = PrivateKey::new_key();
        tx.inputs[0].signature = crate::crypto::Signature::sign_hash(&tx.signing_hash(0), &other_key);

        let result = validate_mempool_transaction(&tx, &utxos, crate::DEFAULT_CHAIN_ID, 1);
        assert_eq!(result, Err(BtcError::InvalidSignature));
    }

    #[test]
    fn block_validation_accepts_a_genesis_extending_block() {
        let sk = PrivateKey::new_key();
        let coinbase = coinbase_tx(consensus::subsidy(1), &sk.public_key().address());
        let block = mine_block(1, crate::sha256::Hash::zero(), vec![coinbase], crate::MIN_DIFFICULTY);
        let utxos = UtxoSet::new();
        let ctx = BlockValidationContext {
            utxos: &utxos,
            chain_id: crate::DEFAULT_CHAIN_ID,
            prev_header_hash: crate::sha256::Hash::zero(),
            prev_timestamp: block.header.timestamp - chrono::Duration::seconds(1),
        };
        assert!(validate_block(&block, &ctx).is_ok());
    }

    #[test]
    fn block_validation_rejects_coinbase_exceeding_subsidy_plus_fees() {
        let sk = PrivateKey::new_key();
        let coinbase = coinbase_tx(consensus::subsidy(1) + 1, &sk.public_key().address());
        let block = mine_block(1, crate::sha256::Hash::zero(), vec![coinbase], crate::MIN_DIFFICULTY);
        let utxos = UtxoSet::new();
        let ctx = BlockValidationContext {
            utxos: &utxos,
            chain_id: crate::DEFAULT_CHAIN_ID,
            prev_header_hash: crate::sha256::Hash::zero(),
            prev_timestamp: block.header.timestamp - chrono::Duration::seconds(1),
        };
        assert_eq!(
            validate_block(&block, &ctx),
            Err(BtcError::InsufficientInputValue)
        );
    }
}
