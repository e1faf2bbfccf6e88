//! Shared test helpers: building blocks for unit and integration tests that
//! would otherwise repeat the same transaction/block scaffolding everywhere.

use crate::crypto::{Address, PrivateKey};
use crate::sha256::Hash;
use crate::types::{Block, BlockHeader, Outpoint, Transaction, TransactionInput, TransactionOutput};
use crate::util::MerkleRoot;
use chrono::Utc;

/// A coinbase transaction paying `amount` to `addr`.
pub fn coinbase_tx(amount: u64, addr: &Address) -> Transaction {
    Transaction::coinbase(crate::DEFAULT_CHAIN_ID, amount, addr.clone(), Utc::now())
}

/// A single-input, two-output transaction spending `funding`'s output
/// `output_index`, paying `amount` to `to` and the remainder back to the
/// signer as change. Returns the transaction and the fee it pays.
pub fn spend_tx(
    funding: &Transaction,
    output_index: u32,
    sk: &PrivateKey,
    amount: u64,
    to: &Address,
) -> (Transaction, u64) {
    let input_value = funding.outputs[output_index as usize].amount;
    let fee = 1;
    let change = input_value - amount - fee;

    let prev_outpoint = Outpoint::new(funding.txid(), output_index);
    let placeholder = TransactionInput {
        prev_outpoint,
        signature: crate::crypto::Signature::sign_hash(&Hash::zero(), sk),
        pubkey: sk.public_key(),
    };

    let outputs = vec![
        TransactionOutput {
            amount,
            script_pubkey: to.clone(),
        },
        TransactionOutput {
            amount: change,
            script_pubkey: sk.public_key().address(),
        },
    ];

    let mut tx = Transaction::new(1, crate::DEFAULT_CHAIN_ID, vec![placeholder], outputs, 0, Utc::now());
    tx.sign_input(0, sk);
    (tx, fee)
}

/// Mines a block at `height` on top of `prev_hash` containing `transactions`,
/// searching nonces until the header meets `difficulty`. Only ever used with
/// trivial test difficulties (1-2 nibbles), so a linear scan is instant.
pub fn mine_block(height: u64, prev_hash: Hash, transactions: Vec<Transaction>, difficulty: u32) -> Block {
    let merkle_root = MerkleRoot::calculate(&transactions);
    let tx_count = transactions.len() as u32;
    let mut header = BlockHeader::new(1, height, Utc::now(), prev_hash, merkle_root, difficulty, 0, tx_count);
    while !header.meets_target() {
        header.nonce += 1;
    }
    Block::new(header, transactions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coinbase_tx_pays_the_given_address() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let tx = coinbase_tx(50, &addr);
        assert_eq!(tx.outputs[0].amount, 50);
        assert_eq!(tx.outputs[0].script_pubkey, addr);
    }

    #[test]
    fn spend_tx_conserves_value_minus_fee() {
        let sk = PrivateKey::new_key();
        let addr = sk.public_key().address();
        let funding = coinbase_tx(1000, &addr);
        let (tx, fee) = spend_tx(&funding, 0, &sk, 400, &addr);
        assert_eq!(tx.output_sum() + fee, 1000);
    }

    #[test]
    fn mine_block_meets_its_own_target() {
        let sk = PrivateKey::new_key();
        let tx = coinbase_tx(50, &sk.public_key().address());
        let block = mine_block(0, Hash::zero(), vec![tx], 1);
        assert!(block.header.meets_target());
    }
}
