//! The control surface: the small set of operations a wallet, RPC layer, or
//! CLI needs from a running node. Deliberately thin — everything here reads
//! or feeds the components in this crate, none of it owns state itself.
//!
//! [`ControlRequest`]/[`ControlResponse`] and the newline-JSON framing below
//! are the wire format the `node` binary's control listener speaks, and
//! what the `wallet` and `miner` binaries dial into — a minimal, trusted,
//! local-only sibling to the adversarial P2P wire protocol in
//! [`crate::network::message`]. It is not part of the P2P gossip surface,
//! so it skips that protocol's framing, checksums and size caps.

use crate::chain::Chain;
use crate::consensus;
use crate::crypto::Address;
use crate::double_spend::DoubleSpendGuard;
use crate::error::{BtcError, Result};
use crate::mempool::{AddOutcome, Mempool};
use crate::sha256::Hash;
use crate::types::{Block, Transaction};
use crate::utxo::{Utxo, UtxoSet};
use crate::validator;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockchainInfo {
    pub height: u64,
    pub latest_hash: Hash,
    pub difficulty: u32,
    pub mempool_size: usize,
    pub utxo_count: usize,
    pub current_reward: u64,
    pub total_supply: u64,
    pub blocks_until_halving: u64,
    pub max_supply: u64,
}

pub fn get_balance(utxos: &UtxoSet, address: &Address) -> u64 {
    utxos.balance(address)
}

/// Every UTXO an address can spend, for a wallet assembling a transaction's
/// inputs. Unlike `get_balance`, this has to leave the node's process:
/// there's no other way for a wallet binary to know which outpoints to
/// reference.
pub fn get_utxos(utxos: &UtxoSet, address: &Address) -> Vec<Utxo> {
    utxos.utxos_for(address)
}

pub fn get_blockchain_info(chain: &Chain, utxos: &UtxoSet, mempool: &Mempool) -> BlockchainInfo {
    let height = chain.tip_height();
    let tip = chain.get_block(&chain.tip_hash()).expect("active tip is always present");
    BlockchainInfo {
        height,
        latest_hash: tip.hash(),
        difficulty: tip.header.difficulty,
        mempool_size: mempool.len(),
        utxo_count: utxos.len(),
        current_reward: consensus::current_reward(height),
        total_supply: consensus::total_supply_at_height(height),
        blocks_until_halving: consensus::blocks_until_halving(height),
        max_supply: crate::MAX_SUPPLY,
    }
}

/// Parses, validates and admits a transaction submitted as canonical JSON.
/// Reservation in the double-spend guard is rolled back if mempool
/// admission doesn't follow through, so a rejected transaction never leaves
/// its outpoints stuck as reserved.
pub fn submit_transaction(
    serialized_tx: &[u8],
    utxos: &UtxoSet,
    mempool: &Mempool,
    guard: &DoubleSpendGuard,
    chain: &Chain,
    chain_id: u64,
) -> Result<Hash> {
    let tx: Transaction = serde_json::from_slice(serialized_tx).map_err(|_| BtcError::MalformedMessage)?;
    let height = chain.tip_height();

    let fee = validator::validate_mempool_transaction(&tx, utxos, chain_id, height)?;
    guard.try_reserve(&tx)?;

    let txid = tx.txid();
    let outcome = mempool.add(tx.clone(), fee);
    if outcome != AddOutcome::Accepted {
        guard.rollback(&tx);
    }
    match outcome {
        AddOutcome::Accepted => Ok(txid),
        AddOutcome::RejectedDuplicate => Err(BtcError::DuplicateTransaction),
        AddOutcome::RejectedBelowMin => Err(BtcError::FeeBelowMin),
        AddOutcome::RejectedFullNoEviction => Err(BtcError::MempoolFull),
    }
}

/// A block ready for nonce search, handed to the `miner` binary. Carries
/// the fee total purely for logging — the coinbase already pays it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: u64,
    pub fees: u64,
}

/// Builds a mining candidate against the live chain tip and mempool: the
/// `miner` binary's `GetBlockTemplate` request resolves to this.
pub fn get_block_template(chain: &Chain, mempool: &Mempool, miner_address: &Address) -> BlockTemplate {
    let height = chain.tip_height() + 1;
    let tip = chain.get_block(&chain.tip_hash()).expect("active tip is always present");
    let candidate = crate::miner::build_candidate(height, chain.tip_hash(), tip.header.difficulty, miner_address, mempool);
    BlockTemplate {
        block: candidate.block,
        height,
        fees: candidate.fees,
    }
}

/// Everything a wallet or miner can ask of a running node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlRequest {
    GetBalance { address: Address },
    GetUtxos { address: Address },
    GetBlockchainInfo,
    SubmitTransaction { tx: Transaction },
    GetBlockTemplate { miner_address: Address },
    SubmitBlock { block: Block },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControlResponse {
    Balance { amount: u64 },
    Utxos(Vec<Utxo>),
    BlockchainInfo(BlockchainInfo),
    TransactionAccepted { txid: Hash },
    BlockTemplate(BlockTemplate),
    BlockAccepted { hash: Hash, height: u64 },
    Error { message: String },
}

impl From<BtcError> for ControlResponse {
    fn from(e: BtcError) -> Self {
        ControlResponse::Error { message: e.to_string() }
    }
}

/// Writes `value` as one line of JSON terminated by `\n`. The control
/// protocol is newline-delimited rather than length-prefixed: every message
/// is a request or a response, both small and always well-formed JSON from
/// a trusted local client, so there's no adversarial-input reason to frame
/// more defensively than that.
pub async fn write_line<W, T>(writer: &mut W, value: &T) -> Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value).map_err(|_| BtcError::MalformedMessage)?;
    line.push(b'\n');
    writer.write_all(&line).await.map_err(|_| BtcError::Disconnected)?;
    Ok(())
}

/// Reads one newline-delimited JSON value. Returns `Disconnected` on EOF.
pub async fn read_line<R, T>(reader: &mut BufReader<R>) -> Result<T>
where
    R: tokio::io::AsyncRead + Unpin,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await.map_err(|_| BtcError::Disconnected)?;
    if n == 0 {
        return Err(BtcError::Disconnected);
    }
    serde_json::from_str(line.trim_end()).map_err(|_| BtcError::MalformedMessage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::test_helpers::{coinbase_tx, mine_block, spend_tx};
    use crate::types::Outpoint;
    use crate::utxo::Utxo;

    fn running_node() -> (Chain, UtxoSet, Mempool, DoubleSpendGuard, PrivateKey, Transaction) {
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
                    script_pubkey: addr,
                    height: 0,
                    is_coinbase: true,
                }],
            )
            .unwrap();
        (
            Chain::new(genesis),
            utxos,
            Mempool::new(crate::DEFAULT_MEMPOOL_MAX_BYTES, 0.0),
            DoubleSpendGuard::new(),
            sk,
            coinbase,
        )
    }

    #[test]
    fn get_balance_reports_utxo_sum() {
        let (_, utxos, _, _, sk, _) = running_node();
        let addr = sk.public_key().address();
        assert_eq!(get_balance(&utxos, &addr), consensus::subsidy(0));
    }

    #[test]
    fn blockchain_info_reflects_genesis_state() {
        let (chain, utxos, mempool, _, _, _) = running_node();
        let info = get_blockchain_info(&chain, &utxos, &mempool);
        assert_eq!(info.height, 0);
        assert_eq!(info.utxo_count, 1);
        assert_eq!(info.mempool_size, 0);
        assert_eq!(info.max_supply, crate::MAX_SUPPLY);
    }

    #[test]
    fn submit_transaction_admits_a_well_formed_spend() {
        let (chain, utxos, mempool, guard, sk, funding) = running_node();
        let addr = sk.public_key().address();
        let (tx, _) = spend_tx(&funding, 0, &sk, 10, &addr);
        let serialized = serde_json::to_vec(&tx).unwrap();

        let txid = submit_transaction(&serialized, &utxos, &mempool, &guard, &chain, crate::DEFAULT_CHAIN_ID).unwrap();
        assert_eq!(txid, tx.txid());
        assert!(mempool.has(&txid));
    }

    #[test]
    fn submit_transaction_rejects_malformed_payload() {
        let (chain, utxos, mempool, guard, _, _) = running_node();
        let result = submit_transaction(b"not json", &utxos, &mempool, &guard, &chain, crate::DEFAULT_CHAIN_ID);
        assert_eq!(result, Err(BtcError::MalformedMessage));
    }
}
