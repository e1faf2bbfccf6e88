//! On-disk chain log: one JSON-encoded block per line, genesis first. The
//! UTXO set, mempool and double-spend guard are never persisted directly —
//! they're always rebuilt by replaying the log from genesis.

use btclib::chain::Chain;
use btclib::crypto::Address;
use btclib::double_spend::DoubleSpendGuard;
use btclib::mempool::Mempool;
use btclib::sha256::Hash;
use btclib::types::{Block, BlockHeader};
use btclib::utxo::{Utxo, UtxoSet};
use chrono::Utc;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::{error, info};

fn genesis_block(config: &btclib::config::NodeConfig) -> Block {
    let coinbase = btclib::types::Transaction::coinbase(
        config.consensus.chain_id,
        config.consensus.genesis_premine,
        Address::genesis(),
        Utc::now(),
    );
    let merkle_root = btclib::util::MerkleRoot::calculate(&[coinbase.clone()]);
    let mut header = BlockHeader::new(1, 0, Utc::now(), Hash::zero(), merkle_root, config.consensus.genesis_difficulty, 0, 1);
    while !header.meets_target() {
        header.nonce += 1;
    }
    Block::new(header, vec![coinbase])
}

/// Loads the chain log at `path`, or bootstraps a fresh genesis block if it
/// doesn't exist yet. Replays every block after genesis through
/// [`Chain::submit_block`], which leaves the UTXO set, mempool and guard in
/// exactly the state they'd be in had the node been running all along.
/// Corruption partway through the log is fatal: we'd otherwise silently run
/// on an inconsistent ledger.
pub fn load_or_init(config: &btclib::config::NodeConfig) -> (Chain, UtxoSet, Mempool, DoubleSpendGuard) {
    let utxos = UtxoSet::new();
    let mempool = Mempool::new(config.consensus.default_mempool_max_bytes, config.consensus.default_min_fee_rate);
    let guard = DoubleSpendGuard::new();
    let path = Path::new(&config.node.chain_file);

    let blocks = if path.exists() {
        match read_blocks(path) {
            Ok(blocks) if !blocks.is_empty() => blocks,
            Ok(_) => {
                info!(file = %config.node.chain_file, "chain log is empty, bootstrapping genesis");
                vec![genesis_block(config)]
            }
            Err(e) => {
                error!(file = %config.node.chain_file, error = %e, "chain log is corrupt, refusing to start");
                std::process::exit(1);
            }
        }
    } else {
        info!("no chain log found, bootstrapping genesis");
        vec![genesis_block(config)]
    };

    let mut iter = blocks.into_iter();
    let genesis = iter.next().expect("at least genesis is always present");
    let genesis_coinbase = genesis.transactions[0].clone();
    utxos
        .apply_batch(
            &[],
            vec![Utxo {
                outpoint: btclib::types::Outpoint::new(genesis_coinbase.txid(), 0),
                amount: genesis_coinbase.outputs[0].amount,
                script_pubkey: genesis_coinbase.outputs[0].script_pubkey.clone(),
                height: 0,
                is_coinbase: true,
            }],
        )
        .expect("crediting genesis's own coinbase can never fail");
    let chain = Chain::new(genesis);

    for block in iter {
        if let Err(e) = chain.submit_block(block, &utxos, &mempool, &guard, config.consensus.chain_id) {
            error!(error = %e, "chain log replay failed, refusing to start on an inconsistent ledger");
            std::process::exit(1);
        }
    }

    info!(height = chain.tip_height(), "chain loaded");
    (chain, utxos, mempool, guard)
}

fn read_blocks(path: &Path) -> std::io::Result<Vec<Block>> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let mut blocks = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let block: Block = serde_json::from_str(&line)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        blocks.push(block);
    }
    Ok(blocks)
}

/// Rewrites the chain log from the current active chain, genesis first.
/// Always a full rewrite rather than an append: a reorg can replace any
/// suffix of the log, so there's no append-only point to anchor on.
pub fn save(chain: &Chain, path: &Path) -> std::io::Result<()> {
    let mut blocks = Vec::new();
    let mut cursor = chain.tip_hash();
    loop {
        let block = chain.get_block(&cursor).expect("every hash on the active path is a known node");
        let prev = block.header.prev_block_hash;
        blocks.push(block);
        if prev == Hash::zero() {
            break;
        }
        cursor = prev;
    }
    blocks.reverse();

    let tmp_path = path.with_extension("log.tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        for block in &blocks {
            let line = serde_json::to_string(block)?;
            writeln!(file, "{line}")?;
        }
        file.sync_all()?;
    }
    std::fs::rename(tmp_path, path)
}
