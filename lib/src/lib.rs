//! # BtcLib - UTXO ledger core
//!
//! Core of a UTXO-based cryptocurrency node: data model, UTXO set, mempool,
//! double-spend guard, consensus rules, validator, chain/fork-choice, miner
//! primitives and the P2P wire protocol. Key generation, wallet file
//! encryption, demo CLIs and the mixing coordinator live outside this crate.
//!
//! ## Attribution
//! - **Based on:** "Building Bitcoin in Rust" (book)
//! - **Implementation:** Luis Boscan (@lfbos)
//! - **License:** MIT
//!
//! For detailed credits and acknowledgments, see CREDITS.md in the repository root.

use serde::{Deserialize, Serialize};
use uint::construct_uint;

construct_uint! {
    // Construct an unsigned 256-bit integer
    // consisting of 4 x 64-bit words
    #[derive(Deserialize, Serialize)]
    pub struct U256(4);
}

// =============================================================================
// CONSENSUS PARAMETERS - Default Values
// =============================================================================
// These constants define the default consensus parameters. The config module
// reads environment overrides first and falls back to these.
// =============================================================================

/// Genesis pre-mine, in whole coins. Sent to the literal, unspendable address
/// `"genesis"` (see `types::chain::genesis_block`).
pub const GENESIS_PREMINE: u64 = 1_000_000;

/// Block subsidy awarded at height 1, in whole coins.
pub const INITIAL_SUBSIDY: u64 = 50;

/// Number of blocks between subsidy halvings.
pub const HALVING_INTERVAL: u64 = 210_000;

/// Hard supply cap, in whole coins.
pub const MAX_SUPPLY: u64 = 21_000_000;

/// Target time between blocks, in seconds.
pub const TARGET_BLOCK_TIME: u64 = 600;

/// Number of blocks between difficulty retargets.
pub const RETARGET_INTERVAL: u64 = 2016;

/// Maximum allowed drift between a block's timestamp and the validator's clock.
pub const MAX_TIME_DRIFT_SECS: i64 = 2 * 60 * 60;

/// Number of confirmations before a coinbase output becomes spendable.
pub const COINBASE_MATURITY: u64 = 100;

/// Maximum serialized block size, in bytes.
pub const MAX_BLOCK_BYTES: usize = 1_000_000;

/// Default mempool capacity, in bytes.
pub const DEFAULT_MEMPOOL_MAX_BYTES: usize = 300_000_000;

/// Default minimum fee rate accepted into the mempool (coins per byte).
pub const DEFAULT_MIN_FEE_RATE: f64 = 0.001;

/// Default replay-protection chain id.
pub const DEFAULT_CHAIN_ID: u64 = 1;

/// Difficulty of the genesis block, in leading zero hex nibbles.
pub const GENESIS_DIFFICULTY: u32 = 1;

/// Floor below which a retarget may never push the difficulty.
pub const MIN_DIFFICULTY: u32 = 1;

// =============================================================================
// P2P ENGINE PARAMETERS - Default Values
// =============================================================================

/// Wire protocol magic bytes prefixing every frame. Configurable per network
/// via `config`; this is the mainnet-style default.
pub const DEFAULT_MAGIC_BYTES: [u8; 4] = [0xF9, 0xBE, 0xB4, 0xD9];

/// Default TCP port for the P2P listener.
pub const DEFAULT_P2P_PORT: u16 = 8333;

/// Largest frame payload accepted from a peer, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 32 * 1024 * 1024;

/// Largest `items` array accepted in a single `INV`/`GETDATA`/`NOTFOUND`.
pub const MAX_INV_ITEMS: usize = 50_000;

/// Largest `addrs` array accepted in a single `ADDR`.
pub const MAX_ADDR_ITEMS: usize = 1_000;

/// Per-IP message budget.
pub const RATE_LIMIT_MESSAGES_PER_MINUTE: u32 = 120;

/// Simultaneous connections tolerated from a single IP.
pub const MAX_CONNECTIONS_PER_IP: u32 = 3;

/// Inbound connection ceiling for the whole node.
pub const MAX_INBOUND_PEERS: u32 = 100;

/// Outbound connection ceiling for the whole node.
pub const MAX_OUTBOUND_PEERS: u32 = 8;

/// Seconds allowed to complete the VERSION/VERACK handshake.
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 30;

/// Seconds a connection may sit idle before it's considered dead.
pub const PEER_READ_IDLE_SECS: u64 = 600;

/// Heartbeat interval for `PING`.
pub const PING_INTERVAL_SECS: u64 = 120;

/// Seconds to wait for a `GETDATA` response before it's treated as a timeout.
pub const GETDATA_TIMEOUT_SECS: u64 = 60;

/// How long a ban lasts once imposed.
pub const DEFAULT_BAN_DURATION_SECS: i64 = 24 * 60 * 60;

/// Cumulative ban-score accumulator threshold (separate from the per-peer
/// reputation score below).
pub const BAN_SCORE_THRESHOLD: i64 = 100;

/// A peer is banned once its reputation score drops to or below this.
pub const PEER_SCORE_BAN_THRESHOLD: i64 = 0;

/// A peer is banned once its cumulative violation count reaches this.
pub const PEER_VIOLATIONS_BAN_THRESHOLD: u32 = 10;

/// Starting reputation score for a newly connected peer.
pub const INITIAL_PEER_SCORE: i64 = 100;

pub mod chain;
pub mod config;
pub mod consensus;
pub mod control;
pub mod crypto;
pub mod double_spend;
pub mod error;
pub mod mempool;
pub mod miner;
pub mod network;
pub mod sha256;
pub mod util;
pub mod utxo;
pub mod validator;

#[cfg(any(test, feature = "test-util"))]
pub mod test_helpers;

#[path = "../types/mod.rs"]
pub mod types;
