/// Configuration module for node parameters
///
/// This module provides a centralized configuration system that supports:
/// - Hardcoded defaults (the constants in `lib.rs`)
/// - Environment variable overrides
///
/// Configuration priority (highest to lowest):
/// 1. Environment variables
/// 2. .env file
/// 3. Hardcoded defaults
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

static CONFIG: OnceLock<NodeConfig> = OnceLock::new();

/// Full node configuration: consensus parameters, P2P tuning and local
/// paths. Consensus fields default to the constants in `lib.rs`; a node
/// that overrides them away from its peers' values will simply fork off
/// onto its own chain, so in practice only test/devnet deployments touch
/// them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub p2p: P2pConfig,
    pub node: NodeLocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    pub genesis_premine: u64,
    pub initial_subsidy: u64,
    pub halving_interval: u64,
    pub max_supply: u64,
    pub target_block_time_secs: u64,
    pub retarget_interval: u64,
    pub max_time_drift_secs: i64,
    pub coinbase_maturity: u64,
    pub max_block_bytes: usize,
    pub default_mempool_max_bytes: usize,
    pub default_min_fee_rate: f64,
    pub chain_id: u64,
    pub genesis_difficulty: u32,
    pub min_difficulty: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct P2pConfig {
    pub port: u16,
    pub max_message_size: usize,
    pub max_inv_items: usize,
    pub max_addr_items: usize,
    pub rate_limit_messages_per_minute: u32,
    pub max_connections_per_ip: u32,
    pub max_inbound_peers: u32,
    pub max_outbound_peers: u32,
    pub handshake_timeout_secs: u64,
    pub peer_read_idle_secs: u64,
    pub ping_interval_secs: u64,
    pub getdata_timeout_secs: u64,
    pub default_ban_duration_secs: i64,
    pub ban_score_threshold: i64,
    pub peer_score_ban_threshold: i64,
    pub peer_violations_ban_threshold: u32,
    pub initial_peer_score: i64,
    pub seed_peers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeLocalConfig {
    pub chain_file: String,
    pub save_interval_secs: u64,
    /// Port the control-surface listener binds to (wallet/miner RPC), distinct
    /// from the P2P port.
    pub control_port: u16,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            genesis_premine: crate::GENESIS_PREMINE,
            initial_subsidy: crate::INITIAL_SUBSIDY,
            halving_interval: crate::HALVING_INTERVAL,
            max_supply: crate::MAX_SUPPLY,
            target_block_time_secs: crate::TARGET_BLOCK_TIME,
            retarget_interval: crate::RETARGET_INTERVAL,
            max_time_drift_secs: crate::MAX_TIME_DRIFT_SECS,
            coinbase_maturity: crate::COINBASE_MATURITY,
            max_block_bytes: crate::MAX_BLOCK_BYTES,
            default_mempool_max_bytes: crate::DEFAULT_MEMPOOL_MAX_BYTES,
            default_min_fee_rate: crate::DEFAULT_MIN_FEE_RATE,
            chain_id: crate::DEFAULT_CHAIN_ID,
            genesis_difficulty: crate::GENESIS_DIFFICULTY,
            min_difficulty: crate::MIN_DIFFICULTY,
        }
    }
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            port: crate::DEFAULT_P2P_PORT,
            max_message_size: crate::MAX_MESSAGE_SIZE,
            max_inv_items: crate::MAX_INV_ITEMS,
            max_addr_items: crate::MAX_ADDR_ITEMS,
            rate_limit_messages_per_minute: crate::RATE_LIMIT_MESSAGES_PER_MINUTE,
            max_connections_per_ip: crate::MAX_CONNECTIONS_PER_IP,
            max_inbound_peers: crate::MAX_INBOUND_PEERS,
            max_outbound_peers: crate::MAX_OUTBOUND_PEERS,
            handshake_timeout_secs: crate::HANDSHAKE_TIMEOUT_SECS,
            peer_read_idle_secs: crate::PEER_READ_IDLE_SECS,
            ping_interval_secs: crate::PING_INTERVAL_SECS,
            getdata_timeout_secs: crate::GETDATA_TIMEOUT_SECS,
            default_ban_duration_secs: crate::DEFAULT_BAN_DURATION_SECS,
            ban_score_threshold: crate::BAN_SCORE_THRESHOLD,
            peer_score_ban_threshold: crate::PEER_SCORE_BAN_THRESHOLD,
            peer_violations_ban_threshold: crate::PEER_VIOLATIONS_BAN_THRESHOLD,
            initial_peer_score: crate::INITIAL_PEER_SCORE,
            seed_peers: vec![],
        }
    }
}

impl Default for NodeLocalConfig {
    fn default() -> Self {
        Self {
            chain_file: "./chain.log".to_string(),
            save_interval_secs: 60,
            control_port: 18_443,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            consensus: ConsensusConfig::default(),
            p2p: P2pConfig::default(),
            node: NodeLocalConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Loads configuration with environment variables (and a `.env` file,
    /// if present) overriding the hardcoded defaults.
    pub fn load() -> Self {
        dotenvy::dotenv().ok();
        Self {
            consensus: ConsensusConfig::from_env(),
            p2p: P2pConfig::from_env(),
            node: NodeLocalConfig::from_env(),
        }
    }

    pub fn global() -> &'static NodeConfig {
        CONFIG.get_or_init(NodeConfig::load)
    }

    /// Loads a JSON config file as the base, then lets environment variables
    /// override it field-by-field the same way [`NodeConfig::load`] overrides
    /// the hardcoded defaults. A missing file falls back to pure env-over-
    /// defaults.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        dotenvy::dotenv().ok();
        let base: NodeConfig = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
            Err(_) => NodeConfig::default(),
        };
        Ok(Self {
            consensus: ConsensusConfig::from_env_or(base.consensus),
            p2p: P2pConfig::from_env_or(base.p2p),
            node: NodeLocalConfig::from_env_or(base.node),
        })
    }

    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }
}

impl ConsensusConfig {
    fn from_env() -> Self {
        Self::from_env_or(Self::default())
    }

    fn from_env_or(defaults: Self) -> Self {
        Self {
            genesis_premine: parse_env("GENESIS_PREMINE").unwrap_or(defaults.genesis_premine),
            initial_subsidy: parse_env("INITIAL_SUBSIDY").unwrap_or(defaults.initial_subsidy),
            halving_interval: parse_env("HALVING_INTERVAL").unwrap_or(defaults.halving_interval),
            max_supply: parse_env("MAX_SUPPLY").unwrap_or(defaults.max_supply),
            target_block_time_secs: parse_env("TARGET_BLOCK_TIME").unwrap_or(defaults.target_block_time_secs),
            retarget_interval: parse_env("RETARGET_INTERVAL").unwrap_or(defaults.retarget_interval),
            max_time_drift_secs: parse_env("MAX_TIME_DRIFT_SECS").unwrap_or(defaults.max_time_drift_secs),
            coinbase_maturity: parse_env("COINBASE_MATURITY").unwrap_or(defaults.coinbase_maturity),
            max_block_bytes: parse_env("MAX_BLOCK_BYTES").unwrap_or(defaults.max_block_bytes),
            default_mempool_max_bytes: parse_env("MEMPOOL_MAX_BYTES").unwrap_or(defaults.default_mempool_max_bytes),
            default_min_fee_rate: parse_env("MIN_FEE_RATE").unwrap_or(defaults.default_min_fee_rate),
            chain_id: parse_env("CHAIN_ID").unwrap_or(defaults.chain_id),
            genesis_difficulty: parse_env("GENESIS_DIFFICULTY").unwrap_or(defaults.genesis_difficulty),
            min_difficulty: parse_env("MIN_DIFFICULTY").unwrap_or(defaults.min_difficulty),
        }
    }
}

impl P2pConfig {
    fn from_env() -> Self {
        Self::from_env_or(Self::default())
    }

    fn from_env_or(defaults: Self) -> Self {
        let seed_peers_str = env_var("SEED_PEERS").unwrap_or_default();
        let seed_peers = if seed_peers_str.is_empty() {
            defaults.seed_peers.clone()
        } else {
            seed_peers_str.split(',').map(|s| s.trim().to_string()).collect()
        };

        Self {
            port: parse_env("P2P_PORT").unwrap_or(defaults.port),
            max_message_size: parse_env("MAX_MESSAGE_SIZE").unwrap_or(defaults.max_message_size),
            max_inv_items: parse_env("MAX_INV_ITEMS").unwrap_or(defaults.max_inv_items),
            max_addr_items: parse_env("MAX_ADDR_ITEMS").unwrap_or(defaults.max_addr_items),
            rate_limit_messages_per_minute: parse_env("RATE_LIMIT_MESSAGES_PER_MINUTE")
                .unwrap_or(defaults.rate_limit_messages_per_minute),
            max_connections_per_ip: parse_env("MAX_CONNECTIONS_PER_IP").unwrap_or(defaults.max_connections_per_ip),
            max_inbound_peers: parse_env("MAX_INBOUND_PEERS").unwrap_or(defaults.max_inbound_peers),
            max_outbound_peers: parse_env("MAX_OUTBOUND_PEERS").unwrap_or(defaults.max_outbound_peers),
            handshake_timeout_secs: parse_env("HANDSHAKE_TIMEOUT_SECS").unwrap_or(defaults.handshake_timeout_secs),
            peer_read_idle_secs: parse_env("PEER_READ_IDLE_SECS").unwrap_or(defaults.peer_read_idle_secs),
            ping_interval_secs: parse_env("PING_INTERVAL_SECS").unwrap_or(defaults.ping_interval_secs),
            getdata_timeout_secs: parse_env("GETDATA_TIMEOUT_SECS").unwrap_or(defaults.getdata_timeout_secs),
            default_ban_duration_secs: parse_env("BAN_DURATION_SECS").unwrap_or(defaults.default_ban_duration_secs),
            ban_score_threshold: parse_env("BAN_SCORE_THRESHOLD").unwrap_or(defaults.ban_score_threshold),
            peer_score_ban_threshold: parse_env("PEER_SCORE_BAN_THRESHOLD").unwrap_or(defaults.peer_score_ban_threshold),
            peer_violations_ban_threshold: parse_env("PEER_VIOLATIONS_BAN_THRESHOLD")
                .unwrap_or(defaults.peer_violations_ban_threshold),
            initial_peer_score: parse_env("INITIAL_PEER_SCORE").unwrap_or(defaults.initial_peer_score),
            seed_peers,
        }
    }
}

impl NodeLocalConfig {
    fn from_env() -> Self {
        Self::from_env_or(Self::default())
    }

    fn from_env_or(defaults: Self) -> Self {
        Self {
            chain_file: env_var("CHAIN_FILE").unwrap_or(defaults.chain_file),
            save_interval_secs: parse_env("SAVE_INTERVAL_SECS").unwrap_or(defaults.save_interval_secs),
            control_port: parse_env("CONTROL_PORT").unwrap_or(defaults.control_port),
        }
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_var(key)?.parse().ok()
}
