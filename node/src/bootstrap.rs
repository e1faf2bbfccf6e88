//! Outbound bootstrap: resolves the hard-coded DNS seeds, folds in the
//! operator-configured fallback peers, shuffles the combined candidate list
//! and dials outbound connections until the outbound cap is reached.

use crate::engine::Engine;
use rand::seq::SliceRandom;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Hard-coded DNS seeds, resolved to A records on boot. Entries are host
/// names only; the configured P2P port is appended before resolution.
const DNS_SEEDS: &[&str] = &["seed1.btcnode.example", "seed2.btcnode.example"];

async fn resolve_seeds(port: u16) -> Vec<SocketAddr> {
    let mut addrs = Vec::new();
    for seed in DNS_SEEDS {
        match tokio::net::lookup_host((*seed, port)).await {
            Ok(resolved) => addrs.extend(resolved),
            Err(e) => debug!(seed = %seed, error = %e, "dns seed did not resolve"),
        }
    }
    addrs
}

fn parse_fallback(seed_peers: &[String]) -> Vec<SocketAddr> {
    seed_peers
        .iter()
        .filter_map(|s| match s.parse() {
            Ok(addr) => Some(addr),
            Err(_) => {
                warn!(peer = %s, "ignoring malformed seed peer address");
                None
            }
        })
        .collect()
}

/// Runs once at startup: builds the candidate list, shuffles it, and dials
/// outbound connections one at a time until `MAX_OUTBOUND_PEERS` are
/// established or the candidate list is exhausted.
pub async fn bootstrap(engine: Arc<Engine>) {
    let mut candidates = resolve_seeds(engine.config.p2p.port).await;
    candidates.extend(parse_fallback(&engine.config.p2p.seed_peers));
    candidates.shuffle(&mut rand::thread_rng());

    if candidates.is_empty() {
        info!("no seed peers resolved or configured, starting as a seed node");
        return;
    }

    for addr in candidates {
        if engine.is_shutting_down() {
            return;
        }
        let current_outbound = engine.peers.iter().filter(|p| p.direction == btclib::network::peer::Direction::Outbound).count();
        if current_outbound >= engine.config.p2p.max_outbound_peers as usize {
            break;
        }
        if engine.peers.contains_key(&addr) {
            continue;
        }
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = crate::peer_conn::dial(engine, addr).await {
                debug!(peer = %addr, error = %e, "outbound dial failed");
            }
        });
    }
}
