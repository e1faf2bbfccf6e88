//! The P2P engine (C10): wire framing and the message set (`message`), plus
//! peer reputation, bans, rate limiting and connection caps (`peer`). This
//! module adds the glue between them that doesn't belong to either: sync
//! peer selection for initial block download.

pub mod message;
pub mod peer;

pub use message::{
    AddrPayload, BlockPayload, GetBlocksPayload, InvItem, InvKind, InvPayload, Message,
    PingPayload, RejectPayload, TxPayload, VersionPayload,
};
pub use peer::{BanManager, ConnectionTracker, Direction, PeerScore, PeerScoreManager, PeerState, RateLimiter, ScoreEvent};

/// Up to 500 blocks are offered per `INV` in response to a `GETBLOCKS`,
/// bounding a single initial-block-download round's fan-out.
pub const MAX_BLOCKS_PER_INV: usize = 500;

/// A connected peer's advertised chain height, as learned from its
/// `VERSION` message.
#[derive(Debug, Clone, Copy)]
pub struct PeerChainInfo {
    pub peer_id: std::net::SocketAddr,
    pub start_height: u64,
}

/// Picks the sync peer for initial block download: among peers whose
/// advertised height exceeds `local_height + 1`, the one with the greatest
/// `start_height`. Returns `None` if no peer is ahead of us, meaning we're
/// already caught up.
pub fn select_sync_peer(peers: &[PeerChainInfo], local_height: u64) -> Option<PeerChainInfo> {
    peers
        .iter()
        .filter(|p| p.start_height > local_height + 1)
        .max_by_key(|p| p.start_height)
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(port: u16, height: u64) -> PeerChainInfo {
        PeerChainInfo {
            peer_id: std::net::SocketAddr::from(([127, 0, 0, 1], port)),
            start_height: height,
        }
    }

    #[test]
    fn picks_the_highest_peer_strictly_ahead_of_local() {
        let peers = vec![peer(1, 10), peer(2, 500), peer(3, 100)];
        let chosen = select_sync_peer(&peers, 0).unwrap();
        assert_eq!(chosen.start_height, 500);
    }

    #[test]
    fn no_sync_peer_when_everyone_is_caught_up() {
        let peers = vec![peer(1, 1), peer(2, 0)];
        assert!(select_sync_peer(&peers, 0).is_none());
    }
}
