//! The node engine: the stateful heart of the full node. Owns the chain,
//! UTXO set, mempool, double-spend guard and every piece of P2P bookkeeping
//! (peer scores, bans, rate limits, connection caps), plus the live table of
//! connected peers, all as explicit fields reached through one `Arc<Engine>`
//! handed to every task.
//!
//! Peer I/O tasks never touch the chain/mempool/guard directly — they call
//! [`Engine::handle_message`], which is synchronous and respects the lock
//! order (chain, then guard, then UTXO set, then mempool) by construction,
//! since those are the only locks it ever takes. The return value is a list
//! of outbound messages the caller is responsible for actually writing to
//! sockets, which keeps every lock acquisition off the async path.

use btclib::chain::{Chain, ChainEvent};
use btclib::config::NodeConfig;
use btclib::control;
use btclib::crypto::Address;
use btclib::double_spend::DoubleSpendGuard;
use btclib::error::{BtcError, Result};
use btclib::mempool::{AddOutcome, Mempool};
use btclib::network::message::{AddrPayload, BlockPayload, GetBlocksPayload, InvItem, InvKind, InvPayload, Message, VersionPayload};
use btclib::network::peer::{BanManager, ConnectionTracker, Direction, PeerScoreManager, PeerState, RateLimiter, ScoreEvent};
use btclib::network::{select_sync_peer, PeerChainInfo, MAX_BLOCKS_PER_INV};
use btclib::sha256::Hash;
use btclib::types::{Block, Transaction};
use btclib::utxo::UtxoSet;
use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Peer channel capacity. Bounded so a slow peer can't let its outbound
/// queue grow without limit; `Engine::queue` drops the oldest `INV` rather
/// than block when the queue is full, and never drops `BLOCK`/`TX`.
const PEER_QUEUE_CAPACITY: usize = 256;

struct PeerRuntime {
    state: PeerState,
    start_height: u64,
}

pub struct PeerHandle {
    pub addr: SocketAddr,
    pub direction: Direction,
    to_peer: mpsc::Sender<Message>,
    runtime: Mutex<PeerRuntime>,
}

impl PeerHandle {
    pub fn state(&self) -> PeerState {
        self.runtime.lock().unwrap().state
    }

    pub fn set_state(&self, state: PeerState) {
        self.runtime.lock().unwrap().state = state;
    }
}

/// One outbound message an engine method wants sent; the caller resolves
/// `to` against its own peer table and performs the actual write.
pub struct SendAction {
    pub to: SocketAddr,
    pub msg: Message,
}

fn send(to: SocketAddr, msg: Message) -> SendAction {
    SendAction { to, msg }
}

pub struct Engine {
    pub chain: Chain,
    pub utxos: UtxoSet,
    pub mempool: Mempool,
    pub guard: DoubleSpendGuard,
    pub peer_scores: PeerScoreManager,
    pub bans: BanManager,
    pub rate_limiter: RateLimiter,
    pub connections: ConnectionTracker,
    pub peers: DashMap<SocketAddr, PeerHandle>,
    pub config: NodeConfig,
    pub chain_id: u64,
    pub local_nonce: u64,
    pub shutdown: AtomicBool,
    inflight_blocks: DashMap<Hash, chrono::DateTime<Utc>>,
    inflight_txs: DashMap<Hash, chrono::DateTime<Utc>>,
    syncing_with: Mutex<Option<(SocketAddr, chrono::DateTime<Utc>)>>,
}

impl Engine {
    pub fn new(chain: Chain, utxos: UtxoSet, mempool: Mempool, guard: DoubleSpendGuard, config: NodeConfig) -> Self {
        let chain_id = config.consensus.chain_id;
        Engine {
            chain,
            utxos,
            mempool,
            guard,
            peer_scores: PeerScoreManager::new(),
            bans: BanManager::new(),
            rate_limiter: RateLimiter::new(),
            connections: ConnectionTracker::new(),
            peers: DashMap::new(),
            config,
            chain_id,
            local_nonce: rand::thread_rng().next_u64(),
            shutdown: AtomicBool::new(false),
            inflight_blocks: DashMap::new(),
            inflight_txs: DashMap::new(),
            syncing_with: Mutex::new(None),
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Admits a new connection at the accounting layer: rejects banned and
    /// over-capacity IPs before a single byte of handshake is exchanged.
    pub fn admit_connection(&self, addr: SocketAddr, direction: Direction) -> Result<()> {
        let now = Utc::now();
        if self.bans.is_banned(addr.ip(), now) {
            return Err(BtcError::PeerBanned);
        }
        if !self.connections.try_reserve(addr.ip(), direction) {
            return Err(BtcError::other("connection limit reached"));
        }
        Ok(())
    }

    pub fn release_connection(&self, addr: SocketAddr, direction: Direction) {
        self.connections.release(addr.ip(), direction);
    }

    pub fn register_peer(&self, addr: SocketAddr, direction: Direction, to_peer: mpsc::Sender<Message>) {
        self.peers.insert(
            addr,
            PeerHandle {
                addr,
                direction,
                to_peer,
                runtime: Mutex::new(PeerRuntime {
                    state: PeerState::Connected,
                    start_height: 0,
                }),
            },
        );
    }

    pub fn remove_peer(&self, addr: SocketAddr, direction: Direction) {
        self.peers.remove(&addr);
        self.release_connection(addr, direction);
        let mut syncing = self.syncing_with.lock().unwrap();
        if syncing.map(|(peer, _)| peer) == Some(addr) {
            *syncing = None;
        }
    }

    pub fn version_payload(&self, addr_recv: SocketAddr, addr_from: SocketAddr) -> VersionPayload {
        VersionPayload {
            version: 1,
            services: 0,
            addr_recv: addr_recv.to_string(),
            addr_from: addr_from.to_string(),
            nonce: self.local_nonce,
            user_agent: "/btc-toy:0.1.0/".to_string(),
            start_height: self.chain.tip_height(),
            relay: true,
        }
    }

    /// Records a scoring event for `addr`'s IP and bans it immediately if it
    /// crossed a threshold.
    pub fn score(&self, addr: SocketAddr, event: ScoreEvent) {
        let ban_eligible = self.peer_scores.record(addr.ip(), event);
        if ban_eligible {
            warn!(peer = %addr, "peer crossed score/violation threshold, banning");
            self.bans.ban(addr.ip(), Utc::now());
        }
    }

    /// Applies the wire-level checks every inbound frame must pass before
    /// its payload is interpreted: ban status and the sliding-window rate
    /// limit. Both failures are scoring events, not silent drops.
    pub fn admit_message(&self, addr: SocketAddr) -> Result<()> {
        let now = Utc::now();
        if self.bans.is_banned(addr.ip(), now) {
            return Err(BtcError::PeerBanned);
        }
        if !self.rate_limiter.check(addr.ip(), now) {
            self.score(addr, ScoreEvent::RateLimit);
            return Err(BtcError::RateLimited);
        }
        Ok(())
    }

    /// Routes one inbound message from `from` and returns the outbound
    /// messages it produces (a handshake reply, a relay broadcast, block/tx
    /// fetches, …). Never panics on adversarial input — every error is
    /// typed and attributable to `from` for scoring by the caller.
    pub fn handle_message(&self, from: SocketAddr, msg: Message) -> Result<Vec<SendAction>> {
        match msg {
            Message::Version(payload) => self.on_version(from, payload),
            Message::Verack => self.on_verack(from),
            Message::Ping(p) => Ok(vec![send(from, Message::Pong(p))]),
            Message::Pong(_) => {
                self.score(from, ScoreEvent::FastResponse);
                Ok(vec![])
            }
            Message::GetAddr => self.on_get_addr(from),
            Message::Addr(p) => self.on_addr(from, p),
            Message::Inv(p) => self.on_inv(from, p),
            Message::GetData(p) => self.on_get_data(from, p),
            Message::Block(p) => self.on_block(from, p.block),
            Message::Tx(p) => self.on_tx(from, p.tx),
            Message::GetBlocks(p) => self.on_get_blocks(from, p),
            Message::NotFound(p) => {
                debug!(peer = %from, items = p.items.len(), "peer reports items not found");
                Ok(vec![])
            }
            Message::Reject(p) => {
                debug!(peer = %from, reason = %p.reason, "peer rejected a message we sent");
                Ok(vec![])
            }
        }
    }

    fn require_ready_or_handshaking(&self, from: SocketAddr) -> Result<()> {
        let ready = self
            .peers
            .get(&from)
            .map(|p| matches!(p.state(), PeerState::Handshaking | PeerState::Connected | PeerState::Ready))
            .unwrap_or(false);
        if ready {
            Ok(())
        } else {
            Err(BtcError::ProtocolViolation)
        }
    }

    fn on_version(&self, from: SocketAddr, payload: VersionPayload) -> Result<Vec<SendAction>> {
        self.require_ready_or_handshaking(from)?;
        if let Some(peer) = self.peers.get(&from) {
            let mut runtime = peer.runtime.lock().unwrap();
            runtime.start_height = payload.start_height;
            if runtime.state == PeerState::Connected {
                runtime.state = PeerState::Handshaking;
            }
        }
        Ok(vec![send(from, Message::Verack)])
    }

    fn on_verack(&self, from: SocketAddr) -> Result<Vec<SendAction>> {
        self.require_ready_or_handshaking(from)?;
        if let Some(peer) = self.peers.get(&from) {
            peer.set_state(PeerState::Ready);
        }
        info!(peer = %from, "peer handshake complete");
        let mut actions = Vec::new();
        if let Some(action) = self.maybe_start_ibd(&[]) {
            actions.push(action);
        }
        Ok(actions)
    }

    fn on_get_addr(&self, from: SocketAddr) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        let addrs = self
            .peers
            .iter()
            .filter(|p| p.state() == PeerState::Ready && p.addr != from)
            .take(btclib::MAX_ADDR_ITEMS)
            .map(|p| p.addr.to_string())
            .collect();
        Ok(vec![send(from, Message::Addr(AddrPayload { addrs }))])
    }

    fn on_addr(&self, from: SocketAddr, payload: AddrPayload) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        debug!(peer = %from, count = payload.addrs.len(), "received peer addresses");
        Ok(vec![])
    }

    fn on_inv(&self, from: SocketAddr, payload: InvPayload) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        let now = Utc::now();
        let mut wanted = Vec::new();
        for item in payload.items {
            let already_have = match item.kind {
                InvKind::Block => self.chain.contains(&item.hash),
                InvKind::Tx => self.mempool.has(&item.hash),
            };
            let inflight_table = match item.kind {
                InvKind::Block => &self.inflight_blocks,
                InvKind::Tx => &self.inflight_txs,
            };
            if already_have || inflight_table.contains_key(&item.hash) {
                continue;
            }
            inflight_table.insert(item.hash, now);
            wanted.push(item);
        }
        if wanted.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![send(from, Message::GetData(InvPayload { items: wanted }))])
    }

    fn on_get_data(&self, from: SocketAddr, payload: InvPayload) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        let mut actions = Vec::new();
        let mut missing = Vec::new();
        for item in payload.items {
            match item.kind {
                InvKind::Block => match self.chain.get_block(&item.hash) {
                    Some(block) => actions.push(send(from, Message::Block(BlockPayload { block }))),
                    None => missing.push(item),
                },
                InvKind::Tx => {
                    // Mempool doesn't expose a get-by-id beyond presence; a
                    // peer asking for a tx we no longer hold gets NOTFOUND.
                    missing.push(item);
                }
            }
        }
        if !missing.is_empty() {
            actions.push(send(from, Message::NotFound(InvPayload { items: missing })));
        }
        Ok(actions)
    }

    fn on_block(&self, from: SocketAddr, block: Block) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        let hash = block.hash();
        self.inflight_blocks.remove(&hash);
        let event = self.chain.submit_block(block, &self.utxos, &self.mempool, &self.guard, self.chain_id);
        match event {
            Ok(ChainEvent::Extended) | Ok(ChainEvent::Reorged { .. }) => {
                self.score(from, ScoreEvent::ValidBlock);
                info!(peer = %from, hash = %hash, "accepted block");
                Ok(self.broadcast_except(from, Message::Inv(InvPayload { items: vec![InvItem { kind: InvKind::Block, hash }] })))
            }
            Ok(ChainEvent::SideBranch) => {
                self.score(from, ScoreEvent::ValidBlock);
                Ok(vec![])
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "rejected block");
                self.score(from, ScoreEvent::InvalidBlock);
                Err(e)
            }
        }
    }

    fn on_tx(&self, from: SocketAddr, tx: Transaction) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        let txid = tx.txid();
        self.inflight_txs.remove(&txid);
        let serialized = serde_json::to_vec(&tx).map_err(|_| BtcError::MalformedMessage)?;
        match control::submit_transaction(&serialized, &self.utxos, &self.mempool, &self.guard, &self.chain, self.chain_id) {
            Ok(_) => {
                self.score(from, ScoreEvent::ValidTx);
                Ok(self.broadcast_except(from, Message::Inv(InvPayload { items: vec![InvItem { kind: InvKind::Tx, hash: txid }] })))
            }
            Err(BtcError::DuplicateTransaction) => {
                // Already-known transaction: not a protocol fault.
                Ok(vec![])
            }
            Err(e) => {
                warn!(peer = %from, error = %e, "rejected transaction");
                self.score(from, ScoreEvent::InvalidTx);
                Err(e)
            }
        }
    }

    fn on_get_blocks(&self, from: SocketAddr, payload: GetBlocksPayload) -> Result<Vec<SendAction>> {
        self.ensure_ready(from)?;
        // Walk back from our tip until we find a hash the requester's
        // locator already has, then offer everything above it.
        let mut found_fork_point = None;
        let mut cursor = self.chain.tip_hash();
        let mut path = Vec::new();
        loop {
            if payload.locator.contains(&cursor) {
                found_fork_point = Some(cursor);
                break;
            }
            let Some(block) = self.chain.get_block(&cursor) else { break };
            path.push(cursor);
            if block.header.prev_block_hash == Hash::zero() {
                break;
            }
            cursor = block.header.prev_block_hash;
        }
        if found_fork_point.is_none() && path.is_empty() {
            return Ok(vec![]);
        }
        path.reverse();
        let items: Vec<InvItem> = path
            .into_iter()
            .take(MAX_BLOCKS_PER_INV)
            .map(|hash| InvItem { kind: InvKind::Block, hash })
            .collect();
        if items.is_empty() {
            return Ok(vec![]);
        }
        Ok(vec![send(from, Message::Inv(InvPayload { items }))])
    }

    fn ensure_ready(&self, from: SocketAddr) -> Result<()> {
        let ready = self.peers.get(&from).map(|p| p.state() == PeerState::Ready).unwrap_or(false);
        if ready {
            Ok(())
        } else {
            Err(BtcError::ProtocolViolation)
        }
    }

    fn broadcast_except(&self, except: SocketAddr, msg: Message) -> Vec<SendAction> {
        self.peers
            .iter()
            .filter(|p| p.addr != except && p.state() == PeerState::Ready)
            .map(|p| send(p.addr, msg.clone()))
            .collect()
    }

    /// If we're behind the best-known peer, picks a sync target (other than
    /// anyone in `excluding`) and returns the `GETBLOCKS` request to kick off
    /// IBD against it.
    fn maybe_start_ibd(&self, excluding: &[SocketAddr]) -> Option<SendAction> {
        let mut syncing = self.syncing_with.lock().unwrap();
        if syncing.is_some() {
            return None;
        }
        let candidates: Vec<PeerChainInfo> = self
            .peers
            .iter()
            .filter(|p| p.state() == PeerState::Ready && !excluding.contains(&p.addr))
            .map(|p| PeerChainInfo {
                peer_id: p.addr,
                start_height: p.runtime.lock().unwrap().start_height,
            })
            .collect();
        let target = select_sync_peer(&candidates, self.chain.tip_height())?;
        *syncing = Some((target.peer_id, Utc::now()));
        let locator = self.chain.locator();
        info!(peer = %target.peer_id, their_height = target.start_height, "starting initial block download");
        Some(send(
            target.peer_id,
            Message::GetBlocks(GetBlocksPayload { locator, stop_hash: Hash::zero() }),
        ))
    }

    /// Periodic maintenance: drops inflight block/tx requests that have sat
    /// unanswered past `GETDATA_TIMEOUT_SECS`, and — if the peer we're
    /// currently running IBD against has gone quiet for the same timeout —
    /// abandons that attempt and restarts it against a different candidate.
    /// Called from the node's background GC task, never from the peer I/O
    /// path.
    pub fn expire_inflight(&self) -> Vec<SendAction> {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(self.config.p2p.getdata_timeout_secs as i64);

        self.inflight_blocks.retain(|hash, requested_at| {
            let expired = now - *requested_at > timeout;
            if expired {
                debug!(hash = %hash, "inflight block request expired");
            }
            !expired
        });
        self.inflight_txs.retain(|hash, requested_at| {
            let expired = now - *requested_at > timeout;
            if expired {
                debug!(hash = %hash, "inflight tx request expired");
            }
            !expired
        });

        let stalled_peer = {
            let syncing = self.syncing_with.lock().unwrap();
            match *syncing {
                Some((peer, started_at)) if now - started_at > timeout => Some(peer),
                _ => None,
            }
        };
        let Some(stalled_peer) = stalled_peer else {
            return vec![];
        };

        warn!(peer = %stalled_peer, "sync peer went silent during IBD, restarting against another candidate");
        *self.syncing_with.lock().unwrap() = None;
        self.score(stalled_peer, ScoreEvent::Timeout);
        self.maybe_start_ibd(&[stalled_peer]).into_iter().collect()
    }

    pub fn queue_capacity() -> usize {
        PEER_QUEUE_CAPACITY
    }

    pub fn deliver(&self, action: SendAction) {
        if let Some(peer) = self.peers.get(&action.to) {
            match peer.to_peer.try_send(action.msg.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Drop-oldest-INV policy: an INV is advisory (the peer
                    // will ask again on its own next announcement), so a
                    // full queue just drops it. BLOCK/TX aren't produced
                    // fast enough here to hit this path in practice, but if
                    // they do, losing data silently would be worse than
                    // losing timeliness, so send blocking instead.
                    if matches!(action.msg, Message::Block(_) | Message::Tx(_)) {
                        let to_peer = peer.to_peer.clone();
                        let msg = action.msg;
                        tokio::spawn(async move {
                            let _ = to_peer.send(msg).await;
                        });
                    } else {
                        debug!(peer = %action.to, "dropping message, peer send queue is full");
                    }
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
    }

    pub fn deliver_all(&self, actions: Vec<SendAction>) {
        for action in actions {
            self.deliver(action);
        }
    }

    /// `genesis_premine` credited on first boot goes to a literal,
    /// unspendable address — nobody holds its private key.
    pub fn genesis_address() -> Address {
        Address::genesis()
    }
}
