//! Per-peer connection handling: the TCP accept loop, outbound dialing, the
//! handshake state machine, and the read/write tasks that actually touch a
//! socket. Every inbound message is handed to [`Engine::handle_message`];
//! every outbound message is written by this peer's own writer task, which
//! is the only thing that ever holds the socket's write half — the "per-peer
//! send lock" in the engine's lock order is this channel, not a `Mutex`.

use crate::engine::Engine;
use btclib::error::BtcError;
use btclib::network::message::Message;
use btclib::network::peer::{Direction, PeerState, ScoreEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub async fn run_listener(engine: Arc<Engine>, bind_addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "p2p listener bound");
    loop {
        if engine.is_shutting_down() {
            return Ok(());
        }
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = run_connection(engine, stream, addr, Direction::Inbound).await {
                warn!(peer = %addr, error = %e, "inbound connection ended");
            }
        });
    }
}

pub async fn dial(engine: Arc<Engine>, addr: SocketAddr) -> btclib::error::Result<()> {
    let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(addr))
        .await
        .map_err(|_| BtcError::HandshakeTimeout)?
        .map_err(|_| BtcError::Disconnected)?;
    run_connection(engine, stream, addr, Direction::Outbound).await
}

async fn run_connection(engine: Arc<Engine>, stream: TcpStream, addr: SocketAddr, direction: Direction) -> btclib::error::Result<()> {
    engine.admit_connection(addr, direction)?;
    let local_addr = stream.local_addr().map_err(|_| BtcError::Disconnected)?;
    let (read_half, write_half) = tokio::io::split(stream);

    let (to_peer_tx, to_peer_rx) = mpsc::channel(Engine::queue_capacity());
    engine.register_peer(addr, direction, to_peer_tx.clone());

    let writer_task = tokio::spawn(run_writer(write_half, to_peer_rx));

    let result = run_reader(engine.clone(), read_half, addr, local_addr, direction, to_peer_tx).await;

    engine.remove_peer(addr, direction);
    if let Some(peer) = engine.peers.get(&addr) {
        peer.set_state(PeerState::Disconnected);
    }
    writer_task.abort();
    result
}

async fn run_writer<W: AsyncWrite + Unpin>(mut writer: W, mut rx: mpsc::Receiver<Message>) {
    while let Some(msg) = rx.recv().await {
        if msg.send_async(&mut writer).await.is_err() {
            return;
        }
    }
}

async fn run_reader<R: AsyncRead + Unpin>(
    engine: Arc<Engine>,
    mut reader: R,
    addr: SocketAddr,
    local_addr: SocketAddr,
    direction: Direction,
    to_peer_tx: mpsc::Sender<Message>,
) -> btclib::error::Result<()> {
    // Both sides announce themselves the moment the socket is up, per the
    // wire spec's Connecting -> Connected -> Handshaking transition.
    let version = engine.version_payload(addr, local_addr);
    to_peer_tx
        .send(Message::Version(version))
        .await
        .map_err(|_| BtcError::Disconnected)?;
    if let Some(peer) = engine.peers.get(&addr) {
        peer.set_state(PeerState::Handshaking);
    }

    let handshake_timeout = Duration::from_secs(engine.config.p2p.handshake_timeout_secs);
    let read_idle_timeout = Duration::from_secs(engine.config.p2p.peer_read_idle_secs);

    loop {
        if engine.is_shutting_down() {
            return Ok(());
        }
        let is_ready = engine.peers.get(&addr).map(|p| p.state() == PeerState::Ready).unwrap_or(false);
        let timeout = if is_ready { read_idle_timeout } else { handshake_timeout };

        let message = match tokio::time::timeout(timeout, Message::receive_async(&mut reader)).await {
            Ok(Ok(message)) => message,
            Ok(Err(e)) => {
                score_for_read_error(&engine, addr, &e);
                return Err(e);
            }
            Err(_) => {
                engine.score(addr, ScoreEvent::Timeout);
                return Err(if is_ready { BtcError::ReadTimeout } else { BtcError::HandshakeTimeout });
            }
        };

        engine.admit_message(addr)?;

        match engine.handle_message(addr, message) {
            Ok(actions) => engine.deliver_all(actions),
            Err(e) => {
                // `handle_message` already recorded the scoring event for
                // validation-shaped errors; protocol violations from the
                // gate checks above (ensure_ready etc.) still need one.
                if matches!(e, BtcError::ProtocolViolation) {
                    engine.score(addr, ScoreEvent::ProtocolViolation);
                }
                if engine.bans.is_banned(addr.ip(), chrono::Utc::now()) {
                    return Err(BtcError::PeerBanned);
                }
            }
        }
    }
}

fn score_for_read_error(engine: &Engine, addr: SocketAddr, e: &BtcError) {
    match e {
        BtcError::OversizedMessage => engine.score(addr, ScoreEvent::OversizedMessage),
        BtcError::MalformedMessage | BtcError::ProtocolViolation => engine.score(addr, ScoreEvent::ProtocolViolation),
        _ => {}
    }
}

