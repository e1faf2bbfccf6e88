//! The control listener: accepts local, trusted connections from the
//! `wallet` and `miner` binaries and answers [`ControlRequest`]s using
//! [`btclib::control`]. Entirely separate from the P2P listener — different
//! port, different framing, no peer scoring or bans.

use crate::engine::Engine;
use btclib::control::{self, ControlRequest, ControlResponse};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub async fn run(engine: Arc<Engine>, bind_addr: SocketAddr) -> std::io::Result<()> {
    let listener = TcpListener::bind(bind_addr).await?;
    info!(addr = %bind_addr, "control listener bound");
    loop {
        if engine.is_shutting_down() {
            return Ok(());
        }
        let (stream, addr) = listener.accept().await?;
        let engine = engine.clone();
        tokio::spawn(async move {
            if let Err(e) = handle(engine, stream).await {
                warn!(peer = %addr, error = %e, "control connection ended");
            }
        });
    }
}

async fn handle(engine: Arc<Engine>, stream: TcpStream) -> btclib::error::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    loop {
        let request: ControlRequest = control::read_line(&mut reader).await?;
        let response = dispatch(&engine, request);
        control::write_line(&mut write_half, &response).await?;
    }
}

fn dispatch(engine: &Engine, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::GetBalance { address } => ControlResponse::Balance {
            amount: control::get_balance(&engine.utxos, &address),
        },
        ControlRequest::GetUtxos { address } => ControlResponse::Utxos(control::get_utxos(&engine.utxos, &address)),
        ControlRequest::GetBlockchainInfo => {
            ControlResponse::BlockchainInfo(control::get_blockchain_info(&engine.chain, &engine.utxos, &engine.mempool))
        }
        ControlRequest::SubmitTransaction { tx } => {
            let serialized = match serde_json::to_vec(&tx) {
                Ok(bytes) => bytes,
                Err(_) => return ControlResponse::Error { message: "could not serialize transaction".to_string() },
            };
            match control::submit_transaction(&serialized, &engine.utxos, &engine.mempool, &engine.guard, &engine.chain, engine.chain_id) {
                Ok(txid) => {
                    let inv = btclib::network::message::InvPayload {
                        items: vec![btclib::network::message::InvItem { kind: btclib::network::message::InvKind::Tx, hash: txid }],
                    };
                    let fanout = engine
                        .peers
                        .iter()
                        .filter(|p| p.state() == btclib::network::peer::PeerState::Ready)
                        .map(|p| p.addr)
                        .collect::<Vec<_>>();
                    for addr in fanout {
                        engine.deliver(crate::engine::SendAction {
                            to: addr,
                            msg: btclib::network::message::Message::Inv(inv.clone()),
                        });
                    }
                    ControlResponse::TransactionAccepted { txid }
                }
                Err(e) => e.into(),
            }
        }
        ControlRequest::GetBlockTemplate { miner_address } => {
            ControlResponse::BlockTemplate(control::get_block_template(&engine.chain, &engine.mempool, &miner_address))
        }
        ControlRequest::SubmitBlock { block } => {
            let hash = block.hash();
            match engine.chain.submit_block(block, &engine.utxos, &engine.mempool, &engine.guard, engine.chain_id) {
                Ok(_) => {
                    let inv = btclib::network::message::InvPayload {
                        items: vec![btclib::network::message::InvItem { kind: btclib::network::message::InvKind::Block, hash }],
                    };
                    let fanout = engine
                        .peers
                        .iter()
                        .filter(|p| p.state() == btclib::network::peer::PeerState::Ready)
                        .map(|p| p.addr)
                        .collect::<Vec<_>>();
                    for addr in fanout {
                        engine.deliver(crate::engine::SendAction {
                            to: addr,
                            msg: btclib::network::message::Message::Inv(inv.clone()),
                        });
                    }
                    ControlResponse::BlockAccepted { hash, height: engine.chain.tip_height() }
                }
                Err(e) => e.into(),
            }
        }
    }
}
