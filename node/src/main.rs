use anyhow::Result;
use argh::FromArgs;
use btclib::config::NodeConfig;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

mod bootstrap;
mod control_server;
mod engine;
mod peer_conn;
mod persistence;

use engine::Engine;

#[derive(FromArgs)]
/// A toy UTXO blockchain full node
struct Args {
    #[argh(option)]
    /// path to a JSON config file (falls back to env-var/hardcoded defaults)
    config: Option<String>,
    #[argh(option)]
    /// P2P port override
    port: Option<u16>,
    #[argh(option)]
    /// chain log file override
    chain_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let args: Args = argh::from_env();
    let mut config = match &args.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::load(),
    };
    if let Some(port) = args.port {
        config.p2p.port = port;
    }
    if let Some(chain_file) = args.chain_file {
        config.node.chain_file = chain_file;
    }

    info!(chain_id = config.consensus.chain_id, port = config.p2p.port, "starting node");

    let (chain, utxos, mempool, guard) = persistence::load_or_init(&config);
    let chain_file = config.node.chain_file.clone();
    let save_interval = config.node.save_interval_secs;
    let p2p_port = config.p2p.port;
    let control_port = config.node.control_port;

    let engine = Arc::new(Engine::new(chain, utxos, mempool, guard, config));

    let p2p_addr: SocketAddr = format!("0.0.0.0:{p2p_port}").parse().expect("valid bind address");
    let control_addr: SocketAddr = format!("127.0.0.1:{control_port}").parse().expect("valid bind address");

    let listener_handle = tokio::spawn(peer_conn::run_listener(engine.clone(), p2p_addr));
    let control_handle = tokio::spawn(control_server::run(engine.clone(), control_addr));

    bootstrap::bootstrap(engine.clone()).await;

    let save_handle = tokio::spawn(periodic_save(engine.clone(), chain_file.clone(), save_interval));
    let ping_handle = tokio::spawn(periodic_ping(engine.clone()));
    let gc_handle = tokio::spawn(periodic_gc(engine.clone()));

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown signal received");
    engine.request_shutdown();

    if let Err(e) = persistence::save(&engine.chain, Path::new(&chain_file)) {
        tracing::error!(error = %e, "final chain save failed");
    }

    listener_handle.abort();
    control_handle.abort();
    save_handle.abort();
    ping_handle.abort();
    gc_handle.abort();
    Ok(())
}

/// Periodically rewrites the chain log so a crash loses at most
/// `save_interval_secs` worth of blocks.
async fn periodic_save(engine: Arc<Engine>, chain_file: String, interval_secs: u64) {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    loop {
        ticker.tick().await;
        if engine.is_shutting_down() {
            return;
        }
        if let Err(e) = persistence::save(&engine.chain, Path::new(&chain_file)) {
            tracing::error!(error = %e, "periodic chain save failed");
        }
    }
}

/// Heartbeats every `Ready` peer with `PING`, per the read-idle/ping-interval
/// timeouts in the concurrency model.
async fn periodic_ping(engine: Arc<Engine>) {
    let interval = Duration::from_secs(engine.config.p2p.ping_interval_secs.max(1));
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if engine.is_shutting_down() {
            return;
        }
        let nonce = rand::random::<u64>();
        let ready_peers: Vec<SocketAddr> = engine
            .peers
            .iter()
            .filter(|p| p.state() == btclib::network::peer::PeerState::Ready)
            .map(|p| p.addr)
            .collect();
        for addr in ready_peers {
            engine.deliver(engine::SendAction {
                to: addr,
                msg: btclib::network::message::Message::Ping(btclib::network::message::PingPayload { nonce }),
            });
        }
    }
}

/// Expires stale inflight-request bookkeeping and re-attempts bootstrap if
/// we've fallen under the outbound peer target.
async fn periodic_gc(engine: Arc<Engine>) {
    let mut ticker = tokio::time::interval(Duration::from_secs(30));
    loop {
        ticker.tick().await;
        if engine.is_shutting_down() {
            return;
        }
        let actions = engine.expire_inflight();
        engine.deliver_all(actions);

        let outbound = engine
            .peers
            .iter()
            .filter(|p| p.direction == btclib::network::peer::Direction::Outbound)
            .count();
        if outbound < engine.config.p2p.max_outbound_peers as usize {
            bootstrap::bootstrap(engine.clone()).await;
        }
    }
}
