//! Standalone miner: dials a node's control listener, repeatedly asks for a
//! block template, searches for a nonce, and submits whatever it finds.
//! Speaks the same newline-JSON control protocol as the wallet — it has no
//! P2P connectivity of its own and never touches the node's ledger directly.

use anyhow::{bail, Context, Result};
use btclib::control::{ControlRequest, ControlResponse};
use btclib::crypto::Address;
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{info, warn};

#[derive(Parser)]
#[command(about = "Proof-of-work miner for the toy UTXO node")]
struct Args {
    /// address of the node's control listener
    #[arg(long, default_value = "127.0.0.1:18443")]
    node: SocketAddr,
    /// address to pay block rewards to
    #[arg(long)]
    address: Address,
    /// nonce attempts per template before refreshing it
    #[arg(long, default_value_t = 2_000_000)]
    attempts_per_round: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let args = Args::parse();

    info!(node = %args.node, address = %args.address, "miner starting");

    loop {
        match mine_one_round(&args).await {
            Ok(Some((hash, height))) => info!(%hash, height, "block accepted"),
            Ok(None) => info!("no nonce found this round, refreshing template"),
            Err(e) => {
                warn!(error = %e, "mining round failed, retrying in 2s");
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn mine_one_round(args: &Args) -> Result<Option<(btclib::sha256::Hash, u64)>> {
    let mut conn = connect(args.node).await?;

    let template = match request(&mut conn, ControlRequest::GetBlockTemplate { miner_address: args.address.clone() }).await? {
        ControlResponse::BlockTemplate(t) => t,
        ControlResponse::Error { message } => bail!("node rejected template request: {message}"),
        other => bail!("unexpected response to GetBlockTemplate: {other:?}"),
    };

    info!(height = template.height, fees = template.fees, txs = template.block.transactions.len(), "got template");

    let candidate = btclib::miner::Candidate {
        block: template.block,
        fees: template.fees,
    };
    let Some(block) = btclib::miner::mine(candidate, args.attempts_per_round) else {
        return Ok(None);
    };

    match request(&mut conn, ControlRequest::SubmitBlock { block }).await? {
        ControlResponse::BlockAccepted { hash, height } => Ok(Some((hash, height))),
        ControlResponse::Error { message } => bail!("node rejected mined block: {message}"),
        other => bail!("unexpected response to SubmitBlock: {other:?}"),
    }
}

struct Connection {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

async fn connect(addr: SocketAddr) -> Result<Connection> {
    let stream = TcpStream::connect(addr).await.with_context(|| format!("connecting to node at {addr}"))?;
    let (read_half, write_half) = stream.into_split();
    Ok(Connection {
        reader: BufReader::new(read_half),
        writer: write_half,
    })
}

async fn request(conn: &mut Connection, req: ControlRequest) -> Result<ControlResponse> {
    btclib::control::write_line(&mut conn.writer, &req).await.context("sending control request")?;
    btclib::control::read_line(&mut conn.reader).await.context("reading control response")
}
