//! Minimal CLI wallet: generate a keypair, check a balance, send a payment.
//! Talks to a running node's control listener over the same newline-JSON
//! protocol the miner uses. No encrypted key storage, no TUI — both are out
//! of scope, per the private key stored as a plain ciborium file.

use anyhow::{bail, Context, Result};
use btclib::control::{ControlRequest, ControlResponse};
use btclib::crypto::{Address, PrivateKey};
use btclib::types::{Outpoint, Transaction, TransactionInput, TransactionOutput};
use btclib::util::Saveable;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::info;

#[derive(Parser)]
#[command(about = "CLI wallet for the toy UTXO node")]
struct Cli {
    /// address of the node's control listener
    #[arg(long, env = "WALLET_NODE", default_value = "127.0.0.1:18443", global = true)]
    node: SocketAddr,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a new keypair and write the private key to `key`
    Keygen {
        #[arg(long, default_value = "wallet.key")]
        key: PathBuf,
    },
    /// Print the address a key file controls
    Address {
        #[arg(long, default_value = "wallet.key")]
        key: PathBuf,
    },
    /// Query an address's confirmed balance from a running node
    Balance { address: Address },
    /// Spend from `key`'s UTXOs, paying `amount` to `to`
    Send {
        #[arg(long, default_value = "wallet.key")]
        key: PathBuf,
        to: Address,
        amount: u64,
        #[arg(long, default_value_t = 1)]
        fee: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Keygen { key } => keygen(&key),
        Commands::Address { key } => print_address(&key),
        Commands::Balance { address } => balance(cli.node, &address).await,
        Commands::Send { key, to, amount, fee } => send(cli.node, &key, &to, amount, fee).await,
    }
}

fn keygen(path: &PathBuf) -> Result<()> {
    if path.exists() {
        bail!("{} already exists, refusing to overwrite", path.display());
    }
    let (sk, _pk, address) = btclib::crypto::generate_keypair();
    sk.save_to_file(path).with_context(|| format!("writing key to {}", path.display()))?;
    println!("{address}");
    Ok(())
}

fn print_address(path: &PathBuf) -> Result<()> {
    let sk = PrivateKey::load_from_file(path).with_context(|| format!("loading key from {}", path.display()))?;
    println!("{}", sk.public_key().address());
    Ok(())
}

async fn balance(node: SocketAddr, address: &Address) -> Result<()> {
    let mut conn = Connection::dial(node).await?;
    match conn.request(ControlRequest::GetBalance { address: address.clone() }).await? {
        ControlResponse::Balance { amount } => {
            println!("{amount}");
            Ok(())
        }
        ControlResponse::Error { message } => bail!("node error: {message}"),
        other => bail!("unexpected response: {other:?}"),
    }
}

async fn send(node: SocketAddr, key: &PathBuf, to: &Address, amount: u64, fee: u64) -> Result<()> {
    let sk = PrivateKey::load_from_file(key).with_context(|| format!("loading key from {}", key.display()))?;
    let from = sk.public_key().address();

    let mut conn = Connection::dial(node).await?;
    let utxos = match conn.request(ControlRequest::GetUtxos { address: from.clone() }).await? {
        ControlResponse::Utxos(utxos) => utxos,
        ControlResponse::Error { message } => bail!("node error: {message}"),
        other => bail!("unexpected response: {other:?}"),
    };

    let target = amount + fee;
    let mut selected = Vec::new();
    let mut total = 0u64;
    for utxo in utxos {
        selected.push(utxo.clone());
        total += utxo.amount;
        if total >= target {
            break;
        }
    }
    if total < target {
        bail!("insufficient funds: have {total}, need {target}");
    }

    let inputs: Vec<TransactionInput> = selected
        .iter()
        .map(|utxo| TransactionInput {
            prev_outpoint: Outpoint::new(utxo.outpoint.txid, utxo.outpoint.index),
            signature: btclib::crypto::Signature::sign_hash(&btclib::sha256::Hash::zero(), &sk),
            pubkey: sk.public_key(),
        })
        .collect();

    let mut outputs = vec![TransactionOutput {
        amount,
        script_pubkey: to.clone(),
    }];
    let change = total - target;
    if change > 0 {
        outputs.push(TransactionOutput {
            amount: change,
            script_pubkey: from.clone(),
        });
    }

    let mut tx = Transaction::new(1, btclib::DEFAULT_CHAIN_ID, inputs, outputs, 0, Utc::now());
    for i in 0..tx.inputs.len() {
        tx.sign_input(i, &sk);
    }

    info!(txid = %tx.txid(), inputs = tx.inputs.len(), "submitting transaction");
    match conn.request(ControlRequest::SubmitTransaction { tx }).await? {
        ControlResponse::TransactionAccepted { txid } => {
            println!("{txid}");
            Ok(())
        }
        ControlResponse::Error { message } => bail!("node rejected transaction: {message}"),
        other => bail!("unexpected response: {other:?}"),
    }
}

struct Connection {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: tokio::net::tcp::OwnedWriteHalf,
}

impl Connection {
    async fn dial(addr: SocketAddr) -> Result<Self> {
        let stream = TcpStream::connect(addr).await.with_context(|| format!("connecting to node at {addr}"))?;
        let (read_half, write_half) = stream.into_split();
        Ok(Connection {
            reader: BufReader::new(read_half),
            writer: write_half,
        })
    }

    async fn request(&mut self, req: ControlRequest) -> Result<ControlResponse> {
        btclib::control::write_line(&mut self.writer, &req).await.context("sending control request")?;
        btclib::control::read_line(&mut self.reader).await.context("reading control response")
    }
}
