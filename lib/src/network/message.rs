//! Wire framing and the peer message set (C10). Every frame is
//! `MAGIC(4) || command(12, NUL-padded) || length(u32 LE) || checksum(4) ||
//! payload`, and the payload is always UTF-8 JSON of `{type, payload,
//! timestamp}`. `Message::send_async`/`receive_async` are the only places
//! that touch a socket directly; everything else in this module is pure.

use crate::error::{BtcError, Result};
use crate::sha256::Hash;
use crate::types::{Block, Transaction};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: u32,
    pub services: u64,
    pub addr_recv: String,
    pub addr_from: String,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: u64,
    pub relay: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PingPayload {
    pub nonce: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddrPayload {
    pub addrs: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvItem {
    pub kind: InvKind,
    pub hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvPayload {
    pub items: Vec<InvItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub tx: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub locator: Vec<Hash>,
    pub stop_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Message {
    Version(VersionPayload),
    Verack,
    Ping(PingPayload),
    Pong(PingPayload),
    GetAddr,
    Addr(AddrPayload),
    Inv(InvPayload),
    GetData(InvPayload),
    Block(BlockPayload),
    Tx(TxPayload),
    GetBlocks(GetBlocksPayload),
    NotFound(InvPayload),
    Reject(RejectPayload),
}

impl Message {
    fn command(&self) -> &'static str {
        match self {
            Message::Version(_) => "VERSION",
            Message::Verack => "VERACK",
            Message::Ping(_) => "PING",
            Message::Pong(_) => "PONG",
            Message::GetAddr => "GETADDR",
            Message::Addr(_) => "ADDR",
            Message::Inv(_) => "INV",
            Message::GetData(_) => "GETDATA",
            Message::Block(_) => "BLOCK",
            Message::Tx(_) => "TX",
            Message::GetBlocks(_) => "GETBLOCKS",
            Message::NotFound(_) => "NOTFOUND",
            Message::Reject(_) => "REJECT",
        }
    }

    fn payload_value(&self) -> serde_json::Value {
        let value = match self {
            Message::Version(p) => serde_json::to_value(p),
            Message::Verack => serde_json::to_value(serde_json::json!({})),
            Message::Ping(p) => serde_json::to_value(p),
            Message::Pong(p) => serde_json::to_value(p),
            Message::GetAddr => serde_json::to_value(serde_json::json!({})),
            Message::Addr(p) => serde_json::to_value(p),
            Message::Inv(p) => serde_json::to_value(p),
            Message::GetData(p) => serde_json::to_value(p),
            Message::Block(p) => serde_json::to_value(p),
            Message::Tx(p) => serde_json::to_value(p),
            Message::GetBlocks(p) => serde_json::to_value(p),
            Message::NotFound(p) => serde_json::to_value(p),
            Message::Reject(p) => serde_json::to_value(p),
        };
        value.expect("message payloads are always representable as JSON")
    }

    fn from_command_and_payload(command: &str, payload: serde_json::Value) -> Result<Message> {
        let parse = |v: serde_json::Value| serde_json::from_value(v).map_err(|_| BtcError::MalformedMessage);
        Ok(match command {
            "VERSION" => Message::Version(parse(payload)?),
            "VERACK" => Message::Verack,
            "PING" => Message::Ping(parse(payload)?),
            "PONG" => Message::Pong(parse(payload)?),
            "GETADDR" => Message::GetAddr,
            "ADDR" => Message::Addr(parse(payload)?),
            "INV" => Message::Inv(parse(payload)?),
            "GETDATA" => Message::GetData(parse(payload)?),
            "BLOCK" => Message::Block(parse(payload)?),
            "TX" => Message::Tx(parse(payload)?),
            "GETBLOCKS" => Message::GetBlocks(parse(payload)?),
            "NOTFOUND" => Message::NotFound(parse(payload)?),
            "REJECT" => Message::Reject(parse(payload)?),
            _ => return Err(BtcError::MalformedMessage),
        })
    }

    /// Enforces the array-length caps (`INV`/`GETDATA`/`NOTFOUND` items,
    /// `ADDR` addrs) that bound a single frame's fan-out.
    fn check_limits(&self) -> Result<()> {
        let items = match self {
            Message::Inv(p) | Message::GetData(p) | Message::NotFound(p) => Some(p.items.len()),
            _ => None,
        };
        if let Some(len) = items {
            if len > crate::MAX_INV_ITEMS {
                return Err(BtcError::OversizedMessage);
            }
        }
        if let Message::Addr(p) = self {
            if p.addrs.len() > crate::MAX_ADDR_ITEMS {
                return Err(BtcError::OversizedMessage);
            }
        }
        Ok(())
    }

    pub async fn send_async<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        self.check_limits()?;
        let envelope = serde_json::json!({
            "type": self.command(),
            "payload": self.payload_value(),
            "timestamp": Utc::now().timestamp(),
        });
        let payload_bytes = serde_json::to_vec(&envelope).map_err(|_| BtcError::MalformedMessage)?;
        if payload_bytes.len() > crate::MAX_MESSAGE_SIZE {
            return Err(BtcError::OversizedMessage);
        }

        let mut frame = Vec::with_capacity(4 + 12 + 4 + 4 + payload_bytes.len());
        frame.extend_from_slice(&crate::DEFAULT_MAGIC_BYTES);
        frame.extend_from_slice(&command_bytes(self.command()));
        frame.extend_from_slice(&(payload_bytes.len() as u32).to_le_bytes());
        frame.extend_from_slice(&checksum_of(&payload_bytes));
        frame.extend_from_slice(&payload_bytes);

        writer.write_all(&frame).await.map_err(|_| BtcError::Disconnected)?;
        Ok(())
    }

    pub async fn receive_async<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Message> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic).await.map_err(|_| BtcError::Disconnected)?;
        if magic != crate::DEFAULT_MAGIC_BYTES {
            warn!(?magic, "rejecting frame with wrong magic bytes");
            return Err(BtcError::ProtocolViolation);
        }

        let mut command = [0u8; 12];
        reader.read_exact(&mut command).await.map_err(|_| BtcError::Disconnected)?;
        let command = std::str::from_utf8(&command)
            .map_err(|_| BtcError::MalformedMessage)?
            .trim_end_matches('\0')
            .to_string();

        let mut length_bytes = [0u8; 4];
        reader.read_exact(&mut length_bytes).await.map_err(|_| BtcError::Disconnected)?;
        let length = u32::from_le_bytes(length_bytes) as usize;
        if length > crate::MAX_MESSAGE_SIZE {
            warn!(length, command, "rejecting oversized frame");
            return Err(BtcError::OversizedMessage);
        }

        let mut checksum = [0u8; 4];
        reader.read_exact(&mut checksum).await.map_err(|_| BtcError::Disconnected)?;

        let mut payload = vec![0u8; length];
        reader.read_exact(&mut payload).await.map_err(|_| BtcError::Disconnected)?;
        if checksum_of(&payload) != checksum {
            warn!(command, "rejecting frame with bad checksum");
            return Err(BtcError::MalformedMessage);
        }

        let envelope: serde_json::Value = serde_json::from_slice(&payload).map_err(|_| BtcError::MalformedMessage)?;
        let json_command = envelope
            .get("type")
            .and_then(|v| v.as_str())
            .ok_or(BtcError::MalformedMessage)?;
        if json_command != command {
            warn!(command, json_command, "rejecting frame with mismatched command");
            return Err(BtcError::ProtocolViolation);
        }
        let inner_payload = envelope.get("payload").cloned().unwrap_or(serde_json::Value::Null);

        let message = Message::from_command_and_payload(&command, inner_payload).inspect_err(|e| {
            debug!(command, error = %e, "rejecting malformed message payload");
        })?;
        message.check_limits().inspect_err(|e| {
            debug!(command, error = %e, "rejecting message exceeding item limits");
        })?;
        Ok(message)
    }
}

fn checksum_of(payload: &[u8]) -> [u8; 4] {
    let digest = Hash::double_sha256(payload);
    let bytes = digest.as_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3]]
}

fn command_bytes(name: &str) -> [u8; 12] {
    let mut buf = [0u8; 12];
    let bytes = name.as_bytes();
    let n = bytes.len().min(12);
    buf[..n].copy_from_slice(&bytes[..n]);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_message_round_trips_through_the_wire_format() {
        let message = Message::Ping(PingPayload { nonce: 42 });
        let mut buf = Vec::new();
        message.send_async(&mut buf).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let received = Message::receive_async(&mut cursor).await.unwrap();
        match received {
            Message::Ping(p) => assert_eq!(p.nonce, 42),
            other => panic!("expected Ping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_inv_is_rejected_before_sending() {
        let items = vec![
            InvItem {
                kind: InvKind::Tx,
                hash: Hash::zero()
            };
            crate::MAX_INV_ITEMS + 1
        ];
        let message = Message::Inv(InvPayload { items });
        let mut buf = Vec::new();
        assert_eq!(message.send_async(&mut buf).await, Err(BtcError::OversizedMessage));
    }

    #[tokio::test]
    async fn a_corrupted_checksum_is_rejected() {
        let message = Message::GetAddr;
        let mut buf = Vec::new();
        message.send_async(&mut buf).await.unwrap();
        let last = buf.len() - 1;
        buf[last] ^= 0xFF; // flip a payload bit without touching the checksum

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(
            Message::receive_async(&mut cursor).await,
            Err(BtcError::MalformedMessage)
        );
    }
}
