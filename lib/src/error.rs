use thiserror::Error;

/// Errors kinds named by the validation, mempool and P2P layers. None of
/// these are recovered internally — they're surfaced to whoever produced the
/// bad input (a peer, for scoring; a local caller, as a plain `Result`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BtcError {
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("outpoint does not reference a known UTXO")]
    UnknownOutpoint,
    #[error("outpoint is already reserved or spent")]
    DoubleSpend,
    #[error("sum of outputs exceeds sum of referenced inputs")]
    InsufficientInputValue,
    #[error("output amount must be strictly positive")]
    NegativeOrZeroOutput,
    #[error("merkle root does not match block transactions")]
    BadMerkleRoot,
    #[error("header hash does not meet the required difficulty")]
    PoWFailure,
    #[error("timestamp is not strictly increasing or exceeds allowed drift")]
    TimestampOutOfRange,
    #[error("block exceeds the maximum serialized size")]
    BlockTooLarge,
    #[error("transaction chain_id does not match the network")]
    ChainIdMismatch,
    #[error("transaction locktime has not yet been reached")]
    LocktimeNotReached,
    #[error("fee rate is below the minimum accepted by the mempool")]
    FeeBelowMin,
    #[error("mempool is full and no sufficient eviction set exists")]
    MempoolFull,
    #[error("transaction is already in the mempool")]
    DuplicateTransaction,
    #[error("message could not be parsed")]
    MalformedMessage,
    #[error("message exceeds the maximum frame size")]
    OversizedMessage,
    #[error("peer exceeded the message rate limit")]
    RateLimited,
    #[error("peer violated the wire protocol")]
    ProtocolViolation,
    #[error("peer is currently banned")]
    PeerBanned,
    #[error("peer did not complete the handshake in time")]
    HandshakeTimeout,
    #[error("peer read timed out")]
    ReadTimeout,
    #[error("peer is disconnected")]
    Disconnected,

    // Local/IO failures that don't map to a single protocol-level kind but
    // still need to flow through the same `Result` plumbing.
    #[error("{0}")]
    Other(String),
}

impl BtcError {
    pub fn other<S: Into<String>>(reason: S) -> Self {
        BtcError::Other(reason.into())
    }

    /// True for errors that are local to the offending tx/block and must
    /// never be allowed to crash the node.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            BtcError::InvalidSignature
                | BtcError::UnknownOutpoint
                | BtcError::DoubleSpend
                | BtcError::InsufficientInputValue
                | BtcError::NegativeOrZeroOutput
                | BtcError::BadMerkleRoot
                | BtcError::PoWFailure
                | BtcError::TimestampOutOfRange
                | BtcError::BlockTooLarge
                | BtcError::ChainIdMismatch
                | BtcError::LocktimeNotReached
                | BtcError::FeeBelowMin
                | BtcError::MempoolFull
        )
    }
}

pub type Result<T> = std::result::Result<T, BtcError>;
