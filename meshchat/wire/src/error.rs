//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than a declared field claims
    #[error("truncated input")]
    Truncated,

    /// Message type index out of the known range
    #[error("invalid message type {0}")]
    InvalidMessageType(u16),

    /// Non-UTF-8 text field or unparseable route-path id
    #[error("malformed field")]
    Malformed,

    /// Sender name exceeds the 1-byte length prefix
    #[error("sender name too long: {0} bytes")]
    NameTooLong(usize),

    /// Content exceeds the 2-byte length prefix
    #[error("content too long: {0} bytes")]
    ContentTooLong(usize),

    /// Payload too large to chunk
    #[error("payload too large: {0} bytes")]
    Oversize(usize),

    /// Chunk out of sequence or envelope disagreement
    #[error("chunk sequence mismatch")]
    ChunkMismatch,
}
