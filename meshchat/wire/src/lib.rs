//! Wire protocol encoding/decoding and chunking for the meshchat radio link.
//!
//! This crate provides the binary message format exchanged between mesh
//! peers, including the fixed-plus-variable message layout, deterministic
//! encoding/decoding, and chunking/reassembly for payloads that exceed the
//! negotiated link MTU. It is pure: no I/O, no clocks, no shared state.
//!
//! ## Wire Format
//!
//! All multi-byte integers are big-endian.
//!
//! ```text
//! +--------+------+----------------------------------------+
//! | offset | size | field                                  |
//! +--------+------+----------------------------------------+
//! | 0      | 16   | message id (raw UUID bytes)            |
//! | 16     | 2    | message type (enum index)              |
//! | 18     | 1    | ttl                                    |
//! | 19     | 4    | sequence number                        |
//! | 23     | 16   | sender id (raw UUID bytes)             |
//! | 39     | 16   | recipient id (all-zero = broadcast)    |
//! | 55     | 4    | timestamp, Unix seconds                |
//! | 59     | 2    | content byte length                    |
//! | 61     | 1    | sender-name byte length                |
//! | 62     | var  | sender name (UTF-8)                    |
//! | +N     | var  | content (UTF-8)                        |
//! | +M     | rest | route path, comma-joined UUID strings  |
//! +--------+------+----------------------------------------+
//! ```
//!
//! The route path has no length prefix and consumes the remainder of the
//! buffer, so exactly one logical message must be handed to [`decode`] per
//! reassembled payload. Delivery status is receiver-local and never placed
//! on the wire; [`decode`] always resets it to pending.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod codec;
pub mod error;
pub mod message;

pub use chunk::{ChunkEnvelope, Chunker, Reassembler, CHUNK_ENVELOPE_LEN, DEFAULT_MTU};
pub use codec::{decode, encode, HEADER_LEN};
pub use error::WireError;
pub use message::{
    DeliveryStatus, MeshMessage, MessageType, DEFAULT_TTL, MAX_CONTENT_LEN, MAX_NAME_LEN,
    MESSAGE_EXPIRY_SECS,
};
