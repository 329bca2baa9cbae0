//! Persistence boundary for the mesh engine.
//!
//! The engine treats durable storage as an external collaborator offering
//! simple key/record save-and-load operations, last-write-wins, no
//! transactions. This crate defines those traits, the records that cross
//! them, the derived conversation index, and an in-memory backend for
//! dev/tests. A host app plugs in its own backend per platform.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod conversation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use meshchat_wire::MeshMessage;

pub use backend::mem::MemoryStore;
pub use conversation::{Conversation, ConversationIndex};

/// Storage errors
#[derive(Error, Debug)]
pub enum StoreError {
    /// I/O error from a durable backend
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Record not found
    #[error("record not found")]
    NotFound,
    /// Backend-specific error
    #[error("backend error: {0}")]
    Backend(String),
}

/// One persisted chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    /// The message itself
    pub message: MeshMessage,
    /// Conversation peer this record files under
    pub peer: Uuid,
    /// Whether this device originated the message
    pub outgoing: bool,
}

/// Persisted metadata for one known device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable device id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Last known link address
    pub address: String,
    /// When the device was last heard from, Unix seconds
    pub last_seen: u64,
}

/// Durable message storage
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message record
    async fn save_message(&self, record: &StoredMessage) -> Result<(), StoreError>;

    /// Load a peer's conversation, ordered by message timestamp
    async fn load_conversation(&self, peer: Uuid) -> Result<Vec<StoredMessage>, StoreError>;
}

/// Durable device-metadata storage
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Persist one device record, replacing any previous one
    async fn save_device(&self, record: &DeviceRecord) -> Result<(), StoreError>;

    /// Load every persisted device record
    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StoreError>;
}
