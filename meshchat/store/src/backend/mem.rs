//! In-memory storage backend (dev/tests only).

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{DeviceRecord, DeviceStore, MessageStore, StoreError, StoredMessage};

/// Volatile backend keeping everything in guarded maps
#[derive(Debug, Default)]
pub struct MemoryStore {
    messages: RwLock<HashMap<Uuid, Vec<StoredMessage>>>,
    devices: RwLock<HashMap<Uuid, DeviceRecord>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted messages across all conversations
    pub async fn message_count(&self) -> usize {
        self.messages.read().await.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn save_message(&self, record: &StoredMessage) -> Result<(), StoreError> {
        self.messages
            .write()
            .await
            .entry(record.peer)
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn load_conversation(&self, peer: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        let mut records = self
            .messages
            .read()
            .await
            .get(&peer)
            .cloned()
            .unwrap_or_default();
        records.sort_by_key(|r| r.message.timestamp);
        Ok(records)
    }
}

#[async_trait]
impl DeviceStore for MemoryStore {
    async fn save_device(&self, record: &DeviceRecord) -> Result<(), StoreError> {
        self.devices
            .write()
            .await
            .insert(record.id, record.clone());
        Ok(())
    }

    async fn load_devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        Ok(self.devices.read().await.values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_wire::{MeshMessage, MessageType};

    fn record(peer: Uuid, timestamp: u32, outgoing: bool) -> StoredMessage {
        let msg = MeshMessage::new(
            MessageType::Text,
            if outgoing { Uuid::new_v4() } else { peer },
            "someone",
            None,
            "text",
            timestamp,
        );
        StoredMessage {
            message: msg,
            peer,
            outgoing,
        }
    }

    #[tokio::test]
    async fn test_conversation_ordering() {
        let store = MemoryStore::new();
        let peer = Uuid::new_v4();

        store.save_message(&record(peer, 30, false)).await.unwrap();
        store.save_message(&record(peer, 10, true)).await.unwrap();
        store.save_message(&record(peer, 20, false)).await.unwrap();

        let loaded = store.load_conversation(peer).await.unwrap();
        let stamps: Vec<u32> = loaded.iter().map(|r| r.message.timestamp).collect();
        assert_eq!(stamps, vec![10, 20, 30]);
    }

    #[tokio::test]
    async fn test_conversations_are_isolated_by_peer() {
        let store = MemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        store.save_message(&record(a, 1, false)).await.unwrap();
        store.save_message(&record(b, 2, false)).await.unwrap();

        assert_eq!(store.load_conversation(a).await.unwrap().len(), 1);
        assert_eq!(store.load_conversation(b).await.unwrap().len(), 1);
        assert_eq!(store.message_count().await, 2);
    }

    #[tokio::test]
    async fn test_device_record_last_write_wins() {
        let store = MemoryStore::new();
        let id = Uuid::new_v4();
        let mut rec = DeviceRecord {
            id,
            name: "old".into(),
            address: "aa".into(),
            last_seen: 5,
        };
        store.save_device(&rec).await.unwrap();
        rec.name = "new".into();
        store.save_device(&rec).await.unwrap();

        let devices = store.load_devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "new");
    }
}
