//! Derived per-peer conversation index.
//!
//! Conversations are not independently persisted: the message list is the
//! authoritative source of last-message, preview, and grouping. The index
//! folds stored records into per-peer views and tracks unread counts.

use std::collections::HashMap;

use uuid::Uuid;

use crate::StoredMessage;

/// One peer's conversation view
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    /// Peer device id
    pub peer: Uuid,
    /// Peer display name, from the most recent inbound message
    pub peer_name: String,
    /// Records in arrival order
    pub messages: Vec<StoredMessage>,
    /// Timestamp of the newest message, Unix seconds
    pub last_activity: u32,
    /// Inbound messages not yet marked read
    pub unread: u32,
}

impl Conversation {
    /// The newest record, if any
    pub fn last_message(&self) -> Option<&StoredMessage> {
        self.messages.last()
    }

    /// Short text preview of the newest message
    pub fn preview(&self) -> &str {
        self.last_message()
            .map(|r| r.message.content.as_str())
            .unwrap_or("")
    }
}

/// Index of every conversation, keyed by peer id
#[derive(Debug, Default)]
pub struct ConversationIndex {
    conversations: HashMap<Uuid, Conversation>,
}

impl ConversationIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one stored record into its peer's conversation.
    ///
    /// Inbound records bump the unread count and refresh the peer name;
    /// outgoing ones do neither.
    pub fn apply(&mut self, record: StoredMessage) {
        let conversation = self
            .conversations
            .entry(record.peer)
            .or_insert_with(|| Conversation {
                peer: record.peer,
                ..Conversation::default()
            });

        if !record.outgoing {
            conversation.peer_name = record.message.sender_name.clone();
            conversation.unread += 1;
        }
        conversation.last_activity = conversation
            .last_activity
            .max(record.message.timestamp);
        conversation.messages.push(record);
    }

    /// Clear the unread count for a peer
    pub fn mark_read(&mut self, peer: Uuid) {
        if let Some(conversation) = self.conversations.get_mut(&peer) {
            conversation.unread = 0;
        }
    }

    /// One peer's conversation
    pub fn get(&self, peer: Uuid) -> Option<&Conversation> {
        self.conversations.get(&peer)
    }

    /// Every conversation, most recently active first
    pub fn ordered(&self) -> Vec<&Conversation> {
        let mut all: Vec<&Conversation> = self.conversations.values().collect();
        all.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        all
    }

    /// Number of conversations
    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    /// Whether no conversation exists yet
    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}
