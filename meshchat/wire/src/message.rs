//! Mesh message model.
//!
//! Defines the message exchanged between peers, its type and delivery-status
//! enums, and the protocol constants that bound the variable-length fields.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default hop budget assigned to locally originated messages
pub const DEFAULT_TTL: u8 = 5;

/// Maximum sender-name length in bytes (1-byte length prefix)
pub const MAX_NAME_LEN: usize = u8::MAX as usize;

/// Maximum content length in bytes (2-byte length prefix)
pub const MAX_CONTENT_LEN: usize = u16::MAX as usize;

/// Age after which a message (and its dedup entry) is considered expired
pub const MESSAGE_EXPIRY_SECS: u64 = 24 * 60 * 60;

/// Message types as defined in the wire protocol
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    /// User-visible chat text
    Text = 0,
    /// Presence/identity announcement, no chat entry
    Discovery = 1,
    /// Best-effort delivery acknowledgment; content carries the acked id
    Ack = 2,
    /// Request for a path to the device named in the content
    RouteRequest = 3,
    /// Directed answer to a route request
    RouteReply = 4,
}

impl TryFrom<u16> for MessageType {
    type Error = crate::WireError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(MessageType::Text),
            1 => Ok(MessageType::Discovery),
            2 => Ok(MessageType::Ack),
            3 => Ok(MessageType::RouteRequest),
            4 => Ok(MessageType::RouteReply),
            _ => Err(crate::WireError::InvalidMessageType(value)),
        }
    }
}

/// Receiver-local delivery status; never placed on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Created, not yet handed to a link
    #[default]
    Pending,
    /// Handed to the connection manager for transmission
    Sent,
    /// A matching ack came back
    Delivered,
    /// Retry budget exhausted or no links at send time
    Failed,
}

/// One mesh message.
///
/// Identity is the message id alone; two messages with equal ids compare
/// equal regardless of content, matching the relay behavior (a forwarded
/// copy keeps the originator's id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshMessage {
    /// Unique message id, assigned once by the originator
    pub id: Uuid,
    /// Originating device id
    pub sender: Uuid,
    /// Originator display name (UTF-8, at most [`MAX_NAME_LEN`] bytes)
    pub sender_name: String,
    /// Target device, or `None` for broadcast
    pub recipient: Option<Uuid>,
    /// Text content (UTF-8, at most [`MAX_CONTENT_LEN`] bytes)
    pub content: String,
    /// Message type
    pub kind: MessageType,
    /// Creation time, Unix seconds
    pub timestamp: u32,
    /// Remaining hop budget; decremented per relay, never incremented
    pub ttl: u8,
    /// Monotonic per-sender sequence number; dedup key with the sender id
    pub sequence: u32,
    /// Device ids already traversed, in order, each at most once
    pub route_path: Vec<Uuid>,
    /// Local delivery status (excluded from the wire form)
    pub status: DeliveryStatus,
}

impl PartialEq for MeshMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for MeshMessage {}

impl std::hash::Hash for MeshMessage {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl MeshMessage {
    /// Create a message with a fresh id and default hop budget.
    ///
    /// Sequence number and route path are left for the routing engine to
    /// assign when the message is originated.
    pub fn new(
        kind: MessageType,
        sender: Uuid,
        sender_name: impl Into<String>,
        recipient: Option<Uuid>,
        content: impl Into<String>,
        timestamp: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            sender_name: sender_name.into(),
            recipient,
            content: content.into(),
            kind,
            timestamp,
            ttl: DEFAULT_TTL,
            sequence: 0,
            route_path: Vec::new(),
            status: DeliveryStatus::Pending,
        }
    }

    /// Whether this message is addressed to every reachable device
    pub fn is_broadcast(&self) -> bool {
        self.recipient.is_none()
    }

    /// Whether this message is addressed to the given device
    pub fn is_addressed_to(&self, device: Uuid) -> bool {
        self.recipient == Some(device)
    }

    /// Relays traversed so far (0 for a message straight off the originator)
    pub fn hop_count(&self) -> usize {
        self.route_path.len().saturating_sub(1)
    }

    /// Copy with a replaced delivery status
    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }

    /// Copy with a replaced hop budget
    pub fn with_ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversion() {
        assert_eq!(MessageType::try_from(0).unwrap(), MessageType::Text);
        assert_eq!(MessageType::try_from(4).unwrap(), MessageType::RouteReply);
        assert!(MessageType::try_from(5).is_err());
        assert!(MessageType::try_from(u16::MAX).is_err());
    }

    #[test]
    fn test_identity_is_id_only() {
        let sender = Uuid::new_v4();
        let a = MeshMessage::new(MessageType::Text, sender, "alice", None, "hi", 100);
        let mut b = a.clone();
        b.content = "completely different".to_string();
        b.ttl = 1;
        assert_eq!(a, b);

        let c = MeshMessage::new(MessageType::Text, sender, "alice", None, "hi", 100);
        assert_ne!(a, c);
    }

    #[test]
    fn test_hop_count() {
        let mut msg = MeshMessage::new(MessageType::Text, Uuid::new_v4(), "a", None, "x", 0);
        assert_eq!(msg.hop_count(), 0);
        msg.route_path = vec![Uuid::new_v4()];
        assert_eq!(msg.hop_count(), 0);
        msg.route_path.push(Uuid::new_v4());
        msg.route_path.push(Uuid::new_v4());
        assert_eq!(msg.hop_count(), 2);
    }
}
