//! Flood-routing and deduplication engine.
//!
//! Dedup keys on (sender id, sequence number), not the message id: a
//! forwarded copy keeps the originator's id, so the pair identifies one
//! logical message instance across every relayed copy. Seen entries age out
//! on the same 24-hour horizon as the messages themselves to bound memory.

use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::debug;
use uuid::Uuid;

use meshchat_wire::{MeshMessage, MessageType, MESSAGE_EXPIRY_SECS};

/// Why the engine refused a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The (sender, sequence) pair was already seen
    Duplicate,
    /// Our own id is already on the route path
    RoutingLoop,
    /// Hop budget exhausted with nothing to deliver locally
    TtlExpired,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Duplicate => write!(f, "duplicate"),
            DropReason::RoutingLoop => write!(f, "routing loop"),
            DropReason::TtlExpired => write!(f, "ttl expired"),
        }
    }
}

/// Outcome of routing one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    /// The message was accepted; either half may be empty
    Accept {
        /// Copy to surface locally, hop budget already decremented
        deliver: Option<MeshMessage>,
        /// Copy to re-encode and flood to every link but the arrival one
        forward: Option<MeshMessage>,
    },
    /// The message was refused; a no-op, not an error
    Drop(DropReason),
}

/// Counters over the engine's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RoutingStats {
    /// Messages originated locally
    pub originated: u64,
    /// Inbound messages surfaced locally
    pub delivered: u64,
    /// Inbound messages queued for forwarding
    pub forwarded: u64,
    /// Inbound duplicates refused
    pub dropped_duplicate: u64,
    /// Inbound loops refused
    pub dropped_loop: u64,
    /// Inbound messages that ran out of hop budget
    pub dropped_expired: u64,
}

/// The flood-routing state machine for one local device.
///
/// Owned by the node's pump task; nothing else touches the seen-message set.
pub struct RoutingEngine {
    local_id: Uuid,
    local_name: String,
    next_sequence: u32,
    seen: HashMap<(Uuid, u32), Instant>,
    expiry: Duration,
    stats: RoutingStats,
}

impl RoutingEngine {
    /// Create an engine for the given local identity
    pub fn new(local_id: Uuid, local_name: impl Into<String>) -> Self {
        Self {
            local_id,
            local_name: local_name.into(),
            next_sequence: 0,
            seen: HashMap::new(),
            expiry: Duration::from_secs(MESSAGE_EXPIRY_SECS),
            stats: RoutingStats::default(),
        }
    }

    /// The local device id
    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Lifetime counters
    pub fn stats(&self) -> RoutingStats {
        self.stats
    }

    /// Originate a message from this device.
    ///
    /// Assigns the next sequence number, seeds the route path with our own
    /// id, and records the dedup key so the copy flooding back to us later
    /// is refused.
    pub fn originate(
        &mut self,
        kind: MessageType,
        recipient: Option<Uuid>,
        content: impl Into<String>,
    ) -> MeshMessage {
        let mut msg = MeshMessage::new(
            kind,
            self.local_id,
            self.local_name.clone(),
            recipient,
            content,
            unix_now(),
        );
        msg.sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        msg.route_path = vec![self.local_id];

        self.seen.insert((msg.sender, msg.sequence), Instant::now());
        self.stats.originated += 1;
        msg
    }

    /// Route one message received off a link.
    ///
    /// Duplicates and loops are refused silently; the hop budget is
    /// decremented exactly once here; a message addressed to us is always
    /// surfaced and never forwarded, regardless of remaining budget.
    pub fn handle_inbound(&mut self, mut msg: MeshMessage) -> RoutingDecision {
        let key = (msg.sender, msg.sequence);
        if self.seen.contains_key(&key) {
            self.stats.dropped_duplicate += 1;
            return RoutingDecision::Drop(DropReason::Duplicate);
        }
        self.seen.insert(key, Instant::now());

        if msg.route_path.contains(&self.local_id) {
            self.stats.dropped_loop += 1;
            debug!("loop detected for message {} from {}", msg.id, msg.sender);
            return RoutingDecision::Drop(DropReason::RoutingLoop);
        }

        msg.ttl = msg.ttl.saturating_sub(1);

        if msg.is_addressed_to(self.local_id) {
            self.stats.delivered += 1;
            return RoutingDecision::Accept {
                deliver: Some(msg),
                forward: None,
            };
        }

        let deliver = if msg.is_broadcast() {
            self.stats.delivered += 1;
            Some(msg.clone())
        } else {
            None
        };

        let forward = if msg.ttl > 0 {
            let mut fwd = msg;
            fwd.route_path.push(self.local_id);
            self.stats.forwarded += 1;
            Some(fwd)
        } else {
            None
        };

        if deliver.is_none() && forward.is_none() {
            self.stats.dropped_expired += 1;
            return RoutingDecision::Drop(DropReason::TtlExpired);
        }

        RoutingDecision::Accept { deliver, forward }
    }

    /// Evict dedup entries past the expiry horizon; returns how many left
    pub fn evict_expired(&mut self) -> usize {
        let expiry = self.expiry;
        let before = self.seen.len();
        self.seen.retain(|_, first_seen| first_seen.elapsed() < expiry);
        before - self.seen.len()
    }

    /// Number of live dedup entries
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    #[cfg(test)]
    fn set_expiry(&mut self, expiry: Duration) {
        self.expiry = expiry;
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshchat_wire::DEFAULT_TTL;

    fn inbound(sender: Uuid, sequence: u32, ttl: u8, recipient: Option<Uuid>) -> MeshMessage {
        let mut msg = MeshMessage::new(
            MessageType::Text,
            sender,
            "remote",
            recipient,
            "payload",
            1_700_000_000,
        );
        msg.sequence = sequence;
        msg.ttl = ttl;
        msg.route_path = vec![sender];
        msg
    }

    #[test]
    fn test_originate_assigns_monotonic_sequences() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let a = engine.originate(MessageType::Text, None, "one");
        let b = engine.originate(MessageType::Text, None, "two");
        assert_eq!(b.sequence, a.sequence + 1);
        assert_eq!(a.route_path, vec![engine.local_id()]);
        assert_eq!(a.ttl, DEFAULT_TTL);
    }

    #[test]
    fn test_duplicate_is_refused_once_seen() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let sender = Uuid::new_v4();

        let first = engine.handle_inbound(inbound(sender, 9, 3, None));
        assert!(matches!(first, RoutingDecision::Accept { .. }));

        let second = engine.handle_inbound(inbound(sender, 9, 3, None));
        assert_eq!(second, RoutingDecision::Drop(DropReason::Duplicate));
        assert_eq!(engine.stats().dropped_duplicate, 1);
    }

    #[test]
    fn test_dedup_keys_do_not_wrap_at_256() {
        // Sequence numbers are a full u32; 1 and 257 are distinct keys
        // (the reference design's single wire byte would conflate them).
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let sender = Uuid::new_v4();

        assert!(matches!(
            engine.handle_inbound(inbound(sender, 1, 3, None)),
            RoutingDecision::Accept { .. }
        ));
        assert!(matches!(
            engine.handle_inbound(inbound(sender, 257, 3, None)),
            RoutingDecision::Accept { .. }
        ));
    }

    #[test]
    fn test_own_flood_copy_is_refused() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let msg = engine.originate(MessageType::Text, None, "hello");
        // The broadcast comes back to us off a neighbor's relay
        assert_eq!(
            engine.handle_inbound(msg),
            RoutingDecision::Drop(DropReason::Duplicate)
        );
    }

    #[test]
    fn test_loop_dropped_despite_ttl() {
        let local = Uuid::new_v4();
        let mut engine = RoutingEngine::new(local, "local");
        let sender = Uuid::new_v4();

        let mut msg = inbound(sender, 4, 5, None);
        msg.route_path = vec![sender, local];
        assert_eq!(
            engine.handle_inbound(msg),
            RoutingDecision::Drop(DropReason::RoutingLoop)
        );
    }

    #[test]
    fn test_broadcast_delivers_and_forwards() {
        let local = Uuid::new_v4();
        let mut engine = RoutingEngine::new(local, "local");
        let sender = Uuid::new_v4();

        match engine.handle_inbound(inbound(sender, 0, 2, None)) {
            RoutingDecision::Accept { deliver, forward } => {
                let deliver = deliver.expect("broadcast surfaces locally");
                assert_eq!(deliver.ttl, 1);
                let forward = forward.expect("budget remains");
                assert_eq!(forward.ttl, 1);
                assert_eq!(forward.route_path, vec![sender, local]);
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_exhausted_ttl_delivers_but_never_forwards() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let sender = Uuid::new_v4();

        match engine.handle_inbound(inbound(sender, 0, 1, None)) {
            RoutingDecision::Accept { deliver, forward } => {
                assert!(deliver.is_some());
                assert!(forward.is_none());
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_ttl_zero_on_arrival_still_surfaces_direct_message() {
        let local = Uuid::new_v4();
        let mut engine = RoutingEngine::new(local, "local");
        let sender = Uuid::new_v4();

        match engine.handle_inbound(inbound(sender, 0, 0, Some(local))) {
            RoutingDecision::Accept { deliver, forward } => {
                assert!(deliver.is_some());
                assert!(forward.is_none());
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_directed_elsewhere_with_spent_budget_is_dropped() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        let decision = engine.handle_inbound(inbound(Uuid::new_v4(), 0, 1, Some(Uuid::new_v4())));
        assert_eq!(decision, RoutingDecision::Drop(DropReason::TtlExpired));
    }

    #[test]
    fn test_directed_elsewhere_forwards_without_local_delivery() {
        let local = Uuid::new_v4();
        let mut engine = RoutingEngine::new(local, "local");
        let sender = Uuid::new_v4();

        match engine.handle_inbound(inbound(sender, 0, 3, Some(Uuid::new_v4()))) {
            RoutingDecision::Accept { deliver, forward } => {
                assert!(deliver.is_none());
                let forward = forward.expect("relay expected");
                assert!(forward.route_path.contains(&local));
            }
            other => panic!("unexpected decision: {other:?}"),
        }
    }

    #[test]
    fn test_eviction_bounds_the_seen_set() {
        let mut engine = RoutingEngine::new(Uuid::new_v4(), "local");
        engine.set_expiry(Duration::from_millis(0));
        let sender = Uuid::new_v4();
        engine.handle_inbound(inbound(sender, 1, 3, None));
        engine.handle_inbound(inbound(sender, 2, 3, None));

        assert_eq!(engine.evict_expired(), 2);
        assert_eq!(engine.seen_len(), 0);

        // After eviction the same key is accepted again
        assert!(matches!(
            engine.handle_inbound(inbound(sender, 1, 3, None)),
            RoutingDecision::Accept { .. }
        ));
    }
}
