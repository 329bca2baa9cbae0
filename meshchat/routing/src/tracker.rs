//! Delivery status tracking.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use meshchat_wire::DeliveryStatus;

/// How long terminal records are retained before cleanup
const RETENTION: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
struct DeliveryRecord {
    status: DeliveryStatus,
    updated_at: Instant,
}

/// Per-message delivery state machine.
///
/// Transitions move strictly forward: pending, sent, then delivered (on a
/// matching ack) or failed (no links at send time). A delivered message is
/// never reverted; a late ack may still upgrade a failed one, since the ack
/// proves the message got through.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    records: DashMap<Uuid, DeliveryRecord>,
}

fn rank(status: DeliveryStatus) -> u8 {
    match status {
        DeliveryStatus::Pending => 0,
        DeliveryStatus::Sent => 1,
        DeliveryStatus::Failed => 2,
        DeliveryStatus::Delivered => 3,
    }
}

impl DeliveryTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin tracking a message as pending
    pub fn track(&self, id: Uuid) {
        self.records.insert(
            id,
            DeliveryRecord {
                status: DeliveryStatus::Pending,
                updated_at: Instant::now(),
            },
        );
    }

    /// Record the hand-off to the connection manager
    pub fn mark_sent(&self, id: Uuid) -> bool {
        self.advance(id, DeliveryStatus::Sent)
    }

    /// Record a matching ack
    pub fn mark_delivered(&self, id: Uuid) -> bool {
        self.advance(id, DeliveryStatus::Delivered)
    }

    /// Record exhaustion: no live links at send time
    pub fn mark_failed(&self, id: Uuid) -> bool {
        self.advance(id, DeliveryStatus::Failed)
    }

    /// Current status for a tracked message
    pub fn status(&self, id: Uuid) -> Option<DeliveryStatus> {
        self.records.get(&id).map(|r| r.status)
    }

    /// Number of tracked messages
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop terminal records older than the retention window
    pub fn cleanup(&self) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| {
            let terminal = matches!(
                record.status,
                DeliveryStatus::Delivered | DeliveryStatus::Failed
            );
            !(terminal && record.updated_at.elapsed() > RETENTION)
        });
        before - self.records.len()
    }

    fn advance(&self, id: Uuid, to: DeliveryStatus) -> bool {
        match self.records.get_mut(&id) {
            Some(mut record) => {
                if rank(to) <= rank(record.status) {
                    return false;
                }
                record.status = to;
                record.updated_at = Instant::now();
                true
            }
            None => {
                // An ack for a message we merely relayed, or one evicted
                // long ago; nothing to update.
                debug!("status update for untracked message {}", id);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let tracker = DeliveryTracker::new();
        let id = Uuid::new_v4();

        tracker.track(id);
        assert_eq!(tracker.status(id), Some(DeliveryStatus::Pending));

        assert!(tracker.mark_sent(id));
        assert_eq!(tracker.status(id), Some(DeliveryStatus::Sent));

        assert!(tracker.mark_delivered(id));
        assert_eq!(tracker.status(id), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_transitions_are_forward_only() {
        let tracker = DeliveryTracker::new();
        let id = Uuid::new_v4();

        tracker.track(id);
        tracker.mark_sent(id);
        tracker.mark_delivered(id);

        // Nothing moves a delivered message backwards
        assert!(!tracker.mark_sent(id));
        assert!(!tracker.mark_failed(id));
        assert_eq!(tracker.status(id), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_duplicate_ack_is_ignored() {
        let tracker = DeliveryTracker::new();
        let id = Uuid::new_v4();
        tracker.track(id);
        tracker.mark_sent(id);

        assert!(tracker.mark_delivered(id));
        assert!(!tracker.mark_delivered(id));
    }

    #[test]
    fn test_late_ack_upgrades_failed() {
        let tracker = DeliveryTracker::new();
        let id = Uuid::new_v4();
        tracker.track(id);
        tracker.mark_failed(id);

        assert!(tracker.mark_delivered(id));
        assert_eq!(tracker.status(id), Some(DeliveryStatus::Delivered));
    }

    #[test]
    fn test_untracked_ack_is_a_noop() {
        let tracker = DeliveryTracker::new();
        assert!(!tracker.mark_delivered(Uuid::new_v4()));
        assert!(tracker.is_empty());
    }
}
