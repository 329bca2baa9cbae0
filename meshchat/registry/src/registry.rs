//! Guarded registry of discovered devices.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::device::DeviceNode;

/// Default silence threshold before a device counts as stale
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(5 * 60);

/// Registry of every device ever discovered.
///
/// One record per device id: rediscovery updates signal and last-seen in
/// place, never creating a duplicate. Stale devices are flagged, not
/// deleted. Connection flags are written only in response to connection
/// manager events.
#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<Uuid, DeviceNode>>,
    stale_after: Duration,
}

impl DeviceRegistry {
    /// Create a registry with the default stale threshold
    pub fn new() -> Self {
        Self::with_stale_after(DEFAULT_STALE_AFTER)
    }

    /// Create a registry with a custom stale threshold
    pub fn with_stale_after(stale_after: Duration) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            stale_after,
        }
    }

    /// Record a discovery tick for a device.
    ///
    /// Creates the node on first sight; afterwards replaces the record with
    /// a refreshed copy. Returns the stored node.
    pub async fn upsert_discovered(
        &self,
        id: Uuid,
        name: &str,
        address: &str,
        rssi: i16,
    ) -> DeviceNode {
        let mut devices = self.devices.write().await;
        let node = match devices.get(&id) {
            Some(existing) => existing.rediscovered(name, address, rssi),
            None => {
                debug!("Discovered new device {} ({})", id, name);
                DeviceNode::new(id, name, address, rssi)
            }
        };
        devices.insert(id, node.clone());
        node
    }

    /// Flip the connection flag for a device.
    ///
    /// No-op for unknown ids: a connection event for a device that was never
    /// discovered has nothing to update.
    pub async fn set_connected(&self, id: Uuid, connected: bool) {
        let mut devices = self.devices.write().await;
        let updated = devices.get(&id).map(|existing| existing.with_connected(connected));
        if let Some(node) = updated {
            devices.insert(id, node);
        }
    }

    /// Update the hop distance observed for a device
    pub async fn set_hop_count(&self, id: Uuid, hop_count: u8) {
        let mut devices = self.devices.write().await;
        let updated = devices.get(&id).map(|existing| existing.with_hop_count(hop_count));
        if let Some(node) = updated {
            devices.insert(id, node);
        }
    }

    /// Look up a single device
    pub async fn get(&self, id: Uuid) -> Option<DeviceNode> {
        self.devices.read().await.get(&id).cloned()
    }

    /// Cloned snapshot of every known device
    pub async fn snapshot(&self) -> Vec<DeviceNode> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Number of devices currently flagged connected
    pub async fn connected_count(&self) -> usize {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.connected)
            .count()
    }

    /// Whether a device has been silent past the stale threshold
    pub async fn is_stale(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.devices.read().await.get(&id) {
            Some(node) => self.node_is_stale(node, now),
            None => false,
        }
    }

    /// Ids of every stale device. Stale devices stay in the registry.
    pub async fn sweep_stale(&self, now: DateTime<Utc>) -> Vec<Uuid> {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| self.node_is_stale(d, now))
            .map(|d| d.id)
            .collect()
    }

    fn node_is_stale(&self, node: &DeviceNode, now: DateTime<Utc>) -> bool {
        if node.connected {
            return false;
        }
        let age = now.signed_duration_since(node.last_seen);
        age.to_std()
            .map(|age| age > self.stale_after)
            .unwrap_or(false)
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rediscovery_never_duplicates() {
        let registry = DeviceRegistry::new();
        let id = Uuid::new_v4();

        registry.upsert_discovered(id, "phone", "aa:bb", -70).await;
        registry.upsert_discovered(id, "phone", "aa:bb", -55).await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].rssi, -55);
    }

    #[tokio::test]
    async fn test_connection_flag_round_trip() {
        let registry = DeviceRegistry::new();
        let id = Uuid::new_v4();
        registry.upsert_discovered(id, "tab", "cc:dd", -60).await;

        registry.set_connected(id, true).await;
        assert!(registry.get(id).await.unwrap().connected);
        assert_eq!(registry.connected_count().await, 1);

        registry.set_connected(id, false).await;
        assert!(!registry.get(id).await.unwrap().connected);
        assert_eq!(registry.connected_count().await, 0);
    }

    #[tokio::test]
    async fn test_set_connected_unknown_device_is_noop() {
        let registry = DeviceRegistry::new();
        registry.set_connected(Uuid::new_v4(), true).await;
        assert!(registry.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_detection_flags_but_keeps() {
        let registry = DeviceRegistry::with_stale_after(Duration::from_secs(60));
        let id = Uuid::new_v4();
        registry.upsert_discovered(id, "old", "ee:ff", -80).await;

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(registry.is_stale(id, later).await);
        assert_eq!(registry.sweep_stale(later).await, vec![id]);
        // Stale devices are never deleted
        assert!(registry.get(id).await.is_some());
    }

    #[tokio::test]
    async fn test_connected_devices_are_never_stale() {
        let registry = DeviceRegistry::with_stale_after(Duration::from_secs(60));
        let id = Uuid::new_v4();
        registry.upsert_discovered(id, "live", "11:22", -50).await;
        registry.set_connected(id, true).await;

        let later = Utc::now() + chrono::Duration::seconds(600);
        assert!(!registry.is_stale(id, later).await);
    }
}
