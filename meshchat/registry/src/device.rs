//! Device node value type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One discovered peer.
///
/// Values stored in the registry are immutable; updates replace the record
/// via the copy-with-overrides constructors so readers holding a snapshot
/// never observe partial mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceNode {
    /// Stable device id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Link address used to open a radio connection
    pub address: String,
    /// Most recent signal-strength sample, dBm
    pub rssi: i16,
    /// When the device was last heard from
    pub last_seen: DateTime<Utc>,
    /// Whether a live link to this device exists
    pub connected: bool,
    /// Relays between us and the device; 0 = direct radio neighbor
    pub hop_count: u8,
}

impl DeviceNode {
    /// Create a node for a first discovery
    pub fn new(id: Uuid, name: impl Into<String>, address: impl Into<String>, rssi: i16) -> Self {
        Self {
            id,
            name: name.into(),
            address: address.into(),
            rssi,
            last_seen: Utc::now(),
            connected: false,
            hop_count: 0,
        }
    }

    /// Copy with refreshed discovery data (signal, name, address, last-seen)
    pub fn rediscovered(
        &self,
        name: impl Into<String>,
        address: impl Into<String>,
        rssi: i16,
    ) -> Self {
        Self {
            name: name.into(),
            address: address.into(),
            rssi,
            last_seen: Utc::now(),
            ..self.clone()
        }
    }

    /// Copy with a replaced connection flag
    pub fn with_connected(&self, connected: bool) -> Self {
        Self {
            connected,
            last_seen: if connected { Utc::now() } else { self.last_seen },
            ..self.clone()
        }
    }

    /// Copy with a replaced hop count
    pub fn with_hop_count(&self, hop_count: u8) -> Self {
        Self {
            hop_count,
            last_seen: Utc::now(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rediscovery_keeps_identity() {
        let id = Uuid::new_v4();
        let node = DeviceNode::new(id, "phone", "aa:bb", -60);
        let updated = node.rediscovered("phone", "aa:bb", -48);

        assert_eq!(updated.id, id);
        assert_eq!(updated.rssi, -48);
        assert!(updated.last_seen >= node.last_seen);
        assert!(!updated.connected);
    }

    #[test]
    fn test_connected_override() {
        let node = DeviceNode::new(Uuid::new_v4(), "tab", "cc:dd", -70);
        let connected = node.with_connected(true);
        assert!(connected.connected);
        assert_eq!(connected.rssi, node.rssi);
    }
}
