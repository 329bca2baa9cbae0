//! Radio transport capability traits.
//!
//! The engine never talks to a host radio stack directly. Each target
//! platform implements [`RadioTransport`] (advertising, discovery, dialing)
//! and [`RadioLink`] (one open connection: characteristic negotiation,
//! MTU-bounded writes, notification subscription). The mesh service is one
//! logical service with three characteristics: outbound-write, inbound-notify
//! and a read-only device-info identity exchange.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::LinkError;

/// Service UUID advertised by every mesh peer
pub const MESH_SERVICE_UUID: Uuid = Uuid::from_u128(0x6d65_7368_6368_6174_2d73_6572_7669_6365);

/// Characteristic peers write outbound chunks to
pub const WRITE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6d65_7368_6368_6174_2d77_7269_7465_0001);

/// Characteristic inbound chunks are notified on
pub const NOTIFY_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6d65_7368_6368_6174_2d6e_6f74_6966_0002);

/// Read-only identity-exchange characteristic
pub const DEVICE_INFO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x6d65_7368_6368_6174_2d69_6e66_6f00_0003);

/// The advertised mesh service and its characteristics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Mesh service UUID
    pub service: Uuid,
    /// Outbound-write characteristic UUID
    pub write_characteristic: Uuid,
    /// Inbound-notify characteristic UUID
    pub notify_characteristic: Uuid,
    /// Device-info characteristic UUID
    pub device_info_characteristic: Uuid,
}

impl Default for ServiceDescriptor {
    fn default() -> Self {
        Self {
            service: MESH_SERVICE_UUID,
            write_characteristic: WRITE_CHARACTERISTIC_UUID,
            notify_characteristic: NOTIFY_CHARACTERISTIC_UUID,
            device_info_characteristic: DEVICE_INFO_CHARACTERISTIC_UUID,
        }
    }
}

/// Identity read from a peer's device-info characteristic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Stable device id
    pub id: Uuid,
    /// Display name
    pub name: String,
}

/// One discovery tick for a nearby advertising device
#[derive(Debug, Clone)]
pub struct Discovery {
    /// Stable device id
    pub id: Uuid,
    /// Display name
    pub name: String,
    /// Link address to dial
    pub address: String,
    /// Signal-strength sample, dBm
    pub rssi: i16,
}

/// A peer-initiated link handed up by the transport
pub struct IncomingLink {
    /// The dialing peer's identity
    pub info: DeviceInfo,
    /// The dialing peer's link address
    pub address: String,
    /// The open link
    pub link: Box<dyn RadioLink>,
}

/// Platform radio capability: advertising, discovery, dialing.
///
/// Implementations live outside the engine, one per host platform. All
/// methods may suspend; cancellation of a scan must release the underlying
/// radio resources deterministically.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Begin advertising the mesh service
    async fn start_advertising(&self, service: &ServiceDescriptor) -> Result<(), LinkError>;

    /// Stop advertising; idempotent
    async fn stop_advertising(&self) -> Result<(), LinkError>;

    /// Begin passive discovery, yielding a tick per sighted device
    async fn start_scan(&self) -> Result<mpsc::Receiver<Discovery>, LinkError>;

    /// Stop discovery; idempotent
    async fn stop_scan(&self) -> Result<(), LinkError>;

    /// Open a link to the device at the given address
    async fn connect(&self, address: &str) -> Result<Box<dyn RadioLink>, LinkError>;

    /// Stream of peer-initiated links
    async fn incoming(&self) -> Result<mpsc::Receiver<IncomingLink>, LinkError>;
}

/// One open radio connection.
///
/// Writes are bounded by the negotiated MTU and confirmed by the link layer;
/// the chunking above this trait guarantees no write exceeds it.
#[async_trait]
pub trait RadioLink: Send {
    /// Discover the mesh service and its characteristics on the peer and
    /// read its identity.
    ///
    /// Fails with [`LinkError::ServiceNotFound`] or
    /// [`LinkError::CharacteristicNotFound`] when the peer does not expose
    /// the expected service shape.
    async fn negotiate(&mut self, service: &ServiceDescriptor) -> Result<DeviceInfo, LinkError>;

    /// Write one MTU-bounded chunk, awaiting link confirmation
    async fn write(&mut self, chunk: Bytes) -> Result<(), LinkError>;

    /// Subscribe to inbound notifications; may be called once per link
    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Bytes>, LinkError>;

    /// Tear the link down; idempotent
    async fn close(&mut self) -> Result<(), LinkError>;
}
