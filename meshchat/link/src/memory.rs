//! In-memory radio transport for tests and the demo binary.
//!
//! A [`MemoryRadioHub`] stands in for the shared radio medium: endpoints
//! register on it, advertise, discover each other on a scan tick, and open
//! bidirectional links made of channel pairs. Writes are bounded by the
//! hub's MTU the way a real link layer bounds them. Dev/tests only.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::LinkError;
use crate::transport::{
    DeviceInfo, Discovery, IncomingLink, RadioLink, RadioTransport, ServiceDescriptor,
};

/// Discovery tick period for in-memory scans
const SCAN_TICK: Duration = Duration::from_millis(25);

/// Default signal strength reported for in-memory endpoints
const DEFAULT_RSSI: i16 = -50;

struct Endpoint {
    info: DeviceInfo,
    service: ServiceDescriptor,
    advertising: bool,
    rssi: i16,
    incoming_tx: Option<mpsc::Sender<IncomingLink>>,
}

#[derive(Default)]
struct HubState {
    endpoints: HashMap<String, Endpoint>,
}

/// Shared in-memory radio medium
#[derive(Clone)]
pub struct MemoryRadioHub {
    state: Arc<Mutex<HubState>>,
    mtu: usize,
}

impl MemoryRadioHub {
    /// Create a hub enforcing the default MTU per write
    pub fn new() -> Self {
        Self::with_mtu(meshchat_wire::DEFAULT_MTU)
    }

    /// Create a hub enforcing a custom MTU per write
    pub fn with_mtu(mtu: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState::default())),
            mtu,
        }
    }

    /// Register an endpoint advertising the default mesh service shape
    pub async fn endpoint(
        &self,
        id: Uuid,
        name: impl Into<String>,
        address: impl Into<String>,
    ) -> MemoryTransport {
        self.endpoint_with_service(id, name, address, ServiceDescriptor::default())
            .await
    }

    /// Register an endpoint with a custom service shape (negotiation tests)
    pub async fn endpoint_with_service(
        &self,
        id: Uuid,
        name: impl Into<String>,
        address: impl Into<String>,
        service: ServiceDescriptor,
    ) -> MemoryTransport {
        let info = DeviceInfo {
            id,
            name: name.into(),
        };
        let address = address.into();

        let endpoint = Endpoint {
            info: info.clone(),
            service,
            advertising: false,
            rssi: DEFAULT_RSSI,
            incoming_tx: None,
        };
        self.state
            .lock()
            .await
            .endpoints
            .insert(address.clone(), endpoint);

        MemoryTransport {
            state: self.state.clone(),
            info,
            address,
            mtu: self.mtu,
            scan_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Override the signal strength reported for an endpoint
    pub async fn set_rssi(&self, address: &str, rssi: i16) {
        if let Some(endpoint) = self.state.lock().await.endpoints.get_mut(address) {
            endpoint.rssi = rssi;
        }
    }
}

/// One endpoint's view of the in-memory radio medium
pub struct MemoryTransport {
    state: Arc<Mutex<HubState>>,
    info: DeviceInfo,
    address: String,
    mtu: usize,
    scan_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[async_trait]
impl RadioTransport for MemoryTransport {
    async fn start_advertising(&self, service: &ServiceDescriptor) -> Result<(), LinkError> {
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .get_mut(&self.address)
            .ok_or_else(|| LinkError::Unsupported("endpoint unregistered".into()))?;
        endpoint.advertising = true;
        endpoint.service = service.clone();
        Ok(())
    }

    async fn stop_advertising(&self) -> Result<(), LinkError> {
        if let Some(endpoint) = self.state.lock().await.endpoints.get_mut(&self.address) {
            endpoint.advertising = false;
        }
        Ok(())
    }

    async fn start_scan(&self) -> Result<mpsc::Receiver<Discovery>, LinkError> {
        let (tx, rx) = mpsc::channel(32);
        let state = self.state.clone();
        let own_address = self.address.clone();

        let mut guard = self.scan_task.lock().await;
        if let Some(task) = guard.take() {
            task.abort();
        }
        *guard = Some(tokio::spawn(async move {
            let mut tick = tokio::time::interval(SCAN_TICK);
            loop {
                tick.tick().await;
                let sightings: Vec<Discovery> = {
                    let state = state.lock().await;
                    state
                        .endpoints
                        .iter()
                        .filter(|(address, e)| **address != own_address && e.advertising)
                        .map(|(address, e)| Discovery {
                            id: e.info.id,
                            name: e.info.name.clone(),
                            address: address.clone(),
                            rssi: e.rssi,
                        })
                        .collect()
                };
                for sighting in sightings {
                    if tx.send(sighting).await.is_err() {
                        return;
                    }
                }
            }
        }));

        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<(), LinkError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(&self, address: &str) -> Result<Box<dyn RadioLink>, LinkError> {
        let (peer_info, peer_service, peer_incoming, own_service) = {
            let state = self.state.lock().await;
            let target = state
                .endpoints
                .get(address)
                .filter(|e| e.advertising)
                .ok_or_else(|| LinkError::ConnectFailed(format!("{address} not reachable")))?;
            let own = state
                .endpoints
                .get(&self.address)
                .ok_or_else(|| LinkError::Unsupported("endpoint unregistered".into()))?;
            (
                target.info.clone(),
                target.service.clone(),
                target.incoming_tx.clone(),
                own.service.clone(),
            )
        };

        let peer_incoming = peer_incoming
            .ok_or_else(|| LinkError::ConnectFailed(format!("{address} not accepting links")))?;

        let (to_peer_tx, to_peer_rx) = mpsc::channel(64);
        let (from_peer_tx, from_peer_rx) = mpsc::channel(64);

        let dialer_side = MemoryLink {
            peer: peer_info,
            peer_service,
            tx: Some(to_peer_tx),
            rx: Some(from_peer_rx),
            mtu: self.mtu,
        };
        let acceptor_side = MemoryLink {
            peer: self.info.clone(),
            peer_service: own_service,
            tx: Some(from_peer_tx),
            rx: Some(to_peer_rx),
            mtu: self.mtu,
        };

        peer_incoming
            .send(IncomingLink {
                info: self.info.clone(),
                address: self.address.clone(),
                link: Box::new(acceptor_side),
            })
            .await
            .map_err(|_| LinkError::ConnectFailed(format!("{address} stopped accepting")))?;

        Ok(Box::new(dialer_side))
    }

    async fn incoming(&self) -> Result<mpsc::Receiver<IncomingLink>, LinkError> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.state.lock().await;
        let endpoint = state
            .endpoints
            .get_mut(&self.address)
            .ok_or_else(|| LinkError::Unsupported("endpoint unregistered".into()))?;
        endpoint.incoming_tx = Some(tx);
        Ok(rx)
    }
}

/// One side of an in-memory link: a channel pair plus the peer's identity
pub struct MemoryLink {
    peer: DeviceInfo,
    peer_service: ServiceDescriptor,
    tx: Option<mpsc::Sender<Bytes>>,
    rx: Option<mpsc::Receiver<Bytes>>,
    mtu: usize,
}

#[async_trait]
impl RadioLink for MemoryLink {
    async fn negotiate(&mut self, service: &ServiceDescriptor) -> Result<DeviceInfo, LinkError> {
        if self.peer_service.service != service.service {
            return Err(LinkError::ServiceNotFound);
        }
        if self.peer_service.write_characteristic != service.write_characteristic
            || self.peer_service.notify_characteristic != service.notify_characteristic
            || self.peer_service.device_info_characteristic != service.device_info_characteristic
        {
            return Err(LinkError::CharacteristicNotFound);
        }
        Ok(self.peer.clone())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), LinkError> {
        if chunk.len() > self.mtu {
            return Err(LinkError::SendFailed(format!(
                "chunk of {} bytes exceeds mtu {}",
                chunk.len(),
                self.mtu
            )));
        }
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| LinkError::SendFailed("link closed".into()))?;
        tx.send(chunk)
            .await
            .map_err(|_| LinkError::SendFailed("peer dropped the link".into()))
    }

    async fn subscribe(&mut self) -> Result<mpsc::Receiver<Bytes>, LinkError> {
        self.rx
            .take()
            .ok_or_else(|| LinkError::Unsupported("already subscribed".into()))
    }

    async fn close(&mut self) -> Result<(), LinkError> {
        self.tx.take();
        self.rx.take();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dial_and_exchange() {
        let hub = MemoryRadioHub::new();
        let alice = hub.endpoint(Uuid::new_v4(), "alice", "mem-a").await;
        let bob_id = Uuid::new_v4();
        let bob = hub.endpoint(bob_id, "bob", "mem-b").await;

        bob.start_advertising(&ServiceDescriptor::default())
            .await
            .unwrap();
        let mut bob_incoming = bob.incoming().await.unwrap();

        let mut link = alice.connect("mem-b").await.unwrap();
        let info = link.negotiate(&ServiceDescriptor::default()).await.unwrap();
        assert_eq!(info.id, bob_id);

        let accepted = bob_incoming.recv().await.unwrap();
        assert_eq!(accepted.info.name, "alice");
        let mut bob_link = accepted.link;
        let mut bob_rx = bob_link.subscribe().await.unwrap();

        link.write(Bytes::from_static(b"over the air"))
            .await
            .unwrap();
        assert_eq!(bob_rx.recv().await.unwrap().as_ref(), b"over the air");
    }

    #[tokio::test]
    async fn test_connect_requires_advertising() {
        let hub = MemoryRadioHub::new();
        let alice = hub.endpoint(Uuid::new_v4(), "alice", "mem-a").await;
        let _bob = hub.endpoint(Uuid::new_v4(), "bob", "mem-b").await;

        assert!(matches!(
            alice.connect("mem-b").await.unwrap_err(),
            LinkError::ConnectFailed(_)
        ));
    }

    #[tokio::test]
    async fn test_mtu_enforced_per_write() {
        let hub = MemoryRadioHub::with_mtu(16);
        let alice = hub.endpoint(Uuid::new_v4(), "alice", "mem-a").await;
        let bob = hub.endpoint(Uuid::new_v4(), "bob", "mem-b").await;
        bob.start_advertising(&ServiceDescriptor::default())
            .await
            .unwrap();
        let _bob_incoming = bob.incoming().await.unwrap();

        let mut link = alice.connect("mem-b").await.unwrap();
        assert!(matches!(
            link.write(Bytes::from(vec![0u8; 17])).await.unwrap_err(),
            LinkError::SendFailed(_)
        ));
        link.write(Bytes::from(vec![0u8; 16])).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_sees_advertising_peers_only() {
        let hub = MemoryRadioHub::new();
        let alice = hub.endpoint(Uuid::new_v4(), "alice", "mem-a").await;
        let bob_id = Uuid::new_v4();
        let bob = hub.endpoint(bob_id, "bob", "mem-b").await;
        let _carol = hub.endpoint(Uuid::new_v4(), "carol", "mem-c").await;

        bob.start_advertising(&ServiceDescriptor::default())
            .await
            .unwrap();

        let mut sightings = alice.start_scan().await.unwrap();
        let seen = sightings.recv().await.unwrap();
        assert_eq!(seen.id, bob_id);
        alice.stop_scan().await.unwrap();
    }
}
