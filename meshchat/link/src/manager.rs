//! Connection manager: the live radio-link pool.
//!
//! Owns every open link, enforces the platform connection cap, drives
//! connect/negotiate/disconnect lifecycles, and runs one task per link for
//! chunked sends and notification receives. All pool mutation happens under
//! a single write lock; the cap check and slot reservation are one atomic
//! step so concurrent connect calls can never exceed the cap.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use meshchat_registry::DeviceRegistry;
use meshchat_wire::{Chunker, Reassembler, DEFAULT_MTU};

use crate::error::LinkError;
use crate::transport::{IncomingLink, RadioLink, RadioTransport, ServiceDescriptor};

/// Connection manager configuration.
///
/// The connection cap is a runtime input: host radio stacks allow different
/// numbers of simultaneous links (7 on one platform family, 15 on another).
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Maximum simultaneous live links
    pub max_connections: usize,
    /// Negotiated maximum bytes per radio write
    pub mtu: usize,
    /// Pacing delay between chunks of one payload
    pub chunk_delay: Duration,
    /// Window a connect attempt may take before counting as failed
    pub connect_timeout: Duration,
    /// The mesh service shape to advertise and negotiate
    pub service: ServiceDescriptor,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_connections: 7,
            mtu: DEFAULT_MTU,
            chunk_delay: Duration::from_millis(10),
            connect_timeout: Duration::from_secs(10),
            service: ServiceDescriptor::default(),
        }
    }
}

/// Per-link lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Seen in a scan, no link
    Discovered,
    /// Slot reserved, negotiation in flight
    Connecting,
    /// Live link with an owning task
    Connected,
    /// Teardown in progress
    Disconnecting,
    /// Terminal; the slot is back in the pool
    Disconnected,
}

/// Why a link left the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A caller asked for the disconnect
    Requested,
    /// The peer or the radio stack dropped the link
    LinkLost,
}

/// State-change and data events raised by the connection manager
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A discovery tick updated the registry; snapshot attached
    DiscoveryUpdate {
        /// Every known device after the update
        devices: Vec<meshchat_registry::DeviceNode>,
    },
    /// A link reached the pool
    Connected {
        /// Peer device id
        device: Uuid,
    },
    /// A link left the pool
    Disconnected {
        /// Peer device id
        device: Uuid,
        /// Requested teardown or unsolicited drop
        reason: DisconnectReason,
    },
    /// A complete reassembled payload arrived on a link
    Inbound {
        /// Peer device id the payload arrived from
        device: Uuid,
        /// Reassembled payload, ready for the codec
        payload: Bytes,
    },
}

#[derive(Debug, Default)]
struct LinkStats {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    payloads_in: AtomicU64,
    payloads_out: AtomicU64,
}

/// Point-in-time copy of one link's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStatsSnapshot {
    /// Total chunk bytes received
    pub bytes_in: u64,
    /// Total chunk bytes written
    pub bytes_out: u64,
    /// Complete payloads received
    pub payloads_in: u64,
    /// Complete payloads sent
    pub payloads_out: u64,
}

struct LinkEntry {
    state: LinkState,
    outbound_tx: Option<mpsc::UnboundedSender<Bytes>>,
    task: Option<JoinHandle<()>>,
    stats: Arc<LinkStats>,
}

impl LinkEntry {
    fn connecting() -> Self {
        Self {
            state: LinkState::Connecting,
            outbound_tx: None,
            task: None,
            stats: Arc::new(LinkStats::default()),
        }
    }

    fn is_live(&self) -> bool {
        matches!(self.state, LinkState::Connecting | LinkState::Connected)
    }
}

type Pool = Arc<RwLock<HashMap<Uuid, LinkEntry>>>;

/// Cheap clones handed to spawned link and accept tasks
#[derive(Clone)]
struct LinkContext {
    pool: Pool,
    registry: Arc<DeviceRegistry>,
    event_tx: mpsc::Sender<LinkEvent>,
    mtu: usize,
    chunk_delay: Duration,
    service: ServiceDescriptor,
    max_connections: usize,
}

/// Owner of the live radio-link pool
pub struct ConnectionManager {
    config: LinkConfig,
    ctx: LinkContext,
    transport: RwLock<Option<Arc<dyn RadioTransport>>>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Create a manager over the given registry and event channel.
    ///
    /// No radio capability is held yet; every operation except
    /// [`initialize`](Self::initialize) fails with
    /// [`LinkError::NotInitialized`] until one is attached.
    pub fn new(
        config: LinkConfig,
        registry: Arc<DeviceRegistry>,
        event_tx: mpsc::Sender<LinkEvent>,
    ) -> Self {
        let ctx = LinkContext {
            pool: Arc::new(RwLock::new(HashMap::new())),
            registry,
            event_tx,
            mtu: config.mtu,
            chunk_delay: config.chunk_delay,
            service: config.service.clone(),
            max_connections: config.max_connections,
        };
        Self {
            config,
            ctx,
            transport: RwLock::new(None),
            scan_task: Mutex::new(None),
            accept_task: Mutex::new(None),
        }
    }

    /// Acquire the radio capability: start advertising the mesh service and
    /// begin accepting peer-initiated links.
    pub async fn initialize(&self, transport: Arc<dyn RadioTransport>) -> Result<(), LinkError> {
        transport.start_advertising(&self.config.service).await?;
        let mut incoming = transport.incoming().await?;

        *self.transport.write().await = Some(transport);

        let ctx = self.ctx.clone();
        let mut guard = self.accept_task.lock().await;
        if let Some(previous) = guard.take() {
            previous.abort();
        }
        *guard = Some(tokio::spawn(async move {
            while let Some(link) = incoming.recv().await {
                accept_incoming(link, &ctx).await;
            }
        }));

        info!("Radio transport initialized, advertising mesh service");
        Ok(())
    }

    /// Begin passive discovery.
    ///
    /// Each discovery tick upserts the registry and emits the updated
    /// snapshot as a [`LinkEvent::DiscoveryUpdate`]. A scan in progress does
    /// not block connect attempts.
    pub async fn start_scanning(&self) -> Result<(), LinkError> {
        let transport = self.transport().await?;

        let mut guard = self.scan_task.lock().await;
        if guard.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return Err(LinkError::AlreadyScanning);
        }

        let mut ticks = transport.start_scan().await?;
        let registry = self.ctx.registry.clone();
        let event_tx = self.ctx.event_tx.clone();

        *guard = Some(tokio::spawn(async move {
            while let Some(tick) = ticks.recv().await {
                registry
                    .upsert_discovered(tick.id, &tick.name, &tick.address, tick.rssi)
                    .await;
                let devices = registry.snapshot().await;
                if event_tx
                    .send(LinkEvent::DiscoveryUpdate { devices })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }));

        debug!("Scan started");
        Ok(())
    }

    /// Stop passive discovery; idempotent.
    pub async fn stop_scanning(&self) -> Result<(), LinkError> {
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        if let Ok(transport) = self.transport().await {
            if let Err(e) = transport.stop_scan().await {
                debug!("stop_scan on transport failed: {}", e);
            }
        }
        Ok(())
    }

    /// Whether a scan task is currently active
    pub async fn is_scanning(&self) -> bool {
        self.scan_task
            .lock()
            .await
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }

    /// Open a link to a discovered device.
    ///
    /// No-op when a live link already exists. The cap check and the slot
    /// reservation happen under one pool write lock, so concurrent calls
    /// cannot exceed the configured maximum. Any failure after reservation
    /// rolls the entry fully back to disconnected.
    pub async fn connect(&self, device: Uuid) -> Result<(), LinkError> {
        let node = self
            .ctx
            .registry
            .get(device)
            .await
            .ok_or(LinkError::DeviceUnknown(device))?;
        let transport = self.transport().await?;

        {
            let mut pool = self.ctx.pool.write().await;
            if pool.get(&device).map(LinkEntry::is_live).unwrap_or(false) {
                return Ok(());
            }
            let live = pool.values().filter(|e| e.is_live()).count();
            if live >= self.config.max_connections {
                return Err(LinkError::ConnectionLimitReached(
                    self.config.max_connections,
                ));
            }
            pool.insert(device, LinkEntry::connecting());
        }

        let service = self.config.service.clone();
        let attempt = tokio::time::timeout(self.config.connect_timeout, async {
            let mut link = transport.connect(&node.address).await?;
            match link.negotiate(&service).await {
                Ok(info) => match link.subscribe().await {
                    Ok(inbound) => Ok((link, info, inbound)),
                    Err(e) => {
                        teardown(&mut link, device).await;
                        Err(e)
                    }
                },
                Err(e) => {
                    teardown(&mut link, device).await;
                    Err(e)
                }
            }
        })
        .await;

        let (link, info, inbound) = match attempt {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                self.rollback_connecting(device).await;
                return Err(e);
            }
            Err(_) => {
                self.rollback_connecting(device).await;
                return Err(LinkError::Timeout);
            }
        };

        if info.id != device {
            debug!(
                "device-info identity {} differs from discovered id {}",
                info.id, device
            );
        }

        if !install_link(&self.ctx, device, link, inbound).await {
            // Disconnected while the attempt was in flight
            return Err(LinkError::NotConnected(device));
        }
        Ok(())
    }

    /// Tear down the link to a device; idempotent.
    ///
    /// The pool entry and the registry's connection flag are always cleared,
    /// even when the underlying teardown call fails (the link task logs and
    /// swallows that failure).
    pub async fn disconnect(&self, device: Uuid) {
        let entry = {
            let mut pool = self.ctx.pool.write().await;
            if let Some(entry) = pool.get_mut(&device) {
                entry.state = LinkState::Disconnecting;
            }
            pool.remove(&device)
        };

        let had_link = entry.is_some();
        if let Some(mut entry) = entry {
            // Dropping the sender winds the link task down; it closes the
            // radio link on exit.
            entry.outbound_tx.take();
            entry.task.take();
        }

        self.ctx.registry.set_connected(device, false).await;
        if had_link {
            let _ = self
                .ctx
                .event_tx
                .send(LinkEvent::Disconnected {
                    device,
                    reason: DisconnectReason::Requested,
                })
                .await;
        }
    }

    /// Tear down every link in the pool
    pub async fn disconnect_all(&self) {
        let devices: Vec<Uuid> = self.ctx.pool.read().await.keys().copied().collect();
        for device in devices {
            self.disconnect(device).await;
        }
    }

    /// Queue a payload for transmission on the link to a device.
    ///
    /// The owning link task splits it into MTU-bounded chunks and writes
    /// them in order with the configured pacing delay. Payloads queued on
    /// one link are sent serially, preserving order.
    pub async fn send(&self, device: Uuid, payload: Bytes) -> Result<(), LinkError> {
        let pool = self.ctx.pool.read().await;
        let entry = pool
            .get(&device)
            .filter(|e| e.state == LinkState::Connected)
            .ok_or(LinkError::NotConnected(device))?;
        let tx = entry
            .outbound_tx
            .as_ref()
            .ok_or(LinkError::NotConnected(device))?;
        tx.send(payload)
            .map_err(|_| LinkError::NotConnected(device))?;
        Ok(())
    }

    /// Queue a payload on every connected link except the excluded one.
    ///
    /// Individual link failures are skipped, not escalated. Returns the
    /// number of links the payload was handed to.
    pub async fn broadcast_except(&self, exclude: Option<Uuid>, payload: &Bytes) -> usize {
        let pool = self.ctx.pool.read().await;
        let mut handed = 0;
        for (device, entry) in pool.iter() {
            if Some(*device) == exclude || entry.state != LinkState::Connected {
                continue;
            }
            if let Some(tx) = entry.outbound_tx.as_ref() {
                if tx.send(payload.clone()).is_ok() {
                    handed += 1;
                }
            }
        }
        handed
    }

    /// Devices with a live connected link
    pub async fn connected_devices(&self) -> Vec<Uuid> {
        self.ctx
            .pool
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.state == LinkState::Connected)
            .map(|(id, _)| *id)
            .collect()
    }

    /// Current lifecycle state for a device's link, if any pool entry exists
    pub async fn link_state(&self, device: Uuid) -> Option<LinkState> {
        self.ctx.pool.read().await.get(&device).map(|e| e.state)
    }

    /// Number of live (connecting or connected) pool entries
    pub async fn live_count(&self) -> usize {
        self.ctx
            .pool
            .read()
            .await
            .values()
            .filter(|e| e.is_live())
            .count()
    }

    /// Traffic counters for a device's link
    pub async fn link_stats(&self, device: Uuid) -> Option<LinkStatsSnapshot> {
        self.ctx.pool.read().await.get(&device).map(|e| {
            LinkStatsSnapshot {
                bytes_in: e.stats.bytes_in.load(Ordering::Relaxed),
                bytes_out: e.stats.bytes_out.load(Ordering::Relaxed),
                payloads_in: e.stats.payloads_in.load(Ordering::Relaxed),
                payloads_out: e.stats.payloads_out.load(Ordering::Relaxed),
            }
        })
    }

    /// Stop scanning, drop every link, and release the radio capability
    pub async fn shutdown(&self) {
        let _ = self.stop_scanning().await;
        self.disconnect_all().await;
        if let Some(task) = self.accept_task.lock().await.take() {
            task.abort();
        }
        if let Some(transport) = self.transport.write().await.take() {
            if let Err(e) = transport.stop_advertising().await {
                debug!("stop_advertising failed: {}", e);
            }
        }
    }

    async fn transport(&self) -> Result<Arc<dyn RadioTransport>, LinkError> {
        self.transport
            .read()
            .await
            .clone()
            .ok_or(LinkError::NotInitialized)
    }

    async fn rollback_connecting(&self, device: Uuid) {
        self.ctx.pool.write().await.remove(&device);
        self.ctx.registry.set_connected(device, false).await;
    }
}

async fn teardown(link: &mut Box<dyn RadioLink>, device: Uuid) {
    if let Err(e) = link.close().await {
        debug!("teardown of link to {} failed: {}", device, e);
    }
}

/// Promote a reserved pool entry to connected and spawn its owning task.
///
/// Returns false when the reservation disappeared while the connect attempt
/// was in flight (a concurrent disconnect); the link is closed instead.
async fn install_link(
    ctx: &LinkContext,
    device: Uuid,
    mut link: Box<dyn RadioLink>,
    inbound: mpsc::Receiver<Bytes>,
) -> bool {
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let stats = Arc::new(LinkStats::default());

    {
        let mut pool = ctx.pool.write().await;
        match pool.get(&device) {
            Some(entry) if entry.state == LinkState::Connecting => {}
            _ => {
                drop(pool);
                teardown(&mut link, device).await;
                return false;
            }
        }
        pool.insert(
            device,
            LinkEntry {
                state: LinkState::Connected,
                outbound_tx: Some(outbound_tx),
                task: None,
                stats: stats.clone(),
            },
        );
    }

    let task = tokio::spawn(run_link(
        ctx.clone(),
        device,
        link,
        outbound_rx,
        inbound,
        stats,
    ));
    if let Some(entry) = ctx.pool.write().await.get_mut(&device) {
        entry.task = Some(task);
    }

    ctx.registry.set_connected(device, true).await;
    let _ = ctx.event_tx.send(LinkEvent::Connected { device }).await;
    info!("Link to {} established", device);
    true
}

/// Handle a peer-initiated link: reserve a slot, negotiate, install.
async fn accept_incoming(incoming: IncomingLink, ctx: &LinkContext) {
    let IncomingLink {
        info,
        address,
        mut link,
    } = incoming;

    if ctx.registry.get(info.id).await.is_none() {
        ctx.registry
            .upsert_discovered(info.id, &info.name, &address, 0)
            .await;
    }

    {
        let mut pool = ctx.pool.write().await;
        if pool.get(&info.id).map(LinkEntry::is_live).unwrap_or(false) {
            debug!("dropping duplicate incoming link from {}", info.id);
            drop(pool);
            teardown(&mut link, info.id).await;
            return;
        }
        let live = pool.values().filter(|e| e.is_live()).count();
        if live >= ctx.max_connections {
            warn!(
                "rejecting incoming link from {}: connection limit reached ({})",
                info.id, ctx.max_connections
            );
            drop(pool);
            teardown(&mut link, info.id).await;
            return;
        }
        pool.insert(info.id, LinkEntry::connecting());
    }

    let inbound = match link.negotiate(&ctx.service).await {
        Ok(_) => match link.subscribe().await {
            Ok(rx) => rx,
            Err(e) => {
                warn!("incoming link from {} failed to subscribe: {}", info.id, e);
                teardown(&mut link, info.id).await;
                ctx.pool.write().await.remove(&info.id);
                return;
            }
        },
        Err(e) => {
            warn!("incoming link from {} failed negotiation: {}", info.id, e);
            teardown(&mut link, info.id).await;
            ctx.pool.write().await.remove(&info.id);
            return;
        }
    };

    install_link(ctx, info.id, link, inbound).await;
}

/// Per-link task: serial chunked sends, notification receives, teardown.
async fn run_link(
    ctx: LinkContext,
    device: Uuid,
    mut link: Box<dyn RadioLink>,
    mut outbound_rx: mpsc::UnboundedReceiver<Bytes>,
    mut inbound_rx: mpsc::Receiver<Bytes>,
    stats: Arc<LinkStats>,
) {
    let chunker = Chunker::new(ctx.mtu);
    let mut reassembler = Reassembler::new();

    let lost = loop {
        tokio::select! {
            maybe_payload = outbound_rx.recv() => match maybe_payload {
                Some(payload) => {
                    if !send_payload(&mut link, &chunker, &payload, device, ctx.chunk_delay, &stats).await {
                        break true;
                    }
                }
                // Sender dropped: caller-requested disconnect
                None => break false,
            },
            maybe_chunk = inbound_rx.recv() => match maybe_chunk {
                Some(chunk) => {
                    stats.bytes_in.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                    match reassembler.push(&chunk) {
                        Ok(Some(payload)) => {
                            stats.payloads_in.fetch_add(1, Ordering::Relaxed);
                            let _ = ctx.event_tx.send(LinkEvent::Inbound { device, payload }).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            // Protocol error: the payload is lost, the link stays up
                            warn!("dropping garbled payload from {}: {}", device, e);
                        }
                    }
                }
                // Notify stream ended: peer or radio stack dropped the link
                None => break true,
            },
        }
    };

    teardown(&mut link, device).await;

    if lost {
        let removed = ctx.pool.write().await.remove(&device).is_some();
        if removed {
            ctx.registry.set_connected(device, false).await;
            let _ = ctx
                .event_tx
                .send(LinkEvent::Disconnected {
                    device,
                    reason: DisconnectReason::LinkLost,
                })
                .await;
            info!("Link to {} lost", device);
        }
    }
}

/// Write one payload as paced chunks. Returns false when the link is dead.
async fn send_payload(
    link: &mut Box<dyn RadioLink>,
    chunker: &Chunker,
    payload: &Bytes,
    device: Uuid,
    chunk_delay: Duration,
    stats: &LinkStats,
) -> bool {
    let chunks = match chunker.split(payload) {
        Ok(chunks) => chunks,
        Err(e) => {
            warn!("cannot chunk payload for {}: {}", device, e);
            return true;
        }
    };

    let total = chunks.len();
    for (i, chunk) in chunks.into_iter().enumerate() {
        let len = chunk.len() as u64;
        if let Err(e) = link.write(chunk).await {
            warn!("send to {} failed on chunk {}/{}: {}", device, i + 1, total, e);
            return false;
        }
        stats.bytes_out.fetch_add(len, Ordering::Relaxed);
        if i + 1 < total {
            tokio::time::sleep(chunk_delay).await;
        }
    }
    stats.payloads_out.fetch_add(1, Ordering::Relaxed);
    true
}
