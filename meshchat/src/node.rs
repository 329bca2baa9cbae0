//! The mesh node pump.
//!
//! One `tokio::select!` loop glues the components together: raw payloads
//! from the connection manager are decoded, routed, delivered or forwarded;
//! application commands originate messages; a housekeeping tick bounds the
//! dedup set, the tracker, and flags stale devices. Protocol errors drop
//! the offending message and nothing else: a single bad message or dead
//! link never halts scanning, other links, or subsequent sends.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use meshchat_link::{ConnectionManager, DisconnectReason, LinkConfig, LinkEvent};
use meshchat_registry::{DeviceNode, DeviceRegistry};
use meshchat_routing::{DeliveryTracker, RoutingDecision, RoutingEngine};
use meshchat_store::{
    Conversation, ConversationIndex, DeviceRecord, DeviceStore, MessageStore, StoredMessage,
};
use meshchat_wire::{codec, DeliveryStatus, MeshMessage, MessageType};

/// Housekeeping cadence: dedup eviction, tracker cleanup, stale sweep
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(30);

/// Events surfaced to the application layer
#[derive(Debug, Clone)]
pub enum MeshEvent {
    /// A chat message arrived for this device (directed or broadcast)
    MessageReceived {
        /// The delivered message
        message: MeshMessage,
    },
    /// A tracked outbound message changed delivery status
    MessageStatusChanged {
        /// Message id
        id: Uuid,
        /// New status
        status: DeliveryStatus,
    },
    /// The discovered-device set changed
    Discovery {
        /// Snapshot of every known device
        devices: Vec<DeviceNode>,
    },
    /// A link came up
    DeviceConnected {
        /// Peer device id
        device: Uuid,
    },
    /// A link went down
    DeviceDisconnected {
        /// Peer device id
        device: Uuid,
        /// Requested teardown or unsolicited drop
        reason: DisconnectReason,
    },
}

enum NodeCommand {
    SendText {
        recipient: Option<Uuid>,
        content: String,
        reply: oneshot::Sender<Uuid>,
    },
    MarkRead {
        peer: Uuid,
    },
    Conversations {
        reply: oneshot::Sender<Vec<Conversation>>,
    },
    RequestRoute {
        target: Uuid,
    },
    Shutdown,
}

/// Cloneable handle for driving a running [`MeshNode`]
#[derive(Clone)]
pub struct NodeHandle {
    cmd_tx: mpsc::Sender<NodeCommand>,
}

impl NodeHandle {
    /// Originate a text message; `None` recipient means broadcast.
    ///
    /// Returns the assigned message id for delivery tracking.
    pub async fn send_text(
        &self,
        recipient: Option<Uuid>,
        content: impl Into<String>,
    ) -> anyhow::Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(NodeCommand::SendText {
                recipient,
                content: content.into(),
                reply,
            })
            .await
            .context("node stopped")?;
        rx.await.context("node stopped before assigning an id")
    }

    /// Clear the unread count for a peer's conversation
    pub async fn mark_read(&self, peer: Uuid) -> anyhow::Result<()> {
        self.cmd_tx
            .send(NodeCommand::MarkRead { peer })
            .await
            .context("node stopped")
    }

    /// Snapshot of every conversation, most recently active first
    pub async fn conversations(&self) -> anyhow::Result<Vec<Conversation>> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(NodeCommand::Conversations { reply })
            .await
            .context("node stopped")?;
        rx.await.context("node stopped")
    }

    /// Flood a route request for a device; the reply updates its hop count
    pub async fn request_route(&self, target: Uuid) -> anyhow::Result<()> {
        self.cmd_tx
            .send(NodeCommand::RequestRoute { target })
            .await
            .context("node stopped")
    }

    /// Stop the pump and tear down every link
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.cmd_tx
            .send(NodeCommand::Shutdown)
            .await
            .context("node already stopped")
    }
}

/// The engine's event pump; owns the routing state.
pub struct MeshNode {
    local_id: Uuid,
    engine: RoutingEngine,
    manager: Arc<ConnectionManager>,
    registry: Arc<DeviceRegistry>,
    tracker: Arc<DeliveryTracker>,
    message_store: Arc<dyn MessageStore>,
    device_store: Arc<dyn DeviceStore>,
    conversations: ConversationIndex,
    link_events: mpsc::Receiver<LinkEvent>,
    commands: mpsc::Receiver<NodeCommand>,
    app_events: mpsc::Sender<MeshEvent>,
}

impl MeshNode {
    /// Assemble a node around the given identity and stores.
    ///
    /// Returns the node (drive it with [`run`](Self::run)), a command
    /// handle, and the bounded application event channel.
    pub fn new(
        local_id: Uuid,
        local_name: impl Into<String>,
        link_config: LinkConfig,
        message_store: Arc<dyn MessageStore>,
        device_store: Arc<dyn DeviceStore>,
    ) -> (Self, NodeHandle, mpsc::Receiver<MeshEvent>) {
        let registry = Arc::new(DeviceRegistry::new());
        let (link_tx, link_events) = mpsc::channel(128);
        let manager = Arc::new(ConnectionManager::new(
            link_config,
            registry.clone(),
            link_tx,
        ));
        let (cmd_tx, commands) = mpsc::channel(32);
        let (app_tx, app_rx) = mpsc::channel(128);

        let node = Self {
            local_id,
            engine: RoutingEngine::new(local_id, local_name),
            manager,
            registry,
            tracker: Arc::new(DeliveryTracker::new()),
            message_store,
            device_store,
            conversations: ConversationIndex::new(),
            link_events,
            commands,
            app_events: app_tx,
        };
        (node, NodeHandle { cmd_tx }, app_rx)
    }

    /// The connection manager, for host-driven scan/connect control
    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// The device registry
    pub fn registry(&self) -> Arc<DeviceRegistry> {
        self.registry.clone()
    }

    /// The delivery tracker
    pub fn tracker(&self) -> Arc<DeliveryTracker> {
        self.tracker.clone()
    }

    /// Drive the pump until shutdown
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("Mesh node {} running", self.local_id);
        let mut housekeeping = tokio::time::interval(HOUSEKEEPING_INTERVAL);
        housekeeping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(event) = self.link_events.recv() => {
                    self.handle_link_event(event).await;
                }

                Some(command) = self.commands.recv() => {
                    if !self.handle_command(command).await {
                        break;
                    }
                }

                _ = housekeeping.tick() => {
                    self.housekeeping().await;
                }

                else => break,
            }
        }

        // Stop accepting link events before teardown so disconnect events
        // raised during shutdown cannot block on a full channel.
        self.link_events.close();
        self.manager.shutdown().await;
        info!("Mesh node {} stopped", self.local_id);
        Ok(())
    }

    async fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::DiscoveryUpdate { devices } => {
                for device in &devices {
                    let record = DeviceRecord {
                        id: device.id,
                        name: device.name.clone(),
                        address: device.address.clone(),
                        last_seen: device.last_seen.timestamp().max(0) as u64,
                    };
                    if let Err(e) = self.device_store.save_device(&record).await {
                        warn!("failed to persist device {}: {}", device.id, e);
                    }
                }
                let _ = self.app_events.send(MeshEvent::Discovery { devices }).await;
            }

            LinkEvent::Connected { device } => {
                let _ = self
                    .app_events
                    .send(MeshEvent::DeviceConnected { device })
                    .await;
                // Announce ourselves through the new link so devices beyond
                // direct radio range learn our id and hop distance
                let announce = self.engine.originate(MessageType::Discovery, None, "");
                self.dispatch_outbound(&announce).await;
            }

            LinkEvent::Disconnected { device, reason } => {
                let _ = self
                    .app_events
                    .send(MeshEvent::DeviceDisconnected { device, reason })
                    .await;
            }

            LinkEvent::Inbound { device, payload } => match codec::decode(&payload) {
                Ok(message) => self.route_inbound(device, message).await,
                Err(e) => {
                    // Protocol error: drop the message, keep the link
                    warn!("undecodable payload from {}: {}", device, e);
                }
            },
        }
    }

    async fn route_inbound(&mut self, from_link: Uuid, message: MeshMessage) {
        match self.engine.handle_inbound(message) {
            RoutingDecision::Drop(reason) => {
                debug!("dropped inbound message from link {}: {}", from_link, reason);
            }
            RoutingDecision::Accept { deliver, forward } => {
                if let Some(fwd) = forward {
                    match codec::encode(&fwd) {
                        Ok(bytes) => {
                            let handed =
                                self.manager.broadcast_except(Some(from_link), &bytes).await;
                            debug!("relayed message {} to {} links", fwd.id, handed);
                        }
                        Err(e) => warn!("cannot re-encode message {}: {}", fwd.id, e),
                    }
                }
                if let Some(message) = deliver {
                    self.deliver_local(message).await;
                }
            }
        }
    }

    async fn deliver_local(&mut self, message: MeshMessage) {
        match message.kind {
            MessageType::Text => {
                let directed_here = message.is_addressed_to(self.local_id);
                let record = StoredMessage {
                    peer: message.sender,
                    outgoing: false,
                    message: message.clone(),
                };
                if let Err(e) = self.message_store.save_message(&record).await {
                    warn!("failed to persist message {}: {}", message.id, e);
                }
                self.conversations.apply(record);
                let _ = self
                    .app_events
                    .send(MeshEvent::MessageReceived {
                        message: message.clone(),
                    })
                    .await;

                if directed_here {
                    let ack = self.engine.originate(
                        MessageType::Ack,
                        Some(message.sender),
                        message.id.to_string(),
                    );
                    self.dispatch_outbound(&ack).await;
                }
            }

            MessageType::Ack => match message.content.parse::<Uuid>() {
                Ok(acked) => {
                    if self.tracker.mark_delivered(acked) {
                        let _ = self
                            .app_events
                            .send(MeshEvent::MessageStatusChanged {
                                id: acked,
                                status: DeliveryStatus::Delivered,
                            })
                            .await;
                    }
                }
                Err(_) => debug!("ack {} carries no message id", message.id),
            },

            MessageType::Discovery => {
                let hops = message.hop_count().min(u8::MAX as usize) as u8;
                if self.registry.get(message.sender).await.is_none() {
                    self.registry
                        .upsert_discovered(message.sender, &message.sender_name, "", 0)
                        .await;
                }
                self.registry.set_hop_count(message.sender, hops).await;
                let devices = self.registry.snapshot().await;
                let _ = self.app_events.send(MeshEvent::Discovery { devices }).await;
            }

            MessageType::RouteRequest => {
                let sought = message.content.parse::<Uuid>();
                if sought.map(|id| id == self.local_id).unwrap_or(false) {
                    let reply = self.engine.originate(
                        MessageType::RouteReply,
                        Some(message.sender),
                        self.local_id.to_string(),
                    );
                    self.dispatch_outbound(&reply).await;
                }
            }

            MessageType::RouteReply => {
                let hops = message.hop_count().min(u8::MAX as usize) as u8;
                if self.registry.get(message.sender).await.is_none() {
                    self.registry
                        .upsert_discovered(message.sender, &message.sender_name, "", 0)
                        .await;
                }
                self.registry.set_hop_count(message.sender, hops).await;
            }
        }
    }

    /// Hand an originated message to the connection manager: the direct
    /// link when the recipient is a connected neighbor, every link
    /// otherwise. Returns how many links took it.
    async fn dispatch_outbound(&self, message: &MeshMessage) -> usize {
        let bytes = match codec::encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("cannot encode message {}: {}", message.id, e);
                return 0;
            }
        };

        if let Some(recipient) = message.recipient {
            if self.manager.connected_devices().await.contains(&recipient) {
                match self.manager.send(recipient, bytes.clone()).await {
                    Ok(()) => return 1,
                    Err(e) => {
                        debug!("direct send to {} failed, flooding: {}", recipient, e);
                    }
                }
            }
        }

        self.manager.broadcast_except(None, &bytes).await
    }

    async fn handle_command(&mut self, command: NodeCommand) -> bool {
        match command {
            NodeCommand::SendText {
                recipient,
                content,
                reply,
            } => {
                let message = self.engine.originate(MessageType::Text, recipient, content);
                self.tracker.track(message.id);

                let record = StoredMessage {
                    peer: recipient.unwrap_or(Uuid::nil()),
                    outgoing: true,
                    message: message.clone(),
                };
                if let Err(e) = self.message_store.save_message(&record).await {
                    warn!("failed to persist message {}: {}", message.id, e);
                }
                self.conversations.apply(record);

                let handed = self.dispatch_outbound(&message).await;
                let status = if handed > 0 {
                    self.tracker.mark_sent(message.id);
                    DeliveryStatus::Sent
                } else {
                    // Every link down at send time
                    self.tracker.mark_failed(message.id);
                    DeliveryStatus::Failed
                };
                let _ = self
                    .app_events
                    .send(MeshEvent::MessageStatusChanged {
                        id: message.id,
                        status,
                    })
                    .await;

                let _ = reply.send(message.id);
                true
            }

            NodeCommand::MarkRead { peer } => {
                self.conversations.mark_read(peer);
                true
            }

            NodeCommand::Conversations { reply } => {
                let snapshot = self.conversations.ordered().into_iter().cloned().collect();
                let _ = reply.send(snapshot);
                true
            }

            NodeCommand::RequestRoute { target } => {
                let request =
                    self.engine
                        .originate(MessageType::RouteRequest, None, target.to_string());
                self.dispatch_outbound(&request).await;
                true
            }

            NodeCommand::Shutdown => false,
        }
    }

    async fn housekeeping(&mut self) {
        let evicted = self.engine.evict_expired();
        if evicted > 0 {
            debug!("evicted {} dedup entries", evicted);
        }
        let cleaned = self.tracker.cleanup();
        if cleaned > 0 {
            debug!("dropped {} settled delivery records", cleaned);
        }
        let stale = self.registry.sweep_stale(chrono::Utc::now()).await;
        if !stale.is_empty() {
            debug!("{} devices gone quiet", stale.len());
        }
    }
}
