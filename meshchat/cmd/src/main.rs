//! meshchat binary: runs a two-node in-memory mesh demo.
//!
//! Without host radio bindings the binary drives the engine over the
//! in-memory transport: two nodes discover each other, connect, exchange a
//! directed message, and report its delivery status. Platform radio
//! implementations plug in the same way the memory hub does.

mod config;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use meshchat::node::{MeshEvent, MeshNode, NodeHandle};
use meshchat_link::memory::MemoryRadioHub;
use meshchat_link::ConnectionManager;
use meshchat_store::{DeviceStore, MemoryStore, MessageStore};
use meshchat_wire::DeliveryStatus;

use config::NodeConfig;

#[derive(Parser, Debug)]
#[command(name = "meshchat", about = "Short-range mesh messaging demo")]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "meshchat.yaml")]
    config: std::path::PathBuf,

    /// Override the configured device name
    #[arg(long)]
    name: Option<String>,
}

struct DemoNode {
    id: Uuid,
    handle: NodeHandle,
    events: mpsc::Receiver<MeshEvent>,
    manager: Arc<ConnectionManager>,
}

async fn spawn_node(
    hub: &MemoryRadioHub,
    name: &str,
    address: &str,
    config: &NodeConfig,
) -> anyhow::Result<DemoNode> {
    let id = Uuid::new_v4();
    let store = Arc::new(MemoryStore::new());
    let message_store: Arc<dyn MessageStore> = store.clone();
    let device_store: Arc<dyn DeviceStore> = store;
    let (node, handle, events) = MeshNode::new(
        id,
        name,
        config.link_config(),
        message_store,
        device_store,
    );
    let manager = node.manager();

    let transport = hub.endpoint(id, name, address).await;
    manager.initialize(Arc::new(transport)).await?;
    tokio::spawn(node.run());

    Ok(DemoNode {
        id,
        handle,
        events,
        manager,
    })
}

/// Drain events until the predicate matches or the deadline passes
async fn wait_for<F>(
    events: &mut mpsc::Receiver<MeshEvent>,
    deadline: Duration,
    mut predicate: F,
) -> anyhow::Result<MeshEvent>
where
    F: FnMut(&MeshEvent) -> bool,
{
    tokio::time::timeout(deadline, async {
        loop {
            let event = events.recv().await.context("event channel closed")?;
            if predicate(&event) {
                return Ok(event);
            }
        }
    })
    .await
    .context("timed out waiting for event")?
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let mut config = NodeConfig::load_from_file(&args.config)?;
    if let Some(name) = args.name {
        config.device_name = name;
    }

    let hub = MemoryRadioHub::with_mtu(config.mtu);
    let mut alice = spawn_node(&hub, &config.device_name, "mem-alice", &config).await?;
    let mut bob = spawn_node(&hub, "bob", "mem-bob", &config).await?;

    // Discover bob, then connect
    alice.manager.start_scanning().await?;
    let bob_id = bob.id;
    wait_for(&mut alice.events, Duration::from_secs(5), |event| {
        matches!(event, MeshEvent::Discovery { devices } if devices.iter().any(|d| d.id == bob_id))
    })
    .await?;
    alice.manager.stop_scanning().await?;
    alice.manager.connect(bob.id).await?;
    info!("alice connected to bob");

    // One directed message, tracked to delivery
    let started = Instant::now();
    let msg_id = alice
        .handle
        .send_text(Some(bob.id), "meet at the north gate")
        .await?;

    let received = wait_for(&mut bob.events, Duration::from_secs(5), |event| {
        matches!(event, MeshEvent::MessageReceived { message } if message.id == msg_id)
    })
    .await?;
    if let MeshEvent::MessageReceived { message } = received {
        info!("bob received: {:?}", message.content);
    }

    wait_for(&mut alice.events, Duration::from_secs(5), |event| {
        matches!(
            event,
            MeshEvent::MessageStatusChanged { id, status: DeliveryStatus::Delivered } if *id == msg_id
        )
    })
    .await?;
    info!(
        "delivery acknowledged after {}",
        humantime::format_duration(Duration::from_millis(
            started.elapsed().as_millis() as u64
        ))
    );

    // A broadcast reaches every connected link
    alice.handle.send_text(None, "anyone nearby?").await?;
    wait_for(&mut bob.events, Duration::from_secs(5), |event| {
        matches!(event, MeshEvent::MessageReceived { message } if message.is_broadcast())
    })
    .await?;
    info!("broadcast observed by bob");

    alice.handle.shutdown().await?;
    bob.handle.shutdown().await?;
    Ok(())
}
