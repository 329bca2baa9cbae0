//! Radio link pool for the mesh engine.
//!
//! This crate owns the live radio connections: discovery scanning, the
//! platform-capped connection pool, chunked send/receive per link, and the
//! state-change events other components react to. The actual radio is
//! reached through the [`RadioTransport`] capability trait, implemented per
//! host platform; an in-memory implementation ([`memory::MemoryRadioHub`])
//! backs tests and the demo binary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use meshchat_link::{ConnectionManager, LinkConfig, LinkEvent};
//! use meshchat_link::memory::MemoryRadioHub;
//! use meshchat_registry::DeviceRegistry;
//! use tokio::sync::mpsc;
//! use uuid::Uuid;
//!
//! # async fn example() -> Result<(), meshchat_link::LinkError> {
//! let hub = MemoryRadioHub::new();
//! let me = Uuid::new_v4();
//! let transport = hub.endpoint(me, "alice", "mem-alice").await;
//!
//! let registry = Arc::new(DeviceRegistry::new());
//! let (event_tx, mut events) = mpsc::channel(64);
//! let manager = Arc::new(ConnectionManager::new(
//!     LinkConfig::default(),
//!     registry,
//!     event_tx,
//! ));
//! manager.initialize(Arc::new(transport)).await?;
//! manager.start_scanning().await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         LinkEvent::DiscoveryUpdate { devices } => {
//!             for device in devices {
//!                 manager.connect(device.id).await.ok();
//!             }
//!         }
//!         LinkEvent::Connected { device } => println!("link up: {device}"),
//!         LinkEvent::Disconnected { device, .. } => println!("link down: {device}"),
//!         LinkEvent::Inbound { device, payload } => {
//!             println!("{} sent {} bytes", device, payload.len());
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod manager;
pub mod memory;
pub mod transport;

pub use error::LinkError;
pub use manager::{
    ConnectionManager, DisconnectReason, LinkConfig, LinkEvent, LinkState, LinkStatsSnapshot,
};
pub use transport::{DeviceInfo, Discovery, IncomingLink, RadioLink, RadioTransport, ServiceDescriptor};
