//! Discovered-peer registry for the mesh engine.
//!
//! Tracks every device ever discovered (identity, display name, link
//! address, signal strength, last-seen time, hop distance) independent of
//! connection state. The connection manager is the only writer of the
//! connection flag; discovery callbacks are the only writers of signal and
//! last-seen data. All mutation goes through one guarded map.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod registry;

pub use device::DeviceNode;
pub use registry::DeviceRegistry;
