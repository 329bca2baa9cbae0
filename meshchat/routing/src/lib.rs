//! Flood routing, deduplication, and delivery tracking for the mesh engine.
//!
//! The routing engine decides, for every inbound or locally originated
//! message, whether to deliver it locally, forward it, or drop it. It owns
//! the seen-message set (no other component may mutate it) and enforces the
//! hop budget and loop rules. The delivery tracker maintains
//! the per-message status state machine as transport events occur.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod tracker;

pub use engine::{DropReason, RoutingDecision, RoutingEngine, RoutingStats};
pub use tracker::DeliveryTracker;
