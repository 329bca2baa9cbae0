//! Link-layer error types.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the connection manager and radio transports
#[derive(Error, Debug)]
pub enum LinkError {
    /// The radio capability was never acquired
    #[error("radio transport not initialized")]
    NotInitialized,

    /// A scan is already active
    #[error("already scanning")]
    AlreadyScanning,

    /// The device id was never discovered
    #[error("unknown device {0}")]
    DeviceUnknown(Uuid),

    /// The live pool already holds the platform maximum
    #[error("connection limit reached ({0})")]
    ConnectionLimitReached(usize),

    /// No live link to the device
    #[error("not connected to {0}")]
    NotConnected(Uuid),

    /// The peer does not expose the mesh service
    #[error("mesh service not found on peer")]
    ServiceNotFound,

    /// The peer's mesh service lacks a required characteristic
    #[error("mesh characteristic not found on peer")]
    CharacteristicNotFound,

    /// The connect attempt did not resolve within the configured window
    #[error("connect timed out")]
    Timeout,

    /// The transport could not open the link
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// A write on a live link failed
    #[error("send failed: {0}")]
    SendFailed(String),

    /// The host platform cannot provide the requested capability
    #[error("unsupported: {0}")]
    Unsupported(String),
}
