//! BLE transport contract for mesh sessions.
//!
//! A transport knows how to find advertising mesh devices, open a GATT
//! connection to one of them, and move raw bytes in both directions. It knows
//! nothing about frames, keys or sequence numbers.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::selector::Candidate;

/// Opaque identifier of one open connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(pub u64);

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One advertisement heard during a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Advertiser's BLE MAC address
    pub ble_address: String,
    /// Received signal strength in dBm
    pub signal_strength: i16,
    /// Advertised local name, if any
    pub local_name: Option<String>,
}

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Device did not accept the connection
    #[error("device {0} unreachable")]
    Unreachable(String),

    /// Nothing arrived before the deadline
    #[error("timed out waiting for notification")]
    Timeout,

    /// Handle does not refer to an open connection
    #[error("{0} is not connected")]
    NotConnected(ConnectionHandle),

    /// Scan requested while a connection is open on a radio that cannot do both
    #[error("radio busy: cannot scan while connected")]
    Busy,

    /// Adapter or platform BLE stack failure
    #[error("adapter error: {0}")]
    Adapter(String),
}

/// Async BLE radio used by the session layer
#[async_trait]
pub trait BleTransport: Send + Sync {
    /// Listen for advertisements for `duration`
    async fn scan(
        &self,
        duration: Duration,
    ) -> Result<BoxStream<'static, Advertisement>, TransportError>;

    /// Open a connection to a candidate relay
    async fn connect(&self, candidate: &Candidate) -> Result<ConnectionHandle, TransportError>;

    /// Write bytes to the relay
    async fn write(&self, handle: ConnectionHandle, bytes: &[u8]) -> Result<(), TransportError>;

    /// Wait for the next notification from the relay
    async fn read_notification(
        &self,
        handle: ConnectionHandle,
        timeout: Duration,
    ) -> Result<Bytes, TransportError>;

    /// Release a connection
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError>;

    /// Whether `scan` may run while a connection is open
    fn supports_concurrent_scan(&self) -> bool {
        false
    }
}
