//! Topology lookup errors.

use thiserror::Error;

/// Errors raised while resolving user-facing identifiers
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TopologyError {
    /// No device with this avid in the network
    #[error("unknown device avid {0}")]
    UnknownDevice(u32),

    /// No group with this avid in the network
    #[error("unknown group avid {0}")]
    UnknownGroup(u32),
}
