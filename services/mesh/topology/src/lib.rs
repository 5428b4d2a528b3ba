//! Device and group records, topology snapshots and address resolution.
//!
//! A [`TopologySnapshot`] is everything the controller knows about one mesh
//! network: its key, its devices and its groups. Snapshots come from the cloud
//! account API or from the local cache and are replaced wholesale, never
//! patched in place.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod snapshot;

pub use error::TopologyError;
pub use snapshot::{
    normalize_ble_address, DeviceRecord, GroupRecord, TopologySnapshot, TopologyStats,
};
