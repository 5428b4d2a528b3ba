//! Topology snapshot and the records it holds.

use chrono::{DateTime, Utc};
use halo_wire::MeshKey;
use serde::{Deserialize, Serialize};

/// A lighting device known to the account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Stable cloud identifier
    pub avid: u32,
    /// User-assigned name
    pub name: String,
    /// Mesh-level number carried in the frame address word
    pub mesh_address: u16,
    /// Cloud product identifier
    pub product_type: u32,
    /// BLE MAC address, `aa:bb:cc:dd:ee:ff`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ble_address: Option<String>,
    /// Hardware product id string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<String>,
}

/// A named group of devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Stable cloud identifier, also the group's mesh number
    pub avid: u32,
    /// User-assigned name
    pub name: String,
    /// Device avids in the group
    #[serde(default)]
    pub member_avids: Vec<u32>,
}

/// Everything known about one mesh network at a point in time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Network (cloud location) identifier
    pub network_id: String,
    /// Network display name
    pub network_name: String,
    /// Shared network key
    pub network_key: MeshKey,
    /// Devices in the network
    pub devices: Vec<DeviceRecord>,
    /// Groups in the network
    pub groups: Vec<GroupRecord>,
    /// When the snapshot was fetched from the cloud
    pub fetched_at: DateTime<Utc>,
}

/// Snapshot statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyStats {
    /// Number of devices
    pub total_devices: usize,
    /// Number of groups
    pub total_groups: usize,
    /// Devices with a known BLE address, i.e. usable as a relay
    pub relay_capable: usize,
}

/// Lowercase a MAC address and insert colons when the cloud omits them.
///
/// `"AABBCCDDEEFF"` and `"aa:bb:cc:dd:ee:ff"` both become
/// `"aa:bb:cc:dd:ee:ff"`.
pub fn normalize_ble_address(raw: &str) -> String {
    let hex: Vec<char> = raw
        .chars()
        .filter(|c| c.is_ascii_hexdigit())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    hex.chunks(2)
        .map(|pair| pair.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(":")
}

// Include implementation
mod lookup;
