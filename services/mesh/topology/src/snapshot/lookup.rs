//! TopologySnapshot lookup and resolution methods.

use super::{normalize_ble_address, DeviceRecord, GroupRecord, TopologySnapshot, TopologyStats};
use crate::error::TopologyError;
use chrono::Utc;
use halo_wire::{Address, MeshKey, NetworkCredentials};
use tracing::debug;

impl TopologySnapshot {
    /// Create a snapshot stamped with the current time
    pub fn new(
        network_id: impl Into<String>,
        network_name: impl Into<String>,
        network_key: MeshKey,
        devices: Vec<DeviceRecord>,
        groups: Vec<GroupRecord>,
    ) -> Self {
        Self {
            network_id: network_id.into(),
            network_name: network_name.into(),
            network_key,
            devices,
            groups,
            fetched_at: Utc::now(),
        }
    }

    /// Key material for this network
    pub fn credentials(&self) -> NetworkCredentials {
        NetworkCredentials::new(self.network_id.clone(), self.network_key.clone())
    }

    /// Look up a device by avid
    pub fn device(&self, avid: u32) -> Option<&DeviceRecord> {
        self.devices.iter().find(|d| d.avid == avid)
    }

    /// Look up a group by avid
    pub fn group(&self, avid: u32) -> Option<&GroupRecord> {
        self.groups.iter().find(|g| g.avid == avid)
    }

    /// Look up a device by its BLE MAC address, in any common notation
    pub fn device_by_ble_address(&self, ble_address: &str) -> Option<&DeviceRecord> {
        let wanted = normalize_ble_address(ble_address);
        self.devices.iter().find(|d| {
            d.ble_address
                .as_deref()
                .map(normalize_ble_address)
                .is_some_and(|a| a == wanted)
        })
    }

    /// Devices belonging to a group. Members missing from the device list
    /// are skipped.
    pub fn group_members(&self, group_avid: u32) -> Result<Vec<&DeviceRecord>, TopologyError> {
        let group = self
            .group(group_avid)
            .ok_or(TopologyError::UnknownGroup(group_avid))?;

        Ok(group
            .member_avids
            .iter()
            .filter_map(|avid| self.device(*avid))
            .collect())
    }

    /// Translate a user-facing address into the wire-level address.
    ///
    /// Devices are addressed on the mesh by their mesh number, groups by
    /// their avid.
    pub fn resolve(&self, address: Address) -> Result<Address, TopologyError> {
        let resolved = match address {
            Address::Device(avid) => {
                let device = self
                    .device(avid)
                    .ok_or(TopologyError::UnknownDevice(avid))?;
                Address::Device(u32::from(device.mesh_address))
            }
            Address::Group(avid) => {
                self.group(avid).ok_or(TopologyError::UnknownGroup(avid))?;
                Address::Group(avid)
            }
        };

        debug!(
            "Resolved {} to wire address {} in network {}",
            address, resolved, self.network_id
        );
        Ok(resolved)
    }

    /// Time since the snapshot was fetched
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.fetched_at)
    }

    /// Get snapshot statistics
    pub fn stats(&self) -> TopologyStats {
        TopologyStats {
            total_devices: self.devices.len(),
            total_groups: self.groups.len(),
            relay_capable: self
                .devices
                .iter()
                .filter(|d| d.ble_address.is_some())
                .count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> TopologySnapshot {
        TopologySnapshot::new(
            "N1",
            "Home",
            MeshKey::from_passphrase("secret"),
            vec![
                DeviceRecord {
                    avid: 12,
                    name: "Kitchen".into(),
                    mesh_address: 0x0C,
                    product_type: 93,
                    ble_address: Some("aa:bb:cc:dd:ee:01".into()),
                    pid: None,
                },
                DeviceRecord {
                    avid: 13,
                    name: "Hall".into(),
                    mesh_address: 0x0D,
                    product_type: 93,
                    ble_address: None,
                    pid: None,
                },
            ],
            vec![GroupRecord {
                avid: 200,
                name: "Downstairs".into(),
                member_avids: vec![12, 13, 99],
            }],
        )
    }

    #[test]
    fn test_resolve() {
        let topo = snapshot();
        assert_eq!(topo.resolve(Address::Device(12)), Ok(Address::Device(0x0C)));
        assert_eq!(topo.resolve(Address::Group(200)), Ok(Address::Group(200)));
        assert_eq!(
            topo.resolve(Address::Device(7)),
            Err(TopologyError::UnknownDevice(7))
        );
        assert_eq!(
            topo.resolve(Address::Group(7)),
            Err(TopologyError::UnknownGroup(7))
        );
    }

    #[test]
    fn test_group_members_skip_missing() {
        let topo = snapshot();
        let members: Vec<u32> = topo
            .group_members(200)
            .unwrap()
            .iter()
            .map(|d| d.avid)
            .collect();
        assert_eq!(members, vec![12, 13]);
    }

    #[test]
    fn test_device_by_ble_address() {
        let topo = snapshot();
        assert_eq!(topo.device_by_ble_address("AABBCCDDEE01").unwrap().avid, 12);
        assert!(topo.device_by_ble_address("aa:bb:cc:dd:ee:02").is_none());
    }

    #[test]
    fn test_normalize_ble_address() {
        assert_eq!(normalize_ble_address("AABBCCDDEEFF"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_ble_address("aa:bb:cc:dd:ee:ff"), "aa:bb:cc:dd:ee:ff");
        assert_eq!(normalize_ble_address("AA-BB-CC-DD-EE-FF"), "aa:bb:cc:dd:ee:ff");
    }

    #[test]
    fn test_json_roundtrip_keeps_key() {
        let topo = snapshot();
        let json = serde_json::to_string(&topo).unwrap();
        let back: TopologySnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, topo);
        assert_eq!(back.credentials(), topo.credentials());
    }

    #[test]
    fn test_stats() {
        let stats = snapshot().stats();
        assert_eq!(stats.total_devices, 2);
        assert_eq!(stats.total_groups, 1);
        assert_eq!(stats.relay_capable, 1);
    }
}
