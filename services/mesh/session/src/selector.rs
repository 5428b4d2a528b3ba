//! Relay candidate selection.
//!
//! Candidates are ordered strongest signal first. The sort is stable, so
//! devices heard at the same strength keep the order they were discovered in.

use halo_topology::TopologySnapshot;
use tracing::debug;

use crate::transport::Advertisement;

/// A discovered mesh member that may act as relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Device avid
    pub avid: u32,
    /// Device mesh number
    pub mesh_address: u16,
    /// Received signal strength in dBm
    pub signal_strength: i16,
    /// BLE MAC address
    pub ble_address: String,
}

/// Order candidates by descending signal strength
pub fn select(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| b.signal_strength.cmp(&a.signal_strength));
    candidates
}

/// Collapse repeated advertisements of one device into a single entry at its
/// first discovery position, carrying the strongest reading seen.
pub fn dedupe(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut unique: Vec<Candidate> = Vec::with_capacity(candidates.len());

    for candidate in candidates {
        match unique.iter_mut().find(|c| c.avid == candidate.avid) {
            Some(existing) => {
                existing.signal_strength = existing.signal_strength.max(candidate.signal_strength);
            }
            None => unique.push(candidate),
        }
    }

    unique
}

/// Join scan results with the network topology.
///
/// Advertisements from devices that are not part of the network are dropped.
pub fn from_advertisements(
    advertisements: &[Advertisement],
    topology: &TopologySnapshot,
) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for ad in advertisements {
        match topology.device_by_ble_address(&ad.ble_address) {
            Some(device) => candidates.push(Candidate {
                avid: device.avid,
                mesh_address: device.mesh_address,
                signal_strength: ad.signal_strength,
                ble_address: ad.ble_address.clone(),
            }),
            None => debug!(
                "Ignoring advertisement from {} (not in network {})",
                ad.ble_address, topology.network_id
            ),
        }
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_topology::DeviceRecord;
    use halo_wire::MeshKey;

    fn candidate(avid: u32, rssi: i16) -> Candidate {
        Candidate {
            avid,
            mesh_address: avid as u16,
            signal_strength: rssi,
            ble_address: format!("aa:bb:cc:dd:ee:{:02x}", avid),
        }
    }

    fn strengths(candidates: &[Candidate]) -> Vec<i16> {
        candidates.iter().map(|c| c.signal_strength).collect()
    }

    #[test]
    fn test_select_orders_by_strength() {
        let ordered = select(vec![candidate(1, -80), candidate(2, -40), candidate(3, -60)]);
        assert_eq!(strengths(&ordered), vec![-40, -60, -80]);
    }

    #[test]
    fn test_select_is_stable_for_ties() {
        let ordered = select(vec![
            candidate(1, -70),
            candidate(2, -50),
            candidate(3, -70),
            candidate(4, -70),
        ]);
        let avids: Vec<u32> = ordered.iter().map(|c| c.avid).collect();
        assert_eq!(avids, vec![2, 1, 3, 4]);
    }

    #[test]
    fn test_select_empty() {
        assert!(select(Vec::new()).is_empty());
    }

    #[test]
    fn test_dedupe_keeps_first_position_and_strongest() {
        let unique = dedupe(vec![
            candidate(1, -80),
            candidate(2, -60),
            candidate(1, -50),
        ]);
        let summary: Vec<(u32, i16)> = unique.iter().map(|c| (c.avid, c.signal_strength)).collect();
        assert_eq!(summary, vec![(1, -50), (2, -60)]);
    }

    #[test]
    fn test_from_advertisements_joins_topology() {
        let topology = TopologySnapshot::new(
            "N1",
            "Home",
            MeshKey::from_passphrase("pw"),
            vec![DeviceRecord {
                avid: 12,
                name: "Kitchen".into(),
                mesh_address: 0x0C,
                product_type: 93,
                ble_address: Some("aa:bb:cc:dd:ee:0c".into()),
                pid: None,
            }],
            vec![],
        );

        let ads = vec![
            Advertisement {
                ble_address: "AA:BB:CC:DD:EE:0C".into(),
                signal_strength: -55,
                local_name: None,
            },
            Advertisement {
                ble_address: "11:22:33:44:55:66".into(),
                signal_strength: -30,
                local_name: Some("Neighbour".into()),
            },
        ];

        let candidates = from_advertisements(&ads, &topology);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].avid, 12);
        assert_eq!(candidates[0].mesh_address, 0x0C);
        assert_eq!(candidates[0].signal_strength, -55);
    }
}
