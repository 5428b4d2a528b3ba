//! In-memory cache backend for development and testing

use crate::{validate_network_id, StorageError, TopologyCache};
use async_trait::async_trait;
use dashmap::DashMap;
use halo_topology::TopologySnapshot;
use std::sync::Arc;
use tracing::debug;

/// In-memory topology cache
#[derive(Clone, Default)]
pub struct MemoryCache {
    /// network id -> snapshot
    entries: Arc<DashMap<String, TopologySnapshot>>,
}

impl MemoryCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-loaded with one snapshot
    pub fn with_snapshot(snapshot: TopologySnapshot) -> Self {
        let cache = Self::new();
        cache
            .entries
            .insert(snapshot.network_id.clone(), snapshot);
        cache
    }
}

#[async_trait]
impl TopologyCache for MemoryCache {
    async fn load_topology(
        &self,
        network_id: &str,
    ) -> Result<Option<TopologySnapshot>, StorageError> {
        validate_network_id(network_id)?;
        Ok(self.entries.get(network_id).map(|s| s.clone()))
    }

    async fn save_topology(
        &self,
        network_id: &str,
        snapshot: &TopologySnapshot,
    ) -> Result<(), StorageError> {
        validate_network_id(network_id)?;
        debug!(
            "Cache save network={} devices={} groups={}",
            network_id,
            snapshot.devices.len(),
            snapshot.groups.len()
        );
        self.entries
            .insert(network_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn cached_networks(&self) -> Result<Vec<String>, StorageError> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_wire::MeshKey;

    fn snapshot(id: &str) -> TopologySnapshot {
        TopologySnapshot::new(id, "Home", MeshKey::from_passphrase("pw"), vec![], vec![])
    }

    #[tokio::test]
    async fn test_memory_cache_basic() {
        let cache = MemoryCache::new();
        assert!(cache.load_topology("N1").await.unwrap().is_none());

        cache.save_topology("N1", &snapshot("N1")).await.unwrap();
        let loaded = cache.load_topology("N1").await.unwrap().unwrap();
        assert_eq!(loaded.network_id, "N1");

        cache.save_topology("N0", &snapshot("N0")).await.unwrap();
        assert_eq!(cache.cached_networks().await.unwrap(), vec!["N0", "N1"]);
    }

    #[tokio::test]
    async fn test_memory_cache_rejects_bad_id() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.save_topology("../x", &snapshot("N1")).await,
            Err(StorageError::InvalidNetworkId(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_entries() {
        let cache = MemoryCache::with_snapshot(snapshot("N1"));
        let other = cache.clone();
        other.save_topology("N2", &snapshot("N2")).await.unwrap();
        assert!(cache.load_topology("N2").await.unwrap().is_some());
    }
}
