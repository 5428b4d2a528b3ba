//! File-based cache backend
//!
//! Layout: `<dir>/<network_id>/topology.json`. Writes go to a temporary file
//! in the same directory and are renamed into place, so a crash never leaves
//! a half-written snapshot behind.

use crate::{validate_network_id, StorageError, TopologyCache};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use halo_topology::TopologySnapshot;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Current on-disk record format
const FORMAT_VERSION: u32 = 1;

const TOPOLOGY_FILE: &str = "topology.json";
const TEMP_SUFFIX: &str = ".tmp";

/// On-disk record wrapping a snapshot
#[derive(Serialize, Deserialize, Debug)]
struct CacheRecord<T> {
    format_version: u32,
    saved_at: DateTime<Utc>,
    snapshot: T,
}

/// File-based topology cache
pub struct FileCache {
    dir: PathBuf,
    /// Snapshots already read from or written to disk
    loaded: Arc<DashMap<String, TopologySnapshot>>,
}

impl FileCache {
    /// Open a cache rooted at `dir`, creating the directory if needed
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        info!("Opened topology cache at {}", dir.display());

        Ok(Self {
            dir,
            loaded: Arc::new(DashMap::new()),
        })
    }

    /// Cache root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn network_dir(&self, network_id: &str) -> PathBuf {
        self.dir.join(network_id)
    }

    fn topology_path(&self, network_id: &str) -> PathBuf {
        self.network_dir(network_id).join(TOPOLOGY_FILE)
    }

    async fn read_record(&self, path: &Path) -> Result<Option<TopologySnapshot>, StorageError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: CacheRecord<TopologySnapshot> = serde_json::from_str(&content)
            .map_err(|e| {
                StorageError::Corruption(format!("Invalid cache file {}: {}", path.display(), e))
            })?;

        if record.format_version != FORMAT_VERSION {
            warn!(
                "Ignoring cache file {} with format version {} (expected {})",
                path.display(),
                record.format_version,
                FORMAT_VERSION
            );
            return Ok(None);
        }

        Ok(Some(record.snapshot))
    }

    async fn write_record(&self, path: &Path, snapshot: &TopologySnapshot) -> Result<(), StorageError> {
        let record = CacheRecord {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            snapshot,
        };
        let content = serde_json::to_vec_pretty(&record)?;

        let mut temp_name = path.as_os_str().to_owned();
        temp_name.push(TEMP_SUFFIX);
        let temp_path = PathBuf::from(temp_name);

        let mut file = create_private(&temp_path).await?;
        file.write_all(&content).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, path).await?;
        Ok(())
    }
}

#[async_trait]
impl TopologyCache for FileCache {
    async fn load_topology(
        &self,
        network_id: &str,
    ) -> Result<Option<TopologySnapshot>, StorageError> {
        validate_network_id(network_id)?;

        if let Some(snapshot) = self.loaded.get(network_id) {
            return Ok(Some(snapshot.clone()));
        }

        let path = self.topology_path(network_id);
        let snapshot = self.read_record(&path).await?;
        if let Some(snapshot) = &snapshot {
            debug!(
                "Loaded cached topology for network {} ({} devices)",
                network_id,
                snapshot.devices.len()
            );
            self.loaded.insert(network_id.to_string(), snapshot.clone());
        }
        Ok(snapshot)
    }

    async fn save_topology(
        &self,
        network_id: &str,
        snapshot: &TopologySnapshot,
    ) -> Result<(), StorageError> {
        validate_network_id(network_id)?;

        tokio::fs::create_dir_all(self.network_dir(network_id)).await?;
        let path = self.topology_path(network_id);
        self.write_record(&path, snapshot).await?;

        info!(
            "Saved topology for network {} to {}",
            network_id,
            path.display()
        );
        self.loaded.insert(network_id.to_string(), snapshot.clone());
        Ok(())
    }

    async fn cached_networks(&self) -> Result<Vec<String>, StorageError> {
        let mut ids = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if validate_network_id(name).is_ok()
                    && tokio::fs::try_exists(entry.path().join(TOPOLOGY_FILE)).await?
                {
                    ids.push(name.to_string());
                }
            }
        }

        ids.sort();
        Ok(ids)
    }
}

/// Create (or truncate) a file readable by the owner only; snapshots carry
/// the network key
#[cfg(unix)]
async fn create_private(path: &Path) -> Result<tokio::fs::File, StorageError> {
    use std::os::unix::fs::PermissionsExt;

    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await?;
    // `mode` only applies on creation; a leftover temp file keeps its own
    file.set_permissions(std::fs::Permissions::from_mode(0o600)).await?;
    Ok(file)
}

#[cfg(not(unix))]
async fn create_private(path: &Path) -> Result<tokio::fs::File, StorageError> {
    Ok(tokio::fs::File::create(path).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use halo_topology::DeviceRecord;
    use halo_wire::MeshKey;
    use tempfile::TempDir;

    fn snapshot(id: &str) -> TopologySnapshot {
        TopologySnapshot::new(
            id,
            "Home",
            MeshKey::from_passphrase("pw"),
            vec![DeviceRecord {
                avid: 12,
                name: "Kitchen".into(),
                mesh_address: 12,
                product_type: 93,
                ble_address: Some("aa:bb:cc:dd:ee:01".into()),
                pid: Some("pid".into()),
            }],
            vec![],
        )
    }

    #[tokio::test]
    async fn test_file_cache_persists_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        let cache = FileCache::new(temp_dir.path()).await.unwrap();
        cache.save_topology("N1", &snapshot("N1")).await.unwrap();
        assert!(temp_dir.path().join("N1").join(TOPOLOGY_FILE).exists());

        let reopened = FileCache::new(temp_dir.path()).await.unwrap();
        let loaded = reopened.load_topology("N1").await.unwrap().unwrap();
        assert_eq!(loaded, snapshot_with_time("N1", loaded.fetched_at));
        assert_eq!(reopened.cached_networks().await.unwrap(), vec!["N1"]);
    }

    fn snapshot_with_time(id: &str, fetched_at: DateTime<Utc>) -> TopologySnapshot {
        let mut s = snapshot(id);
        s.fetched_at = fetched_at;
        s
    }

    #[tokio::test]
    async fn test_missing_network_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::new(temp_dir.path()).await.unwrap();
        assert!(cache.load_topology("N9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_reports_corruption() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("N1");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(TOPOLOGY_FILE), b"{not json").unwrap();

        let cache = FileCache::new(temp_dir.path()).await.unwrap();
        assert!(matches!(
            cache.load_topology("N1").await,
            Err(StorageError::Corruption(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::new(temp_dir.path().join("cache")).await.unwrap();

        let result = cache.save_topology("../outside", &snapshot("x")).await;
        assert!(matches!(result, Err(StorageError::InvalidNetworkId(_))));
        assert!(!temp_dir.path().join("outside").exists());
    }

    #[tokio::test]
    async fn test_no_temp_file_left_behind() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileCache::new(temp_dir.path()).await.unwrap();
        cache.save_topology("N1", &snapshot("N1")).await.unwrap();
        cache.save_topology("N1", &snapshot("N1")).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp_dir.path().join("N1"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![TOPOLOGY_FILE.to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cache_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("N1");
        std::fs::create_dir_all(&dir).unwrap();
        let stale = dir.join(format!("{}{}", TOPOLOGY_FILE, TEMP_SUFFIX));
        std::fs::write(&stale, b"stale").unwrap();
        std::fs::set_permissions(&stale, std::fs::Permissions::from_mode(0o644)).unwrap();

        let cache = FileCache::new(temp_dir.path()).await.unwrap();
        cache.save_topology("N1", &snapshot("N1")).await.unwrap();

        let mode = std::fs::metadata(dir.join(TOPOLOGY_FILE))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
        assert!(!stale.exists());
    }
}
