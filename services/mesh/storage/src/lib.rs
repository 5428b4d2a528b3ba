//! Offline cache of HALO Home topology and network keys.
//!
//! The controller reads the cache before it talks to the cloud, so a network
//! that was fetched once keeps working without internet access. Backends are
//! pluggable: in-memory for tests and `--simulate`, file-based for real use.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;

use async_trait::async_trait;
use halo_topology::TopologySnapshot;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored data could not be parsed
    #[error("Data corruption: {0}")]
    Corruption(String),
    /// Network id cannot be used as a cache key
    #[error("Invalid network id: {0:?}")]
    InvalidNetworkId(String),
    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistent store for topology snapshots, keyed by network id
#[async_trait]
pub trait TopologyCache: Send + Sync {
    /// Load the cached snapshot for a network, if any
    async fn load_topology(&self, network_id: &str)
        -> Result<Option<TopologySnapshot>, StorageError>;

    /// Store a snapshot, replacing any previous one for the network
    async fn save_topology(
        &self,
        network_id: &str,
        snapshot: &TopologySnapshot,
    ) -> Result<(), StorageError>;

    /// Network ids with a cached snapshot
    async fn cached_networks(&self) -> Result<Vec<String>, StorageError>;
}

/// Cache backend configuration
#[derive(Clone, Debug, Default)]
pub enum CacheMode {
    /// In-memory cache (tests and simulation only)
    #[default]
    InMemory,
    /// One JSON file per network under a cache directory
    File {
        /// Cache directory path
        dir: PathBuf,
    },
}

// Re-export backend implementations
pub use backend::file::FileCache;
pub use backend::mem::MemoryCache;

/// Create a cache from configuration
pub async fn open_cache(mode: CacheMode) -> Result<Arc<dyn TopologyCache>, StorageError> {
    match mode {
        CacheMode::InMemory => Ok(Arc::new(MemoryCache::new())),
        CacheMode::File { dir } => Ok(Arc::new(FileCache::new(dir).await?)),
    }
}

/// Check that a network id is safe to use as a single path component
pub(crate) fn validate_network_id(network_id: &str) -> Result<(), StorageError> {
    let valid = !network_id.is_empty()
        && !network_id.starts_with('.')
        && network_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidNetworkId(network_id.to_string()))
    }
}
