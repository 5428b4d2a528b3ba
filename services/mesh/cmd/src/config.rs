//! Configuration handling for the halo CLI.
//!
//! Settings come from a YAML file, then `HALO_*` environment variables, then
//! command-line flags (applied in `main`). A missing or broken file is not an
//! error; defaults are used instead.

use anyhow::Result;
use halo_cloud::{AccountCredentials, ClientConfig, DEFAULT_HOST, DEFAULT_PRODUCT_IDS};
use halo_controller::ControllerConfig;
use halo_session::SessionConfig;
use halo_storage::CacheMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// halo CLI configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HaloConfig {
    /// Cloud account settings
    pub api: ApiSettings,
    /// Mesh and session settings
    pub mesh: MeshSettings,
    /// Local topology cache
    pub cache: CacheSettings,
}

/// Cloud account settings
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    /// API root URL
    pub host: String,
    /// Account email
    pub email: Option<String>,
    /// Account password
    pub password: Option<String>,
    /// Product ids treated as controllable lights
    pub product_ids: Vec<u32>,
    /// Per-request timeout
    #[serde(with = "humantime_duration")]
    pub timeout: Duration,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("host", &self.host)
            .field("email", &self.email)
            .field("product_ids", &self.product_ids)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            email: None,
            password: None,
            product_ids: DEFAULT_PRODUCT_IDS.to_vec(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Mesh and session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// Network to control; the first one when unset
    pub network_id: Option<String>,
    /// How long to listen for relays
    #[serde(with = "humantime_duration")]
    pub scan_duration: Duration,
    /// How long to wait for an acknowledgement
    #[serde(with = "humantime_duration")]
    pub send_timeout: Duration,
    /// How long to wait for the handshake reply
    #[serde(with = "humantime_duration")]
    pub handshake_timeout: Duration,
    /// Reconnect-and-resend attempts after a failed send
    pub command_retries: u32,
}

impl Default for MeshSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            network_id: None,
            scan_duration: Duration::from_secs(5),
            send_timeout: session.send_timeout,
            handshake_timeout: session.handshake_timeout,
            command_retries: 1,
        }
    }
}

/// Local topology cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache directory
    pub dir: PathBuf,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("halo-home"),
        }
    }
}

impl HaloConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = match std::fs::read_to_string(&config_path) {
            Ok(content) => match serde_yaml::from_str::<HaloConfig>(&content) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path.as_ref());
                    config
                }
                Err(e) => {
                    warn!(
                        "Failed to parse config file {:?} ({}), using defaults",
                        config_path.as_ref(),
                        e
                    );
                    Self::default()
                }
            },
            Err(_) => {
                warn!(
                    "Config file {:?} not found, using defaults",
                    config_path.as_ref()
                );
                Self::default()
            }
        };

        config.apply_environment_overrides();

        info!(
            "Final configuration: host={}, network={}, cache={:?}",
            config.api.host,
            config.mesh.network_id.as_deref().unwrap_or("<first>"),
            config.cache.dir
        );

        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_environment_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(email) = lookup("HALO_EMAIL") {
            info!("Account email overridden by environment");
            self.api.email = Some(email);
        }

        if let Some(password) = lookup("HALO_PASSWORD") {
            self.api.password = Some(password);
        }

        if let Some(host) = lookup("HALO_API_HOST") {
            info!("API host overridden by environment: {}", host);
            self.api.host = host;
        }

        if let Some(network_id) = lookup("HALO_NETWORK_ID") {
            info!("Network overridden by environment: {}", network_id);
            self.mesh.network_id = Some(network_id);
        }

        if let Some(dir) = lookup("HALO_CACHE_DIR") {
            info!("Cache directory overridden by environment: {}", dir);
            self.cache.dir = PathBuf::from(dir);
        }
    }

    /// Account credentials, when both email and password are set
    pub fn account(&self) -> Option<AccountCredentials> {
        match (&self.api.email, &self.api.password) {
            (Some(email), Some(password)) => Some(AccountCredentials::new(email, password)),
            _ => None,
        }
    }

    /// Cloud client settings
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            host: self.api.host.clone(),
            product_ids: self.api.product_ids.clone(),
            timeout: self.api.timeout,
        }
    }

    /// Controller settings
    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            network_id: self.mesh.network_id.clone(),
            scan_duration: self.mesh.scan_duration,
            session: SessionConfig {
                handshake_timeout: self.mesh.handshake_timeout,
                send_timeout: self.mesh.send_timeout,
                ..SessionConfig::default()
            },
            command_retries: self.mesh.command_retries,
        }
    }

    /// File cache under the configured directory
    pub fn cache_mode(&self) -> CacheMode {
        CacheMode::File {
            dir: self.cache.dir.clone(),
        }
    }
}

/// Serde adapter for humantime duration strings (`"5s"`, `"1m 30s"`)
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
