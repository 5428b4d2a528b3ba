// Avi-on HTTP client
//
// Wraps `reqwest::Client` with Avi-on URL construction, the versioned Accept
// header and token authorization. Response bodies are parsed into the raw
// models and mapped to topology records before the caller sees them.

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use halo_topology::{normalize_ble_address, DeviceRecord, GroupRecord};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::{AccountCredentials, CloudApi, NetworkRecord, SessionToken};
use crate::error::ApiError;
use crate::models::{
    DevicesResponse, GroupsResponse, LocationsResponse, LoginResponse, RawDevice, UserResponse,
};

/// Production API root
pub const DEFAULT_HOST: &str = "https://api.avi-on.com/";

/// Product ids treated as controllable lights
pub const DEFAULT_PRODUCT_IDS: &[u32] = &[93];

const ACCEPT_V2: &str = "application/api.avi-on.v2";
const INVALID_CREDENTIALS: &str = "Invalid credentials for HALO Home";
const BODY_PREVIEW_CHARS: usize = 200;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root URL
    pub host: String,
    /// Product ids to keep when listing devices
    pub product_ids: Vec<u32>,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            product_ids: DEFAULT_PRODUCT_IDS.to_vec(),
            timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP client for the Avi-on account API
pub struct AvionClient {
    http: reqwest::Client,
    base_url: Url,
    product_ids: Vec<u32>,
    session: RwLock<Option<SessionToken>>,
}

impl AvionClient {
    /// Create a client from configuration
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("halo-mesh/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let base_url = parse_host(&config.host)?;
        Ok(Self::with_client(http, base_url, config.product_ids))
    }

    /// Create a client with a pre-built `reqwest::Client`
    pub fn with_client(http: reqwest::Client, base_url: Url, product_ids: Vec<u32>) -> Self {
        Self {
            http,
            base_url,
            product_ids,
            session: RwLock::new(None),
        }
    }

    /// The API root URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Whether `authenticate` has succeeded
    pub fn is_authenticated(&self) -> bool {
        self.session.read().expect("session lock poisoned").is_some()
    }

    // ── URL and request helpers ──────────────────────────────────────

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base_url.join(path)?)
    }

    fn token(&self) -> Result<String, ApiError> {
        self.session
            .read()
            .expect("session lock poisoned")
            .as_ref()
            .map(|s| s.token.clone())
            .ok_or(ApiError::NotAuthenticated)
    }

    async fn get_with_token<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<T, ApiError> {
        let url = self.url(path)?;
        debug!("GET {}", url);

        let resp = self
            .http
            .get(url)
            .header(ACCEPT, ACCEPT_V2)
            .header(AUTHORIZATION, format!("Token {token}"))
            .send()
            .await?;

        parse_response(resp).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let token = self.token()?;
        self.get_with_token(path, &token).await
    }
}

#[async_trait]
impl CloudApi for AvionClient {
    async fn authenticate(&self, account: &AccountCredentials) -> Result<SessionToken, ApiError> {
        let url = self.url("sessions")?;
        debug!("POST {}", url);

        let body = serde_json::json!({
            "email": account.email,
            "password": account.password,
        });
        let resp = self.http.post(url).json(&body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        let login: LoginResponse = match serde_json::from_str(&text) {
            Ok(login) => login,
            Err(_) if status.is_success() => {
                return Err(ApiError::UnexpectedResponse(preview(&text)));
            }
            Err(_) => LoginResponse { credentials: None },
        };

        let auth_token = match login.credentials {
            Some(credentials) => credentials.auth_token,
            None if status.is_success()
                || status == StatusCode::UNAUTHORIZED
                || status == StatusCode::FORBIDDEN
                || status == StatusCode::UNPROCESSABLE_ENTITY =>
            {
                return Err(ApiError::Authentication(INVALID_CREDENTIALS.to_string()));
            }
            None => {
                return Err(ApiError::Http {
                    status: status.as_u16(),
                    message: preview(&text),
                });
            }
        };

        let user: UserResponse = self.get_with_token("user", &auth_token).await?;
        let user = user.user.ok_or_else(|| {
            ApiError::UnexpectedResponse("Unexpected error reading HALO Home user data".into())
        })?;

        let session = SessionToken {
            token: auth_token,
            user_id: user.id,
        };
        *self.session.write().expect("session lock poisoned") = Some(session.clone());

        info!("Authenticated with HALO Home cloud as user {}", user.id);
        Ok(session)
    }

    async fn list_networks(&self) -> Result<Vec<NetworkRecord>, ApiError> {
        let resp: LocationsResponse = self.get("locations").await?;

        Ok(resp
            .locations
            .into_iter()
            .map(|loc| {
                let id = loc.id.to_string();
                NetworkRecord {
                    name: loc.name.unwrap_or_else(|| id.clone()),
                    id,
                    passphrase: loc.passphrase,
                }
            })
            .collect())
    }

    async fn list_devices(&self, network_id: &str) -> Result<Vec<DeviceRecord>, ApiError> {
        let path = format!("locations/{network_id}/abstract_devices");
        let resp: DevicesResponse = self.get(&path).await?;

        let devices = assign_mesh_addresses(resp.abstract_devices, &self.product_ids);
        debug!(
            "Network {} has {} controllable devices",
            network_id,
            devices.len()
        );
        Ok(devices)
    }

    async fn list_groups(&self, network_id: &str) -> Result<Vec<GroupRecord>, ApiError> {
        let path = format!("locations/{network_id}/groups");
        let resp: GroupsResponse = match self.get(&path).await {
            Ok(resp) => resp,
            // Accounts without groups have no groups resource
            Err(ApiError::Http { status: 404, .. }) => {
                debug!("Network {} has no groups resource", network_id);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(resp
            .groups
            .into_iter()
            .map(|g| GroupRecord {
                avid: g.avid,
                name: g.name,
                member_avids: g.devices,
            })
            .collect())
    }
}

/// Keep devices with a controllable product id and number them on the mesh
/// relative to the first kept device's avid.
pub(crate) fn assign_mesh_addresses(raw: Vec<RawDevice>, product_ids: &[u32]) -> Vec<DeviceRecord> {
    let mut offset: Option<u32> = None;
    let mut devices = Vec::new();

    for device in raw {
        if !product_ids.contains(&device.product_id) {
            continue;
        }

        let base = *offset.get_or_insert(device.avid);
        let mesh_address = match device
            .avid
            .checked_sub(base)
            .and_then(|n| u16::try_from(n).ok())
        {
            Some(n) => n,
            None => {
                warn!(
                    "Skipping device {} ({}): avid below mesh base {}",
                    device.avid, device.name, base
                );
                continue;
            }
        };

        devices.push(DeviceRecord {
            avid: device.avid,
            name: device.name,
            mesh_address,
            product_type: device.product_id,
            ble_address: device
                .friendly_mac_address
                .as_deref()
                .map(normalize_ble_address),
            pid: device.pid,
        });
    }

    devices
}

fn parse_host(host: &str) -> Result<Url, ApiError> {
    if host.ends_with('/') {
        Ok(Url::parse(host)?)
    } else {
        Ok(Url::parse(&format!("{host}/"))?)
    }
}

fn preview(body: &str) -> String {
    body.chars().take(BODY_PREVIEW_CHARS).collect()
}

async fn parse_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();

    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Authentication(
            "session expired or invalid credentials".into(),
        ));
    }

    let body = resp.text().await?;
    if !status.is_success() {
        return Err(ApiError::Http {
            status: status.as_u16(),
            message: preview(&body),
        });
    }

    serde_json::from_str(&body)
        .map_err(|e| ApiError::UnexpectedResponse(format!("{e} (body preview: {:?})", preview(&body))))
}
