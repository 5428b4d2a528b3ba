//! Cloud API contract.

use async_trait::async_trait;
use halo_topology::{DeviceRecord, GroupRecord};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ApiError;

/// Account login details
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCredentials {
    /// Account email
    pub email: String,
    /// Account password
    pub password: String,
}

impl AccountCredentials {
    /// Create account credentials
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for AccountCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Authenticated API session
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    /// Bearer token sent as `Authorization: Token <token>`
    pub token: String,
    /// Account user id
    pub user_id: u64,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}

/// A mesh network (cloud "location") owned by the account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Network identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Passphrase the network key is derived from
    pub passphrase: String,
}

impl fmt::Debug for NetworkRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkRecord")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Operations the controller needs from the cloud account service
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Log in and keep the session token for later calls
    async fn authenticate(&self, account: &AccountCredentials) -> Result<SessionToken, ApiError>;

    /// Networks owned by the account
    async fn list_networks(&self) -> Result<Vec<NetworkRecord>, ApiError>;

    /// Controllable devices in a network, with mesh addresses assigned
    async fn list_devices(&self, network_id: &str) -> Result<Vec<DeviceRecord>, ApiError>;

    /// Groups in a network
    async fn list_groups(&self, network_id: &str) -> Result<Vec<GroupRecord>, ApiError>;
}
