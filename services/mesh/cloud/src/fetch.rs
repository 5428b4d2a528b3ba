//! Build a topology snapshot from the cloud.

use halo_topology::TopologySnapshot;
use halo_wire::MeshKey;
use tracing::info;

use crate::api::{AccountCredentials, CloudApi};
use crate::error::ApiError;

/// Authenticate and fetch everything needed to drive one network.
///
/// With `network_id` unset the account's first network is used.
pub async fn fetch_topology(
    api: &dyn CloudApi,
    account: &AccountCredentials,
    network_id: Option<&str>,
) -> Result<TopologySnapshot, ApiError> {
    api.authenticate(account).await?;

    let networks = api.list_networks().await?;
    let network = match network_id {
        Some(id) => networks
            .into_iter()
            .find(|n| n.id == id)
            .ok_or_else(|| ApiError::UnknownNetwork(id.to_string()))?,
        None => networks.into_iter().next().ok_or(ApiError::NoNetworks)?,
    };

    let devices = api.list_devices(&network.id).await?;
    let groups = api.list_groups(&network.id).await?;

    info!(
        "Fetched topology for network {} ({}): {} devices, {} groups",
        network.id,
        network.name,
        devices.len(),
        groups.len()
    );

    Ok(TopologySnapshot::new(
        network.id,
        network.name,
        MeshKey::from_passphrase(&network.passphrase),
        devices,
        groups,
    ))
}
