// Raw response bodies from the Avi-on API.
//
// Only the fields the controller uses are modelled; everything else in the
// payloads is ignored by serde.

use serde::Deserialize;

#[derive(Deserialize, Debug)]
pub(crate) struct LoginResponse {
    pub credentials: Option<LoginCredentials>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct LoginCredentials {
    pub auth_token: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct UserResponse {
    pub user: Option<RawUser>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawUser {
    pub id: u64,
}

#[derive(Deserialize, Debug)]
pub(crate) struct LocationsResponse {
    pub locations: Vec<RawLocation>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawLocation {
    pub id: RawId,
    #[serde(default)]
    pub name: Option<String>,
    pub passphrase: String,
}

#[derive(Deserialize, Debug)]
pub(crate) struct DevicesResponse {
    pub abstract_devices: Vec<RawDevice>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawDevice {
    pub avid: u32,
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub name: String,
    pub product_id: u32,
    #[serde(default)]
    pub friendly_mac_address: Option<String>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct GroupsResponse {
    pub groups: Vec<RawGroup>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct RawGroup {
    pub avid: u32,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "member_avids")]
    pub devices: Vec<u32>,
}

/// Location ids arrive as numbers from the API but are handled as strings
#[derive(Deserialize, Debug)]
#[serde(untagged)]
pub(crate) enum RawId {
    Number(u64),
    Text(String),
}

impl std::fmt::Display for RawId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RawId::Number(n) => write!(f, "{n}"),
            RawId::Text(s) => f.write_str(s),
        }
    }
}
