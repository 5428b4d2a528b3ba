//! Avi-on cloud account API client for HALO Home.
//!
//! The cloud is the source of truth for which networks an account owns, the
//! passphrase each network's key is derived from, and the devices and groups
//! in it. The controller only needs it when the local cache is empty or a
//! refresh is requested.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod client;
pub mod error;
pub mod fetch;
mod models;

pub use api::{AccountCredentials, CloudApi, NetworkRecord, SessionToken};
pub use client::{AvionClient, ClientConfig, DEFAULT_HOST, DEFAULT_PRODUCT_IDS};
pub use error::ApiError;
pub use fetch::fetch_topology;
