//! Mesh controller for HALO Home networks.
//!
//! Ties the pieces together: network state comes from the local cache or the
//! cloud account, relays are discovered over BLE, and commands are delivered
//! through a single keyed session.
//!
//! ## Example
//!
//! ```rust,no_run
//! use halo_cloud::{AccountCredentials, AvionClient, ClientConfig};
//! use halo_controller::{ControllerConfig, MeshController};
//! use halo_session::SimulatedMesh;
//! use halo_storage::MemoryCache;
//! use halo_wire::{Address, NetworkCredentials};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mesh = SimulatedMesh::new(NetworkCredentials::from_passphrase("N1", "passphrase"));
//! let controller = MeshController::new(
//!     Arc::new(mesh),
//!     Arc::new(AvionClient::new(ClientConfig::default())?),
//!     Arc::new(MemoryCache::new()),
//!     ControllerConfig::default(),
//! )
//! .with_account(AccountCredentials::new("me@example.com", "hunter2"));
//!
//! controller.set_level(Address::Device(12), 100).await?;
//! controller.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod controller;
pub mod error;

pub use controller::{ControllerConfig, LinkState, MeshController};
pub use error::{FailureKind, MeshError};
