//! BLE transport contract, relay selection, handshake and mesh sessions.
//!
//! This crate provides everything between an encoded frame and the radio:
//! the async transport contract, ordering of discovered relays, the key
//! handshake run on every new connection, and the session that keeps one
//! connection's key and sequence counter across commands.
//!
//! ## Features
//!
//! - **Transport Contract**: `BleTransport` async trait, radio-agnostic
//! - **Relay Selection**: strongest-signal-first, stable for ties
//! - **Handshake**: mutual proof of network key, per-connection session key
//! - **Serialized Sends**: FIFO gate, one frame in flight, ordered sequences
//! - **Simulated Mesh**: in-process relay for tests and dry runs
//! - **btleplug Transport**: real radio behind the `ble` feature
//!
//! ## Example
//!
//! ```rust,no_run
//! use halo_session::{select, Candidate, MeshSession, SessionConfig, SimulatedMesh};
//! use halo_wire::{payload, Address, Command, NetworkCredentials, Opcode};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let credentials = NetworkCredentials::from_passphrase("N1", "passphrase");
//! let mesh = SimulatedMesh::new(credentials.clone()).with_device("aa:bb:cc:dd:ee:0c", -50);
//!
//! let relay = select(vec![Candidate {
//!     avid: 12,
//!     mesh_address: 12,
//!     signal_strength: -50,
//!     ble_address: "aa:bb:cc:dd:ee:0c".into(),
//! }])
//! .remove(0);
//!
//! let session =
//!     MeshSession::open(Arc::new(mesh), relay, &credentials, SessionConfig::default()).await?;
//! let command = Command::new(Address::Device(12), Opcode::SetLevel, payload::level(100).to_vec())?;
//! let ack = session.send(&command).await?;
//! println!("acknowledged seq={}", ack.sequence);
//! session.close().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

#[cfg(feature = "ble")]
pub mod btle;
pub mod error;
pub mod handshake;
pub mod selector;
pub mod session;
pub mod sim;
pub mod transport;

// Re-export main types
pub use error::{HandshakeError, SessionError};
pub use selector::{dedupe, from_advertisements, select, Candidate};
pub use session::{Ack, MeshSession, SessionConfig, SessionStats};
pub use sim::{DeliveredFrame, SimulatedMesh};
pub use transport::{Advertisement, BleTransport, ConnectionHandle, TransportError};

#[cfg(feature = "ble")]
pub use btle::BtleplugTransport;
