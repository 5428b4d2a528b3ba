//! Mesh frame codec, network credentials and session envelope for HALO Home.
//!
//! This crate provides the transport-independent half of the mesh command
//! protocol: addressing, frame encoding/decoding, per-network key material,
//! and the authenticated envelope a session wraps around every frame.
//!
//! ## Features
//!
//! - **Unified Addressing**: device and group traffic share one frame shape
//! - **Deterministic Encoding**: identical inputs always produce identical bytes
//! - **Single-Write Frames**: the largest frame fits one 20-byte BLE write
//! - **Session Envelope**: AES-128-GCM sealing keyed per connection
//!
//! ## Wire Format (version 1)
//!
//! ```text
//! +----------------------+----------------------------------------+
//! | u16 address (LE)     | bit 15 = class (1 device, 0 group)     |
//! +----------------------+----------------------------------------+
//! | u8 opcode            | SetLevel / SetColorTemp / Ack          |
//! +----------------------+----------------------------------------+
//! | u24 sequence (BE)    | per-session counter, wraps             |
//! +----------------------+----------------------------------------+
//! | payload              | 0..=10 bytes                           |
//! +----------------------+----------------------------------------+
//! | u32 crc32 (BE)       | over version byte + preceding bytes    |
//! +----------------------+----------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod credentials;
#[cfg(feature = "crypto")]
pub mod crypto;
pub mod error;
pub mod frame;
pub mod header;

// Re-export main types
pub use codec::{
    decode, encode, frame_checksum, CHECKSUM_LEN, HEADER_LEN, MAX_FRAME_LEN, MAX_PAYLOAD_LEN,
    MIN_FRAME_LEN, WIRE_VERSION,
};
pub use credentials::{MeshKey, NetworkCredentials, SessionKey, KEY_LEN, PROOF_LEN};
pub use error::{CryptoError, DecodingError, EncodingError};
pub use frame::{payload, Command, CommandFrame, DecodedFrame};
pub use header::{Address, AddressClass, Opcode, Sequence, SEQUENCE_MODULUS};

#[cfg(feature = "crypto")]
pub use crypto::{open, seal, Direction, ENVELOPE_OVERHEAD, MAX_ENVELOPE_LEN};
