//! Wire protocol error types.

use thiserror::Error;

/// Errors raised while building a frame. These are caller bugs and are never
/// retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Payload longer than the protocol allows
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// Offending payload length
        len: usize,
        /// Protocol maximum
        max: usize,
    },

    /// Opcode byte not defined by this protocol version
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),

    /// Mesh number does not fit the 15-bit address field
    #[error("mesh address {0} does not fit in 15 bits")]
    AddressRange(u32),
}

/// Errors raised while parsing received bytes. Only structure is checked.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodingError {
    /// Fewer bytes than the smallest valid frame
    #[error("truncated frame: {0} bytes")]
    Truncated(usize),

    /// More bytes than the largest valid frame
    #[error("oversized frame: {0} bytes")]
    Oversized(usize),

    /// Trailing CRC does not match the frame contents
    #[error("frame checksum mismatch")]
    Checksum,

    /// Opcode byte not defined by this protocol version
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
}

/// Envelope sealing/opening errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Envelope shorter than its fixed overhead
    #[error("truncated envelope: {0} bytes")]
    Truncated(usize),

    /// Authentication tag did not verify (wrong key, direction or tampering)
    #[error("envelope authentication failed")]
    Authentication,

    /// Cipher refused to seal the input
    #[error("envelope sealing failed")]
    Seal,
}
