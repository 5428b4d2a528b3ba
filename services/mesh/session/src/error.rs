//! Session error types.

use halo_wire::{CryptoError, EncodingError, Sequence};
use std::time::Duration;
use thiserror::Error;

use crate::transport::TransportError;

/// Handshake failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Relay refused our proof; the network key is wrong
    #[error("relay rejected the network credentials")]
    Rejected,

    /// Relay's proof did not verify; it holds a different network key
    #[error("relay proof did not verify")]
    BadProof,

    /// Peer speaks a different handshake version
    #[error("handshake version mismatch: expected {expected}, got {got}")]
    Version {
        /// Our version
        expected: u8,
        /// Peer's version
        got: u8,
    },

    /// Message could not be parsed
    #[error("malformed handshake message: {0}")]
    Malformed(String),
}

/// Errors raised by a mesh session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Could not connect to the relay
    #[error("connect failed: {0}")]
    Connect(TransportError),

    /// Handshake did not complete
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// No acknowledgement before the send deadline
    #[error("no acknowledgement for sequence {sequence} within {timeout:?}")]
    CommandTimeout {
        /// Sequence number of the unacknowledged frame
        sequence: Sequence,
        /// Deadline that passed
        timeout: Duration,
    },

    /// Session was closed
    #[error("session closed")]
    Closed,

    /// Command could not be encoded
    #[error("encoding failed: {0}")]
    Encoding(#[from] EncodingError),

    /// Frame could not be sealed
    #[error("envelope failed: {0}")]
    Crypto(#[from] CryptoError),

    /// Connection failed mid-session
    #[error("transport failed: {0}")]
    Transport(TransportError),
}

impl SessionError {
    /// Whether a fresh connection might succeed where this one failed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SessionError::Connect(_) | SessionError::CommandTimeout { .. } | SessionError::Transport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SessionError::Transport(TransportError::Timeout).is_retryable());
        assert!(SessionError::CommandTimeout {
            sequence: Sequence::ZERO,
            timeout: Duration::from_secs(1)
        }
        .is_retryable());

        assert!(!SessionError::Closed.is_retryable());
        assert!(!SessionError::Handshake(HandshakeError::Rejected).is_retryable());
        assert!(!SessionError::Encoding(EncodingError::UnknownOpcode(1)).is_retryable());
    }
}
