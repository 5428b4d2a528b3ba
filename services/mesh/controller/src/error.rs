//! Controller error types.

use halo_session::{HandshakeError, SessionError, TransportError};
use halo_wire::{Address, EncodingError, Sequence};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the mesh controller
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MeshError {
    /// Command could not be built
    #[error("invalid command: {0}")]
    Encoding(#[from] EncodingError),

    /// Destination is not part of the network, even after a refresh
    #[error("unknown destination {0}")]
    UnknownDestination(Address),

    /// Scan found no usable relay, or every candidate refused the connection
    #[error("no relay available: {0}")]
    NoRelayAvailable(String),

    /// Relay rejected the network credentials during the handshake
    #[error("mesh authentication failed: {0}")]
    Authentication(HandshakeError),

    /// No acknowledgement after the retry
    #[error("no acknowledgement for sequence {sequence} within {timeout:?}")]
    CommandTimeout {
        /// Sequence number of the last unacknowledged frame
        sequence: Sequence,
        /// Send deadline
        timeout: Duration,
    },

    /// Cloud unreachable and nothing cached
    #[error("HALO Home cloud unavailable: {0}")]
    ApiUnavailable(String),

    /// Radio or connection failure
    #[error("transport failed: {0}")]
    Transport(TransportError),

    /// Controller was closed
    #[error("controller closed")]
    Closed,
}

/// User-facing classification of a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// No relay in range or the connection dropped
    Unreachable,
    /// Network key does not match the mesh
    CredentialsInvalid,
    /// Mesh did not acknowledge the command
    NotAcknowledged,
    /// Command or destination is wrong
    InvalidCommand,
    /// Cloud unreachable with no cached state
    Offline,
    /// Controller was shut down
    Closed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Unreachable => "unreachable",
            FailureKind::CredentialsInvalid => "credentials invalid",
            FailureKind::NotAcknowledged => "not acknowledged",
            FailureKind::InvalidCommand => "invalid command",
            FailureKind::Offline => "offline",
            FailureKind::Closed => "closed",
        };
        f.write_str(name)
    }
}

impl MeshError {
    /// Classify the error for the user
    pub fn kind(&self) -> FailureKind {
        match self {
            MeshError::Encoding(_) | MeshError::UnknownDestination(_) => {
                FailureKind::InvalidCommand
            }
            MeshError::NoRelayAvailable(_) | MeshError::Transport(_) => FailureKind::Unreachable,
            MeshError::Authentication(HandshakeError::Rejected | HandshakeError::BadProof) => {
                FailureKind::CredentialsInvalid
            }
            MeshError::Authentication(_) => FailureKind::Unreachable,
            MeshError::CommandTimeout { .. } => FailureKind::NotAcknowledged,
            MeshError::ApiUnavailable(_) => FailureKind::Offline,
            MeshError::Closed => FailureKind::Closed,
        }
    }

    /// What the user can do about it
    pub fn remedy(&self) -> &'static str {
        match self.kind() {
            FailureKind::Unreachable => {
                "Move closer to a HALO Home device and make sure Bluetooth is on"
            }
            FailureKind::CredentialsInvalid => {
                "Network key rejected; run `halo refresh` to re-authenticate with HALO Home"
            }
            FailureKind::NotAcknowledged => "The mesh did not answer; retry in a few seconds",
            FailureKind::InvalidCommand => {
                "Check the target id and value; `halo devices` and `halo groups` list valid targets"
            }
            FailureKind::Offline => {
                "HALO Home cloud unreachable and no cached network; connect to the internet and retry"
            }
            FailureKind::Closed => "The controller was shut down",
        }
    }
}

impl From<SessionError> for MeshError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Connect(e) | SessionError::Transport(e) => MeshError::Transport(e),
            SessionError::Handshake(e) => MeshError::Authentication(e),
            SessionError::CommandTimeout { sequence, timeout } => {
                MeshError::CommandTimeout { sequence, timeout }
            }
            SessionError::Closed => MeshError::Closed,
            SessionError::Encoding(e) => MeshError::Encoding(e),
            SessionError::Crypto(e) => MeshError::Transport(TransportError::Adapter(format!(
                "envelope: {}",
                e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            MeshError::Authentication(HandshakeError::Rejected).kind(),
            FailureKind::CredentialsInvalid
        );
        assert_eq!(
            MeshError::UnknownDestination(Address::Device(7)).kind(),
            FailureKind::InvalidCommand
        );
        assert_eq!(
            MeshError::ApiUnavailable("down".into()).kind(),
            FailureKind::Offline
        );
        assert_eq!(
            MeshError::Transport(TransportError::Timeout).kind(),
            FailureKind::Unreachable
        );
    }

    #[test]
    fn test_session_error_mapping() {
        let timeout = SessionError::CommandTimeout {
            sequence: Sequence::new(4),
            timeout: Duration::from_secs(2),
        };
        assert_eq!(
            MeshError::from(timeout),
            MeshError::CommandTimeout {
                sequence: Sequence::new(4),
                timeout: Duration::from_secs(2)
            }
        );
        assert_eq!(MeshError::from(SessionError::Closed), MeshError::Closed);
        assert_eq!(
            MeshError::from(SessionError::Handshake(HandshakeError::BadProof)).kind(),
            FailureKind::CredentialsInvalid
        );
    }

    #[test]
    fn test_every_kind_has_a_remedy() {
        let errors = [
            MeshError::Closed,
            MeshError::NoRelayAvailable("none heard".into()),
            MeshError::CommandTimeout {
                sequence: Sequence::ZERO,
                timeout: Duration::from_secs(1),
            },
        ];
        for e in errors {
            assert!(!e.remedy().is_empty());
        }
    }
}
