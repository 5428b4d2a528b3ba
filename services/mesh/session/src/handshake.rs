//! Session handshake.
//!
//! Runs once, immediately after the BLE connection opens:
//!
//! ```text
//! HELLO   host -> relay  A1 | version | host_nonce[8] | proof[8]
//! WELCOME relay -> host  A2 | status | version | device_nonce[8] | proof[8]
//! ```
//!
//! Both proofs are truncated HMACs keyed by the network key, so each side
//! learns whether the other holds the same key without revealing it. The
//! session key is derived from both nonces.

use bytes::{BufMut, Bytes, BytesMut};
use halo_wire::{NetworkCredentials, SessionKey, PROOF_LEN};
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::error::{HandshakeError, SessionError};
use crate::transport::{BleTransport, ConnectionHandle};

/// Handshake protocol version
pub const HANDSHAKE_VERSION: u8 = 1;

/// Nonce length for both sides
pub const NONCE_LEN: usize = 8;

const HELLO_TYPE: u8 = 0xA1;
const WELCOME_TYPE: u8 = 0xA2;

const HELLO_LEN: usize = 2 + NONCE_LEN + PROOF_LEN;
const WELCOME_LEN: usize = 3 + NONCE_LEN + PROOF_LEN;

const HELLO_LABEL: &[u8] = b"halo/hello";
const WELCOME_LABEL: &[u8] = b"halo/welcome";

/// Relay's verdict on the HELLO
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WelcomeStatus {
    /// Proof verified; session key derived
    Accepted = 0,
    /// Proof did not verify or version unsupported
    Rejected = 1,
}

/// HELLO message data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    /// Protocol version
    pub version: u8,
    /// Host nonce
    pub host_nonce: [u8; NONCE_LEN],
    /// Proof of network key possession
    pub proof: [u8; PROOF_LEN],
}

impl Hello {
    /// Build a HELLO for the given nonce
    pub fn new(credentials: &NetworkCredentials, host_nonce: [u8; NONCE_LEN]) -> Self {
        Self {
            version: HANDSHAKE_VERSION,
            host_nonce,
            proof: credentials.proof(HELLO_LABEL, &[&host_nonce]),
        }
    }

    /// Serialize for the wire
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HELLO_LEN);
        buf.put_u8(HELLO_TYPE);
        buf.put_u8(self.version);
        buf.put_slice(&self.host_nonce);
        buf.put_slice(&self.proof);
        buf.freeze()
    }

    /// Parse from the wire
    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != HELLO_LEN {
            return Err(HandshakeError::Malformed(format!(
                "HELLO of {} bytes, expected {}",
                bytes.len(),
                HELLO_LEN
            )));
        }
        if bytes[0] != HELLO_TYPE {
            return Err(HandshakeError::Malformed(format!(
                "expected HELLO, got type 0x{:02x}",
                bytes[0]
            )));
        }

        let mut host_nonce = [0u8; NONCE_LEN];
        host_nonce.copy_from_slice(&bytes[2..2 + NONCE_LEN]);
        let mut proof = [0u8; PROOF_LEN];
        proof.copy_from_slice(&bytes[2 + NONCE_LEN..]);

        Ok(Self {
            version: bytes[1],
            host_nonce,
            proof,
        })
    }
}

/// WELCOME message data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Welcome {
    /// Relay verdict
    pub status: WelcomeStatus,
    /// Protocol version
    pub version: u8,
    /// Relay nonce
    pub device_nonce: [u8; NONCE_LEN],
    /// Proof of network key possession
    pub proof: [u8; PROOF_LEN],
}

impl Welcome {
    /// Serialize for the wire
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WELCOME_LEN);
        buf.put_u8(WELCOME_TYPE);
        buf.put_u8(self.status as u8);
        buf.put_u8(self.version);
        buf.put_slice(&self.device_nonce);
        buf.put_slice(&self.proof);
        buf.freeze()
    }

    /// Parse from the wire
    pub fn parse(bytes: &[u8]) -> Result<Self, HandshakeError> {
        if bytes.len() != WELCOME_LEN {
            return Err(HandshakeError::Malformed(format!(
                "WELCOME of {} bytes, expected {}",
                bytes.len(),
                WELCOME_LEN
            )));
        }
        if bytes[0] != WELCOME_TYPE {
            return Err(HandshakeError::Malformed(format!(
                "expected WELCOME, got type 0x{:02x}",
                bytes[0]
            )));
        }

        let status = match bytes[1] {
            0 => WelcomeStatus::Accepted,
            1 => WelcomeStatus::Rejected,
            other => {
                return Err(HandshakeError::Malformed(format!(
                    "unknown WELCOME status {}",
                    other
                )))
            }
        };

        let mut device_nonce = [0u8; NONCE_LEN];
        device_nonce.copy_from_slice(&bytes[3..3 + NONCE_LEN]);
        let mut proof = [0u8; PROOF_LEN];
        proof.copy_from_slice(&bytes[3 + NONCE_LEN..]);

        Ok(Self {
            status,
            version: bytes[2],
            device_nonce,
            proof,
        })
    }
}

/// Run the host side of the handshake on an open connection
pub async fn perform(
    transport: &dyn BleTransport,
    handle: ConnectionHandle,
    credentials: &NetworkCredentials,
    timeout: Duration,
) -> Result<SessionKey, SessionError> {
    let host_nonce: [u8; NONCE_LEN] = rand::random();
    let hello = Hello::new(credentials, host_nonce);

    transport
        .write(handle, &hello.encode())
        .await
        .map_err(SessionError::Transport)?;
    debug!(
        "Sent HELLO on {} for network {}",
        handle,
        credentials.network_id()
    );

    let reply = transport
        .read_notification(handle, timeout)
        .await
        .map_err(SessionError::Transport)?;
    trace!("Received {} handshake bytes on {}", reply.len(), handle);

    let welcome = Welcome::parse(&reply)?;
    verify_welcome(credentials, &host_nonce, &welcome)?;

    debug!("Handshake complete on {}", handle);
    Ok(credentials.derive_session_key(&host_nonce, &welcome.device_nonce))
}

fn verify_welcome(
    credentials: &NetworkCredentials,
    host_nonce: &[u8; NONCE_LEN],
    welcome: &Welcome,
) -> Result<(), HandshakeError> {
    if welcome.version != HANDSHAKE_VERSION {
        return Err(HandshakeError::Version {
            expected: HANDSHAKE_VERSION,
            got: welcome.version,
        });
    }
    if welcome.status == WelcomeStatus::Rejected {
        return Err(HandshakeError::Rejected);
    }
    if !credentials.verify_proof(WELCOME_LABEL, &[host_nonce, &welcome.device_nonce], &welcome.proof)
    {
        return Err(HandshakeError::BadProof);
    }
    Ok(())
}

/// Run the relay side of the handshake.
///
/// Returns the WELCOME to send back and, when the HELLO verified, the session
/// key. A HELLO that cannot be parsed at all is an error and gets no reply.
pub fn respond(
    credentials: &NetworkCredentials,
    hello: &[u8],
    device_nonce: [u8; NONCE_LEN],
) -> Result<(Bytes, Option<SessionKey>), HandshakeError> {
    let hello = Hello::parse(hello)?;

    let accepted = hello.version == HANDSHAKE_VERSION
        && credentials.verify_proof(HELLO_LABEL, &[&hello.host_nonce], &hello.proof);

    if !accepted {
        warn!(
            "Rejecting HELLO for network {} (version {})",
            credentials.network_id(),
            hello.version
        );
    }

    let welcome = Welcome {
        status: if accepted {
            WelcomeStatus::Accepted
        } else {
            WelcomeStatus::Rejected
        },
        version: HANDSHAKE_VERSION,
        device_nonce,
        proof: credentials.proof(WELCOME_LABEL, &[&hello.host_nonce, &device_nonce]),
    };

    let key = accepted.then(|| credentials.derive_session_key(&hello.host_nonce, &device_nonce));
    Ok((welcome.encode(), key))
}
