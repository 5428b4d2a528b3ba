//! Session envelope: AES-128-GCM sealing of encoded frames.
//!
//! ```text
//! [sequence u24 BE] ‖ AES-128-GCM(session_key, nonce, frame, aad = sequence)
//! nonce = "HALO" ‖ direction ‖ 00 00 00 00 ‖ sequence
//! ```
//!
//! The sequence prefix lets the receiver rebuild the nonce. Each direction
//! uses its own nonce space, so a host frame and a mesh frame with the same
//! sequence never share a nonce under one session key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::MAX_FRAME_LEN;
use crate::credentials::SessionKey;
use crate::error::CryptoError;
use crate::header::Sequence;

const NONCE_PREFIX: &[u8; 4] = b"HALO";
const SEQUENCE_LEN: usize = 3;
const TAG_LEN: usize = 16;

/// Bytes an envelope adds around a frame
pub const ENVELOPE_OVERHEAD: usize = SEQUENCE_LEN + TAG_LEN;

/// Largest envelope produced for a valid frame
pub const MAX_ENVELOPE_LEN: usize = MAX_FRAME_LEN + ENVELOPE_OVERHEAD;

/// Direction of travel, mixed into the nonce
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Host to relay
    ToMesh = 0,
    /// Relay to host
    FromMesh = 1,
}

fn nonce(direction: Direction, sequence: Sequence) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(NONCE_PREFIX);
    nonce[4] = direction as u8;
    nonce[9..].copy_from_slice(&sequence.to_bytes());
    nonce
}

fn cipher(key: &SessionKey) -> Aes128Gcm {
    Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(key.as_bytes()))
}

/// Seal an encoded frame for transmission
pub fn seal(
    key: &SessionKey,
    direction: Direction,
    sequence: Sequence,
    frame: &[u8],
) -> Result<Bytes, CryptoError> {
    let seq = sequence.to_bytes();
    let nonce = nonce(direction, sequence);

    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: frame,
                aad: &seq,
            },
        )
        .map_err(|_| CryptoError::Seal)?;

    let mut buf = BytesMut::with_capacity(SEQUENCE_LEN + ciphertext.len());
    buf.put_slice(&seq);
    buf.put_slice(&ciphertext);
    Ok(buf.freeze())
}

/// Open a received envelope, returning its sequence and the inner frame
pub fn open(
    key: &SessionKey,
    direction: Direction,
    envelope: &[u8],
) -> Result<(Sequence, Bytes), CryptoError> {
    if envelope.len() < ENVELOPE_OVERHEAD {
        return Err(CryptoError::Truncated(envelope.len()));
    }

    let (seq, ciphertext) = envelope.split_at(SEQUENCE_LEN);
    let sequence = Sequence::from_bytes([seq[0], seq[1], seq[2]]);
    let nonce = nonce(direction, sequence);

    let plaintext = cipher(key)
        .decrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: ciphertext,
                aad: seq,
            },
        )
        .map_err(|_| CryptoError::Authentication)?;

    Ok((sequence, Bytes::from(plaintext)))
}
