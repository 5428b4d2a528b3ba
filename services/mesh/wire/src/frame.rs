//! Logical commands and the frames built from them.
//!
//! A [`Command`] is validated once when it is created. A session turns it into
//! a [`CommandFrame`] by assigning the next sequence number; the frame is then
//! consumed by [`CommandFrame::encode`].

use bytes::Bytes;

use crate::codec::{self, MAX_PAYLOAD_LEN};
use crate::error::EncodingError;
use crate::header::{Address, Opcode, Sequence};

/// Validated command, not yet bound to a sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    destination: Address,
    opcode: Opcode,
    payload: Bytes,
}

impl Command {
    /// Create a command, checking payload length and address range
    pub fn new(
        destination: Address,
        opcode: Opcode,
        payload: impl Into<Bytes>,
    ) -> Result<Self, EncodingError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(EncodingError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }
        destination.to_wire()?;

        Ok(Self {
            destination,
            opcode,
            payload,
        })
    }

    /// Wire-level destination
    pub fn destination(&self) -> Address {
        self.destination
    }

    /// Command opcode
    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    /// Command payload
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Bind the command to a sequence number
    pub fn frame(&self, sequence: Sequence) -> CommandFrame {
        CommandFrame {
            destination: self.destination,
            opcode: self.opcode,
            payload: self.payload.clone(),
            sequence,
        }
    }
}

/// Command bound to a sequence number, ready to encode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    /// Wire-level destination
    pub destination: Address,
    /// Command opcode
    pub opcode: Opcode,
    /// Command payload
    pub payload: Bytes,
    /// Sequence number assigned by the session
    pub sequence: Sequence,
}

impl CommandFrame {
    /// Encode to wire bytes, consuming the frame
    pub fn encode(self) -> Result<Bytes, EncodingError> {
        codec::encode(self.destination, self.opcode, &self.payload, self.sequence)
    }
}

/// Frame parsed from bytes received from the mesh
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Address carried in the frame (the source, for acknowledgements)
    pub address: Address,
    /// Frame opcode
    pub opcode: Opcode,
    /// Frame payload
    pub payload: Bytes,
    /// Frame sequence number
    pub sequence: Sequence,
}

/// Payload builders for the command opcodes
pub mod payload {
    /// Brightness payload for [`Opcode::SetLevel`](crate::Opcode::SetLevel)
    pub fn level(level: u8) -> [u8; 1] {
        [level]
    }

    /// Color temperature payload for
    /// [`Opcode::SetColorTemp`](crate::Opcode::SetColorTemp)
    pub fn color_temp(kelvin: u16) -> [u8; 3] {
        let [hi, lo] = kelvin.to_be_bytes();
        [0x01, hi, lo]
    }
}
