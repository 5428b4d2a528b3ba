//! Frame header fields: addressing, opcodes and sequence numbers.
//!
//! The header is the fixed six-byte prefix of every frame. Device and group
//! traffic use the same layout; only the class bit of the address word
//! differs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EncodingError;

/// Class bit in the 16-bit address word
const CLASS_BIT: u16 = 0x8000;

/// Largest mesh number representable in the address word
const MAX_MESH_NUMBER: u32 = 0x7FFF;

/// Number of distinct sequence values (24-bit counter)
pub const SEQUENCE_MODULUS: u32 = 1 << 24;

/// Address class carried in the top bit of the address word
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressClass {
    /// A single device
    Device,
    /// A group of devices
    Group,
}

/// Mesh-addressable entity within one network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "class", content = "avid", rename_all = "lowercase")]
pub enum Address {
    /// A single device
    Device(u32),
    /// A group of devices
    Group(u32),
}

impl Address {
    /// Address class of this entity
    pub fn class(self) -> AddressClass {
        match self {
            Address::Device(_) => AddressClass::Device,
            Address::Group(_) => AddressClass::Group,
        }
    }

    /// Numeric identifier, without the class
    pub fn number(self) -> u32 {
        match self {
            Address::Device(n) | Address::Group(n) => n,
        }
    }

    /// Pack into the 16-bit address word used on the wire
    pub fn to_wire(self) -> Result<u16, EncodingError> {
        let number = self.number();
        if number > MAX_MESH_NUMBER {
            return Err(EncodingError::AddressRange(number));
        }

        let word = number as u16;
        Ok(match self.class() {
            AddressClass::Device => word | CLASS_BIT,
            AddressClass::Group => word,
        })
    }

    /// Unpack a 16-bit address word
    pub fn from_wire(word: u16) -> Self {
        let number = u32::from(word & !CLASS_BIT);
        if word & CLASS_BIT != 0 {
            Address::Device(number)
        } else {
            Address::Group(number)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Device(n) => write!(f, "device:{}", n),
            Address::Group(n) => write!(f, "group:{}", n),
        }
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, number) = s
            .split_once(':')
            .ok_or_else(|| format!("expected device:<avid> or group:<avid>, got {:?}", s))?;

        let number: u32 = number
            .trim()
            .parse()
            .map_err(|_| format!("invalid avid {:?}", number))?;

        match class.trim().to_ascii_lowercase().as_str() {
            "device" | "d" => Ok(Address::Device(number)),
            "group" | "g" => Ok(Address::Group(number)),
            other => Err(format!("unknown address class {:?}", other)),
        }
    }
}

/// Command opcodes understood by the mesh firmware
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    /// Set brightness level (payload: one byte, 0..=255)
    SetLevel = 0x0A,
    /// Set color temperature (payload: `01`, kelvin big-endian)
    SetColorTemp = 0x1D,
    /// Acknowledgement from the mesh
    Ack = 0x7F,
}

impl TryFrom<u8> for Opcode {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x0A => Ok(Opcode::SetLevel),
            0x1D => Ok(Opcode::SetColorTemp),
            0x7F => Ok(Opcode::Ack),
            _ => Err(EncodingError::UnknownOpcode(value)),
        }
    }
}

/// 24-bit frame sequence number, wrapping silently
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Sequence(u32);

impl Sequence {
    /// First sequence number of a session
    pub const ZERO: Sequence = Sequence(0);

    /// Largest sequence number before wraparound
    pub const MAX: Sequence = Sequence(SEQUENCE_MODULUS - 1);

    /// Create a sequence number, keeping the low 24 bits
    pub fn new(value: u32) -> Self {
        Self(value % SEQUENCE_MODULUS)
    }

    /// Raw counter value
    pub fn value(self) -> u32 {
        self.0
    }

    /// Following sequence number (wraps to zero after `MAX`)
    pub fn next(self) -> Self {
        Self::new(self.0.wrapping_add(1))
    }

    /// Three big-endian bytes as carried on the wire
    pub fn to_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    /// Parse three big-endian bytes
    pub fn from_bytes(bytes: [u8; 3]) -> Self {
        Self(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
