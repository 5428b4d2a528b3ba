//! Encoding and decoding for the wire protocol.
//!
//! `encode` and `decode` are pure: no clocks, no randomness, no shared state.
//! Every frame carries a CRC-32 seeded with [`WIRE_VERSION`], so a frame
//! produced for a different layout version fails the checksum instead of being
//! misread.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{DecodingError, EncodingError};
use crate::frame::DecodedFrame;
use crate::header::{Address, Opcode, Sequence};

/// Wire layout version
pub const WIRE_VERSION: u8 = 1;

/// Address word + opcode + sequence
pub const HEADER_LEN: usize = 2 + 1 + 3;

/// Trailing CRC-32
pub const CHECKSUM_LEN: usize = 4;

/// Maximum payload bytes per frame
pub const MAX_PAYLOAD_LEN: usize = 10;

/// Smallest valid frame (empty payload)
pub const MIN_FRAME_LEN: usize = HEADER_LEN + CHECKSUM_LEN;

/// Largest valid frame; one BLE ATT write
pub const MAX_FRAME_LEN: usize = MIN_FRAME_LEN + MAX_PAYLOAD_LEN;

/// Encode a command frame
pub fn encode(
    destination: Address,
    opcode: Opcode,
    payload: &[u8],
    sequence: Sequence,
) -> Result<Bytes, EncodingError> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(EncodingError::PayloadTooLarge {
            len: payload.len(),
            max: MAX_PAYLOAD_LEN,
        });
    }

    let address = destination.to_wire()?;

    let mut buf = BytesMut::with_capacity(MIN_FRAME_LEN + payload.len());
    buf.put_u16_le(address);
    buf.put_u8(opcode as u8);
    buf.put_slice(&sequence.to_bytes());
    buf.put_slice(payload);

    let checksum = frame_checksum(&buf);
    buf.put_u32(checksum);

    Ok(buf.freeze())
}

/// Decode a frame received from the mesh
pub fn decode(bytes: &[u8]) -> Result<DecodedFrame, DecodingError> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(DecodingError::Truncated(bytes.len()));
    }
    if bytes.len() > MAX_FRAME_LEN {
        return Err(DecodingError::Oversized(bytes.len()));
    }

    let (body, mut trailer) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    if trailer.get_u32() != frame_checksum(body) {
        return Err(DecodingError::Checksum);
    }

    let mut buf = body;
    let address = Address::from_wire(buf.get_u16_le());
    let opcode_byte = buf.get_u8();
    let opcode =
        Opcode::try_from(opcode_byte).map_err(|_| DecodingError::UnknownOpcode(opcode_byte))?;
    let sequence = Sequence::from_bytes([buf.get_u8(), buf.get_u8(), buf.get_u8()]);
    let payload = Bytes::copy_from_slice(buf);

    Ok(DecodedFrame {
        address,
        opcode,
        payload,
        sequence,
    })
}

/// CRC-32 of a frame body, seeded with the wire version
pub fn frame_checksum(body: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[WIRE_VERSION]);
    hasher.update(body);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let bytes = encode(Address::Device(5), Opcode::SetLevel, &[0x64], Sequence::new(0x010203))
            .unwrap();

        assert_eq!(bytes.len(), MIN_FRAME_LEN + 1);
        assert_eq!(&bytes[..7], &[0x05, 0x80, 0x0A, 0x01, 0x02, 0x03, 0x64]);

        let crc = frame_checksum(&bytes[..7]);
        assert_eq!(&bytes[7..], &crc.to_be_bytes());
    }

    #[test]
    fn test_roundtrip() {
        let cases = [
            (Address::Device(12), Opcode::SetLevel, vec![0x64], Sequence::ZERO),
            (Address::Group(200), Opcode::SetColorTemp, vec![0x01, 0x0A, 0x8C], Sequence::new(77)),
            (Address::Device(0x7FFF), Opcode::Ack, vec![], Sequence::MAX),
            (Address::Group(0), Opcode::SetLevel, vec![0xAB; MAX_PAYLOAD_LEN], Sequence::new(1)),
        ];

        for (address, opcode, payload, sequence) in cases {
            let bytes = encode(address, opcode, &payload, sequence).unwrap();
            let decoded = decode(&bytes).unwrap();

            assert_eq!(decoded.address, address);
            assert_eq!(decoded.address.class(), address.class());
            assert_eq!(decoded.opcode, opcode);
            assert_eq!(decoded.payload.as_ref(), payload.as_slice());
            assert_eq!(decoded.sequence, sequence);
        }
    }

    #[test]
    fn test_deterministic() {
        let a = encode(Address::Group(3), Opcode::SetLevel, &[9], Sequence::new(42)).unwrap();
        let b = encode(Address::Group(3), Opcode::SetLevel, &[9], Sequence::new(42)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_device_and_group_differ_only_in_class_bit() {
        let device = encode(Address::Device(5), Opcode::SetLevel, &[0x64], Sequence::ZERO).unwrap();
        let group = encode(Address::Group(5), Opcode::SetLevel, &[0x64], Sequence::ZERO).unwrap();

        assert_eq!(device.len(), group.len());
        let header_diff: Vec<usize> = (0..device.len() - CHECKSUM_LEN)
            .filter(|&i| device[i] != group[i])
            .collect();
        assert_eq!(header_diff, vec![1]);
        assert_eq!(device[1] ^ group[1], 0x80);
    }

    #[test]
    fn test_payload_too_large() {
        let err = encode(
            Address::Device(1),
            Opcode::SetLevel,
            &[0; MAX_PAYLOAD_LEN + 1],
            Sequence::ZERO,
        )
        .unwrap_err();
        assert_eq!(
            err,
            EncodingError::PayloadTooLarge {
                len: MAX_PAYLOAD_LEN + 1,
                max: MAX_PAYLOAD_LEN
            }
        );
    }

    #[test]
    fn test_decode_rejects_bad_input() {
        assert_eq!(decode(&[0u8; 4]), Err(DecodingError::Truncated(4)));
        assert_eq!(
            decode(&[0u8; MAX_FRAME_LEN + 1]),
            Err(DecodingError::Oversized(MAX_FRAME_LEN + 1))
        );

        let mut bytes = encode(Address::Device(1), Opcode::SetLevel, &[1], Sequence::ZERO)
            .unwrap()
            .to_vec();
        bytes[6] ^= 0xFF;
        assert_eq!(decode(&bytes), Err(DecodingError::Checksum));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        let mut body = vec![0x01, 0x80, 0x55, 0x00, 0x00, 0x01];
        let crc = frame_checksum(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        assert_eq!(decode(&body), Err(DecodingError::UnknownOpcode(0x55)));
    }
}
