//! Basic usage example for the HALO mesh wire protocol.

use halo_wire::{
    decode, open, payload, seal, Address, Command, Direction, NetworkCredentials, Opcode, Sequence,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== HALO Mesh Wire Protocol Example ===\n");

    // 1. Build a command for a single device
    println!("1. Creating a SetLevel command for device 12...");
    let command = Command::new(
        Address::Device(12),
        Opcode::SetLevel,
        payload::level(0x64).to_vec(),
    )?;

    let frame = command.frame(Sequence::ZERO).encode()?;
    println!("   Encoded frame: {} bytes {:02x?}", frame.len(), frame.as_ref());

    // 2. Decode it again
    println!("\n2. Decoding the frame...");
    let decoded = decode(&frame)?;
    println!("   Address: {}", decoded.address);
    println!("   Opcode: {:?}", decoded.opcode);
    println!("   Sequence: {}", decoded.sequence);

    // 3. Group traffic uses the same layout
    println!("\n3. Same command addressed to group 200...");
    let group = Command::new(
        Address::Group(200),
        Opcode::SetColorTemp,
        payload::color_temp(2700).to_vec(),
    )?;
    let group_frame = group.frame(Sequence::new(1)).encode()?;
    println!("   Encoded frame: {:02x?}", group_frame.as_ref());

    // 4. Seal for the air with a session key
    println!("\n4. Sealing with a session key...");
    let credentials = NetworkCredentials::from_passphrase("N1", "example passphrase");
    println!("   Network key: {:?}", credentials.network_key());

    let session_key = credentials.derive_session_key(&[1; 8], &[2; 8]);
    let envelope = seal(&session_key, Direction::ToMesh, Sequence::ZERO, &frame)?;
    println!("   Envelope: {} bytes", envelope.len());

    let (sequence, opened) = open(&session_key, Direction::ToMesh, &envelope)?;
    assert_eq!(opened, frame);
    println!("   Opened sequence {} successfully", sequence);

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
