//! Basic usage example for the vulp wire protocol.

use bytes::BytesMut;
use vulp_wire::{
    build_debug_command, FrameDecoder, Login, Packet, PacketType, SessionKey,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Vulp Wire Protocol Example ===\n");

    // 1. Build a login packet (control namespace, no sequence id)
    println!("1. Creating a LOGIN packet...");
    let login = Login {
        protocol_version: 1,
        last_received_id: 0,
        session_key: SessionKey::ZERO,
    };
    let login_packet = Packet::control(PacketType::LOGIN, login.encode())?;
    let login_bytes = login_packet.encode(0)?;
    println!("   Encoded login size: {} bytes", login_bytes.len());

    // 2. Build a reliable packet carrying an ack cursor
    println!("\n2. Creating a reliable debug command...");
    let command = Packet::reliable(PacketType::DEBUG_COMMAND, 1, build_debug_command("hello"))?;
    let command_bytes = command.encode(0)?;
    println!("   Encoded command size: {} bytes", command_bytes.len());

    // 3. Feed both through the decoder in awkward chunks
    println!("\n3. Decoding from a chunked stream...");
    let mut stream = login_bytes.to_vec();
    stream.extend_from_slice(&command_bytes);

    let mut decoder = FrameDecoder::new();
    let mut buf = BytesMut::new();
    for chunk in stream.chunks(5) {
        buf.extend_from_slice(chunk);
        while let Some(frame) = decoder.decode(&mut buf)? {
            println!(
                "   type={} seq={:?} ack={:?} payload={} bytes",
                frame.packet.packet_type(),
                frame.packet.sequence_id(),
                frame.peer_ack_id,
                frame.packet.payload().len()
            );
        }
    }

    println!("\n=== Example completed successfully! ===");
    Ok(())
}
