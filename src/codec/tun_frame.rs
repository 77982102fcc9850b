//! TUN frame prefix codec
//!
//! TUN devices present layer-3 frames: a 4-byte prefix of {u16 flags, u16
//! protocol family} in network byte order, followed by the IP datagram. The
//! prefix exists only at the device boundary; everything past the device
//! task works on bare packets.

use crate::codec::errors::PacketError;
use crate::codec::packet::IpPacket;

/// Frame prefix: flags (2 bytes) + family (2 bytes)
pub const PREFIX_LEN: usize = 4;

pub const AF_INET: u16 = 2;

#[cfg(target_os = "macos")]
pub const AF_INET6: u16 = 30;
#[cfg(not(target_os = "macos"))]
pub const AF_INET6: u16 = 10;

/// Wraps a packet in a TUN frame, family chosen from the version nibble
pub fn encode(packet: &IpPacket) -> Vec<u8> {
    wrap_raw(packet.as_bytes())
}

/// Prefixes raw datagram bytes without validating them
///
/// The device task uses this on the read path, where the kernel has already
/// produced the packet; validation happens in the loops that consume frames.
pub fn wrap_raw(payload: &[u8]) -> Vec<u8> {
    let family = match payload.first().map(|b| b >> 4) {
        Some(6) => AF_INET6,
        _ => AF_INET,
    };
    let mut frame = Vec::with_capacity(PREFIX_LEN + payload.len());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&family.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Strips the prefix and validates the embedded packet
pub fn decode(frame: &[u8]) -> Result<IpPacket, PacketError> {
    if frame.len() < PREFIX_LEN {
        return Err(PacketError::ShortRead);
    }
    IpPacket::new(frame[PREFIX_LEN..].to_vec())
}

/// Payload bytes of a frame, without packet validation
pub fn payload(frame: &[u8]) -> Result<&[u8], PacketError> {
    if frame.len() < PREFIX_LEN {
        return Err(PacketError::ShortRead);
    }
    Ok(&frame[PREFIX_LEN..])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_packet(total: usize) -> IpPacket {
        let mut buf = vec![0u8; total];
        buf[0] = 0x45;
        buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        IpPacket::new(buf).unwrap()
    }

    #[test]
    fn encode_sets_family_and_zero_flags() {
        let frame = encode(&v4_packet(20));
        assert_eq!(&frame[..2], &[0, 0]);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), AF_INET);
        assert_eq!(frame.len(), PREFIX_LEN + 20);
    }

    #[test]
    fn decode_inverts_encode() {
        let packet = v4_packet(36);
        let decoded = decode(&encode(&packet)).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn decode_rejects_runt_frame() {
        assert_eq!(decode(&[0, 0, 0]), Err(PacketError::ShortRead));
    }

    #[test]
    fn v6_payload_gets_v6_family() {
        let mut buf = vec![0u8; 40];
        buf[0] = 0x60;
        let frame = wrap_raw(&buf);
        assert_eq!(u16::from_be_bytes([frame[2], frame[3]]), AF_INET6);
    }
}
