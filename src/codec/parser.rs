//! Length-derived packet framing
//!
//! The tunnel carries bare IP datagrams back to back with no prefix of its
//! own: the IP header's total-length field is the framing. The parser peeks
//! at the version nibble to pick the header layout, reads the advertised
//! length, and slices exactly one packet off the front of the buffer.

use crate::codec::errors::PacketError;
use crate::codec::packet::{IPV4_HEADER_LEN, IPV6_HEADER_LEN, IpPacket};

/// Bytes required before the IPv4 total-length field can be read
const V4_LENGTH_KNOWN: usize = 4;
/// Bytes required before the IPv6 payload-length field can be read
const V6_LENGTH_KNOWN: usize = 6;

pub struct Parser;

impl Parser {
    /// Slices one packet off the front of a buffered stream
    ///
    /// # Returns
    /// * `Ok(Some((packet, consumed)))` - a complete packet and the bytes it occupied
    /// * `Ok(None)` - the buffer does not yet hold a whole packet
    /// * `Err(PacketError::Malformed)` - the stream is desynchronized; the
    ///   caller must tear the connection down, there is no way to resume
    pub fn unmarshal(buf: &[u8]) -> Result<Option<(IpPacket, usize)>, PacketError> {
        let total = match Self::framed_len(buf)? {
            Some(total) => total,
            None => return Ok(None),
        };
        if buf.len() < total {
            return Ok(None);
        }
        let packet = IpPacket::new(buf[..total].to_vec())?;
        Ok(Some((packet, total)))
    }

    /// Total on-wire length of the packet at the head of the buffer
    ///
    /// `Ok(None)` means the fixed header is not fully buffered yet.
    pub fn framed_len(buf: &[u8]) -> Result<Option<usize>, PacketError> {
        let first = match buf.first() {
            Some(first) => *first,
            None => return Ok(None),
        };
        match first >> 4 {
            4 => {
                if buf.len() < V4_LENGTH_KNOWN {
                    return Ok(None);
                }
                let total = u16::from_be_bytes([buf[2], buf[3]]) as usize;
                if total < IPV4_HEADER_LEN {
                    return Err(PacketError::Malformed);
                }
                Ok(Some(total))
            }
            6 => {
                if buf.len() < V6_LENGTH_KNOWN {
                    return Ok(None);
                }
                let payload = u16::from_be_bytes([buf[4], buf[5]]) as usize;
                Ok(Some(IPV6_HEADER_LEN + payload))
            }
            _ => Err(PacketError::Malformed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v4_packet(total: usize) -> Vec<u8> {
        let mut buf = vec![0u8; total];
        buf[0] = 0x45;
        buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        buf
    }

    #[test]
    fn roundtrip_single_packet() {
        let wire = v4_packet(60);
        let (packet, consumed) = Parser::unmarshal(&wire).unwrap().unwrap();
        assert_eq!(consumed, 60);
        assert_eq!(packet.as_bytes(), &wire[..]);
    }

    #[test]
    fn back_to_back_packets_split_correctly() {
        let mut wire = v4_packet(28);
        wire.extend_from_slice(&v4_packet(40));
        let (first, consumed) = Parser::unmarshal(&wire).unwrap().unwrap();
        assert_eq!((first.len(), consumed), (28, 28));
        let (second, consumed) = Parser::unmarshal(&wire[28..]).unwrap().unwrap();
        assert_eq!((second.len(), consumed), (40, 40));
    }

    #[test]
    fn incomplete_header_needs_more() {
        assert_eq!(Parser::unmarshal(&[0x45, 0, 0]), Ok(None));
        assert_eq!(Parser::unmarshal(&[]), Ok(None));
    }

    #[test]
    fn incomplete_body_needs_more() {
        let wire = v4_packet(60);
        assert_eq!(Parser::unmarshal(&wire[..30]), Ok(None));
    }

    #[test]
    fn version_seven_is_malformed() {
        let mut wire = v4_packet(60);
        wire[0] = 0x75;
        assert_eq!(Parser::unmarshal(&wire), Err(PacketError::Malformed));
    }

    #[test]
    fn undersized_total_length_is_malformed() {
        let mut wire = v4_packet(60);
        wire[2..4].copy_from_slice(&8u16.to_be_bytes());
        assert_eq!(Parser::unmarshal(&wire), Err(PacketError::Malformed));
    }

    #[test]
    fn v6_framing_uses_payload_length() {
        let mut wire = vec![0u8; 48];
        wire[0] = 0x60;
        wire[4..6].copy_from_slice(&8u16.to_be_bytes());
        let (packet, consumed) = Parser::unmarshal(&wire).unwrap().unwrap();
        assert_eq!((packet.version(), consumed), (6, 48));
    }
}
