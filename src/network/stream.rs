//! Cipher-wrapped packet stream
//!
//! The wire is a concatenation of sealed datagrams, back to back, with no
//! framing beyond the IP header's own total-length field: the stream suites
//! are length-preserving and the AEAD suites add only their fixed tag under
//! a nonce both ends derive locally. To find a record boundary the reader
//! decrypts the first few ciphertext bytes through `peek_prefix`, reads the
//! plaintext length fields with the ordinary parser, and adds the suite's
//! overhead; the record is still authenticated in full before any byte is
//! trusted. Each half is owned by exactly one task and keeps its own record
//! counter, which stays in sync with the peer because TCP is a FIFO.

use crate::codec::errors::PacketError;
use crate::codec::packet::IpPacket;
use crate::codec::parser::Parser;
use crate::crypto::{Cipher, Direction, record_nonce};
use bytes::BytesMut;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

/// Ciphertext bytes to peek: enough for either family's length field
const PEEK_LEN: usize = 6;

pub struct PacketReader<R> {
    io: R,
    cipher: Arc<Box<dyn Cipher>>,
    /// Direction the peer seals with
    dir: Direction,
    /// Records opened so far
    seq: u64,
    wire: BytesMut,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    pub fn new(io: R, cipher: Arc<Box<dyn Cipher>>, dir: Direction) -> Self {
        Self {
            io,
            cipher,
            dir,
            seq: 0,
            wire: BytesMut::with_capacity(4096),
        }
    }

    /// Reads the next IP packet from the stream
    ///
    /// Blocks until a whole record is available. Errors are terminal for the
    /// stream: a failed tag, a malformed packet, or EOF mid-record all leave
    /// the reader desynchronized.
    pub async fn read_packet(&mut self) -> crate::Result<IpPacket> {
        loop {
            if let Some(total) = self.sealed_len()? {
                if self.wire.len() >= total {
                    let mut record = self.wire.split_to(total).to_vec();
                    let nonce = record_nonce(self.dir, self.seq);
                    self.cipher.open(&nonce, &mut record)?;
                    self.seq += 1;
                    return Ok(IpPacket::new(record)?);
                }
            }

            if 0 == self.io.read_buf(&mut self.wire).await? {
                return if self.wire.is_empty() {
                    Err("EOF".into())
                } else {
                    Err(PacketError::ShortRead.into())
                };
            }
        }
    }

    /// On-wire length of the sealed record at the head of the buffer
    ///
    /// `Ok(None)` means too few bytes are buffered to know yet.
    fn sealed_len(&self) -> crate::Result<Option<usize>> {
        if self.wire.is_empty() {
            return Ok(None);
        }
        let nonce = record_nonce(self.dir, self.seq);
        let peek = self.wire.len().min(PEEK_LEN);
        let peeked = self.cipher.peek_prefix(&nonce, &self.wire[..peek]);
        match Parser::framed_len(&peeked)? {
            Some(plain_len) => Ok(Some(plain_len + self.cipher.overhead())),
            None => Ok(None),
        }
    }
}

pub struct PacketWriter<W> {
    io: W,
    cipher: Arc<Box<dyn Cipher>>,
    dir: Direction,
    /// Records sealed so far
    seq: u64,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    pub fn new(io: W, cipher: Arc<Box<dyn Cipher>>, dir: Direction) -> Self {
        Self {
            io,
            cipher,
            dir,
            seq: 0,
        }
    }

    /// Seals one packet and writes it out, nothing before or after it
    pub async fn write_packet(&mut self, packet: &IpPacket) -> crate::Result<()> {
        let mut record = packet.as_bytes().to_vec();
        let nonce = record_nonce(self.dir, self.seq);
        self.cipher.seal(&nonce, &mut record)?;
        self.seq += 1;

        self.io.write_all(&record).await?;
        self.io.flush().await?;
        Ok(())
    }

    pub async fn close(&mut self) {
        let _ = self.io.shutdown().await;
    }
}

/// Splits a bidirectional stream into cipher-wrapped halves
///
/// `send` is the direction this endpoint seals with; the reader expects the
/// peer's records on the reverse direction.
pub fn wrap<S>(
    io: S,
    cipher: Arc<Box<dyn Cipher>>,
    send: Direction,
) -> (PacketReader<ReadHalf<S>>, PacketWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (read_half, write_half) = tokio::io::split(io);
    (
        PacketReader::new(read_half, cipher.clone(), send.reverse()),
        PacketWriter::new(write_half, cipher, send),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::new_cipher;

    fn cipher(name: &str) -> Arc<Box<dyn Cipher>> {
        Arc::new(new_cipher(name, "test passphrase").unwrap())
    }

    fn v4_packet(total: usize, fill: u8) -> IpPacket {
        let mut buf = vec![fill; total];
        buf[0] = 0x45;
        buf[2..4].copy_from_slice(&(total as u16).to_be_bytes());
        buf[10] = 0;
        buf[11] = 0;
        IpPacket::new(buf).unwrap()
    }

    #[tokio::test]
    async fn packets_roundtrip_in_order() {
        for name in ["chacha20-poly1305", "aes256-gcm", "xor", "plain"] {
            let (near, far) = tokio::io::duplex(64 * 1024);
            let (_near_r, mut near_w) = wrap(near, cipher(name), Direction::ClientToServer);
            let (mut far_r, _far_w) = wrap(far, cipher(name), Direction::ServerToClient);

            let first = v4_packet(60, 0xaa);
            let second = v4_packet(28, 0xbb);
            near_w.write_packet(&first).await.unwrap();
            near_w.write_packet(&second).await.unwrap();

            assert_eq!(far_r.read_packet().await.unwrap(), first, "suite {}", name);
            assert_eq!(far_r.read_packet().await.unwrap(), second, "suite {}", name);
        }
    }

    #[tokio::test]
    async fn plain_wire_is_bare_datagrams() {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        let (_near_r, mut near_w) = wrap(near, cipher("plain"), Direction::ClientToServer);

        let first = v4_packet(24, 0x01);
        let second = v4_packet(32, 0x02);
        near_w.write_packet(&first).await.unwrap();
        near_w.write_packet(&second).await.unwrap();

        // raw bytes on the wire are the two datagrams and nothing else
        let mut raw = vec![0u8; 24 + 32];
        far.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..24], first.as_bytes());
        assert_eq!(&raw[24..], second.as_bytes());
    }

    #[tokio::test]
    async fn aead_wire_adds_only_the_tag() {
        let (near, mut far) = tokio::io::duplex(64 * 1024);
        let suite = cipher("chacha20-poly1305");
        let (_near_r, mut near_w) = wrap(near, suite.clone(), Direction::ClientToServer);

        near_w.write_packet(&v4_packet(40, 0x07)).await.unwrap();
        near_w.close().await;

        let mut raw = Vec::new();
        far.read_to_end(&mut raw).await.unwrap();
        assert_eq!(raw.len(), 40 + suite.overhead());
    }

    #[tokio::test]
    async fn clean_eof_between_packets() {
        let (near, far) = tokio::io::duplex(64 * 1024);
        let (_near_r, mut near_w) = wrap(near, cipher("plain"), Direction::ClientToServer);
        let (mut far_r, _far_w) = wrap(far, cipher("plain"), Direction::ServerToClient);

        near_w.write_packet(&v4_packet(20, 0)).await.unwrap();
        near_w.close().await;
        drop(near_w);
        drop(_near_r);

        far_r.read_packet().await.unwrap();
        assert!(far_r.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn eof_mid_record_is_short_read() {
        let (mut near, far) = tokio::io::duplex(64 * 1024);
        let (mut far_r, _far_w) = wrap(far, cipher("plain"), Direction::ServerToClient);

        // header promising a 40-byte datagram, then only 14 bytes and a close
        let packet = v4_packet(40, 0x0c);
        near.write_all(&packet.as_bytes()[..14]).await.unwrap();
        drop(near);

        let err = far_r.read_packet().await.unwrap_err();
        assert_eq!(err.to_string(), PacketError::ShortRead.to_string());
    }

    #[tokio::test]
    async fn tampered_record_kills_the_stream() {
        let suite = cipher("chacha20-poly1305");
        let packet = v4_packet(40, 0x11);
        let mut record = packet.as_bytes().to_vec();
        let nonce = record_nonce(Direction::ClientToServer, 0);
        suite.seal(&nonce, &mut record).unwrap();
        record[20] ^= 0xff;

        let (mut near, far) = tokio::io::duplex(64 * 1024);
        let (mut far_r, _far_w) = wrap(far, suite.clone(), Direction::ServerToClient);
        near.write_all(&record).await.unwrap();

        assert!(far_r.read_packet().await.is_err());
    }

    #[tokio::test]
    async fn garbage_version_nibble_kills_the_stream() {
        let (mut near, far) = tokio::io::duplex(64 * 1024);
        let (mut far_r, _far_w) = wrap(far, cipher("plain"), Direction::ServerToClient);

        // peeked version nibble is 7; the stream cannot resynchronize
        near.write_all(&[0x70, 0, 0, 0, 0, 0]).await.unwrap();

        let err = far_r.read_packet().await.unwrap_err();
        assert_eq!(err.to_string(), PacketError::Malformed.to_string());
    }
}
