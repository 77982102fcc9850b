//! Cipher suites for the tunnel stream
//!
//! Supported suites:
//! - ChaCha20-Poly1305: modern AEAD, fast everywhere (default)
//! - AES-256-GCM: industry-standard AEAD, fast with hardware AES
//! - XOR: obfuscation only, cryptographically weak
//! - Plain: passthrough for debugging on trusted links
//!
//! Every suite works record-at-a-time: `seal` replaces one datagram with its
//! sealed form, `open` inverts it. Nothing but the suite's fixed overhead
//! ever reaches the wire: nonces are a deterministic per-direction sequence
//! (direction byte plus record counter) that both ends derive locally, so
//! the stream stays a concatenation of sealed datagrams with no framing of
//! its own. `peek_prefix` gives the reader an unauthenticated view of the
//! first ciphertext bytes, enough to read the IP length fields and recover
//! the record boundary before the authenticated open.

pub mod aes256;
pub mod chacha20;
pub mod plain;
pub mod xor;

use crate::crypto::aes256::Aes256Cipher;
use crate::crypto::chacha20::ChaCha20Cipher;
use crate::crypto::plain::PlainCipher;
use crate::crypto::xor::XorCipher;
use std::fmt;
use std::fmt::Display;

pub const NONCE_LEN: usize = 12;
/// Poly1305 and GCM both append a 16-byte tag
pub const TAG_LEN: usize = 16;

/// Which way a record travels
///
/// Keys the nonce sequence so the two directions of one connection can
/// never collide on a nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    pub fn reverse(self) -> Direction {
        match self {
            Direction::ClientToServer => Direction::ServerToClient,
            Direction::ServerToClient => Direction::ClientToServer,
        }
    }

    fn label(self) -> u8 {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }
}

/// Nonce for the `seq`-th record in a direction
///
/// Byte 0 carries the direction, bytes 4..12 the record counter, big-endian.
/// Never transmitted; both ends count records on their own.
pub fn record_nonce(direction: Direction, seq: u64) -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    nonce[0] = direction.label();
    nonce[4..].copy_from_slice(&seq.to_be_bytes());
    nonce
}

/// Cipher construction and record failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// The configured cipher name matches no suite; fatal at startup
    UnknownCipher(String),

    /// Authentication tag did not verify
    ///
    /// The record was tampered with, the ends disagree on the passphrase,
    /// or the record counters have diverged. Fatal for the stream; never
    /// retried.
    Auth,

    /// Record shorter than the suite's overhead, cannot possibly open
    ShortRecord,
}

impl std::error::Error for CryptoError {}

impl Display for CryptoError {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CryptoError::UnknownCipher(name) => write!(fmt, "unknown cipher: {}", name),
            CryptoError::Auth => "authentication failed".fmt(fmt),
            CryptoError::ShortRecord => "record too short".fmt(fmt),
        }
    }
}

/// Record encryption/decryption, shared across tasks
pub trait Cipher: Send + Sync {
    /// Fixed bytes `seal` adds to every record
    fn overhead(&self) -> usize;

    /// Seals a plaintext record in place
    fn seal(&self, nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()>;

    /// Opens a sealed record in place
    ///
    /// # Returns
    /// * `Err(CryptoError::Auth)` when the tag does not verify
    fn open(&self, nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()>;

    /// Decrypts the first ciphertext bytes of a record WITHOUT authenticating
    ///
    /// Only for framing: the caller reads the IP length fields out of the
    /// result and must still `open` the full record before trusting a byte.
    fn peek_prefix(&self, nonce: &[u8; NONCE_LEN], prefix: &[u8]) -> Vec<u8>;
}

/// Builds the cipher named in the configuration URL
pub fn new_cipher(name: &str, passwd: &str) -> Result<Box<dyn Cipher>, CryptoError> {
    match name {
        "chacha20-poly1305" | "chacha20" => Ok(Box::new(ChaCha20Cipher::from_passwd(passwd))),
        "aes256-gcm" | "aes256" => Ok(Box::new(Aes256Cipher::from_passwd(passwd))),
        "xor" => Ok(Box::new(XorCipher::from_passwd(passwd))),
        "plain" => Ok(Box::new(PlainCipher::new())),
        _ => Err(CryptoError::UnknownCipher(name.to_string())),
    }
}

/// Derives a 256-bit key from the shared passphrase
///
/// Shorter passphrases are zero-padded, longer ones truncated to 32 bytes.
pub(crate) fn derive_key(passwd: &str) -> [u8; 32] {
    let mut key = [0u8; 32];
    let bytes = passwd.as_bytes();
    if bytes.len() >= 32 {
        key.copy_from_slice(&bytes[..32]);
    } else {
        key[..bytes.len()].copy_from_slice(bytes);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_pads_short_passphrases() {
        let key = derive_key("abc");
        assert_eq!(&key[..3], b"abc");
        assert!(key[3..].iter().all(|&b| b == 0));
    }

    #[test]
    fn derive_key_truncates_long_passphrases() {
        let long = "x".repeat(50);
        assert_eq!(derive_key(&long), [b'x'; 32]);
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert_eq!(
            new_cipher("rot13", "pw").err().map(|e| e.to_string()),
            Some("unknown cipher: rot13".to_string())
        );
    }

    #[test]
    fn nonces_differ_by_direction_and_sequence() {
        let a = record_nonce(Direction::ClientToServer, 0);
        let b = record_nonce(Direction::ServerToClient, 0);
        let c = record_nonce(Direction::ClientToServer, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a, record_nonce(Direction::ServerToClient.reverse(), 0));
    }

    #[test]
    fn every_suite_roundtrips() {
        for name in ["chacha20-poly1305", "aes256-gcm", "xor", "plain"] {
            let cipher = new_cipher(name, "shared secret").unwrap();
            let nonce = record_nonce(Direction::ClientToServer, 3);
            let mut data = b"the quick brown fox".to_vec();
            cipher.seal(&nonce, &mut data).unwrap();
            cipher.open(&nonce, &mut data).unwrap();
            assert_eq!(data, b"the quick brown fox", "suite {}", name);
        }
    }

    #[test]
    fn every_suite_peeks_its_own_plaintext() {
        for name in ["chacha20-poly1305", "aes256-gcm", "xor", "plain"] {
            let cipher = new_cipher(name, "shared secret").unwrap();
            let nonce = record_nonce(Direction::ServerToClient, 9);
            let plain = b"EXAMPLE DATAGRAM BYTES".to_vec();
            let mut sealed = plain.clone();
            cipher.seal(&nonce, &mut sealed).unwrap();
            let peeked = cipher.peek_prefix(&nonce, &sealed[..6]);
            assert_eq!(&peeked, &plain[..6], "suite {}", name);
        }
    }
}
