//! ChaCha20-Poly1305 AEAD suite
//!
//! The default cipher. A sealed record is [ciphertext][tag(16)]; the nonce
//! comes from the per-direction sequence and never touches the wire.
//! `peek_prefix` regenerates the ChaCha20 keystream from byte 64 onward
//! (block 0 keys the Poly1305 authenticator, encryption starts at block 1)
//! so the reader can frame a record before opening it.

use super::{Cipher, CryptoError, NONCE_LEN, TAG_LEN, derive_key};
use chacha20::ChaCha20;
use chacha20::cipher::{KeyIvInit, StreamCipher, StreamCipherSeek};
use chacha20poly1305::{
    ChaCha20Poly1305, Nonce,
    aead::{Aead, KeyInit},
};

pub struct ChaCha20Cipher {
    cipher: ChaCha20Poly1305,
    key: [u8; 32],
}

impl ChaCha20Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(&key.into()),
            key,
        }
    }

    pub fn from_passwd(passwd: &str) -> Self {
        Self::new(derive_key(passwd))
    }
}

impl Cipher for ChaCha20Cipher {
    fn overhead(&self) -> usize {
        TAG_LEN
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(nonce), data.as_ref())
            .map_err(|e| format!("chacha20-poly1305 seal failed: {}", e))?;
        *data = sealed;
        Ok(())
    }

    fn open(&self, nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()> {
        if data.len() < TAG_LEN {
            return Err(CryptoError::ShortRecord.into());
        }
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), data.as_ref())
            .map_err(|_| CryptoError::Auth)?;
        *data = plain;
        Ok(())
    }

    fn peek_prefix(&self, nonce: &[u8; NONCE_LEN], prefix: &[u8]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        let mut stream = ChaCha20::new((&self.key).into(), nonce.into());
        // skip block 0, it derives the Poly1305 key
        stream.seek(64u64);
        stream.apply_keystream(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Direction, record_nonce};

    fn nonce(seq: u64) -> [u8; NONCE_LEN] {
        record_nonce(Direction::ClientToServer, seq)
    }

    #[test]
    fn seal_open_roundtrip() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let original = b"ip datagram bytes".to_vec();
        let mut data = original.clone();

        cipher.seal(&nonce(0), &mut data).unwrap();
        assert_ne!(data, original);
        assert_eq!(data.len(), original.len() + TAG_LEN);

        cipher.open(&nonce(0), &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn tampered_record_fails_auth() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let mut data = b"payload".to_vec();
        cipher.seal(&nonce(1), &mut data).unwrap();

        data[0] ^= 0xff;
        let err = cipher.open(&nonce(1), &mut data).unwrap_err();
        assert_eq!(err.to_string(), CryptoError::Auth.to_string());
    }

    #[test]
    fn wrong_passphrase_fails_auth() {
        let a = ChaCha20Cipher::from_passwd("one");
        let b = ChaCha20Cipher::from_passwd("two");
        let mut data = b"payload".to_vec();
        a.seal(&nonce(0), &mut data).unwrap();
        assert!(b.open(&nonce(0), &mut data).is_err());
    }

    #[test]
    fn wrong_sequence_fails_auth() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let mut data = b"payload".to_vec();
        cipher.seal(&nonce(4), &mut data).unwrap();
        assert!(cipher.open(&nonce(5), &mut data).is_err());
    }

    #[test]
    fn distinct_nonces_give_distinct_ciphertext() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let mut one = b"same plaintext".to_vec();
        let mut two = b"same plaintext".to_vec();
        cipher.seal(&nonce(0), &mut one).unwrap();
        cipher.seal(&nonce(1), &mut two).unwrap();
        assert_ne!(one, two);
    }

    #[test]
    fn peek_matches_plaintext_prefix() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let plain = b"0123456789abcdef0123".to_vec();
        let mut sealed = plain.clone();
        cipher.seal(&nonce(7), &mut sealed).unwrap();

        let peeked = cipher.peek_prefix(&nonce(7), &sealed[..6]);
        assert_eq!(&peeked, &plain[..6]);
    }

    #[test]
    fn runt_record_is_rejected() {
        let cipher = ChaCha20Cipher::from_passwd("shared secret");
        let mut data = vec![0u8; TAG_LEN - 1];
        assert!(cipher.open(&nonce(0), &mut data).is_err());
    }
}
