//! AES-256-GCM AEAD suite
//!
//! Same record shape as the ChaCha20 suite: [ciphertext][tag(16)] under the
//! per-direction nonce sequence. Preferable on hosts with AES-NI.
//! `peek_prefix` runs AES-CTR over the counter block GCM encrypts with
//! (nonce followed by a 32-bit block counter starting at 2; counter 1 is
//! the tag mask) so the reader can frame a record before opening it.

use super::{Cipher, CryptoError, NONCE_LEN, TAG_LEN, derive_key};
use aes::Aes256;
use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use ctr::Ctr32BE;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = Ctr32BE<Aes256>;

pub struct Aes256Cipher {
    cipher: Aes256Gcm,
    key: [u8; 32],
}

impl Aes256Cipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(&key.into()),
            key,
        }
    }

    pub fn from_passwd(passwd: &str) -> Self {
        Self::new(derive_key(passwd))
    }
}

impl Cipher for Aes256Cipher {
    fn overhead(&self) -> usize {
        TAG_LEN
    }

    fn seal(&self, nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()> {
        let sealed = self
            .cipher
            .encrypt(Nonce::from_slice(nonce), data.as_ref())
            .map_err(|e| format!("aes-256-gcm seal failed: {}", e))?;
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
        let mut iv = [0u8; 16];
        iv[..NONCE_LEN].copy_from_slice(nonce);
        iv[15] = 2;

        let mut out = prefix.to_vec();
        let mut stream = Aes256Ctr::new((&self.key).into(), (&iv).into());
        stream.apply_keystream(&mut out);
        out
    }
}
