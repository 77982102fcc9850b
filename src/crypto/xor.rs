//! XOR obfuscation suite
//!
//! Repeating-key XOR against the derived 32-byte key, restarted at the key's
//! start for every record so records stay independent. Length-preserving and
//! symmetric; it obscures traffic from casual inspection and nothing more.

use super::{Cipher, NONCE_LEN, derive_key};

pub struct XorCipher {
    key: [u8; 32],
}

impl XorCipher {
    pub fn from_passwd(passwd: &str) -> Self {
        Self {
            key: derive_key(passwd),
        }
    }

    fn apply(&self, data: &mut [u8]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.key[i % self.key.len()];
        }
    }
}

impl Cipher for XorCipher {
    fn overhead(&self) -> usize {
        0
    }

    fn seal(&self, _nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()> {
        self.apply(data);
        Ok(())
    }

    // XOR is its own inverse
    fn open(&self, _nonce: &[u8; NONCE_LEN], data: &mut Vec<u8>) -> crate::Result<()> {
        self.apply(data);
        Ok(())
    }

    fn peek_prefix(&self, _nonce: &[u8; NONCE_LEN], prefix: &[u8]) -> Vec<u8> {
        let mut out = prefix.to_vec();
        self.apply(&mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Direction, record_nonce};

    #[test]
    fn seal_is_its_own_inverse() {
        let cipher = XorCipher::from_passwd("key");
        let nonce = record_nonce(Direction::ClientToServer, 0);
        let original = vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x41];
        let mut data = original.clone();
        cipher.seal(&nonce, &mut data).unwrap();
        assert_ne!(data, original);
        cipher.open(&nonce, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn records_are_length_preserving() {
        let cipher = XorCipher::from_passwd("key");
        let nonce = record_nonce(Direction::ClientToServer, 1);
        let mut data = vec![0u8; 60];
        cipher.seal(&nonce, &mut data).unwrap();
        assert_eq!(data.len(), 60);
        assert_eq!(cipher.overhead(), 0);
    }
}
