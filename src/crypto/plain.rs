//! Passthrough suite
//!
//! No confidentiality, no integrity, no overhead: the wire carries the bare
//! datagrams. Exists so the full stack can run on a trusted link or under
//! test without key material.

use crate::crypto::{Cipher, NONCE_LEN};

pub struct PlainCipher {}

impl PlainCipher {
    pub fn new() -> Self {
        Self {}
    }
}

impl Cipher for PlainCipher {
    fn overhead(&self) -> usize {
        0
    }

    fn seal(&self, _nonce: &[u8; NONCE_LEN], _data: &mut Vec<u8>) -> crate::Result<()> {
        Ok(())
    }

    fn open(&self, _nonce: &[u8; NONCE_LEN], _data: &mut Vec<u8>) -> crate::Result<()> {
        Ok(())
    }

    fn peek_prefix(&self, _nonce: &[u8; NONCE_LEN], prefix: &[u8]) -> Vec<u8> {
        prefix.to_vec()
    }
}

impl Default for PlainCipher {
    fn default() -> Self {
        Self::new()
    }
}
