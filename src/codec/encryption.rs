//! AES-256-CTR batch encryption with a SHA-256 checksum trailer.

use crate::codec::CodecError;
use aes::{cipher::generic_array::GenericArray, Aes256};
use ctr::cipher::{KeyIvInit, StreamCipher};
use sha2::{Digest, Sha256};

type Cipher = ctr::Ctr128BE<Aes256>;

const TRAILER_LEN: usize = 8;

/// Shared secret from the key exchange.
#[derive(Copy, Clone)]
pub struct EncryptionKey([u8; 32]);

impl EncryptionKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    fn iv(&self) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[..12].copy_from_slice(&self.0[..12]);
        iv[15] = 2;
        iv
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

pub struct EncryptionState {
    key: EncryptionKey,
    encryptor: Cipher,
    decryptor: Cipher,
    send_counter: u64,
    receive_counter: u64,
    validate: bool,
}

impl EncryptionState {
    pub fn new(key: EncryptionKey, validate: bool) -> Self {
        let iv = key.iv();
        Self {
            encryptor: Cipher::new(
                GenericArray::from_slice(&key.0),
                GenericArray::from_slice(&iv),
            ),
            decryptor: Cipher::new(
                GenericArray::from_slice(&key.0),
                GenericArray::from_slice(&iv),
            ),
            key,
            send_counter: 0,
            receive_counter: 0,
            validate,
        }
    }

    fn checksum(&self, counter: u64, payload: &[u8]) -> [u8; TRAILER_LEN] {
        let mut hasher = Sha256::new();
        hasher.update(counter.to_le_bytes());
        hasher.update(payload);
        hasher.update(self.key.0);
        let digest = hasher.finalize();
        let mut trailer = [0u8; TRAILER_LEN];
        trailer.copy_from_slice(&digest[..TRAILER_LEN]);
        trailer
    }

    /// Appends the trailer to `payload` and encrypts both in place.
    pub fn encrypt(&mut self, payload: &mut Vec<u8>) {
        let trailer = self.checksum(self.send_counter, payload);
        self.send_counter = self.send_counter.wrapping_add(1);
        payload.extend_from_slice(&trailer);
        self.encryptor.apply_keystream(payload);
    }

    /// Decrypts `data` in place and strips the trailer.
    pub fn decrypt(&mut self, data: &mut Vec<u8>) -> Result<(), CodecError> {
        self.decryptor.apply_keystream(data);
        if data.len() < TRAILER_LEN {
            return Err(CodecError::TrailerMismatch);
        }
        let payload_len = data.len() - TRAILER_LEN;
        let counter = self.receive_counter;
        self.receive_counter = self.receive_counter.wrapping_add(1);
        if self.validate {
            let expected = self.checksum(counter, &data[..payload_len]);
            if data[payload_len..] != expected {
                return Err(CodecError::TrailerMismatch);
            }
        }
        data.truncate(payload_len);
        Ok(())
    }
}
