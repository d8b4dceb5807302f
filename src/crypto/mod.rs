//! AES-256-GCM encryption for tokens at rest.
//!
//! Every token value is encrypted with a unique random nonce before it
//! touches the connection store, and decrypted only at the moment of use.
//! The master key is 32 bytes (256 bits), provided base64-encoded from the
//! environment at startup and held in memory only.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Size of the GCM authentication tag in bytes
const TAG_SIZE: usize = 16;

#[derive(Debug, Error)]
pub enum CipherError {
    #[error("encryption key must be {KEY_SIZE} bytes (256 bits)")]
    InvalidKey,

    /// Authentication failed: the ciphertext, nonce, or tag was altered, or
    /// the wrong key was used. Never produces a silently wrong plaintext.
    #[error("ciphertext failed authentication (tampered or corrupt)")]
    TamperedOrCorrupt,
}

/// An encrypted token as persisted: base64 ciphertext, nonce, and GCM tag.
///
/// The tag is kept as its own field so the stored record shape makes the
/// authentication boundary explicit; flipping a byte in any of the three
/// parts fails decryption.
#[derive(Clone, Debug, PartialEq)]
pub struct EncryptedToken {
    pub ciphertext: String,
    pub nonce: String,
    pub tag: String,
}

/// Authenticated symmetric cipher for token material.
///
/// Cheap to clone behind an `Arc`; the key never leaves this struct and is
/// never logged.
pub struct TokenCipher {
    key: [u8; KEY_SIZE],
}

impl TokenCipher {
    /// Create a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64(key_base64: &str) -> Result<Self, CipherError> {
        let key_bytes = BASE64
            .decode(key_base64)
            .map_err(|_| CipherError::InvalidKey)?;
        let key: [u8; KEY_SIZE] = key_bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKey)?;
        Ok(Self { key })
    }

    /// Create a cipher from raw key bytes (used in tests).
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self { key }
    }

    /// Encrypt a token with a fresh random nonce.
    pub fn encrypt(&self, plaintext: &str) -> Result<EncryptedToken, CipherError> {
        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;

        // Random nonce, never reused
        let nonce_bytes = Aes256Gcm::generate_nonce(&mut OsRng);

        let mut sealed = cipher
            .encrypt(&nonce_bytes, plaintext.as_bytes())
            .map_err(|_| CipherError::TamperedOrCorrupt)?;

        // aes-gcm appends the 16-byte tag to the ciphertext; split it out so
        // the persisted record carries it as a separate field
        let tag = sealed.split_off(sealed.len() - TAG_SIZE);

        Ok(EncryptedToken {
            ciphertext: BASE64.encode(&sealed),
            nonce: BASE64.encode(&nonce_bytes),
            tag: BASE64.encode(&tag),
        })
    }

    /// Decrypt a stored token. Fails with `TamperedOrCorrupt` when the tag
    /// does not verify.
    pub fn decrypt(&self, token: &EncryptedToken) -> Result<String, CipherError> {
        let mut sealed = BASE64
            .decode(&token.ciphertext)
            .map_err(|_| CipherError::TamperedOrCorrupt)?;
        let nonce_bytes = BASE64
            .decode(&token.nonce)
            .map_err(|_| CipherError::TamperedOrCorrupt)?;
        let tag = BASE64
            .decode(&token.tag)
            .map_err(|_| CipherError::TamperedOrCorrupt)?;

        if nonce_bytes.len() != NONCE_SIZE || tag.len() != TAG_SIZE {
            return Err(CipherError::TamperedOrCorrupt);
        }

        let cipher =
            Aes256Gcm::new_from_slice(&self.key).map_err(|_| CipherError::InvalidKey)?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        sealed.extend_from_slice(&tag);
        let plaintext = cipher
            .decrypt(nonce, sealed.as_ref())
            .map_err(|_| CipherError::TamperedOrCorrupt)?;

        String::from_utf8(plaintext).map_err(|_| CipherError::TamperedOrCorrupt)
    }
}
