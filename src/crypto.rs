//! Token blob encryption for the on-disk token cache.
//!
//! Sealed format: nonce (12 bytes) || ciphertext || auth tag (16 bytes).
//! The key is a single SHA-256 pass over the account password, so the
//! cache is only as strong as the password itself.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::{Result, SeafileError};

/// AES-256 key size in bytes.
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits).
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes.
pub const TAG_SIZE: usize = 16;

/// Minimum sealed blob size: nonce + auth tag (empty plaintext).
const MIN_SEALED_SIZE: usize = NONCE_SIZE + TAG_SIZE;

/// Derive a 256-bit cache key from the account password.
pub fn derive_key(password: &str) -> [u8; KEY_SIZE] {
    Sha256::digest(password.as_bytes()).into()
}

/// Encrypt `plaintext` under `key` with a fresh random nonce.
///
/// Returns nonce || ciphertext || tag. Two calls with identical inputs
/// produce different blobs.
pub fn seal(key: &[u8; KEY_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SeafileError::Encrypt)?;

    let mut nonce = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| SeafileError::Encrypt)?;

    let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&nonce);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Decrypt a blob produced by [`seal`].
///
/// Fails with [`SeafileError::Format`] when the blob cannot even hold a
/// nonce and tag, and with [`SeafileError::Decrypt`] when the key is wrong
/// or the data was tampered with.
pub fn unseal(key: &[u8; KEY_SIZE], sealed: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(SeafileError::Format("blob shorter than nonce and tag"));
    }

    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| SeafileError::Decrypt)?;
    let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| SeafileError::Decrypt)
}
