use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand_core::{OsRng, RngCore};

use crate::error::CryptoError;

/// AES-GCM nonce length in bytes.
pub const NONCE_LEN: usize = 12;

fn cipher(key: &[u8; 32]) -> Aes256Gcm {
    Aes256Gcm::new(key.into())
}

/// AES-256-GCM under a fresh random nonce. Returns (ciphertext + tag, nonce).
pub fn encrypt_message(
    key: &[u8; 32],
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; NONCE_LEN]), CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption)?;
    Ok((ciphertext, nonce))
}

/// Any tag mismatch is reported as `Integrity`; no partial plaintext escapes.
pub fn decrypt_message(
    key: &[u8; 32],
    ciphertext: &[u8],
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    cipher(key)
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::Integrity)
}
