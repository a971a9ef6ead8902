//! Key derivation
//!
//! `passphrase_key`: Argon2id, for anything derived from the shared
//!   passphrase (pairing token, handshake lock).
//!
//! `secret_key`: HKDF-SHA256, for uniformly random secrets (envelope
//!   secrets, X25519 shared secrets).

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Argon2id cost parameters. Both peers must use the same values or they will
/// derive different pairing tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32) -> Self {
        Self {
            memory_kib,
            iterations,
        }
    }

    fn argon2(&self) -> Result<Argon2<'static>, CryptoError> {
        let params = Params::new(self.memory_kib, self.iterations, 1, Some(32))
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for KdfParams {
    /// 19 MiB, 2 passes.
    fn default() -> Self {
        Self::new(19 * 1024, 2)
    }
}

/// Derive a 32-byte key from a passphrase. `salt` must be at least 8 bytes.
pub fn passphrase_key(
    passphrase: &[u8],
    salt: &[u8],
    params: &KdfParams,
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let mut output = Zeroizing::new([0u8; 32]);
    params
        .argon2()?
        .hash_password_into(passphrase, salt, output.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(output)
}

/// Derive a 32-byte key from high-entropy input keying material.
pub fn secret_key(
    ikm: &[u8],
    salt: &[u8],
    info: &[u8],
) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut output = Zeroizing::new([0u8; 32]);
    hk.expand(info, output.as_mut())
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
    Ok(output)
}
