use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::CryptoError;

/// Generate a random 256-bit secret.
pub fn random_secret() -> Zeroizing<[u8; 32]> {
    let mut key = Zeroizing::new([0u8; 32]);
    OsRng.fill_bytes(key.as_mut());
    key
}

/// X25519 key pair used to receive envelopes.
///
/// The secret half zeroizes itself when the pair is dropped, so dropping a
/// `KeyPair` is how key material is burned.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn secret(&self) -> &StaticSecret {
        &self.secret
    }

    /// Base64 export of the public key, as sent over the wire.
    pub fn public_export(&self) -> String {
        export_public_key(&self.public)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_export())
            .finish_non_exhaustive()
    }
}

/// Encode a public key to base64 for sharing.
pub fn export_public_key(key: &PublicKey) -> String {
    BASE64.encode(key.as_bytes())
}

/// Decode a base64 public key.
pub fn import_public_key(encoded: &str) -> Result<PublicKey, CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Invalid key length".into()))?;
    Ok(PublicKey::from(bytes))
}
