//! Ed25519 signatures the relay puts on every reply.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use rand_core::OsRng;

use crate::error::CryptoError;

pub struct SigningKeyPair {
    signing: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn verifying_export(&self) -> String {
        export_verifying_key(&self.verifying_key())
    }

    /// Sign `message` and return the hex signature.
    pub fn sign_hex(&self, message: &[u8]) -> String {
        hex::encode(self.signing.sign(message).to_bytes())
    }
}

pub fn export_verifying_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.as_bytes())
}

pub fn import_verifying_key(encoded: &str) -> Result<VerifyingKey, CryptoError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("Invalid key length".into()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))
}

/// Check a hex signature over `message`. Any decoding problem counts as an
/// invalid signature.
pub fn verify_hex(key: &VerifyingKey, message: &[u8], signature_hex: &str) -> Result<(), CryptoError> {
    let bytes = hex::decode(signature_hex).map_err(|_| CryptoError::SignatureInvalid)?;
    let signature = Signature::from_slice(&bytes).map_err(|_| CryptoError::SignatureInvalid)?;
    key.verify_strict(message, &signature)
        .map_err(|_| CryptoError::SignatureInvalid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let pair = SigningKeyPair::generate();
        let key = import_verifying_key(&pair.verifying_export()).unwrap();
        let sig = pair.sign_hex(b"result");
        verify_hex(&key, b"result", &sig).unwrap();
    }

    #[test]
    fn altered_message_fails() {
        let pair = SigningKeyPair::generate();
        let sig = pair.sign_hex(b"result");
        assert!(matches!(
            verify_hex(&pair.verifying_key(), b"resulT", &sig),
            Err(CryptoError::SignatureInvalid)
        ));
    }

    #[test]
    fn other_signer_fails() {
        let relay = SigningKeyPair::generate();
        let impostor = SigningKeyPair::generate();
        let sig = impostor.sign_hex(b"result");
        assert!(verify_hex(&relay.verifying_key(), b"result", &sig).is_err());
    }

    #[test]
    fn garbage_signature_fails() {
        let pair = SigningKeyPair::generate();
        for sig in ["", "zz", "00", &"ab".repeat(64)] {
            assert!(verify_hex(&pair.verifying_key(), b"result", sig).is_err());
        }
    }
}
