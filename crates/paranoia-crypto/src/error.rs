use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// The wrapped secret could not be recovered with this private key.
    #[error("Could not decrypt envelope secret")]
    Decryption,

    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(&'static str),

    /// AEAD tag mismatch: wrong key or tampered ciphertext.
    #[error("Integrity check failed (authentication tag mismatch)")]
    Integrity,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("AEAD encryption failed")]
    Encryption,

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),
}
