/// Paranoia Crypto Library
///
/// Thin capability layer over audited crates; nothing here is a new primitive.
///
/// - `keys`: X25519 key pairs (link and message keys)
/// - `signing`: Ed25519 relay signatures
/// - `kdf`: Argon2id for passphrases, HKDF-SHA256 for random secrets
/// - `encrypt`: AES-256-GCM
/// - `packet`: `iv:salt:ciphertext` symmetric framing
/// - `envelope`: hybrid envelopes (sealed secret + packet)
/// - `token`: pairing token derivation
pub mod encrypt;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod packet;
pub mod signing;
pub mod token;

pub use error::CryptoError;
pub use kdf::KdfParams;
pub use keys::KeyPair;
pub use signing::SigningKeyPair;

pub use ed25519_dalek::VerifyingKey;
pub use x25519_dalek::{PublicKey, StaticSecret};
