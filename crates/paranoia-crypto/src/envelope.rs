//! Hybrid envelopes: a random secret sealed to an X25519 public key, and the
//! payload sealed under that secret.
//!
//! Sealed-secret wire format (hex-encoded):
//!   [ ephemeral public (32) | nonce (12) | AES-256-GCM(secret) + tag (48) ]

use paranoia_types::HybridEnvelope;
use rand_core::OsRng;
use serde::{Serialize, de::DeserializeOwned};
use x25519_dalek::{EphemeralSecret, PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::encrypt::{NONCE_LEN, decrypt_message, encrypt_message};
use crate::error::CryptoError;
use crate::kdf;
use crate::keys::random_secret;
use crate::packet::{self, PacketKey};

const SEALED_SECRET_INFO: &[u8] = b"paranoia-sealed-secret-v1";
const SEALED_SECRET_LEN: usize = 32 + NONCE_LEN + 32 + 16;

/// Encrypt `payload` so that only the holder of `recipient`'s secret can read it.
pub fn wrap<T: Serialize + ?Sized>(
    payload: &T,
    recipient: &PublicKey,
) -> Result<HybridEnvelope, CryptoError> {
    let secret = random_secret();
    let wrapped_secret = seal_secret(&secret, recipient)?;
    let packet = packet::seal(PacketKey::Secret(secret.as_slice()), payload)?;

    Ok(HybridEnvelope {
        wrapped_secret: hex::encode(wrapped_secret),
        packet,
    })
}

/// Open an envelope addressed to `recipient`.
pub fn unwrap<T: DeserializeOwned>(
    envelope: &HybridEnvelope,
    recipient: &StaticSecret,
) -> Result<T, CryptoError> {
    let secret = open_secret(&envelope.wrapped_secret, recipient)?;
    packet::open(PacketKey::Secret(secret.as_slice()), &envelope.packet)
}

fn seal_secret(secret: &[u8; 32], recipient: &PublicKey) -> Result<Vec<u8>, CryptoError> {
    let ephemeral = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral);
    let shared = ephemeral.diffie_hellman(recipient);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKey("Low-order recipient key".into()));
    }

    let key = kdf::secret_key(
        shared.as_bytes(),
        &transcript(&ephemeral_public, recipient),
        SEALED_SECRET_INFO,
    )?;
    let (ciphertext, nonce) = encrypt_message(&key, secret)?;

    let mut out = Vec::with_capacity(SEALED_SECRET_LEN);
    out.extend_from_slice(ephemeral_public.as_bytes());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open_secret(sealed_hex: &str, recipient: &StaticSecret) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
    let sealed = hex::decode(sealed_hex).map_err(|_| CryptoError::Decryption)?;
    if sealed.len() != SEALED_SECRET_LEN {
        return Err(CryptoError::Decryption);
    }

    let (ephemeral, rest) = sealed.split_at(32);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let ephemeral: [u8; 32] = ephemeral.try_into().map_err(|_| CryptoError::Decryption)?;
    let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| CryptoError::Decryption)?;
    let ephemeral_public = PublicKey::from(ephemeral);

    let shared = recipient.diffie_hellman(&ephemeral_public);
    if !shared.was_contributory() {
        return Err(CryptoError::Decryption);
    }

    let own_public = PublicKey::from(recipient);
    let key = kdf::secret_key(
        shared.as_bytes(),
        &transcript(&ephemeral_public, &own_public),
        SEALED_SECRET_INFO,
    )?;
    let plaintext = Zeroizing::new(
        decrypt_message(&key, ciphertext, &nonce).map_err(|_| CryptoError::Decryption)?,
    );

    let mut secret = Zeroizing::new([0u8; 32]);
    if plaintext.len() != secret.len() {
        return Err(CryptoError::Decryption);
    }
    secret.copy_from_slice(&plaintext);
    Ok(secret)
}

/// HKDF salt binding the sealed secret to both public keys.
fn transcript(ephemeral: &PublicKey, recipient: &PublicKey) -> [u8; 64] {
    let mut salt = [0u8; 64];
    salt[..32].copy_from_slice(ephemeral.as_bytes());
    salt[32..].copy_from_slice(recipient.as_bytes());
    salt
}
