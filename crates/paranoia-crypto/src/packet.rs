//! Symmetric packet framing shared by envelopes and the handshake lock.
//!
//! Wire format (all of it base64-encoded once more):
//!
//! ```text
//! base64(iv) ":" base64(salt) ":" hex(ciphertext+tag)
//! ```
//!
//! The AES-256-GCM key is derived from a secret and the per-packet salt.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use rand_core::{OsRng, RngCore};
use serde::{Serialize, de::DeserializeOwned};
use zeroize::Zeroizing;

use crate::encrypt::{NONCE_LEN, decrypt_message, encrypt_message};
use crate::error::CryptoError;
use crate::kdf::{self, KdfParams};

/// Fresh salt length for every packet.
pub const SALT_LEN: usize = 16;

const PACKET_INFO: &[u8] = b"paranoia-packet-v1";

/// Where the packet key comes from.
#[derive(Clone, Copy)]
pub enum PacketKey<'a> {
    /// Uniformly random secret (envelopes). Stretched with HKDF.
    Secret(&'a [u8]),
    /// Shared passphrase. Stretched with Argon2id.
    Passphrase(&'a str, &'a KdfParams),
}

impl PacketKey<'_> {
    fn derive(&self, salt: &[u8]) -> Result<Zeroizing<[u8; 32]>, CryptoError> {
        match self {
            PacketKey::Secret(secret) => kdf::secret_key(secret, salt, PACKET_INFO),
            PacketKey::Passphrase(passphrase, params) => {
                kdf::passphrase_key(passphrase.as_bytes(), salt, params)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub iv: [u8; NONCE_LEN],
    pub salt: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl Packet {
    pub fn encode(&self) -> String {
        let framed = format!(
            "{}:{}:{}",
            BASE64.encode(self.iv),
            BASE64.encode(&self.salt),
            hex::encode(&self.ciphertext)
        );
        BASE64.encode(framed)
    }

    pub fn decode(encoded: &str) -> Result<Self, CryptoError> {
        let framed = BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::MalformedEnvelope("packet is not base64"))?;
        let framed = String::from_utf8(framed)
            .map_err(|_| CryptoError::MalformedEnvelope("packet is not text"))?;

        let parts: Vec<&str> = framed.split(':').collect();
        let [iv, salt, ciphertext] = parts[..] else {
            return Err(CryptoError::MalformedEnvelope("packet must have 3 fields"));
        };

        let iv: [u8; NONCE_LEN] = BASE64
            .decode(iv)
            .ok()
            .and_then(|iv| iv.try_into().ok())
            .ok_or(CryptoError::MalformedEnvelope("bad iv"))?;
        let salt = BASE64
            .decode(salt)
            .map_err(|_| CryptoError::MalformedEnvelope("bad salt"))?;
        let ciphertext = hex::decode(ciphertext)
            .map_err(|_| CryptoError::MalformedEnvelope("bad ciphertext"))?;

        Ok(Self {
            iv,
            salt,
            ciphertext,
        })
    }
}

/// Serialise `payload` to JSON and encrypt it into an encoded packet.
pub fn seal<T: Serialize + ?Sized>(key: PacketKey<'_>, payload: &T) -> Result<String, CryptoError> {
    let plaintext = Zeroizing::new(serde_json::to_vec(payload)?);

    let mut salt = vec![0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    let packet_key = key.derive(&salt)?;

    let (ciphertext, iv) = encrypt_message(&packet_key, &plaintext)?;
    Ok(Packet {
        iv,
        salt,
        ciphertext,
    }
    .encode())
}

/// Decrypt an encoded packet and deserialise its JSON payload.
pub fn open<T: DeserializeOwned>(key: PacketKey<'_>, encoded: &str) -> Result<T, CryptoError> {
    let packet = Packet::decode(encoded)?;
    let packet_key = key.derive(&packet.salt)?;
    let plaintext = Zeroizing::new(decrypt_message(&packet_key, &packet.ciphertext, &packet.iv)?);
    Ok(serde_json::from_slice(&plaintext)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIGHT: KdfParams = KdfParams::new(64, 1);

    fn reencode(packet: &str, edit: impl FnOnce(&mut Packet)) -> String {
        let mut decoded = Packet::decode(packet).unwrap();
        edit(&mut decoded);
        decoded.encode()
    }

    #[test]
    fn secret_packet_roundtrip() {
        let secret = [9u8; 32];
        let sealed = seal(PacketKey::Secret(&secret), "hello").unwrap();
        let opened: String = open(PacketKey::Secret(&secret), &sealed).unwrap();
        assert_eq!(opened, "hello");
    }

    #[test]
    fn passphrase_packet_roundtrip() {
        let key = PacketKey::Passphrase("correct horse battery staple", &LIGHT);
        let sealed = seal(key, &vec![1, 2, 3]).unwrap();
        let opened: Vec<u32> = open(key, &sealed).unwrap();
        assert_eq!(opened, vec![1, 2, 3]);
    }

    #[test]
    fn wrong_passphrase_fails_integrity() {
        let sealed = seal(PacketKey::Passphrase("correct horse battery staple", &LIGHT), "k").unwrap();
        let result: Result<String, _> =
            open(PacketKey::Passphrase("correct horse battery stapler", &LIGHT), &sealed);
        assert!(matches!(result, Err(CryptoError::Integrity)));
    }

    #[test]
    fn every_packet_uses_fresh_iv_and_salt() {
        let secret = [1u8; 32];
        let a = Packet::decode(&seal(PacketKey::Secret(&secret), "same").unwrap()).unwrap();
        let b = Packet::decode(&seal(PacketKey::Secret(&secret), "same").unwrap()).unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.salt, b.salt);
        assert_eq!(a.salt.len(), SALT_LEN);
    }

    #[test]
    fn flipped_ciphertext_byte_fails_integrity() {
        let secret = [3u8; 32];
        let sealed = seal(PacketKey::Secret(&secret), "payload").unwrap();
        let tampered = reencode(&sealed, |p| p.ciphertext[0] ^= 0x01);
        let result: Result<String, _> = open(PacketKey::Secret(&secret), &tampered);
        assert!(matches!(result, Err(CryptoError::Integrity)));
    }

    #[test]
    fn swapped_salt_or_iv_fails_integrity() {
        let secret = [3u8; 32];
        let sealed = seal(PacketKey::Secret(&secret), "payload").unwrap();

        let bad_salt = reencode(&sealed, |p| p.salt[0] ^= 0x80);
        let bad_iv = reencode(&sealed, |p| p.iv[11] ^= 0x80);
        for tampered in [bad_salt, bad_iv] {
            let result: Result<String, _> = open(PacketKey::Secret(&secret), &tampered);
            assert!(matches!(result, Err(CryptoError::Integrity)));
        }
    }

    #[test]
    fn field_count_must_be_three() {
        for framed in ["a:b", "a:b:c:d", "abc"] {
            let encoded = BASE64.encode(framed);
            assert!(matches!(
                Packet::decode(&encoded),
                Err(CryptoError::MalformedEnvelope(_))
            ));
        }
    }

    #[test]
    fn bad_encodings_are_malformed() {
        let iv = BASE64.encode([0u8; NONCE_LEN]);
        let salt = BASE64.encode([0u8; SALT_LEN]);
        let cases = [
            format!("{}:{}:zz", iv, salt),
            format!("{}:{}:00", BASE64.encode([0u8; 5]), salt),
            format!("{}:!!:00", iv),
        ];
        for framed in cases {
            assert!(matches!(
                Packet::decode(&BASE64.encode(framed)),
                Err(CryptoError::MalformedEnvelope(_))
            ));
        }
        assert!(matches!(
            Packet::decode("%%%"),
            Err(CryptoError::MalformedEnvelope(_))
        ));
    }
}
