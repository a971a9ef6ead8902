use std::fmt;

use paranoia_crypto::keys::import_public_key;
use paranoia_crypto::{CryptoError, KeyPair, SigningKeyPair, envelope};
use paranoia_types::{HybridEnvelope, LinkGrant, ReplyStatus, SignedReply};
use serde::de::DeserializeOwned;

/// The relay's long-lived keys: one X25519 pair clients encrypt to, one
/// Ed25519 pair every reply is signed with. Generated at startup, never
/// persisted.
pub struct RelayIdentity {
    encryption: KeyPair,
    signing: SigningKeyPair,
    encrypt_export: String,
    sign_export: String,
}

impl RelayIdentity {
    pub fn generate() -> Self {
        let encryption = KeyPair::generate();
        let signing = SigningKeyPair::generate();
        Self {
            encrypt_export: encryption.public_export(),
            sign_export: signing.verifying_export(),
            encryption,
            signing,
        }
    }

    pub fn encrypt_export(&self) -> &str {
        &self.encrypt_export
    }

    pub fn sign_export(&self) -> &str {
        &self.sign_export
    }

    pub fn sign_reply(&self, status: ReplyStatus, result: String) -> SignedReply {
        SignedReply {
            status,
            sign: self.signing.sign_hex(result.as_bytes()),
            result,
        }
    }

    /// Seal the relay's public keys to a linking client's key.
    ///
    /// `client_key` is the base64 export sent in the LINK command.
    pub fn seal_grant(&self, client_key: &str, complete: bool) -> Result<HybridEnvelope, CryptoError> {
        let client_key = import_public_key(client_key)?;
        let grant = LinkGrant {
            encrypt_key: self.encrypt_export.clone(),
            sign_key: self.sign_export.clone(),
            complete: u8::from(complete),
        };
        envelope::wrap(&grant, &client_key)
    }

    /// Open an envelope a client addressed to the relay.
    pub fn open<T: DeserializeOwned>(&self, envelope: &HybridEnvelope) -> Result<T, CryptoError> {
        envelope::unwrap(envelope, self.encryption.secret())
    }
}

impl fmt::Debug for RelayIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayIdentity")
            .field("encrypt_key", &self.encrypt_export)
            .field("sign_key", &self.sign_export)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paranoia_crypto::signing::{import_verifying_key, verify_hex};

    #[test]
    fn replies_verify_against_exported_sign_key() {
        let identity = RelayIdentity::generate();
        let reply = identity.sign_reply(ReplyStatus::RegisterOk, "1".into());
        let key = import_verifying_key(identity.sign_export()).unwrap();

        assert!(verify_hex(&key, reply.result.as_bytes(), &reply.sign).is_ok());
        assert!(verify_hex(&key, b"2", &reply.sign).is_err());
    }

    #[test]
    fn grant_opens_only_with_client_secret() {
        let identity = RelayIdentity::generate();
        let client = KeyPair::generate();
        let other = KeyPair::generate();

        let sealed = identity.seal_grant(&client.public_export(), true).unwrap();
        let grant: LinkGrant = envelope::unwrap(&sealed, client.secret()).unwrap();
        assert!(grant.is_complete());
        assert_eq!(grant.encrypt_key, identity.encrypt_export());
        assert_eq!(grant.sign_key, identity.sign_export());

        assert!(envelope::unwrap::<LinkGrant>(&sealed, other.secret()).is_err());
    }

    #[test]
    fn bad_client_key_is_rejected() {
        let identity = RelayIdentity::generate();
        assert!(matches!(
            identity.seal_grant("not base64!", false),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn debug_hides_secrets() {
        let identity = RelayIdentity::generate();
        let debug = format!("{identity:?}");
        assert!(debug.contains(identity.sign_export()));
        assert!(!debug.contains("signing"));
    }
}
