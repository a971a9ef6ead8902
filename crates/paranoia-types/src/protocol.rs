use serde::{Deserialize, Serialize};

/// Payload encrypted under a random secret, with the secret itself encrypted
/// to the recipient's public key.
///
/// `wrapped_secret` is hex; `packet` is
/// `base64(base64(iv) ":" base64(salt) ":" hex(ciphertext))`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridEnvelope {
    #[serde(rename = "secret")]
    pub wrapped_secret: String,
    pub packet: String,
}

/// Commands sent FROM client TO relay over WebSocket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Announce a new client
    #[serde(rename = "r")]
    Register,

    /// Ask to be paired on `token`. `key` is the client's link public key.
    #[serde(rename = "l")]
    Link { key: String, token: String },

    /// Envelope to the relay carrying `Routed<HandshakeOffer>`
    #[serde(rename = "h")]
    Handshake(HybridEnvelope),

    /// Envelope to the relay carrying `Routed<HybridEnvelope>`
    #[serde(rename = "m")]
    Message(HybridEnvelope),
}

/// Status codes of relay replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReplyStatus {
    #[serde(rename = "er")]
    Error,
    #[serde(rename = "ro")]
    RegisterOk,
    #[serde(rename = "lo")]
    LinkOk,
    #[serde(rename = "hd")]
    HandshakeData,
    #[serde(rename = "cl")]
    Close,
    #[serde(rename = "me")]
    Message,
}

/// Every frame the relay sends. `sign` is the hex Ed25519 signature of the
/// relay over the UTF-8 bytes of `result`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedReply {
    pub status: ReplyStatus,
    pub sign: String,
    pub result: String,
}

/// Relay public keys handed to a linking client, sealed to its link key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkGrant {
    pub encrypt_key: String,
    pub sign_key: String,
    /// 0 when the client opened the session, 1 when it completed it.
    pub complete: u8,
}

impl LinkGrant {
    pub fn is_complete(&self) -> bool {
        self.complete == 1
    }
}

/// Handshake body exchanged between peers. `key` is the sender's message
/// public key locked under the shared passphrase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOffer {
    pub key: String,
}

/// What a client seals to the relay for HANDSHAKE and MESSAGE. The relay reads
/// `token` and forwards `body` untouched to the other occupant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routed<T> {
    pub token: String,
    #[serde(flatten)]
    pub body: T,
}
