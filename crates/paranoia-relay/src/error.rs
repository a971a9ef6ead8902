use paranoia_crypto::CryptoError;
use thiserror::Error;

/// Reasons a client request is refused. The `Display` text is what the client
/// receives (base64-encoded) in the ERROR reply.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Invalid message")]
    MalformedMessage,

    #[error("Invalid token format received")]
    InvalidTokenFormat,

    #[error("Token not found or client disconnected")]
    TokenNotFound,

    #[error("Session already has two participants")]
    SessionFull,

    #[error("Connection already linked to this token")]
    AlreadyLinked,

    #[error("Connection is not part of this session")]
    NotSessionMember,

    #[error("Could not open envelope")]
    Crypto(#[from] CryptoError),

    #[error("Internal relay error")]
    Internal,
}
