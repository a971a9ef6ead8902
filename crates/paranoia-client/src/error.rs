use paranoia_crypto::CryptoError;
use paranoia_types::ReplyStatus;
use thiserror::Error;

use crate::passphrase::PassphraseError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid passphrase: {0}")]
    InvalidPassphrase(#[from] PassphraseError),

    #[error("Relay signature did not verify")]
    SignatureInvalid,

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Unexpected {0:?} reply")]
    UnexpectedReply(ReplyStatus),

    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Other client disconnected")]
    PeerDisconnected,

    #[error("Session was burned")]
    Burned,

    #[error("Not connected to a peer")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),
}
