//! Wire types shared by the Paranoia relay and its clients.
//!
//! - `protocol`: commands, signed replies and the JSON bodies they carry
//! - `token`: the validated pairing token

pub mod protocol;
pub mod token;

pub use protocol::{
    ClientCommand, HandshakeOffer, HybridEnvelope, LinkGrant, ReplyStatus, Routed, SignedReply,
};
pub use token::{PairingToken, TokenError};
