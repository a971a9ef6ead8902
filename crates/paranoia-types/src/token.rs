use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of a pairing token in hex characters (32 bytes).
pub const TOKEN_HEX_LEN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("Invalid token format received")]
    InvalidFormat,
}

/// Passphrase-derived identifier the relay pairs two connections on.
///
/// Always exactly 64 lowercase hex characters.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PairingToken(String);

impl PairingToken {
    pub fn parse(raw: &str) -> Result<Self, TokenError> {
        let well_formed = raw.len() == TOKEN_HEX_LEN
            && raw.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        if !well_formed {
            return Err(TokenError::InvalidFormat);
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Debug for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PairingToken({}..)", self.short())
    }
}

impl fmt::Display for PairingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for PairingToken {
    type Error = TokenError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PairingToken> for String {
    fn from(token: PairingToken) -> Self {
        token.0
    }
}
