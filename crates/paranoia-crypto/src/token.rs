use chrono::{NaiveDate, Utc};
use paranoia_types::PairingToken;

use crate::error::CryptoError;
use crate::kdf::{self, KdfParams};

/// Salt for a given day: `YYYY-MM-DD`.
pub fn date_salt(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Derive the pairing token for `passphrase` on `date`.
///
/// Same passphrase and day always give the same token; the next day gives a
/// different one.
pub fn derive_token(
    passphrase: &str,
    date: NaiveDate,
    params: &KdfParams,
) -> Result<PairingToken, CryptoError> {
    let salt = date_salt(date);
    let derived = kdf::passphrase_key(passphrase.as_bytes(), salt.as_bytes(), params)?;
    PairingToken::parse(&hex::encode(derived.as_slice()))
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))
}

/// Derive the pairing token for the current UTC day.
pub fn derive_token_today(passphrase: &str, params: &KdfParams) -> Result<PairingToken, CryptoError> {
    derive_token(passphrase, Utc::now().date_naive(), params)
}
