use paranoia_crypto::KdfParams;

use crate::error::ClientError;

/// Client settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub relay_url: String,
    /// Must match the other party's, or the tokens will not match.
    pub kdf: KdfParams,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let defaults = KdfParams::default();
        let relay_url = lookup("PARANOIA_RELAY_URL").unwrap_or_else(|| "ws://localhost:8080".into());
        let memory_kib = parse_or(&lookup, "PARANOIA_KDF_MEMORY_KIB", defaults.memory_kib)?;
        let iterations = parse_or(&lookup, "PARANOIA_KDF_ITERATIONS", defaults.iterations)?;
        Ok(Self {
            relay_url,
            kdf: KdfParams::new(memory_kib, iterations),
        })
    }
}

fn parse_or(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: u32) -> Result<u32, ClientError> {
    match lookup(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ClientError::Protocol(format!("{name} must be a positive integer"))),
        None => Ok(default),
    }
}
