use std::net::SocketAddr;

use anyhow::Context;

/// Relay settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let host = lookup("PARANOIA_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = lookup("PORT")
            .unwrap_or_else(|| "8080".into())
            .parse()
            .context("PORT must be a port number")?;
        Ok(Self { host, port })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid listen address {}:{}", self.host, self.port))
    }
}
