mod config;

use tracing::info;

use paranoia_relay::{Relay, server};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paranoia_relay=info,tower_http=info".into()),
        )
        .init();

    let config = Config::from_env()?;
    let addr = config.addr()?;

    // Fresh keys every start; clients receive them on LINK.
    let relay = Relay::generate();
    info!(sign_key = relay.identity().sign_export(), "Relay keys generated");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Paranoia relay listening on {}", addr);

    server::serve(listener, relay).await?;

    Ok(())
}
