use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use paranoia_client::{ChatEvent, ClientConfig, ClientError, Session};

const BURN_COMMAND: &str = "/burn";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paranoia_client=warn".into()),
        )
        .init();

    let config = ClientConfig::from_env()?;

    // Stdin is read on its own task so the chat loop can wait on both sides.
    let (line_tx, mut lines) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut reader = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = reader.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut session = Session::connect(&config.relay_url, config.kdf)
        .await
        .with_context(|| format!("Could not reach relay at {}", config.relay_url))?;

    println!("Registered with relay. Enter the shared passphrase:");
    loop {
        let passphrase = lines.recv().await.context("stdin closed")?;
        match session.link(passphrase.trim()) {
            Ok(()) => break,
            Err(ClientError::InvalidPassphrase(e)) => println!("Passphrase {e}. Try again:"),
            Err(e) => return Err(e.into()),
        }
    }

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else {
                    session.burn().await;
                    return Ok(());
                };
                let line = line.trim();
                if line == BURN_COMMAND {
                    session.burn().await;
                    println!("Burned. All keys dropped.");
                    return Ok(());
                }
                if line.is_empty() {
                    continue;
                }
                match session.send_text(line) {
                    Ok(()) => {}
                    Err(ClientError::NotConnected) => println!("Not connected to a peer yet."),
                    Err(e) => return Err(e.into()),
                }
            }
            event = session.next_event() => {
                match event {
                    Ok(Some(ChatEvent::Registered)) => {}
                    Ok(Some(ChatEvent::WaitingForPeer)) => println!("Waiting for the other party..."),
                    Ok(Some(ChatEvent::Connected)) => {
                        println!("Connected. Type to chat, {BURN_COMMAND} to destroy the session.")
                    }
                    Ok(Some(ChatEvent::Message(text))) => println!("< {text}"),
                    Ok(None) => {
                        println!("Relay closed the connection.");
                        return Ok(());
                    }
                    Err(ClientError::PeerDisconnected) => {
                        println!("The other party disconnected.");
                        session.burn().await;
                        return Ok(());
                    }
                    Err(e) => {
                        session.burn().await;
                        return Err(e.into());
                    }
                }
            }
        }
    }
}
