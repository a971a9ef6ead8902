use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use paranoia_types::PairingToken;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::registry::{ConnHandle, Outbound};
use crate::router::{LinkedTokens, Relay};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one client connection until either side goes away.
///
/// Text frames are handled one at a time in arrival order. When the
/// connection ends, queued frames are allowed to finish before the sessions
/// this connection linked are torn down.
pub async fn handle_connection(socket: WebSocket, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let conn = ConnHandle::new(tx);
    let conn_id = conn.id();

    info!(conn = %conn_id, "Client connected");

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    // Writer: queued replies -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    let Some(frame) = frame else { break };
                    match frame {
                        Outbound::Reply(reply) => {
                            let text = match serde_json::to_string(&reply) {
                                Ok(text) => text,
                                Err(e) => {
                                    warn!("Failed to encode reply: {}", e);
                                    continue;
                                }
                            };
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Outbound::Close { code, reason } => {
                            let frame = CloseFrame { code, reason: reason.into() };
                            let _ = sender.send(Message::Close(Some(frame))).await;
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Frames are handled in arrival order on their own task, so the socket
    // keeps being read (pongs included) while one is in progress.
    let linked = LinkedTokens::default();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel::<String>();
    let worker = {
        let relay = relay.clone();
        let conn = conn.clone();
        let linked = linked.clone();
        tokio::spawn(async move { relay.process_in_order(conn, frame_rx, linked).await })
    };

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            msg = receiver.next() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        if frame_tx.send(text.as_str().to_owned()).is_err() {
                            break;
                        }
                    }
                    Message::Binary(_) => {
                        debug!(conn = %conn_id, "Ignoring binary frame");
                    }
                    Message::Pong(_) => {
                        pong_received.store(true, Ordering::Release);
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) => {}
                }
            }
        }
    }

    // Let queued frames finish before tearing anything down.
    drop(frame_tx);
    if let Err(e) = worker.await {
        warn!(conn = %conn_id, "Frame worker failed: {}", e);
    }

    let tokens: Vec<PairingToken> = linked
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .drain()
        .collect();
    for token in &tokens {
        relay.disconnect(conn_id, token).await;
    }

    send_task.abort();
    info!(conn = %conn_id, sessions = tokens.len(), "Client disconnected");
}
