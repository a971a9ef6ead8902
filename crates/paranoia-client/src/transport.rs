use std::collections::VecDeque;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use paranoia_crypto::KdfParams;
use paranoia_types::SignedReply;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::engine::{ChatEvent, ClientEngine, EngineOutput, EngineState};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One chat session over a WebSocket to the relay.
///
/// Outgoing frames go through a writer task, so sending never awaits and
/// [`Session::next_event`] is cancel safe.
pub struct Session {
    engine: ClientEngine,
    incoming: SplitStream<WsStream>,
    outgoing: mpsc::UnboundedSender<Message>,
    writer: JoinHandle<()>,
    pending: VecDeque<ChatEvent>,
}

impl Session {
    /// Connect and register. Returns once the relay has acknowledged.
    pub async fn connect(url: &str, kdf: KdfParams) -> Result<Self, ClientError> {
        Self::connect_with(url, ClientEngine::new(kdf)).await
    }

    pub async fn connect_with(url: &str, engine: ClientEngine) -> Result<Self, ClientError> {
        let (ws, _) = connect_async(url).await?;
        info!("Connected to relay at {}", url);

        let (mut sink, incoming) = ws.split();
        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = sink.send(message).await {
                    warn!("Relay write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let mut session = Self {
            engine,
            incoming,
            outgoing,
            writer,
            pending: VecDeque::new(),
        };
        let start = session.engine.start()?;
        session.dispatch(start)?;

        match session.next_event().await? {
            Some(ChatEvent::Registered) => Ok(session),
            Some(other) => Err(ClientError::Protocol(format!("Expected registration, got {other:?}"))),
            None => Err(ClientError::Protocol("Relay closed before registration".into())),
        }
    }

    pub fn state(&self) -> &EngineState {
        self.engine.state()
    }

    pub fn link(&mut self, passphrase: &str) -> Result<(), ClientError> {
        let output = self.engine.link(passphrase)?;
        self.dispatch(output)
    }

    pub fn send_text(&mut self, text: &str) -> Result<(), ClientError> {
        let output = self.engine.send_text(text)?;
        self.dispatch(output)
    }

    /// Next thing to show the user, or `None` once the relay has gone away.
    pub async fn next_event(&mut self) -> Result<Option<ChatEvent>, ClientError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }

            let Some(message) = self.incoming.next().await else {
                self.engine.transport_closed();
                return Ok(None);
            };
            match message? {
                Message::Text(text) => {
                    let reply: SignedReply = serde_json::from_str(&text)
                        .map_err(|e| ClientError::Protocol(format!("Unreadable relay frame: {e}")))?;
                    debug!(status = ?reply.status, "Relay reply");
                    let output = self.engine.handle_reply(reply)?;
                    self.dispatch(output)?;
                }
                Message::Close(_) => {
                    self.engine.transport_closed();
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    /// Drop all key material and hang up.
    pub async fn burn(mut self) {
        self.engine.burn();
        self.pending.clear();
        let _ = self.outgoing.send(Message::Close(None));
        drop(self.outgoing);
        let _ = self.writer.await;
    }

    fn dispatch(&mut self, output: EngineOutput) -> Result<(), ClientError> {
        for command in &output.commands {
            let text = serde_json::to_string(command)
                .map_err(|e| ClientError::Protocol(e.to_string()))?;
            self.outgoing
                .send(Message::Text(text.into()))
                .map_err(|_| ClientError::Transport(tungstenite::Error::ConnectionClosed))?;
        }
        self.pending.extend(output.events);
        Ok(())
    }
}
