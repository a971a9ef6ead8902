use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use paranoia_crypto::CryptoError;
use paranoia_crypto::keys::import_public_key;
use paranoia_types::{ClientCommand, HybridEnvelope, PairingToken, ReplyStatus, SignedReply};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::RelayError;
use crate::identity::RelayIdentity;
use crate::registry::{ConnHandle, Outbound, Registry, RegistryStats, Slot};

/// Reason given to the remaining occupant when its peer goes away.
pub const PEER_DISCONNECTED: &str = "Other client disconnected";

/// Normal closure.
const CLOSE_NORMAL: u16 = 1000;

/// Tokens a connection has linked, owned by its connection task.
pub type LinkedTokens = Arc<Mutex<HashSet<PairingToken>>>;

/// What a successfully handled frame did.
#[derive(Debug, PartialEq, Eq)]
pub enum Handled {
    Replied,
    Linked(PairingToken),
    Forwarded,
}

/// Relay state shared by every connection: keys and the session registry.
#[derive(Clone)]
pub struct Relay {
    identity: Arc<RelayIdentity>,
    registry: Registry,
}

impl Relay {
    pub fn new(identity: RelayIdentity) -> Self {
        Self {
            identity: Arc::new(identity),
            registry: Registry::new(),
        }
    }

    pub fn generate() -> Self {
        Self::new(RelayIdentity::generate())
    }

    pub fn identity(&self) -> &RelayIdentity {
        &self.identity
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Handle one text frame and record any token it linked. Refusals are
    /// answered with a signed ERROR; nothing here ends the connection.
    pub async fn process(&self, conn: &ConnHandle, text: &str, linked: &LinkedTokens) {
        match self.handle(conn, text).await {
            Ok(Handled::Linked(token)) => {
                linked
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(token);
            }
            Ok(_) => {}
            Err(err) => {
                warn!(conn = %conn.id(), error = ?err, "Request refused");
                conn.reply(self.error_reply(&err));
            }
        }
    }

    /// Handle a connection's frames one at a time, in arrival order, until
    /// `frames` is closed and drained.
    pub async fn process_in_order(
        &self,
        conn: ConnHandle,
        mut frames: mpsc::UnboundedReceiver<String>,
        linked: LinkedTokens,
    ) {
        while let Some(text) = frames.recv().await {
            self.process(&conn, &text, &linked).await;
        }
    }

    pub async fn handle(&self, conn: &ConnHandle, text: &str) -> Result<Handled, RelayError> {
        let command: ClientCommand =
            serde_json::from_str(text).map_err(|_| RelayError::MalformedMessage)?;

        match command {
            ClientCommand::Register => {
                let total = self.registry.record_registration();
                debug!(conn = %conn.id(), total, "Client registered");
                conn.reply(self.identity.sign_reply(ReplyStatus::RegisterOk, "1".into()));
                Ok(Handled::Replied)
            }
            ClientCommand::Link { key, token } => {
                self.link(conn, key, &token).await.map(Handled::Linked)
            }
            ClientCommand::Handshake(envelope) => {
                self.route(conn, envelope, ReplyStatus::HandshakeData).await?;
                Ok(Handled::Forwarded)
            }
            ClientCommand::Message(envelope) => {
                self.route(conn, envelope, ReplyStatus::Message).await?;
                Ok(Handled::Forwarded)
            }
        }
    }

    async fn link(&self, conn: &ConnHandle, key: String, token: &str) -> Result<PairingToken, RelayError> {
        let token = PairingToken::parse(token).map_err(|_| RelayError::InvalidTokenFormat)?;
        import_public_key(&key).map_err(|_| RelayError::MalformedMessage)?;

        let mut session = self.registry.lock_or_create(&token).await;
        let slot = session.vacancy(conn.id())?;

        let identity = self.identity.clone();
        let reply = tokio::task::spawn_blocking(move || -> Result<SignedReply, RelayError> {
            let grant = identity.seal_grant(&key, slot == Slot::B)?;
            let result = serde_json::to_string(&grant).map_err(CryptoError::from)?;
            Ok(identity.sign_reply(ReplyStatus::LinkOk, result))
        })
        .await
        .map_err(|_| RelayError::Internal)??;

        session.occupy(conn.clone())?;
        conn.reply(reply);
        drop(session);

        info!(token = token.short(), conn = %conn.id(), ?slot, "Linked");
        Ok(token)
    }

    /// Open the outer envelope, re-sign its body and hand it to the other
    /// occupant of the session it names. The body itself is never opened.
    async fn route(&self, conn: &ConnHandle, envelope: HybridEnvelope, status: ReplyStatus) -> Result<(), RelayError> {
        let identity = self.identity.clone();
        let (token, reply) = tokio::task::spawn_blocking(
            move || -> Result<(PairingToken, SignedReply), RelayError> {
                let mut body: Map<String, Value> = identity.open(&envelope)?;
                let token = match body.remove("token") {
                    Some(Value::String(raw)) => PairingToken::parse(&raw).ok(),
                    _ => None,
                }
                .ok_or(RelayError::InvalidTokenFormat)?;

                let result = serde_json::to_string(&body).map_err(CryptoError::from)?;
                Ok((token, identity.sign_reply(status, result)))
            },
        )
        .await
        .map_err(|_| RelayError::Internal)??;

        let session = self
            .registry
            .lock_existing(&token)
            .await
            .ok_or(RelayError::TokenNotFound)?;
        session.forward(conn.id(), reply)?;

        debug!(token = token.short(), conn = %conn.id(), ?status, "Forwarded");
        Ok(())
    }

    /// Tear down the session on `token` if `conn_id` is in it, and tell the
    /// other occupant.
    pub async fn disconnect(&self, conn_id: Uuid, token: &PairingToken) {
        let Some(mut session) = self.registry.lock_existing(token).await else {
            return;
        };
        let Some(peer) = session.leave(conn_id) else {
            debug!(token = token.short(), conn = %conn_id, "Session closed");
            return;
        };

        let notice = self
            .identity
            .sign_reply(ReplyStatus::Close, BASE64.encode(PEER_DISCONNECTED));
        peer.reply(notice);
        peer.send(Outbound::Close {
            code: CLOSE_NORMAL,
            reason: PEER_DISCONNECTED.into(),
        });

        info!(token = token.short(), conn = %conn_id, peer = %peer.id(), "Session closed, peer notified");
    }

    fn error_reply(&self, err: &RelayError) -> SignedReply {
        self.identity
            .sign_reply(ReplyStatus::Error, BASE64.encode(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paranoia_crypto::signing::{import_verifying_key, verify_hex};
    use paranoia_crypto::{KeyPair, envelope};
    use paranoia_types::LinkGrant;
    use serde_json::json;

    struct Peer {
        conn: ConnHandle,
        rx: mpsc::UnboundedReceiver<Outbound>,
        link_keys: KeyPair,
    }

    impl Peer {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn: ConnHandle::new(tx),
                rx,
                link_keys: KeyPair::generate(),
            }
        }

        fn link_frame(&self, token: &str) -> String {
            serde_json::to_string(&ClientCommand::Link {
                key: self.link_keys.public_export(),
                token: token.into(),
            })
            .unwrap()
        }

        fn next_reply(&mut self) -> SignedReply {
            match self.rx.try_recv().expect("no frame queued") {
                Outbound::Reply(reply) => reply,
                other => panic!("expected a reply, got {other:?}"),
            }
        }

        fn grant(&mut self) -> LinkGrant {
            let reply = self.next_reply();
            assert_eq!(reply.status, ReplyStatus::LinkOk);
            let sealed: HybridEnvelope = serde_json::from_str(&reply.result).unwrap();
            envelope::unwrap(&sealed, self.link_keys.secret()).unwrap()
        }
    }

    fn token(fill: char) -> String {
        fill.to_string().repeat(64)
    }

    fn error_text(reply: &SignedReply) -> String {
        assert_eq!(reply.status, ReplyStatus::Error);
        String::from_utf8(BASE64.decode(&reply.result).unwrap()).unwrap()
    }

    fn to_relay(relay: &Relay, body: Value) -> HybridEnvelope {
        let key = import_public_key(relay.identity().encrypt_export()).unwrap();
        envelope::wrap(&body, &key).unwrap()
    }

    fn message_frame(relay: &Relay, body: Value) -> String {
        serde_json::to_string(&ClientCommand::Message(to_relay(relay, body))).unwrap()
    }

    async fn pair(relay: &Relay, t: &str) -> (Peer, Peer) {
        let mut one = Peer::new();
        let mut two = Peer::new();
        relay.handle(&one.conn, &one.link_frame(t)).await.unwrap();
        relay.handle(&two.conn, &two.link_frame(t)).await.unwrap();
        one.grant();
        two.grant();
        (one, two)
    }

    #[tokio::test]
    async fn register_is_signed_one() {
        let relay = Relay::generate();
        let mut peer = Peer::new();

        let handled = relay.handle(&peer.conn, r#"{"type":"r"}"#).await.unwrap();
        assert_eq!(handled, Handled::Replied);

        let reply = peer.next_reply();
        assert_eq!(reply.status, ReplyStatus::RegisterOk);
        assert_eq!(reply.result, "1");
        let key = import_verifying_key(relay.identity().sign_export()).unwrap();
        verify_hex(&key, reply.result.as_bytes(), &reply.sign).unwrap();
        assert_eq!(relay.stats().registered, 1);
    }

    #[tokio::test]
    async fn garbage_gets_generic_error() {
        let relay = Relay::generate();
        let mut peer = Peer::new();
        let linked = LinkedTokens::default();

        for frame in ["not json", r#"{"type":"zz"}"#, r#"{"type":"l"}"#] {
            relay.process(&peer.conn, frame, &linked).await;
            assert_eq!(error_text(&peer.next_reply()), "Invalid message");
        }
    }

    #[tokio::test]
    async fn bad_token_format_is_refused_before_lookup() {
        let relay = Relay::generate();
        let peer = Peer::new();

        for bad in ["abc".to_string(), "A".repeat(64), "g".repeat(64), "a".repeat(65)] {
            let err = relay.handle(&peer.conn, &peer.link_frame(&bad)).await.unwrap_err();
            assert!(matches!(err, RelayError::InvalidTokenFormat));
        }
        assert_eq!(relay.stats().sessions, 0);
    }

    #[tokio::test]
    async fn bad_link_key_is_malformed() {
        let relay = Relay::generate();
        let peer = Peer::new();
        let frame = json!({"type": "l", "key": "short", "token": token('a')}).to_string();

        let err = relay.handle(&peer.conn, &frame).await.unwrap_err();
        assert!(matches!(err, RelayError::MalformedMessage));
        assert_eq!(relay.stats().sessions, 0);
    }

    #[tokio::test]
    async fn first_link_waits_second_completes_third_is_refused() {
        let relay = Relay::generate();
        let t = token('a');
        let mut one = Peer::new();
        let mut two = Peer::new();
        let mut three = Peer::new();
        let linked = LinkedTokens::default();

        relay.process(&one.conn, &one.link_frame(&t), &linked).await;
        let grant = one.grant();
        assert!(!grant.is_complete());
        assert_eq!(grant.encrypt_key, relay.identity().encrypt_export());

        relay.handle(&two.conn, &two.link_frame(&t)).await.unwrap();
        assert!(two.grant().is_complete());
        assert!(one.rx.try_recv().is_err());

        relay.process(&three.conn, &three.link_frame(&t), &linked).await;
        assert_eq!(
            error_text(&three.next_reply()),
            "Session already has two participants"
        );

        // Two is still paired: one's traffic reaches it.
        let frame = message_frame(&relay, json!({"token": t, "secret": "s", "packet": "p"}));
        relay.handle(&one.conn, &frame).await.unwrap();
        assert_eq!(two.next_reply().status, ReplyStatus::Message);
        assert!(three.rx.try_recv().is_err());

        assert_eq!(linked.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn handshake_goes_only_to_the_other_occupant() {
        let relay = Relay::generate();
        let t = token('b');
        let (mut one, mut two) = pair(&relay, &t).await;

        let envelope = to_relay(&relay, json!({"token": t, "key": "locked"}));
        let frame = serde_json::to_string(&ClientCommand::Handshake(envelope)).unwrap();
        let handled = relay.handle(&two.conn, &frame).await.unwrap();
        assert_eq!(handled, Handled::Forwarded);

        let forwarded = one.next_reply();
        assert_eq!(forwarded.status, ReplyStatus::HandshakeData);
        let body: Value = serde_json::from_str(&forwarded.result).unwrap();
        assert_eq!(body, json!({"key": "locked"}));
        assert!(two.rx.try_recv().is_err());

        let key = import_verifying_key(relay.identity().sign_export()).unwrap();
        verify_hex(&key, forwarded.result.as_bytes(), &forwarded.sign).unwrap();
    }

    #[tokio::test]
    async fn inner_envelope_is_forwarded_unopened() {
        let relay = Relay::generate();
        let t = token('c');
        let (one, mut two) = pair(&relay, &t).await;

        let peer_keys = KeyPair::generate();
        let inner = envelope::wrap("hello", peer_keys.public()).unwrap();
        let outer = json!({"token": t, "secret": inner.wrapped_secret, "packet": inner.packet});
        relay.handle(&one.conn, &message_frame(&relay, outer)).await.unwrap();

        let reply = two.next_reply();
        assert!(!reply.result.contains("hello"));
        let received: HybridEnvelope = serde_json::from_str(&reply.result).unwrap();
        assert_eq!(received, inner);
        let text: String = envelope::unwrap(&received, peer_keys.secret()).unwrap();
        assert_eq!(text, "hello");
    }

    #[tokio::test]
    async fn routing_errors_are_distinct() {
        let relay = Relay::generate();
        let t = token('d');
        let (_one, _two) = pair(&relay, &t).await;
        let stranger = Peer::new();

        let unknown = message_frame(&relay, json!({"token": token('e'), "secret": "s", "packet": "p"}));
        let err = relay.handle(&stranger.conn, &unknown).await.unwrap_err();
        assert!(matches!(err, RelayError::TokenNotFound));

        let bad = message_frame(&relay, json!({"token": "nope", "secret": "s", "packet": "p"}));
        let err = relay.handle(&stranger.conn, &bad).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidTokenFormat));

        let missing = message_frame(&relay, json!({"secret": "s", "packet": "p"}));
        let err = relay.handle(&stranger.conn, &missing).await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidTokenFormat));

        let intruding = message_frame(&relay, json!({"token": t, "secret": "s", "packet": "p"}));
        let err = relay.handle(&stranger.conn, &intruding).await.unwrap_err();
        assert!(matches!(err, RelayError::NotSessionMember));
    }

    #[tokio::test]
    async fn message_before_peer_links_is_token_not_found() {
        let relay = Relay::generate();
        let t = token('f');
        let mut one = Peer::new();
        relay.handle(&one.conn, &one.link_frame(&t)).await.unwrap();
        one.grant();

        let frame = message_frame(&relay, json!({"token": t, "secret": "s", "packet": "p"}));
        let err = relay.handle(&one.conn, &frame).await.unwrap_err();
        assert!(matches!(err, RelayError::TokenNotFound));
    }

    #[tokio::test]
    async fn envelope_not_for_relay_is_refused() {
        let relay = Relay::generate();
        let stranger = Peer::new();
        let elsewhere = KeyPair::generate();
        let envelope = envelope::wrap(&json!({"token": token('a')}), elsewhere.public()).unwrap();
        let frame = serde_json::to_string(&ClientCommand::Message(envelope)).unwrap();

        let err = relay.handle(&stranger.conn, &frame).await.unwrap_err();
        assert!(matches!(err, RelayError::Crypto(CryptoError::Decryption)));
    }

    #[tokio::test]
    async fn envelope_errors_do_not_leak_details() {
        let relay = Relay::generate();
        let mut stranger = Peer::new();
        let linked = LinkedTokens::default();

        // Opens fine but is not an object.
        let frame =
            serde_json::to_string(&ClientCommand::Message(to_relay(&relay, json!("not an object"))))
                .unwrap();
        relay.process(&stranger.conn, &frame, &linked).await;

        assert_eq!(error_text(&stranger.next_reply()), "Could not open envelope");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn frames_from_one_connection_are_forwarded_in_order() {
        let relay = Relay::generate();
        let t = token('9');
        let (one, mut two) = pair(&relay, &t).await;

        let handshake = serde_json::to_string(&ClientCommand::Handshake(to_relay(
            &relay,
            json!({"token": t, "key": "locked"}),
        )))
        .unwrap();
        let message = message_frame(&relay, json!({"token": t, "secret": "s", "packet": "p"}));

        let (frames, rx) = mpsc::unbounded_channel();
        let worker = {
            let relay = relay.clone();
            let conn = one.conn.clone();
            tokio::spawn(async move {
                relay
                    .process_in_order(conn, rx, LinkedTokens::default())
                    .await
            })
        };

        const ROUNDS: usize = 200;
        for _ in 0..ROUNDS {
            frames.send(handshake.clone()).unwrap();
            frames.send(message.clone()).unwrap();
        }
        drop(frames);
        worker.await.unwrap();

        for _ in 0..ROUNDS {
            assert_eq!(two.next_reply().status, ReplyStatus::HandshakeData);
            assert_eq!(two.next_reply().status, ReplyStatus::Message);
        }
        assert!(two.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_notifies_and_closes_peer() {
        let relay = Relay::generate();
        let t = token('0');
        let (one, mut two) = pair(&relay, &t).await;
        let token = PairingToken::parse(&t).unwrap();

        relay.disconnect(one.conn.id(), &token).await;

        let notice = two.next_reply();
        assert_eq!(notice.status, ReplyStatus::Close);
        assert_eq!(BASE64.decode(&notice.result).unwrap(), PEER_DISCONNECTED.as_bytes());
        match two.rx.try_recv().unwrap() {
            Outbound::Close { code, reason } => {
                assert_eq!(code, 1000);
                assert_eq!(reason, PEER_DISCONNECTED);
            }
            other => panic!("expected close, got {other:?}"),
        }
        assert_eq!(relay.stats().sessions, 0);

        let frame = message_frame(&relay, json!({"token": t, "secret": "s", "packet": "p"}));
        let err = relay.handle(&two.conn, &frame).await.unwrap_err();
        assert!(matches!(err, RelayError::TokenNotFound));
    }

    #[tokio::test]
    async fn disconnect_of_lone_occupant_removes_session() {
        let relay = Relay::generate();
        let t = token('1');
        let mut one = Peer::new();
        relay.handle(&one.conn, &one.link_frame(&t)).await.unwrap();
        one.grant();

        relay.disconnect(one.conn.id(), &PairingToken::parse(&t).unwrap()).await;
        assert_eq!(relay.stats().sessions, 0);
    }
}
