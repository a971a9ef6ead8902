//! Client side of the pairing protocol, without any I/O.
//!
//! The engine consumes relay replies and user actions and returns the
//! commands to send plus the events to show. [`crate::transport::Session`]
//! drives it over a WebSocket; tests drive it directly.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use chrono::NaiveDate;
use paranoia_crypto::keys::import_public_key;
use paranoia_crypto::packet::{self, PacketKey};
use paranoia_crypto::signing::{import_verifying_key, verify_hex};
use paranoia_crypto::token::{derive_token, derive_token_today};
use paranoia_crypto::{CryptoError, KdfParams, KeyPair, PublicKey, VerifyingKey, envelope};
use paranoia_types::{
    ClientCommand, HandshakeOffer, HybridEnvelope, LinkGrant, PairingToken, ReplyStatus, Routed,
    SignedReply,
};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::error::ClientError;
use crate::passphrase::PassphrasePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Registering,
    AwaitingPassphrase,
    Linking,
    /// Linked first; waiting for the other party
    AwaitingPeer,
    HandshakeInitiating,
    AwaitingHandshakeData,
    Connected,
    Burned,
    Failed(String),
}

/// Things the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Registered,
    WaitingForPeer,
    Connected,
    Message(String),
}

/// Result of one engine step.
#[derive(Debug, Default)]
pub struct EngineOutput {
    pub commands: Vec<ClientCommand>,
    pub events: Vec<ChatEvent>,
}

impl EngineOutput {
    fn command(command: ClientCommand) -> Self {
        Self {
            commands: vec![command],
            events: Vec::new(),
        }
    }

    fn event(event: ChatEvent) -> Self {
        Self {
            commands: Vec::new(),
            events: vec![event],
        }
    }
}

/// Everything derived from the passphrase. Dropping it zeroizes the secrets.
struct SessionKeys {
    /// Needed until the peer's handshake is unlocked.
    passphrase: Option<Zeroizing<String>>,
    token: PairingToken,
    link: KeyPair,
    message: KeyPair,
}

struct RelayKeys {
    encrypt: PublicKey,
    sign: VerifyingKey,
}

pub struct ClientEngine {
    state: EngineState,
    kdf: KdfParams,
    policy: PassphrasePolicy,
    session: Option<SessionKeys>,
    relay: Option<RelayKeys>,
    peer: Option<PublicKey>,
    sent_handshake: bool,
}

impl ClientEngine {
    pub fn new(kdf: KdfParams) -> Self {
        Self::with_policy(kdf, PassphrasePolicy::default())
    }

    pub fn with_policy(kdf: KdfParams, policy: PassphrasePolicy) -> Self {
        Self {
            state: EngineState::Idle,
            kdf,
            policy,
            session: None,
            relay: None,
            peer: None,
            sent_handshake: false,
        }
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    /// True while any passphrase-derived or relay key material is held.
    pub fn holds_key_material(&self) -> bool {
        self.session.is_some() || self.relay.is_some() || self.peer.is_some()
    }

    pub fn token(&self) -> Option<&PairingToken> {
        self.session.as_ref().map(|s| &s.token)
    }

    pub fn start(&mut self) -> Result<EngineOutput, ClientError> {
        self.ensure_live()?;
        if self.state != EngineState::Idle {
            return Err(ClientError::Protocol("Engine already started".into()));
        }
        self.state = EngineState::Registering;
        Ok(EngineOutput::command(ClientCommand::Register))
    }

    /// Derive today's token (UTC) and ask the relay to pair on it.
    pub fn link(&mut self, passphrase: &str) -> Result<EngineOutput, ClientError> {
        self.link_with(passphrase, derive_token_today)
    }

    /// Like [`ClientEngine::link`] with an explicit UTC date for the token salt.
    pub fn link_with_date(&mut self, passphrase: &str, date: NaiveDate) -> Result<EngineOutput, ClientError> {
        self.link_with(passphrase, |passphrase, kdf| derive_token(passphrase, date, kdf))
    }

    fn link_with(
        &mut self,
        passphrase: &str,
        derive: impl FnOnce(&str, &KdfParams) -> Result<PairingToken, CryptoError>,
    ) -> Result<EngineOutput, ClientError> {
        self.ensure_live()?;
        if self.state != EngineState::AwaitingPassphrase {
            return Err(ClientError::Protocol("Not ready for a passphrase".into()));
        }
        self.policy.validate(passphrase)?;

        let token = derive(passphrase, &self.kdf)?;
        let link = KeyPair::generate();
        let message = KeyPair::generate();
        let command = ClientCommand::Link {
            key: link.public_export(),
            token: token.to_string(),
        };

        debug!(token = token.short(), "Linking");
        self.session = Some(SessionKeys {
            passphrase: Some(Zeroizing::new(passphrase.to_owned())),
            token,
            link,
            message,
        });
        self.state = EngineState::Linking;
        Ok(EngineOutput::command(command))
    }

    /// Apply one relay reply. Any error is fatal: the engine moves to
    /// `Failed` and forgets its keys.
    pub fn handle_reply(&mut self, reply: SignedReply) -> Result<EngineOutput, ClientError> {
        self.ensure_live()?;
        if let EngineState::Failed(reason) = &self.state {
            return Err(ClientError::Protocol(format!("Session failed: {reason}")));
        }

        self.apply(reply).inspect_err(|err| self.fail(err.to_string()))
    }

    /// Seal `text` to the peer and address it to the relay.
    pub fn send_text(&mut self, text: &str) -> Result<EngineOutput, ClientError> {
        self.ensure_live()?;
        if self.state != EngineState::Connected {
            return Err(ClientError::NotConnected);
        }
        let (Some(session), Some(relay), Some(peer)) = (&self.session, &self.relay, &self.peer) else {
            return Err(ClientError::NotConnected);
        };

        let inner = envelope::wrap(text, peer)?;
        let routed = Routed {
            token: session.token.to_string(),
            body: inner,
        };
        let outer = envelope::wrap(&routed, &relay.encrypt)?;
        Ok(EngineOutput::command(ClientCommand::Message(outer)))
    }

    /// The transport went away without a CLOSE from the relay.
    pub fn transport_closed(&mut self) {
        if !matches!(self.state, EngineState::Burned | EngineState::Failed(_)) {
            self.fail("Connection closed".into());
        }
    }

    /// Drop every key, the token and the passphrase. Works from any state and
    /// is a no-op once burned.
    pub fn burn(&mut self) {
        if self.state == EngineState::Burned {
            return;
        }
        self.wipe();
        self.state = EngineState::Burned;
        info!("Session burned");
    }

    fn apply(&mut self, reply: SignedReply) -> Result<EngineOutput, ClientError> {
        match reply.status {
            ReplyStatus::Error => {
                self.verify_if_known(&reply)?;
                Err(ClientError::Relay(decode_reason(&reply.result)))
            }
            ReplyStatus::Close => {
                self.verify(&reply)?;
                Err(ClientError::PeerDisconnected)
            }
            ReplyStatus::RegisterOk => self.on_registered(),
            ReplyStatus::LinkOk => self.on_linked(&reply),
            ReplyStatus::HandshakeData => self.on_handshake(&reply),
            ReplyStatus::Message => self.on_message(&reply),
        }
    }

    fn on_registered(&mut self) -> Result<EngineOutput, ClientError> {
        if self.state != EngineState::Registering {
            return Err(ClientError::UnexpectedReply(ReplyStatus::RegisterOk));
        }
        self.state = EngineState::AwaitingPassphrase;
        Ok(EngineOutput::event(ChatEvent::Registered))
    }

    fn on_linked(&mut self, reply: &SignedReply) -> Result<EngineOutput, ClientError> {
        if self.state != EngineState::Linking {
            return Err(ClientError::UnexpectedReply(ReplyStatus::LinkOk));
        }
        let session = self.session.as_ref().ok_or(ClientError::NotConnected)?;

        let sealed: HybridEnvelope = serde_json::from_str(&reply.result)
            .map_err(|e| ClientError::Protocol(format!("Bad LINK_OK payload: {e}")))?;
        let grant: LinkGrant = envelope::unwrap(&sealed, session.link.secret())?;
        let relay = RelayKeys {
            encrypt: import_public_key(&grant.encrypt_key)?,
            sign: import_verifying_key(&grant.sign_key)?,
        };
        // The reply carries the key it is signed with; a relay that cannot
        // open our link envelope cannot produce a matching grant.
        verify_hex(&relay.sign, reply.result.as_bytes(), &reply.sign)
            .map_err(|_| ClientError::SignatureInvalid)?;
        self.relay = Some(relay);

        if !grant.is_complete() {
            self.state = EngineState::AwaitingPeer;
            return Ok(EngineOutput::event(ChatEvent::WaitingForPeer));
        }

        self.state = EngineState::HandshakeInitiating;
        let handshake = self.handshake()?;
        self.sent_handshake = true;
        self.state = EngineState::AwaitingHandshakeData;
        Ok(EngineOutput::command(handshake))
    }

    fn on_handshake(&mut self, reply: &SignedReply) -> Result<EngineOutput, ClientError> {
        if !matches!(
            self.state,
            EngineState::AwaitingPeer | EngineState::AwaitingHandshakeData
        ) {
            return Err(ClientError::UnexpectedReply(ReplyStatus::HandshakeData));
        }
        self.verify(reply)?;

        let offer: HandshakeOffer = serde_json::from_str(&reply.result)
            .map_err(|e| ClientError::Protocol(format!("Bad handshake payload: {e}")))?;
        let session = self.session.as_ref().ok_or(ClientError::NotConnected)?;
        let passphrase = session
            .passphrase
            .as_deref()
            .ok_or_else(|| ClientError::Protocol("Passphrase already erased".into()))?;
        let peer_export: String =
            packet::open(PacketKey::Passphrase(passphrase, &self.kdf), &offer.key)?;
        self.peer = Some(import_public_key(&peer_export)?);

        let mut output = EngineOutput::event(ChatEvent::Connected);
        if !self.sent_handshake {
            output.commands.push(self.handshake()?);
            self.sent_handshake = true;
        }

        if let Some(session) = self.session.as_mut() {
            session.passphrase = None;
        }
        self.state = EngineState::Connected;
        info!("Connected to peer");
        Ok(output)
    }

    fn on_message(&mut self, reply: &SignedReply) -> Result<EngineOutput, ClientError> {
        if self.state != EngineState::Connected {
            return Err(ClientError::UnexpectedReply(ReplyStatus::Message));
        }
        self.verify(reply)?;

        let sealed: HybridEnvelope = serde_json::from_str(&reply.result)
            .map_err(|e| ClientError::Protocol(format!("Bad message payload: {e}")))?;
        let session = self.session.as_ref().ok_or(ClientError::NotConnected)?;
        let text: String = envelope::unwrap(&sealed, session.message.secret())?;
        Ok(EngineOutput::event(ChatEvent::Message(text)))
    }

    /// Our message key, locked under the passphrase, addressed to the relay.
    fn handshake(&self) -> Result<ClientCommand, ClientError> {
        let (Some(session), Some(relay)) = (&self.session, &self.relay) else {
            return Err(ClientError::NotConnected);
        };
        let passphrase = session
            .passphrase
            .as_deref()
            .ok_or_else(|| ClientError::Protocol("Passphrase already erased".into()))?;

        let key = packet::seal(
            PacketKey::Passphrase(passphrase, &self.kdf),
            &session.message.public_export(),
        )?;
        let routed = Routed {
            token: session.token.to_string(),
            body: HandshakeOffer { key },
        };
        Ok(ClientCommand::Handshake(envelope::wrap(&routed, &relay.encrypt)?))
    }

    fn verify(&self, reply: &SignedReply) -> Result<(), ClientError> {
        let relay = self
            .relay
            .as_ref()
            .ok_or(ClientError::UnexpectedReply(reply.status))?;
        verify_hex(&relay.sign, reply.result.as_bytes(), &reply.sign)
            .map_err(|_| ClientError::SignatureInvalid)
    }

    /// Replies that can arrive before LINK_OK cannot be checked yet.
    fn verify_if_known(&self, reply: &SignedReply) -> Result<(), ClientError> {
        match self.relay {
            Some(_) => self.verify(reply),
            None => Ok(()),
        }
    }

    fn ensure_live(&self) -> Result<(), ClientError> {
        if self.state == EngineState::Burned {
            return Err(ClientError::Burned);
        }
        Ok(())
    }

    fn fail(&mut self, reason: String) {
        warn!("Session failed: {}", reason);
        self.wipe();
        self.state = EngineState::Failed(reason);
    }

    fn wipe(&mut self) {
        self.session = None;
        self.relay = None;
        self.peer = None;
        self.sent_handshake = false;
    }
}

fn decode_reason(result: &str) -> String {
    BASE64
        .decode(result)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| result.to_owned())
}
