//! The protocol engine seam.
//!
//! The engine owns the socket, TLS, SASL and stanza codec. The controller
//! only asks it to connect, disconnect and send presence, and hears back
//! through [`EngineEvents`].

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::account::ConnectOptions;
use crate::error::ClientError;
use crate::event::Input;
use crate::jid::Jid;
use crate::presence::Presence;
use crate::trust::CertificateTrustChecker;

pub trait ProtocolEngine: Send {
    /// Start a connection attempt. Progress is reported through `events`.
    fn connect(&mut self, options: &ConnectOptions, events: EngineEvents);
    /// Close the stream. An active engine reports `disconnected` afterwards.
    fn disconnect(&mut self);
    /// Logged in and able to send stanzas.
    fn is_available(&self) -> bool;
    /// Any connection activity, including an attempt still in progress.
    fn is_active(&self) -> bool;
    /// The full address the server bound for this stream.
    fn bound_address(&self) -> Option<Jid>;
    fn is_stream_encrypted(&self) -> bool;
    fn set_client_identity(&mut self, identity: &ClientIdentity);
    fn request_roster(&mut self);
    fn request_own_profile(&mut self);
    fn send_presence(&mut self, presence: &Presence);
}

/// What the controller hands an [`EngineFactory`] for one session.
pub struct EngineParams<'a> {
    pub address: &'a Jid,
    pub password: &'a str,
    pub certificate_path: Option<PathBuf>,
    /// To be installed in the engine's TLS verifier.
    pub trust: Arc<CertificateTrustChecker>,
}

pub trait EngineFactory: Send {
    fn create(&self, params: EngineParams<'_>) -> Box<dyn ProtocolEngine>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connected,
    Disconnected(Option<ClientError>),
    DataRead(String),
    DataWritten(String),
}

/// Event sink for one connection attempt.
///
/// Events are stamped with the attempt number so the controller can drop
/// anything a superseded attempt reports late.
#[derive(Debug, Clone)]
pub struct EngineEvents {
    attempt: u64,
    tx: mpsc::UnboundedSender<Input>,
}

impl EngineEvents {
    pub(crate) fn new(attempt: u64, tx: mpsc::UnboundedSender<Input>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn connected(&self) {
        self.send(EngineEvent::Connected);
    }

    pub fn disconnected(&self, error: Option<ClientError>) {
        self.send(EngineEvent::Disconnected(error));
    }

    pub fn data_read(&self, data: impl Into<String>) {
        self.send(EngineEvent::DataRead(data.into()));
    }

    pub fn data_written(&self, data: impl Into<String>) {
        self.send(EngineEvent::DataWritten(data.into()));
    }

    fn send(&self, event: EngineEvent) {
        // The controller is gone; nothing left to tell.
        let _ = self.tx.send(Input::Engine {
            attempt: self.attempt,
            event,
        });
    }
}

pub const FEATURE_CHAT_STATES: &str = "http://jabber.org/protocol/chatstates";
pub const FEATURE_SECURITY_LABELS: &str = "urn:xmpp:sec-label:0";
pub const FEATURE_MESSAGE_CORRECTION: &str = "urn:xmpp:message-correct:0";
pub const FEATURE_RECEIPTS: &str = "urn:xmpp:receipts";

/// Software identity and advertised features, announced on fresh login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub name: String,
    pub node: String,
    pub version: String,
    pub features: Vec<String>,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            name: "Tether".to_string(),
            node: "https://github.com/tether-im/tether".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            features: [
                FEATURE_CHAT_STATES,
                FEATURE_SECURITY_LABELS,
                FEATURE_MESSAGE_CORRECTION,
                FEATURE_RECEIPTS,
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}
