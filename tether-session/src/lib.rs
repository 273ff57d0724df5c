//! Session lifecycle controller for a single XMPP account.
//!
//! The controller turns stored credentials into a live connection through a
//! protocol engine, keeps it alive, and recovers from failures: reconnect
//! backoff, interactive certificate trust, password forgetting, idle-driven
//! presence, and race-free sign-out.
//!
//! Everything that touches the wire, the roster or the UI is a collaborator
//! behind a trait ([`ProtocolEngine`], [`SessionSubsystems`], [`TrustPrompt`],
//! [`IdleDetector`]). The controller itself is a single-owner actor fed by
//! one [`Input`] channel; see [`SessionController::run`].

pub mod account;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod jid;
pub mod presence;
pub mod reconnect;
pub mod session;
pub mod status;
pub mod trust;

pub use account::{Account, ConnectOptions, ProxyType, SharedAccount, UseTls};
pub use config::Settings;
pub use controller::{Collaborators, ControllerHandle, SessionController, SessionState};
pub use engine::{ClientIdentity, EngineEvent, EngineEvents, EngineFactory, EngineParams, ProtocolEngine};
pub use error::{ClientError, ClientErrorKind, Error, Failure};
pub use event::{Input, Notification, NotificationEnvelope};
pub use jid::Jid;
pub use presence::{Presence, PresenceKind, StatusShow};
pub use reconnect::{Backoff, ReconnectTimer};
pub use session::{SessionSubsystems, SubsystemContext, SubsystemFactory};
pub use status::{IdleDetector, StatusTracker};
pub use trust::{
    Certificate, CertificateStorage, CertificateStorageFactory, CertificateTrustChecker,
    FileCertificateStorage, FileCertificateStorageFactory, MemoryCertificateStorage,
    MemoryCertificateStorageFactory, TrustPrompt, TrustStoreVerifier,
};
