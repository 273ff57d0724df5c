//! The per-connection object graph.

use std::sync::Arc;

use crate::engine::ProtocolEngine;
use crate::jid::Jid;
use crate::presence::StatusShow;
use crate::trust::{Certificate, CertificateTrustChecker};

/// Roster, chats, profile and the rest of the UI-facing machinery that only
/// makes sense once a stream has been established.
///
/// Built as one unit on the first successful login of a session and kept
/// across reconnects.
pub trait SessionSubsystems: Send {
    fn set_enabled(&mut self, enabled: bool);
    fn set_bound_address(&mut self, address: &Jid);
    fn set_stream_encrypted(&mut self, encrypted: bool);
    fn set_my_status(&mut self, show: StatusShow, status: &str);
    fn set_connecting(&mut self);
    fn show_certificate(&mut self, chain: &[Certificate]);
}

pub struct SubsystemContext<'a> {
    /// The account address as configured.
    pub account: &'a Jid,
    /// The address the server bound.
    pub bound: &'a Jid,
    pub engine: &'a dyn ProtocolEngine,
}

pub trait SubsystemFactory: Send {
    fn create(&self, ctx: SubsystemContext<'_>) -> Box<dyn SessionSubsystems>;
}

/// Everything that lives for one sign-in.
///
/// Field order is drop order: subsystems go first, then the engine, then
/// the trust store.
pub(crate) struct Session {
    pub(crate) subsystems: Option<Box<dyn SessionSubsystems>>,
    pub(crate) engine: Box<dyn ProtocolEngine>,
    pub(crate) trust: Arc<CertificateTrustChecker>,
}

impl Session {
    pub(crate) fn new(engine: Box<dyn ProtocolEngine>, trust: Arc<CertificateTrustChecker>) -> Self {
        Self {
            subsystems: None,
            engine,
            trust,
        }
    }

    /// Whether this session ever completed a login.
    pub(crate) fn has_logged_in(&self) -> bool {
        self.subsystems.is_some()
    }

    /// Disable the subsystems and release the graph in order. The engine
    /// is idle before the subsystems are dropped.
    pub(crate) fn teardown(mut self) {
        if let Some(subsystems) = self.subsystems.as_mut() {
            subsystems.set_enabled(false);
        }
        if self.engine.is_active() {
            self.engine.disconnect();
        }
        drop(self.subsystems.take());
    }
}
