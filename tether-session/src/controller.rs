//! The per-account session lifecycle controller.
//!
//! One [`SessionController`] owns one account's connection. Every input
//! arrives as an [`Input`] on a single channel and is handled to completion
//! before the next one, so a disconnect is always fully processed before a
//! later attempt's events are looked at.
//!
//! ```text
//!   Disabled ──enable──▶ Connecting ──connected──▶ Connected
//!                          ▲    │                     │
//!                timer /   │    │ error before login  │ error
//!                presence  │    ▼                     ▼
//!                        Retrying ◀──────────── (classify)
//!                                               │        │
//!                                    fatal ─────┘        └──── offline / clean close
//!                                      ▼                          ▼
//!                                    Failed                    Offline
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;

use crate::account::{SharedAccount, UseTls};
use crate::config::Settings;
use crate::engine::{ClientIdentity, EngineEvent, EngineEvents, EngineFactory, EngineParams};
use crate::error::{ClientError, Error, Failure};
use crate::event::{Input, Notification};
use crate::jid::Jid;
use crate::presence::{Presence, StatusShow};
use crate::reconnect::ReconnectTimer;
use crate::session::{Session, SubsystemContext, SubsystemFactory};
use crate::status::{IdleDetector, StatusTracker};
use crate::trust::{
    CertificateStorageFactory, CertificateTrustChecker, MemoryCertificateStorage, TrustPrompt,
};

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Disabled,
    Connecting,
    Connected,
    Retrying { delay_secs: u64 },
    /// Session kept, nothing scheduled.
    Offline,
    /// Gave up and signed out.
    Failed,
    /// Quit requested; waiting for the engine to go idle.
    SigningOut,
}

/// The services a controller drives.
pub struct Collaborators {
    pub engines: Box<dyn EngineFactory>,
    pub subsystems: Box<dyn SubsystemFactory>,
    pub certificates: Box<dyn CertificateStorageFactory>,
    pub prompt: Box<dyn TrustPrompt>,
    pub idle: Box<dyn IdleDetector>,
}

/// Cloneable handle for feeding a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    input_tx: mpsc::UnboundedSender<Input>,
    active: Arc<AtomicBool>,
}

impl ControllerHandle {
    fn send(&self, input: Input) -> Result<(), Error> {
        self.input_tx.send(input).map_err(|_| Error::ControllerStopped)
    }

    pub fn enable(&self) -> Result<(), Error> {
        self.send(Input::EnabledChanged(true))
    }

    /// Same as [`sign_out`](Self::sign_out).
    pub fn disable(&self) -> Result<(), Error> {
        self.send(Input::EnabledChanged(false))
    }

    pub fn change_presence(&self, show: StatusShow, status: impl Into<String>) -> Result<(), Error> {
        self.send(Input::ChangePresence {
            show,
            status: status.into(),
        })
    }

    pub fn sign_out(&self) -> Result<(), Error> {
        self.send(Input::SignOut)
    }

    pub fn quit(&self) -> Result<(), Error> {
        self.send(Input::Quit)
    }

    pub fn idle_changed(&self, idle: bool) -> Result<(), Error> {
        self.send(Input::IdleChanged(idle))
    }

    pub fn settings_changed(&self, settings: Settings) -> Result<(), Error> {
        self.send(Input::SettingsChanged(settings))
    }

    pub fn show_certificate(&self) -> Result<(), Error> {
        self.send(Input::ShowCertificate)
    }

    /// Whether the engine had any connection activity as of the last
    /// handled input.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }
}

pub struct SessionController {
    account: SharedAccount,
    settings: Settings,
    collab: Collaborators,
    identity: ClientIdentity,

    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: mpsc::UnboundedReceiver<Input>,
    notify_tx: mpsc::UnboundedSender<Notification>,

    session: Option<Session>,
    status: Option<StatusTracker>,
    reconnect: ReconnectTimer,
    next_attempt: u64,
    current_attempt: Option<u64>,
    bound: Option<Jid>,
    state: SessionState,
    last_error: Option<String>,
    active: Arc<AtomicBool>,

    /// Account was typed into the login box rather than loaded from storage.
    transient: bool,
    before_first_login: bool,
    first_login_failed: bool,
    quit_requested: bool,
    offline_requested: bool,
    my_status_looks_online: bool,
    finished: bool,
}

impl SessionController {
    pub fn new(
        account: SharedAccount,
        settings: Settings,
        mut collab: Collaborators,
    ) -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        collab.idle.set_idle_timeout(settings.idle_timeout_seconds);
        let controller = Self {
            account,
            settings,
            collab,
            identity: ClientIdentity::default(),
            input_tx,
            input_rx,
            notify_tx,
            session: None,
            status: None,
            reconnect: ReconnectTimer::new(),
            next_attempt: 1,
            current_attempt: None,
            bound: None,
            state: SessionState::Disabled,
            last_error: None,
            active: Arc::new(AtomicBool::new(false)),
            transient: false,
            before_first_login: true,
            first_login_failed: false,
            quit_requested: false,
            offline_requested: false,
            my_status_looks_online: false,
            finished: false,
        };
        (controller, notify_rx)
    }

    /// Mark the account as created ad hoc in the UI, so a failed first
    /// login asks for it to be discarded.
    pub fn set_transient(&mut self, transient: bool) {
        self.transient = transient;
    }

    pub fn set_client_identity(&mut self, identity: ClientIdentity) {
        self.identity = identity;
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            input_tx: self.input_tx.clone(),
            active: self.active.clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_active(&self) -> bool {
        self.session.as_ref().is_some_and(|s| s.engine.is_active())
    }

    pub fn first_login_failed(&self) -> bool {
        self.first_login_failed
    }

    pub fn should_be_deleted(&self) -> bool {
        !self.before_first_login && self.transient && self.first_login_failed
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Handle inputs until quit completes.
    pub async fn run(mut self) {
        while !self.finished {
            if !self.step().await {
                break;
            }
        }
        tracing::debug!("Session controller stopped");
    }

    /// Wait for one input and handle it. Returns false if the channel closed.
    pub async fn step(&mut self) -> bool {
        match self.input_rx.recv().await {
            Some(input) => {
                self.dispatch(input);
                true
            }
            None => false,
        }
    }

    /// Handle everything already queued without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.input_rx.try_recv() {
            self.dispatch(input);
            handled += 1;
        }
        handled
    }

    pub fn dispatch(&mut self, input: Input) {
        match input {
            Input::EnabledChanged(true) => self.handle_login_request(),
            Input::EnabledChanged(false) | Input::SignOut => self.sign_out(),
            Input::ChangePresence { show, status } => self.handle_change_presence(show, status),
            Input::Quit => self.quit(),
            Input::IdleChanged(idle) => self.handle_idle_changed(idle),
            Input::SettingsChanged(settings) => self.handle_settings_changed(settings),
            Input::ShowCertificate => self.handle_show_certificate(),
            Input::ReconnectTimerFired { generation } => {
                if self.reconnect.fire(generation) {
                    self.reconnect_after_error();
                } else {
                    tracing::debug!(generation, "Ignoring cancelled reconnect tick");
                }
            }
            Input::Engine { attempt, event } => {
                if self.current_attempt == Some(attempt) {
                    self.handle_engine_event(event);
                } else {
                    tracing::debug!(
                        attempt,
                        current = ?self.current_attempt,
                        "Dropping event from superseded attempt"
                    );
                }
            }
        }
        self.active.store(self.is_active(), Ordering::Relaxed);
    }

    fn notify(&self, notification: Notification) {
        let _ = self.notify_tx.send(notification);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            tracing::info!(account = %self.address(), from = ?self.state, to = ?state, "Session state");
            self.state = state;
            self.notify(Notification::StateChanged { state });
        }
    }

    fn address(&self) -> Jid {
        self.account.lock().address.clone()
    }

    fn purge_cached_credentials(&self) {
        self.account.lock().clear_password();
    }

    fn purge_if_forgetting(&self) {
        if self.settings.forget_passwords {
            self.purge_cached_credentials();
        }
    }

    fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected => self.handle_connected(),
            EngineEvent::Disconnected(error) => self.handle_disconnected(error),
            EngineEvent::DataRead(data) => {
                tracing::trace!(target: "tether::xml_console", direction = "in", "{data}");
            }
            EngineEvent::DataWritten(data) => {
                tracing::trace!(target: "tether::xml_console", direction = "out", "{data}");
            }
        }
    }

    fn handle_login_request(&mut self) {
        self.account.lock().enabled = true;
        self.reset_pending_reconnects();
        self.notify(Notification::LoggingIn { active: true });
        self.perform_login();
    }

    fn perform_login(&mut self) {
        let forget = self.settings.forget_passwords;
        let (address, password, certificate_path, mut options) = {
            let account = self.account.lock();
            if forget && !account.has_password() {
                tracing::debug!(account = %account.address, "No cached password; not logging in");
                self.notify(Notification::LoggingIn { active: false });
                return;
            }
            (
                account.address.clone(),
                account.password.clone(),
                account.certificate_path.clone(),
                account.options.clone(),
            )
        };

        // Keep a server-assigned resource across reconnects.
        let mut login_address = address.clone();
        if let Some(bound) = &self.bound {
            if address.is_bare() && bound.to_bare() == address {
                login_address = bound.clone();
            }
        }

        let status = self.status.get_or_insert_with(StatusTracker::new);
        match self.session.as_mut() {
            None => {
                let storage = match self.collab.certificates.create(&login_address.to_bare()) {
                    Ok(storage) => storage,
                    Err(e) => {
                        tracing::warn!(
                            account = %login_address,
                            error = %e,
                            "Certificate store unavailable; trust decisions will not persist"
                        );
                        Box::<MemoryCertificateStorage>::default()
                    }
                };
                let trust = Arc::new(CertificateTrustChecker::new(storage));
                let engine = self.collab.engines.create(EngineParams {
                    address: &login_address,
                    password: password.as_str(),
                    certificate_path,
                    trust: trust.clone(),
                });
                self.session = Some(Session::new(engine, trust));
                // A new session goes online with the remembered presence,
                // replacing any offline request made while signed out.
                status.set_requested_presence(Presence::from_show(
                    self.settings.last_show,
                    self.settings.last_status.clone(),
                ));
                self.offline_requested = false;
            }
            Some(session) => {
                // Never let two attempts overlap.
                if session.engine.is_active() {
                    session.engine.disconnect();
                }
            }
        }

        self.reconnect.cancel();
        let attempt = self.next_attempt;
        self.next_attempt += 1;
        self.current_attempt = Some(attempt);

        options.forget_password = forget;
        if forget {
            options.use_tls = UseTls::Require;
        }

        self.notify(Notification::Connecting);
        self.set_state(SessionState::Connecting);
        tracing::info!(account = %login_address, attempt, "Connecting");

        let events = EngineEvents::new(attempt, self.input_tx.clone());
        if let Some(session) = self.session.as_mut() {
            if let Some(subsystems) = session.subsystems.as_mut() {
                subsystems.set_connecting();
            }
            session.engine.connect(&options, events);
        }
    }

    fn handle_connected(&mut self) {
        let address = self.address();
        self.reset_pending_reconnects();
        self.purge_if_forgetting();

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let bound = session
            .engine
            .bound_address()
            .unwrap_or_else(|| address.clone());
        self.bound = Some(bound.clone());

        let fresh = !session.has_logged_in();
        if fresh {
            session.engine.set_client_identity(&self.identity);
            let subsystems = self.collab.subsystems.create(SubsystemContext {
                account: &address,
                bound: &bound,
                engine: session.engine.as_ref(),
            });
            session.subsystems = Some(subsystems);
        }

        session.engine.request_roster();
        session.engine.request_own_profile();
        let encrypted = session.engine.is_stream_encrypted();
        if let Some(subsystems) = session.subsystems.as_mut() {
            subsystems.set_bound_address(&bound);
            subsystems.set_enabled(true);
            subsystems.set_stream_encrypted(encrypted);
        }

        self.my_status_looks_online = true;
        let presence = self
            .status
            .get_or_insert_with(StatusTracker::new)
            .next_presence();
        self.send_presence(presence);

        self.before_first_login = false;
        if fresh {
            self.notify(Notification::LoggingIn { active: false });
        }
        tracing::info!(account = %address, bound = %bound, fresh, "Connected");
        self.notify(Notification::Connected {
            bound: bound.to_string(),
            fresh,
        });
        self.set_state(SessionState::Connected);
    }

    fn handle_disconnected(&mut self, error: Option<ClientError>) {
        if let Some(subsystems) = self.session.as_mut().and_then(|s| s.subsystems.as_mut()) {
            subsystems.set_stream_encrypted(false);
        }
        self.purge_if_forgetting();

        if self.quit_requested {
            self.reset_client();
            self.finish_quit();
            return;
        }

        let logged_in = self.session.as_ref().is_some_and(Session::has_logged_in);
        match error {
            Some(error) => self.handle_disconnect_error(error, logged_in),
            None if !logged_in => {
                tracing::info!(account = %self.address(), "Login attempt closed without error");
                self.notify(Notification::LoggingIn { active: false });
                if self.before_first_login {
                    self.first_login_failed = true;
                    self.before_first_login = false;
                }
                self.set_state(SessionState::Offline);
            }
            None => {
                self.logout();
                self.set_state(SessionState::Offline);
            }
        }

        if self.should_be_deleted() {
            let address = self.address();
            self.sign_out();
            self.notify(Notification::ShouldBeDeleted {
                address: address.to_string(),
            });
        }
    }

    fn handle_disconnect_error(&mut self, error: ClientError, logged_in: bool) {
        let (name, address) = {
            let account = self.account.lock();
            (account.name.clone(), account.address.clone())
        };
        let domain = address.domain().to_string();
        tracing::warn!(account = %address, error = %error, logged_in, "Disconnected with error");

        let mut message = String::new();
        let mut force_signout = false;
        let mut retry_now = false;
        match error.kind.failure() {
            Failure::Ordinary(m) => message = m.to_string(),
            Failure::Fatal(m) => {
                message = m.to_string();
                force_signout = true;
            }
            Failure::Certificate(m) => {
                if self.negotiate_trust(m) {
                    retry_now = true;
                } else {
                    message = "Certificate error".to_string();
                }
            }
        }

        if !message.is_empty() {
            if let Some(code) = &error.code {
                message = format!("{message} ({code})");
            }
        }

        if retry_now && self.settings.forget_passwords {
            retry_now = false;
            force_signout = true;
            message = "Re-enter credentials and retry".to_string();
        }

        if retry_now {
            tracing::info!(account = %address, "Certificate trusted; retrying now");
            self.perform_login();
        } else if force_signout || !logged_in {
            self.sign_out_inner();
            let message = format!("{name}: {message}");
            tracing::warn!(account = %address, %message, "Login failed");
            self.notify(Notification::LoginFailed { message });
            self.notify(Notification::LoggingIn { active: false });
            if self.before_first_login {
                self.first_login_failed = true;
                self.before_first_login = false;
            }
            self.set_state(SessionState::Failed);
        } else {
            self.logout();
            if self.settings.forget_passwords {
                let message = format!(
                    "Disconnected from {domain}: {message}. To reconnect, Sign Out and provide your password again."
                );
                self.notify(Notification::Disconnected {
                    message,
                    retry_in_secs: None,
                });
                self.set_state(SessionState::Offline);
                return;
            }

            let retry = if self.offline_requested {
                None
            } else {
                Some(self.set_reconnect_timer())
            };
            let message = match (self.last_error.is_some(), retry) {
                (true, Some(delay)) => format!(
                    "Reconnect to {domain} failed: {message}. Will retry in {delay} seconds."
                ),
                (false, Some(delay)) => format!(
                    "Disconnected from {domain}: {message}. Will retry in {delay} seconds."
                ),
                (_, None) => format!("Disconnected from {domain}: {message}."),
            };
            if self.last_error.replace(message.clone()).is_some() {
                self.notify(Notification::ErrorConcluded);
            }
            self.notify(Notification::Disconnected {
                message,
                retry_in_secs: retry,
            });
            self.set_state(match retry {
                Some(delay_secs) => SessionState::Retrying { delay_secs },
                None => SessionState::Offline,
            });
        }
    }

    /// Offer the last certificate chain to the user. True if it is now
    /// trusted.
    fn negotiate_trust(&mut self, reason: &str) -> bool {
        let Some(trust) = self.session.as_ref().map(|s| s.trust.clone()) else {
            return false;
        };
        let chain = trust.last_chain();
        let Some(leaf) = chain.first() else {
            tracing::debug!("Certificate error without a recorded chain");
            return false;
        };
        if !self.collab.prompt.ask_to_trust_permanently(reason, &chain) {
            tracing::info!(reason, "Certificate declined");
            return false;
        }
        match trust.add_certificate(leaf) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "Could not store trusted certificate");
                false
            }
        }
    }

    fn set_reconnect_timer(&mut self) -> u64 {
        let delay = self.reconnect.schedule(&self.input_tx);
        tracing::info!(account = %self.address(), delay_secs = delay, "Reconnect scheduled");
        delay
    }

    fn reconnect_after_error(&mut self) {
        self.reconnect.cancel();
        self.perform_login();
    }

    fn reset_pending_reconnects(&mut self) {
        self.reconnect.reset();
        self.reset_current_error();
    }

    fn reset_current_error(&mut self) {
        if self.last_error.take().is_some() {
            self.notify(Notification::ErrorConcluded);
        }
    }

    fn handle_change_presence(&mut self, show: StatusShow, status: String) {
        let presence = Presence::from_show(show, status);
        if presence.is_available() {
            self.offline_requested = false;
        } else {
            self.reset_pending_reconnects();
            self.my_status_looks_online = false;
            self.offline_requested = true;
        }

        self.status
            .get_or_insert_with(StatusTracker::new)
            .set_requested_presence(presence.clone());

        if presence.is_available() {
            self.settings.last_show = presence.show;
            self.settings.last_status = presence.status.clone();
            self.notify(Notification::PresenceRemembered {
                show: presence.show,
                status: presence.status.clone(),
            });
        }

        let available = self
            .session
            .as_ref()
            .is_some_and(|s| s.engine.is_available());
        if presence.is_available() && !available {
            if self.session.is_some() || self.account.lock().enabled {
                self.perform_login();
            }
        } else {
            self.send_presence(presence);
        }
    }

    fn send_presence(&mut self, presence: Presence) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(subsystems) = session.subsystems.as_mut() {
            subsystems.set_my_status(presence.show, &presence.status);
        }
        if session.engine.is_available() {
            session.engine.send_presence(&presence);
            self.notify(Notification::PresenceSent {
                show: presence.show,
                status: presence.status.clone(),
            });
        }
        if !presence.is_available() {
            self.logout();
            self.set_state(SessionState::Offline);
        }
    }

    fn handle_idle_changed(&mut self, idle: bool) {
        let Some(status) = self.status.as_mut() else {
            // Not logged in yet.
            return;
        };

        if self.settings.idle_goes_offline {
            if idle {
                tracing::info!("Idle; going offline");
                self.logout();
                self.set_state(SessionState::Offline);
            }
            return;
        }

        let changed = if idle {
            status.go_auto_away(self.collab.idle.idle_time_seconds())
        } else {
            status.go_auto_unaway()
        };
        let presence = status.next_presence();
        let available = self
            .session
            .as_ref()
            .is_some_and(|s| s.engine.is_available());
        if changed && available {
            tracing::debug!(idle, "Auto-away changed");
            self.send_presence(presence);
        }
    }

    fn handle_settings_changed(&mut self, settings: Settings) {
        if settings.idle_timeout_seconds != self.settings.idle_timeout_seconds {
            self.collab.idle.set_idle_timeout(settings.idle_timeout_seconds);
        }
        self.settings = settings;
        if self.settings.forget_passwords && self.session.is_some() {
            self.purge_cached_credentials();
        }
    }

    fn handle_show_certificate(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let chain = session.trust.last_chain();
        match session.subsystems.as_mut() {
            Some(subsystems) => subsystems.show_certificate(&chain),
            None => tracing::debug!("No session view to show the certificate in"),
        }
    }

    /// Take presence and subsystems offline and close the stream.
    fn logout(&mut self) {
        self.purge_if_forgetting();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if session.engine.is_active() {
            session.engine.disconnect();
        }
        if let Some(subsystems) = session.subsystems.as_mut() {
            if self.my_status_looks_online {
                subsystems.set_my_status(StatusShow::None, "");
                self.my_status_looks_online = false;
            }
            subsystems.set_enabled(false);
        }
    }

    /// Explicit sign-out; safe to repeat.
    fn sign_out(&mut self) {
        self.sign_out_inner();
        self.set_state(SessionState::Disabled);
    }

    fn sign_out_inner(&mut self) {
        self.purge_if_forgetting();
        let had_session = self.session.is_some();
        self.logout();
        self.reset_client();
        if had_session {
            tracing::info!(account = %self.address(), "Signed out");
            self.notify(Notification::LoggedOut);
        }
    }

    fn reset_client(&mut self) {
        {
            let mut account = self.account.lock();
            account.enabled = false;
            if self.settings.forget_passwords || !account.retains_password() {
                account.clear_password();
            }
        }
        self.reset_pending_reconnects();
        self.current_attempt = None;
        if let Some(session) = self.session.take() {
            session.teardown();
        }
        self.status = None;
        self.my_status_looks_online = false;
        self.offline_requested = false;
    }

    fn quit(&mut self) {
        if self.is_active() {
            tracing::info!(account = %self.address(), "Quit requested; disconnecting");
            self.quit_requested = true;
            self.set_state(SessionState::SigningOut);
            if let Some(session) = self.session.as_mut() {
                session.engine.disconnect();
            }
        } else {
            self.reset_client();
            self.finish_quit();
        }
    }

    fn finish_quit(&mut self) {
        self.finished = true;
        self.set_state(SessionState::Disabled);
        self.notify(Notification::Quit);
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.reset_client();
        } else if !self.account.lock().retains_password() {
            self.purge_cached_credentials();
        }
    }
}
