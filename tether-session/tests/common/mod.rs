//! In-memory collaborators for driving a controller in tests.

#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_session::{
    Account, Certificate, CertificateTrustChecker, ClientError, ClientErrorKind, ClientIdentity,
    Collaborators, ConnectOptions, EngineEvents, EngineFactory, EngineParams, IdleDetector, Jid,
    MemoryCertificateStorageFactory, Notification, Presence, ProtocolEngine, SessionController,
    SessionSubsystems, Settings, SharedAccount, StatusShow, SubsystemContext, SubsystemFactory,
    TrustPrompt,
};

pub const ADDRESS: &str = "a@x.org";
pub const BOUND: &str = "a@x.org/tether-4f2a";
pub const PASSWORD: &str = "secret";

#[derive(Default)]
pub struct EngineLog {
    /// Login address of every engine the factory built.
    pub created: Vec<String>,
    pub connects: Vec<ConnectOptions>,
    pub disconnects: usize,
    pub presences: Vec<Presence>,
    pub identities: Vec<ClientIdentity>,
    pub roster_requests: usize,
    pub profile_requests: usize,
    pub active: bool,
    pub available: bool,
    pub encrypted: bool,
    pub events: Option<EngineEvents>,
    pub trust: Option<Arc<CertificateTrustChecker>>,
}

pub type SharedEngineLog = Arc<Mutex<EngineLog>>;

pub struct FakeEngine {
    log: SharedEngineLog,
}

impl ProtocolEngine for FakeEngine {
    fn connect(&mut self, options: &ConnectOptions, events: EngineEvents) {
        let mut log = self.log.lock();
        log.connects.push(options.clone());
        log.active = true;
        log.available = false;
        log.events = Some(events);
    }

    fn disconnect(&mut self) {
        let events = {
            let mut log = self.log.lock();
            log.disconnects += 1;
            if !log.active {
                return;
            }
            log.active = false;
            log.available = false;
            log.events.clone()
        };
        if let Some(events) = events {
            events.disconnected(None);
        }
    }

    fn is_available(&self) -> bool {
        self.log.lock().available
    }

    fn is_active(&self) -> bool {
        self.log.lock().active
    }

    fn bound_address(&self) -> Option<Jid> {
        let log = self.log.lock();
        if log.available { BOUND.parse().ok() } else { None }
    }

    fn is_stream_encrypted(&self) -> bool {
        self.log.lock().encrypted
    }

    fn set_client_identity(&mut self, identity: &ClientIdentity) {
        self.log.lock().identities.push(identity.clone());
    }

    fn request_roster(&mut self) {
        self.log.lock().roster_requests += 1;
    }

    fn request_own_profile(&mut self) {
        self.log.lock().profile_requests += 1;
    }

    fn send_presence(&mut self, presence: &Presence) {
        self.log.lock().presences.push(presence.clone());
    }
}

pub struct FakeEngineFactory {
    log: SharedEngineLog,
}

impl EngineFactory for FakeEngineFactory {
    fn create(&self, params: EngineParams<'_>) -> Box<dyn ProtocolEngine> {
        {
            let mut log = self.log.lock();
            log.created.push(params.address.to_string());
            log.trust = Some(params.trust.clone());
        }
        Box::new(FakeEngine {
            log: self.log.clone(),
        })
    }
}

#[derive(Default)]
pub struct SubsystemLog {
    pub created: usize,
    pub enabled: bool,
    pub bound: Option<String>,
    pub encrypted: bool,
    pub my_status: Vec<(StatusShow, String)>,
    pub connecting: usize,
    pub shown_chains: Vec<Vec<Certificate>>,
    /// Engine activity seen when the subsystems were destroyed.
    pub engine_active_at_drop: Option<bool>,
}

pub type SharedSubsystemLog = Arc<Mutex<SubsystemLog>>;

struct FakeSubsystems {
    log: SharedSubsystemLog,
    engine: SharedEngineLog,
}

impl Drop for FakeSubsystems {
    fn drop(&mut self) {
        let active = self.engine.lock().active;
        self.log.lock().engine_active_at_drop = Some(active);
    }
}

impl SessionSubsystems for FakeSubsystems {
    fn set_enabled(&mut self, enabled: bool) {
        self.log.lock().enabled = enabled;
    }

    fn set_bound_address(&mut self, address: &Jid) {
        self.log.lock().bound = Some(address.to_string());
    }

    fn set_stream_encrypted(&mut self, encrypted: bool) {
        self.log.lock().encrypted = encrypted;
    }

    fn set_my_status(&mut self, show: StatusShow, status: &str) {
        self.log.lock().my_status.push((show, status.to_string()));
    }

    fn set_connecting(&mut self) {
        self.log.lock().connecting += 1;
    }

    fn show_certificate(&mut self, chain: &[Certificate]) {
        self.log.lock().shown_chains.push(chain.to_vec());
    }
}

struct FakeSubsystemFactory {
    log: SharedSubsystemLog,
    engine: SharedEngineLog,
}

impl SubsystemFactory for FakeSubsystemFactory {
    fn create(&self, _ctx: SubsystemContext<'_>) -> Box<dyn SessionSubsystems> {
        self.log.lock().created += 1;
        Box::new(FakeSubsystems {
            log: self.log.clone(),
            engine: self.engine.clone(),
        })
    }
}

#[derive(Default)]
pub struct PromptLog {
    pub answer: bool,
    /// Messages the user was asked about.
    pub asked: Vec<String>,
}

pub type SharedPromptLog = Arc<Mutex<PromptLog>>;

struct ScriptedPrompt {
    log: SharedPromptLog,
}

impl TrustPrompt for ScriptedPrompt {
    fn ask_to_trust_permanently(&mut self, message: &str, _chain: &[Certificate]) -> bool {
        let mut log = self.log.lock();
        log.asked.push(message.to_string());
        log.answer
    }
}

#[derive(Default)]
pub struct IdleLog {
    pub idle_seconds: u64,
    pub timeout: Option<u64>,
}

pub type SharedIdleLog = Arc<Mutex<IdleLog>>;

struct FakeIdle {
    log: SharedIdleLog,
}

impl IdleDetector for FakeIdle {
    fn idle_time_seconds(&self) -> u64 {
        self.log.lock().idle_seconds
    }

    fn set_idle_timeout(&mut self, seconds: u64) {
        self.log.lock().timeout = Some(seconds);
    }
}

pub struct Harness {
    pub controller: SessionController,
    pub notifications: mpsc::UnboundedReceiver<Notification>,
    pub account: SharedAccount,
    pub engine: SharedEngineLog,
    pub subsystems: SharedSubsystemLog,
    pub prompt: SharedPromptLog,
    pub idle: SharedIdleLog,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        let account = Account::new(ADDRESS.parse().unwrap(), PASSWORD).into_shared();
        Self::with_account(account, settings)
    }

    pub fn with_account(account: SharedAccount, settings: Settings) -> Self {
        let engine = SharedEngineLog::default();
        let subsystems = SharedSubsystemLog::default();
        let prompt = SharedPromptLog::default();
        let idle = SharedIdleLog::default();
        let collaborators = Collaborators {
            engines: Box::new(FakeEngineFactory { log: engine.clone() }),
            subsystems: Box::new(FakeSubsystemFactory {
                log: subsystems.clone(),
                engine: engine.clone(),
            }),
            certificates: Box::new(MemoryCertificateStorageFactory),
            prompt: Box::new(ScriptedPrompt { log: prompt.clone() }),
            idle: Box::new(FakeIdle { log: idle.clone() }),
        };
        let (controller, notifications) =
            SessionController::new(account.clone(), settings, collaborators);
        Self {
            controller,
            notifications,
            account,
            engine,
            subsystems,
            prompt,
            idle,
        }
    }

    pub fn enable(&mut self) {
        self.controller.handle().enable().unwrap();
        self.controller.process_pending();
    }

    fn events(&self) -> EngineEvents {
        self.engine
            .lock()
            .events
            .clone()
            .expect("engine was never asked to connect")
    }

    /// The pending attempt logs in.
    pub fn connect_ok(&mut self) {
        let events = {
            let mut log = self.engine.lock();
            log.active = true;
            log.available = true;
            log.encrypted = true;
            log.events.clone().expect("engine was never asked to connect")
        };
        events.connected();
        self.controller.process_pending();
    }

    /// The pending attempt (or live stream) ends with `kind`.
    pub fn fail(&mut self, error: impl Into<ClientError>) {
        {
            let mut log = self.engine.lock();
            log.active = false;
            log.available = false;
            log.encrypted = false;
        }
        self.events().disconnected(Some(error.into()));
        self.controller.process_pending();
    }

    /// Run a TLS handshake against a server presenting `cert`: trusted
    /// certificates log in, anything else fails as self-signed.
    pub fn handshake(&mut self, cert: &Certificate) {
        let trust = self.engine.lock().trust.clone().expect("no engine built");
        if trust.is_trusted(std::slice::from_ref(cert)) {
            self.connect_ok();
        } else {
            self.fail(ClientErrorKind::CertificateSelfSigned);
        }
    }

    pub fn drain(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            out.push(n);
        }
        out
    }

    pub fn connect_count(&self) -> usize {
        self.engine.lock().connects.len()
    }

    pub fn password(&self) -> String {
        self.account.lock().password.as_str().to_string()
    }
}

pub fn self_signed() -> Certificate {
    rcgen::generate_simple_self_signed(vec!["x.org".to_string()])
        .unwrap()
        .cert
        .der()
        .clone()
}

pub fn disconnect_messages(notifications: &[Notification]) -> Vec<(String, Option<u64>)> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::Disconnected {
                message,
                retry_in_secs,
            } => Some((message.clone(), *retry_in_secs)),
            _ => None,
        })
        .collect()
}

pub fn login_failures(notifications: &[Notification]) -> Vec<String> {
    notifications
        .iter()
        .filter_map(|n| match n {
            Notification::LoginFailed { message } => Some(message.clone()),
            _ => None,
        })
        .collect()
}
