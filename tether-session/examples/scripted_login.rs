//! Scripted login example: drives a controller against a simulated server
//! that fails a few times before letting the account in, then quits.
//!
//! Usage:
//!   cargo run -p tether-session --example scripted_login -- \
//!     --address alice@example.org --failures 3
//!
//! Every notification is printed as a JSON envelope on stdout. Set
//! `RUST_LOG=tether::xml_console=trace` to see the simulated stream traffic,
//! and `TETHER_LOG_JSON=1` for JSON logs.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

use tether_session::{
    Account, Certificate, ClientError, ClientErrorKind, ClientIdentity, Collaborators,
    ConnectOptions, EngineEvents, EngineFactory, EngineParams, FileCertificateStorageFactory,
    IdleDetector, Jid, Notification, NotificationEnvelope, Presence, ProtocolEngine,
    SessionSubsystems, Settings, StatusShow, SubsystemContext, SubsystemFactory, TrustPrompt,
};

#[derive(Parser)]
#[command(name = "scripted-login", about = "Tether session controller demo")]
struct Args {
    #[arg(long, default_value = "alice@example.org")]
    address: String,
    #[arg(long, env = "TETHER_PASSWORD", default_value = "hunter2")]
    password: String,
    /// Connection attempts that fail before one succeeds.
    #[arg(long, default_value_t = 2)]
    failures: u32,
    /// Settings file (defaults to the user config location).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// Directory for accepted server certificates.
    #[arg(long)]
    cert_dir: Option<PathBuf>,
    /// Seconds to stay connected before quitting.
    #[arg(long, default_value_t = 2)]
    linger: u64,
}

#[derive(Default)]
struct Link {
    active: bool,
    available: bool,
}

/// Pretends to be a server: each attempt takes a moment, then either fails
/// with a DNS error or binds a resource.
struct ScriptedEngine {
    address: Jid,
    link: Arc<Mutex<Link>>,
    failures_left: Arc<AtomicU32>,
    events: Option<EngineEvents>,
}

impl ProtocolEngine for ScriptedEngine {
    fn connect(&mut self, _options: &ConnectOptions, events: EngineEvents) {
        self.link.lock().active = true;
        self.events = Some(events.clone());
        let link = self.link.clone();
        let failures_left = self.failures_left.clone();
        let domain = self.address.domain().to_string();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            events.data_written(format!("<stream:stream to='{domain}'>"));
            let failed = failures_left
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                *link.lock() = Link::default();
                events.disconnected(Some(ClientError::with_code(
                    ClientErrorKind::DomainNameResolve,
                    "NXDOMAIN",
                )));
            } else {
                events.data_read("<stream:features><bind/></stream:features>");
                link.lock().available = true;
                events.connected();
            }
        });
    }

    fn disconnect(&mut self) {
        let was_active = std::mem::take(&mut *self.link.lock()).active;
        if let (true, Some(events)) = (was_active, &self.events) {
            tracing::debug!("Closing simulated stream");
            events.disconnected(None);
        }
    }

    fn is_available(&self) -> bool {
        self.link.lock().available
    }

    fn is_active(&self) -> bool {
        self.link.lock().active
    }

    fn bound_address(&self) -> Option<Jid> {
        format!("{}/scripted", self.address.to_bare()).parse().ok()
    }

    fn is_stream_encrypted(&self) -> bool {
        true
    }

    fn set_client_identity(&mut self, identity: &ClientIdentity) {
        tracing::info!(name = %identity.name, version = %identity.version, "Client identity");
    }

    fn request_roster(&mut self) {
        tracing::debug!(target: "tether::xml_console", direction = "out", "<iq type='get'><query xmlns='jabber:iq:roster'/></iq>");
    }

    fn request_own_profile(&mut self) {
        tracing::debug!(target: "tether::xml_console", direction = "out", "<iq type='get'><vCard xmlns='vcard-temp'/></iq>");
    }

    fn send_presence(&mut self, presence: &Presence) {
        tracing::info!(show = ?presence.show, status = %presence.status, "Presence");
    }
}

struct ScriptedEngines {
    failures_left: Arc<AtomicU32>,
}

impl EngineFactory for ScriptedEngines {
    fn create(&self, params: EngineParams<'_>) -> Box<dyn ProtocolEngine> {
        Box::new(ScriptedEngine {
            address: params.address.clone(),
            link: Arc::default(),
            failures_left: self.failures_left.clone(),
            events: None,
        })
    }
}

struct LoggingSubsystems;

impl SessionSubsystems for LoggingSubsystems {
    fn set_enabled(&mut self, enabled: bool) {
        tracing::info!(enabled, "Roster");
    }

    fn set_bound_address(&mut self, address: &Jid) {
        tracing::info!(%address, "Bound");
    }

    fn set_stream_encrypted(&mut self, encrypted: bool) {
        tracing::debug!(encrypted, "Stream encryption");
    }

    fn set_my_status(&mut self, show: StatusShow, status: &str) {
        tracing::debug!(?show, status, "My status");
    }

    fn set_connecting(&mut self) {
        tracing::info!("Connecting...");
    }

    fn show_certificate(&mut self, chain: &[Certificate]) {
        tracing::info!(certificates = chain.len(), "Certificate chain");
    }
}

struct LoggingSubsystemFactory;

impl SubsystemFactory for LoggingSubsystemFactory {
    fn create(&self, ctx: SubsystemContext<'_>) -> Box<dyn SessionSubsystems> {
        tracing::info!(account = %ctx.account, bound = %ctx.bound, "Building session view");
        Box::new(LoggingSubsystems)
    }
}

struct DeclinePrompt;

impl TrustPrompt for DeclinePrompt {
    fn ask_to_trust_permanently(&mut self, message: &str, _chain: &[Certificate]) -> bool {
        tracing::warn!(message, "Declining certificate");
        false
    }
}

struct NeverIdle;

impl IdleDetector for NeverIdle {
    fn idle_time_seconds(&self) -> u64 {
        0
    }

    fn set_idle_timeout(&mut self, _seconds: u64) {}
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("TETHER_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();
    let settings = match &args.settings {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load(),
    };
    let certificates = match &args.cert_dir {
        Some(dir) => FileCertificateStorageFactory::new(dir),
        None => FileCertificateStorageFactory::default(),
    };

    let mut account = Account::new(args.address.parse()?, args.password);
    // A transient account would be discarded after a failed first login;
    // this one is "stored", so it keeps retrying.
    account.remember_password = true;

    // The first attempt has to succeed for backoff to apply, so the script
    // starts failing only after the initial login.
    let failures_left = Arc::new(AtomicU32::new(0));
    let collaborators = Collaborators {
        engines: Box::new(ScriptedEngines {
            failures_left: failures_left.clone(),
        }),
        subsystems: Box::new(LoggingSubsystemFactory),
        certificates: Box::new(certificates),
        prompt: Box::new(DeclinePrompt),
        idle: Box::new(NeverIdle),
    };

    let mut remembered = settings.clone();
    let (controller, mut notifications) =
        tether_session::SessionController::new(account.into_shared(), settings, collaborators);
    let handle = controller.handle();
    let runner = tokio::spawn(controller.run());

    handle.enable()?;

    let mut seq = 0u64;
    let mut connects = 0u32;
    while let Some(notification) = notifications.recv().await {
        seq += 1;
        println!(
            "{}",
            serde_json::to_string(&NotificationEnvelope::new(seq, notification.clone()))?
        );
        match notification {
            Notification::Connected { .. } => {
                connects += 1;
                if connects == 1 && args.failures > 0 {
                    failures_left.store(args.failures, Ordering::Relaxed);
                    redial(&handle)?;
                } else {
                    tokio::time::sleep(Duration::from_secs(args.linger)).await;
                    handle.quit()?;
                }
            }
            Notification::PresenceRemembered { show, status } => {
                remembered.last_show = show;
                remembered.last_status = status;
                match &args.settings {
                    Some(path) => remembered.save_to(path)?,
                    None => remembered.save(),
                }
            }
            Notification::LoginFailed { .. } => handle.quit()?,
            Notification::Quit => break,
            _ => {}
        }
    }

    runner.await?;
    Ok(())
}

/// Going offline and straight back online makes the controller dial again,
/// which is where the scripted failures kick in.
fn redial(handle: &tether_session::ControllerHandle) -> Result<()> {
    handle.change_presence(StatusShow::None, "")?;
    handle.change_presence(StatusShow::Online, "")?;
    Ok(())
}
