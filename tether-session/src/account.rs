//! The account record the controller logs in with.
//!
//! The account is owned by the caller (an account list, a config file) and
//! shared with the controller through [`SharedAccount`]. The controller reads
//! it on every attempt and clears the cached password when policy demands.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::jid::Jid;

pub type SharedAccount = Arc<parking_lot::Mutex<Account>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UseTls {
    Never,
    #[default]
    WhenAvailable,
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyType {
    None,
    #[default]
    SystemConfigured,
    Socks5,
    HttpConnect,
}

/// Per-connection options handed to the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub use_stream_compression: bool,
    pub use_tls: UseTls,
    pub allow_plain_without_tls: bool,
    pub use_stream_resumption: bool,
    /// The engine must not keep the password after authenticating.
    pub forget_password: bool,
    pub use_acks: bool,
    pub proxy: ProxyType,
    /// Custom proxy as `host:port`, used with `Socks5` / `HttpConnect`.
    pub proxy_address: Option<String>,
    pub manual_host: Option<String>,
    pub manual_port: Option<u16>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            use_stream_compression: true,
            use_tls: UseTls::WhenAvailable,
            allow_plain_without_tls: false,
            use_stream_resumption: false,
            forget_password: false,
            use_acks: true,
            proxy: ProxyType::SystemConfigured,
            proxy_address: None,
            manual_host: None,
            manual_port: None,
        }
    }
}

/// Stored credentials and login preferences for one account.
#[derive(Debug, Clone)]
pub struct Account {
    /// Display name used in user-facing messages.
    pub name: String,
    pub address: Jid,
    pub password: Zeroizing<String>,
    /// Client certificate (PKCS#12) used instead of a password, if any.
    pub certificate_path: Option<PathBuf>,
    pub options: ConnectOptions,
    pub remember_password: bool,
    pub login_automatically: bool,
    pub enabled: bool,
}

impl Account {
    pub fn new(address: Jid, password: impl Into<String>) -> Self {
        Self {
            name: address.to_bare().to_string(),
            address,
            password: Zeroizing::new(password.into()),
            certificate_path: None,
            options: ConnectOptions::default(),
            remember_password: false,
            login_automatically: false,
            enabled: false,
        }
    }

    pub fn into_shared(self) -> SharedAccount {
        Arc::new(parking_lot::Mutex::new(self))
    }

    pub fn has_password(&self) -> bool {
        !self.password.is_empty()
    }

    /// Overwrite the cached password in place and leave it empty.
    pub fn clear_password(&mut self) {
        self.password.zeroize();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Zeroizing::new(password.into());
    }

    /// Whether the password may outlive the session.
    pub fn retains_password(&self) -> bool {
        self.remember_password || self.login_automatically
    }
}
