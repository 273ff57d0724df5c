//! Controller inputs and the notifications it publishes.
//!
//! Notifications use tagged serialization so a UI bridge can consume them as
//! JSON:
//! ```json
//! {"version":1,"seq":3,"timestamp_ms":1700000000000,"notification":{"type":"connected","data":{...}}}
//! ```

use serde::Serialize;

use crate::config::Settings;
use crate::controller::SessionState;
use crate::engine::EngineEvent;
use crate::presence::StatusShow;

/// Everything the controller reacts to, in arrival order.
#[derive(Debug, Clone)]
pub enum Input {
    EnabledChanged(bool),
    ChangePresence { show: StatusShow, status: String },
    SignOut,
    Quit,
    IdleChanged(bool),
    SettingsChanged(Settings),
    ShowCertificate,
    ReconnectTimerFired { generation: u64 },
    Engine { attempt: u64, event: EngineEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Notification {
    StateChanged {
        state: SessionState,
    },
    /// The "logging in" indicator for the first attempt.
    LoggingIn {
        active: bool,
    },
    Connecting,
    Connected {
        bound: String,
        /// First login of this session (subsystems were just built).
        fresh: bool,
    },
    /// Connection lost. `retry_in_secs` is set while still trying.
    Disconnected {
        message: String,
        retry_in_secs: Option<u64>,
    },
    /// Gave up; the account was signed out.
    LoginFailed {
        message: String,
    },
    /// The previously reported error no longer applies.
    ErrorConcluded,
    PresenceSent {
        show: StatusShow,
        status: String,
    },
    PresenceRemembered {
        show: StatusShow,
        status: String,
    },
    LoggedOut,
    /// A transient account whose first login failed should be discarded.
    ShouldBeDeleted {
        address: String,
    },
    Quit,
}

/// Versioned wrapper with sequence number and timestamp.
///
/// `seq` increases monotonically per subscriber; the bridge that drains the
/// notification channel assigns it.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationEnvelope {
    pub version: u32,
    pub seq: u64,
    pub timestamp_ms: i64,
    pub notification: Notification,
}

impl NotificationEnvelope {
    pub fn new(seq: u64, notification: Notification) -> Self {
        Self {
            version: 1,
            seq,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            notification,
        }
    }
}
