//! Presence values the controller queues and sends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The "show" part of a presence.
///
/// `None` is the user's request to be offline; on the wire it becomes an
/// unavailable presence rather than a show value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusShow {
    #[default]
    Online,
    FreeForChat,
    Away,
    ExtendedAway,
    DoNotDisturb,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceKind {
    Available,
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    pub kind: PresenceKind,
    pub show: StatusShow,
    pub status: String,
    /// Set on auto-away presences: when the user stopped interacting.
    pub idle_since: Option<DateTime<Utc>>,
}

impl Presence {
    /// Build the presence for a requested show. `StatusShow::None` yields an
    /// unavailable presence.
    pub fn from_show(show: StatusShow, status: impl Into<String>) -> Self {
        let kind = if show == StatusShow::None {
            PresenceKind::Unavailable
        } else {
            PresenceKind::Available
        };
        Self {
            kind,
            show,
            status: status.into(),
            idle_since: None,
        }
    }

    pub fn is_available(&self) -> bool {
        self.kind == PresenceKind::Available
    }
}

impl Default for Presence {
    fn default() -> Self {
        Self::from_show(StatusShow::Online, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_show_is_unavailable() {
        let p = Presence::from_show(StatusShow::None, "bye");
        assert_eq!(p.kind, PresenceKind::Unavailable);
        assert!(!p.is_available());
        assert_eq!(p.status, "bye");
    }

    #[test]
    fn show_serializes_snake_case() {
        let json = serde_json::to_string(&StatusShow::DoNotDisturb).unwrap();
        assert_eq!(json, "\"do_not_disturb\"");
    }
}
