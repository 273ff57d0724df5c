//! Presence intent tracking and idle-driven auto-away.

use chrono::{DateTime, TimeDelta, Utc};

use crate::presence::{Presence, StatusShow};

/// Source of "how long has the user been idle".
///
/// Idle transitions themselves are delivered to the controller as
/// [`Input::IdleChanged`](crate::event::Input::IdleChanged).
pub trait IdleDetector: Send {
    fn idle_time_seconds(&self) -> u64;
    fn set_idle_timeout(&mut self, seconds: u64);
}

/// Holds the presence the user asked for, and whether it is currently
/// overridden by auto-away.
#[derive(Debug, Clone, Default)]
pub struct StatusTracker {
    requested: Presence,
    auto_away_since: Option<DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the presence intent. Clears any auto-away override.
    pub fn set_requested_presence(&mut self, presence: Presence) {
        self.requested = presence;
        self.auto_away_since = None;
    }

    pub fn requested_presence(&self) -> &Presence {
        &self.requested
    }

    pub fn is_auto_away(&self) -> bool {
        self.auto_away_since.is_some()
    }

    /// The presence to put on the wire right now.
    pub fn next_presence(&self) -> Presence {
        match self.auto_away_since {
            Some(since) => Presence {
                kind: self.requested.kind,
                show: StatusShow::Away,
                status: self.requested.status.clone(),
                idle_since: Some(since),
            },
            None => self.requested.clone(),
        }
    }

    /// Switch to auto-away after `idle_seconds` of inactivity.
    ///
    /// Returns false (and changes nothing) when already auto-away or when the
    /// user's own intent is already unavailable, away, extended away or
    /// do-not-disturb.
    pub fn go_auto_away(&mut self, idle_seconds: u64) -> bool {
        if self.is_auto_away() || !self.requested.is_available() {
            return false;
        }
        if matches!(
            self.requested.show,
            StatusShow::Away | StatusShow::ExtendedAway | StatusShow::DoNotDisturb
        ) {
            return false;
        }
        // Idle spans beyond chrono's range clamp to the earliest instant.
        let since = i64::try_from(idle_seconds)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|idle| Utc::now().checked_sub_signed(idle))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.auto_away_since = Some(since);
        true
    }

    /// Leave auto-away. Returns true only if auto-away was active.
    pub fn go_auto_unaway(&mut self) -> bool {
        self.auto_away_since.take().is_some()
    }
}
