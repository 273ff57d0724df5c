//! Client-wide settings the controller consults.
//!
//! Settings file lives at `~/.config/tether/settings.toml`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::presence::StatusShow;

/// Default idle time before auto-away, in seconds.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Never keep passwords in memory once a session is up.
    pub forget_passwords: bool,
    /// Log out instead of going away when the user is idle.
    pub idle_goes_offline: bool,
    pub idle_timeout_seconds: u64,
    /// Last available presence the user picked; restored on the next login.
    pub last_show: StatusShow,
    pub last_status: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            forget_passwords: false,
            idle_goes_offline: false,
            idle_timeout_seconds: DEFAULT_IDLE_TIMEOUT_SECS,
            last_show: StatusShow::Online,
            last_status: String::new(),
        }
    }
}

pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tether")
        .join("settings.toml")
}

impl Settings {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> Self {
        let path = default_path();
        if !path.exists() {
            return Self::default();
        }
        match Self::load_from(&path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Ignoring settings file");
                Self::default()
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Error> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Save to the default location; failures are logged, not returned.
    pub fn save(&self) {
        let path = default_path();
        if let Err(e) = self.save_to(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Can't save settings");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::default();
        assert!(!s.forget_passwords);
        assert!(!s.idle_goes_offline);
        assert_eq!(s.idle_timeout_seconds, 300);
        assert_eq!(s.last_show, StatusShow::Online);
        assert!(s.last_status.is_empty());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");
        let settings = Settings {
            forget_passwords: true,
            idle_goes_offline: false,
            idle_timeout_seconds: 120,
            last_show: StatusShow::DoNotDisturb,
            last_status: "in a meeting".to_string(),
        };
        settings.save_to(&path).unwrap();
        assert_eq!(Settings::load_from(&path).unwrap(), settings);
    }

    #[test]
    fn missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "forget_passwords = true\n").unwrap();
        let s = Settings::load_from(&path).unwrap();
        assert!(s.forget_passwords);
        assert_eq!(s.idle_timeout_seconds, DEFAULT_IDLE_TIMEOUT_SECS);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        std::fs::write(&path, "idle_timeout_seconds = \"soon\"").unwrap();
        assert!(matches!(
            Settings::load_from(&path),
            Err(Error::SettingsParse(_))
        ));
    }
}
