use anyhow::ensure;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::totp::DEFAULT_SKEW_STEPS;

/// Longest temporary unlock a settings file may ask for (one year).
pub const MAX_UNLOCK_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;
/// Longest relaunch debounce (one hour).
pub const MAX_RELAUNCH_DEBOUNCE_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockSettings {
    #[serde(default = "default_unlock_window_secs")]
    pub unlock_window_secs: u64,
    #[serde(default = "default_skew_steps")]
    pub skew_steps: u8,
    #[serde(default = "default_relaunch_debounce_ms")]
    pub relaunch_debounce_ms: u64,
    #[serde(default = "default_own_package_prefix")]
    pub own_package_prefix: String,
    #[serde(default = "default_min_partner_secret_len")]
    pub min_partner_secret_len: usize,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            unlock_window_secs: default_unlock_window_secs(),
            skew_steps: default_skew_steps(),
            relaunch_debounce_ms: default_relaunch_debounce_ms(),
            own_package_prefix: default_own_package_prefix(),
            min_partner_secret_len: default_min_partner_secret_len(),
        }
    }
}

impl LockSettings {
    /// Clamped to [`MAX_UNLOCK_WINDOW_SECS`], so never negative.
    pub fn unlock_window(&self) -> Duration {
        let secs = self.unlock_window_secs.min(MAX_UNLOCK_WINDOW_SECS);
        Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
    }

    /// Clamped to [`MAX_RELAUNCH_DEBOUNCE_MS`].
    pub fn relaunch_debounce(&self) -> Duration {
        let ms = self.relaunch_debounce_ms.min(MAX_RELAUNCH_DEBOUNCE_MS);
        Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.unlock_window_secs <= MAX_UNLOCK_WINDOW_SECS,
            "unlock_window_secs is {}, the maximum is {}",
            self.unlock_window_secs,
            MAX_UNLOCK_WINDOW_SECS
        );
        ensure!(
            self.relaunch_debounce_ms <= MAX_RELAUNCH_DEBOUNCE_MS,
            "relaunch_debounce_ms is {}, the maximum is {}",
            self.relaunch_debounce_ms,
            MAX_RELAUNCH_DEBOUNCE_MS
        );
        Ok(())
    }
}

fn default_unlock_window_secs() -> u64 {
    5 * 60
}

fn default_skew_steps() -> u8 {
    DEFAULT_SKEW_STEPS
}

fn default_relaunch_debounce_ms() -> u64 {
    1000
}

fn default_own_package_prefix() -> String {
    "com.applock".to_string()
}

fn default_min_partner_secret_len() -> usize {
    16
}

pub fn load_settings(path: &Path) -> anyhow::Result<LockSettings> {
    if path.exists() {
        let bytes = fs::read(path)?;
        let settings: LockSettings = serde_json::from_slice(&bytes)?;
        settings.validate()?;
        Ok(settings)
    } else {
        Ok(LockSettings::default())
    }
}

pub fn save_settings(path: &Path, settings: &LockSettings) -> anyhow::Result<()> {
    let data = serde_json::to_vec_pretty(settings)?;
    fs::write(path, data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = load_settings(&dir.path().join("settings.json")).unwrap();
        assert_eq!(settings, LockSettings::default());
        assert_eq!(settings.unlock_window(), Duration::minutes(5));
        assert_eq!(settings.skew_steps, 1);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"skew_steps": 2}"#).unwrap();
        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.skew_steps, 2);
        assert_eq!(settings.unlock_window_secs, 300);
        assert_eq!(settings.relaunch_debounce(), Duration::seconds(1));
    }

    #[test]
    fn save_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings = LockSettings {
            unlock_window_secs: 120,
            ..LockSettings::default()
        };
        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
    }

    #[test]
    fn oversized_durations_are_rejected_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        for body in [
            r#"{"unlock_window_secs": 18446744073709551615}"#,
            r#"{"unlock_window_secs": 100000000000000000}"#,
            r#"{"relaunch_debounce_ms": 18446744073709551615}"#,
        ] {
            fs::write(&path, body).unwrap();
            assert!(load_settings(&path).is_err(), "{body}");
        }
        fs::write(&path, r#"{"unlock_window_secs": 31536000}"#).unwrap();
        assert_eq!(load_settings(&path).unwrap().unlock_window(), Duration::days(365));
    }

    #[test]
    fn accessors_clamp_unchecked_values() {
        let settings = LockSettings {
            unlock_window_secs: u64::MAX,
            relaunch_debounce_ms: u64::MAX,
            ..LockSettings::default()
        };
        assert!(settings.validate().is_err());
        assert_eq!(settings.unlock_window(), Duration::days(365));
        assert_eq!(settings.relaunch_debounce(), Duration::hours(1));
    }
}
