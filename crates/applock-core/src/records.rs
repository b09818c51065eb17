use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::secret::Secret;

/// One blockable application, keyed by `package_identifier`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LockedApp {
    pub package_identifier: String,
    pub display_name: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub is_totp_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_unlock_timestamp: Option<DateTime<Utc>>,
}

impl LockedApp {
    /// Record for a newly enumerated application: unlocked, no secret.
    pub fn new(package_identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            package_identifier: package_identifier.into(),
            display_name: display_name.into(),
            is_locked: false,
            is_totp_enabled: false,
            secret: None,
            last_unlock_timestamp: None,
        }
    }

    /// TOTP enabled implies a secret.
    pub fn is_consistent(&self) -> bool {
        !self.is_totp_enabled || self.secret.is_some()
    }

    pub fn is_temporarily_unlocked(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_unlock_timestamp {
            Some(unlocked_at) => now - unlocked_at < window,
            None => false,
        }
    }
}

/// Another person's secret, stored so this device can show their codes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PartnerEntry {
    pub label: String,
    pub secret: Secret,
}

impl PartnerEntry {
    pub fn has_label(&self, label: &str) -> bool {
        self.label.eq_ignore_ascii_case(label.trim())
    }
}
