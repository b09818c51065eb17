//! Foreground launch gate.
//!
//! Fed with every foreground-window change; answers whether to put the block
//! screen in front. Window-change events arrive in bursts, so a package that
//! was just blocked is not blocked again until the debounce has passed.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::policy::UnlockPolicy;
use crate::records::LockedApp;
use crate::settings::LockSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The package belongs to the locker itself.
    Ignore,
    Allow,
    /// Blocked moments ago; the block screen is already up.
    Debounced,
    Block,
}

#[derive(Debug, Clone)]
pub struct LaunchGate {
    own_package_prefix: String,
    debounce: Duration,
    policy: UnlockPolicy,
    last_block: Option<(String, DateTime<Utc>)>,
}

impl LaunchGate {
    pub fn new(settings: &LockSettings) -> Self {
        Self {
            own_package_prefix: settings.own_package_prefix.clone(),
            debounce: settings.relaunch_debounce(),
            policy: UnlockPolicy::from_settings(settings),
            last_block: None,
        }
    }

    pub fn check(&mut self, package: &str, apps: &[LockedApp], now: DateTime<Utc>) -> GateDecision {
        if package.starts_with(&self.own_package_prefix) {
            return GateDecision::Ignore;
        }
        if let Some((last, at)) = &self.last_block {
            if last == package && now - *at < self.debounce {
                return GateDecision::Debounced;
            }
        }
        let blocked = apps
            .iter()
            .find(|app| app.package_identifier == package)
            .is_some_and(|app| self.policy.is_blocked(app, now));
        if !blocked {
            return GateDecision::Allow;
        }
        debug!(package, "blocking launch");
        self.last_block = Some((package.to_string(), now));
        GateDecision::Block
    }
}
