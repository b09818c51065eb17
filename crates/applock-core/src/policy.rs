use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::error::UnlockError;
use crate::override_key::matches_override_key;
use crate::records::LockedApp;
use crate::secret::{generate_secret, Secret};
use crate::settings::LockSettings;
use crate::totp::{self, DEFAULT_SKEW_STEPS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// A partner code matched `drift` steps away from the current step.
    Verified { drift: i64 },
    /// No secret is configured, so nothing was checked.
    Manual,
}

pub type UnlockResult = Result<UnlockOutcome, UnlockError>;

/// Decides whether an app is blocked and what a supplied code does to it.
///
/// Unlocking with a code never clears `is_locked`; it stamps
/// `last_unlock_timestamp` and the block lifts for the unlock window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockPolicy {
    unlock_window: Duration,
    skew_steps: u8,
}

impl Default for UnlockPolicy {
    fn default() -> Self {
        Self {
            unlock_window: Duration::minutes(5),
            skew_steps: DEFAULT_SKEW_STEPS,
        }
    }
}

impl UnlockPolicy {
    pub fn new(unlock_window: Duration, skew_steps: u8) -> Self {
        Self {
            unlock_window,
            skew_steps,
        }
    }

    pub fn from_settings(settings: &LockSettings) -> Self {
        Self::new(settings.unlock_window(), settings.skew_steps)
    }

    pub fn unlock_window(&self) -> Duration {
        self.unlock_window
    }

    pub fn is_temporarily_unlocked(&self, app: &LockedApp, now: DateTime<Utc>) -> bool {
        app.is_temporarily_unlocked(now, self.unlock_window)
    }

    pub fn is_blocked(&self, app: &LockedApp, now: DateTime<Utc>) -> bool {
        app.is_locked && !self.is_temporarily_unlocked(app, now)
    }

    /// Time left before the block returns, if a temporary unlock is running.
    pub fn unlock_window_remaining(&self, app: &LockedApp, now: DateTime<Utc>) -> Option<Duration> {
        let unlocked_at = app.last_unlock_timestamp?;
        let remaining = unlocked_at + self.unlock_window - now;
        (remaining > Duration::zero()).then_some(remaining)
    }

    /// Checks `candidate` against the app without changing it.
    pub fn check_code(&self, app: &LockedApp, candidate: &str, now: DateTime<Utc>) -> UnlockResult {
        if !app.is_consistent() {
            return Err(UnlockError::NotConfigured);
        }
        let Some(secret) = app.secret.as_ref() else {
            return Ok(UnlockOutcome::Manual);
        };
        let candidate = candidate.trim();
        if !totp::is_well_formed(candidate) {
            return Err(UnlockError::InvalidFormat);
        }
        match totp::verify_with_drift(secret, candidate, now, self.skew_steps) {
            Some(drift) => Ok(UnlockOutcome::Verified { drift }),
            None => {
                warn!(package = %app.package_identifier, "unlock code rejected");
                Err(UnlockError::InvalidCode)
            }
        }
    }

    /// Temporary unlock from the block screen.
    pub fn attempt_unlock(
        &self,
        app: &mut LockedApp,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> UnlockResult {
        let outcome = self.check_code(app, candidate, now)?;
        app.last_unlock_timestamp = Some(now);
        info!(
            package = %app.package_identifier,
            ?outcome,
            window_secs = self.unlock_window.num_seconds(),
            "temporary unlock granted"
        );
        Ok(outcome)
    }

    /// Lifts the lock for good. Unlike a temporary unlock there is no manual
    /// path: the app must carry a secret.
    pub fn release_lock(
        &self,
        app: &mut LockedApp,
        candidate: &str,
        now: DateTime<Utc>,
    ) -> UnlockResult {
        if app.secret.is_none() {
            return Err(UnlockError::NotConfigured);
        }
        let outcome = self.check_code(app, candidate, now)?;
        app.is_locked = false;
        info!(package = %app.package_identifier, ?outcome, "lock released");
        Ok(outcome)
    }

    /// "Forever unlock" with the override key of the app secret or of the
    /// device secret.
    pub fn attempt_override_unlock(
        &self,
        app: &mut LockedApp,
        presented: &str,
        device_secret: Option<&Secret>,
    ) -> Result<(), UnlockError> {
        let candidates: Vec<&Secret> = app.secret.iter().chain(device_secret).collect();
        if candidates.is_empty() {
            return Err(UnlockError::NotConfigured);
        }
        if presented.trim().is_empty() {
            return Err(UnlockError::InvalidFormat);
        }
        if candidates
            .iter()
            .any(|secret| matches_override_key(secret, presented))
        {
            app.is_locked = false;
            info!(package = %app.package_identifier, "lock released with override key");
            Ok(())
        } else {
            warn!(package = %app.package_identifier, "override key rejected");
            Err(UnlockError::InvalidCode)
        }
    }

    /// Locks the app. Locking always turns on code-gated unlocking, creating a
    /// secret when the app has none; the new secret is returned so it can be
    /// shown to a partner.
    pub fn lock(&self, app: &mut LockedApp) -> Option<Secret> {
        if app.is_locked {
            return None;
        }
        app.is_locked = true;
        app.is_totp_enabled = true;
        if app.secret.is_some() {
            return None;
        }
        let secret = generate_secret();
        app.secret = Some(secret.clone());
        info!(package = %app.package_identifier, "secret provisioned on lock");
        Some(secret)
    }

    /// Attach `secret` and lock the app.
    pub fn enable_totp(&self, app: &mut LockedApp, secret: Secret) {
        app.secret = Some(secret);
        app.is_totp_enabled = true;
        app.is_locked = true;
    }

    pub fn disable_totp(&self, app: &mut LockedApp) {
        app.is_totp_enabled = false;
        app.secret = None;
    }
}
