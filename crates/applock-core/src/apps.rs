//! Registry of blockable applications.
//!
//! Wraps a [`LockStore`] and an [`UnlockPolicy`]; every mutation loads the
//! list, edits the one record and writes it back in a single store step.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::policy::{UnlockOutcome, UnlockPolicy};
use crate::records::LockedApp;
use crate::secret::Secret;
use crate::store::LockStore;

/// An application reported by the platform's package enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledApp {
    pub package_identifier: String,
    pub display_name: String,
}

impl InstalledApp {
    pub fn new(package_identifier: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            package_identifier: package_identifier.into(),
            display_name: display_name.into(),
        }
    }
}

/// Case-insensitive substring match on display name or package identifier.
/// A blank query matches everything.
pub fn search<'a>(apps: &'a [LockedApp], query: &str) -> Vec<&'a LockedApp> {
    let query = query.trim().to_lowercase();
    apps.iter()
        .filter(|app| {
            query.is_empty()
                || app.display_name.to_lowercase().contains(&query)
                || app.package_identifier.to_lowercase().contains(&query)
        })
        .collect()
}

fn sort_by_name(apps: &mut [LockedApp]) {
    apps.sort_by_cached_key(|app| app.display_name.to_lowercase());
}

pub struct AppRegistry {
    store: Arc<dyn LockStore>,
    policy: UnlockPolicy,
}

impl AppRegistry {
    pub fn new(store: Arc<dyn LockStore>, policy: UnlockPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &UnlockPolicy {
        &self.policy
    }

    /// Merge the installed list into the store.
    ///
    /// Known packages keep their lock state and pick up the current display
    /// name; new ones get a default unlocked record. Records for packages that
    /// are no longer installed stay in the store but are not returned.
    pub fn sync_installed(&self, installed: &[InstalledApp]) -> Result<Vec<LockedApp>> {
        let mut visible: Vec<LockedApp> = Vec::with_capacity(installed.len());
        self.store.modify_apps(&mut |apps| {
            visible.clear();
            for inst in installed {
                if visible
                    .iter()
                    .any(|v| v.package_identifier == inst.package_identifier)
                {
                    continue;
                }
                match apps
                    .iter_mut()
                    .find(|app| app.package_identifier == inst.package_identifier)
                {
                    Some(existing) => {
                        existing.display_name = inst.display_name.clone();
                        visible.push(existing.clone());
                    }
                    None => {
                        let app = LockedApp::new(&inst.package_identifier, &inst.display_name);
                        apps.push(app.clone());
                        visible.push(app);
                    }
                }
            }
            Ok(())
        })?;
        sort_by_name(&mut visible);
        debug!(count = visible.len(), "installed apps synced");
        Ok(visible)
    }

    /// Every stored record, sorted by display name.
    pub fn list(&self) -> Result<Vec<LockedApp>> {
        let mut apps = self.store.load_apps()?;
        sort_by_name(&mut apps);
        Ok(apps)
    }

    pub fn get(&self, package_identifier: &str) -> Result<LockedApp> {
        self.store
            .find_app(package_identifier)?
            .ok_or_else(|| StoreError::NotFound(package_identifier.to_string()).into())
    }

    /// Add one app by hand, or refresh the name of a known one.
    pub fn register(&self, package_identifier: &str, display_name: &str) -> Result<LockedApp> {
        let mut apps = self.sync_installed(&[InstalledApp::new(package_identifier, display_name)])?;
        apps.pop()
            .ok_or_else(|| StoreError::NotFound(package_identifier.to_string()).into())
    }

    fn update<T>(
        &self,
        package_identifier: &str,
        mut edit: impl FnMut(&mut LockedApp) -> Result<T>,
    ) -> Result<(LockedApp, T)> {
        let mut updated = None;
        self.store.modify_apps(&mut |apps| {
            let app = apps
                .iter_mut()
                .find(|app| app.package_identifier == package_identifier)
                .ok_or_else(|| StoreError::NotFound(package_identifier.to_string()))?;
            let value = edit(app)?;
            updated = Some((app.clone(), value));
            Ok(())
        })?;
        updated.ok_or_else(|| StoreError::NotFound(package_identifier.to_string()).into())
    }

    /// Locks the app; returns the secret if one had to be provisioned.
    pub fn lock(&self, package_identifier: &str) -> Result<(LockedApp, Option<Secret>)> {
        self.update(package_identifier, |app| Ok(self.policy.lock(app)))
    }

    pub fn unlock(
        &self,
        package_identifier: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(LockedApp, UnlockOutcome)> {
        self.update(package_identifier, |app| {
            Ok(self.policy.attempt_unlock(app, code, now)?)
        })
    }

    pub fn release(
        &self,
        package_identifier: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<(LockedApp, UnlockOutcome)> {
        self.update(package_identifier, |app| {
            Ok(self.policy.release_lock(app, code, now)?)
        })
    }

    pub fn override_unlock(&self, package_identifier: &str, key: &str) -> Result<LockedApp> {
        let device_secret = self.store.device_secret()?;
        let (app, ()) = self.update(package_identifier, |app| {
            Ok(self
                .policy
                .attempt_override_unlock(app, key, device_secret.as_ref())?)
        })?;
        Ok(app)
    }

    pub fn enable_totp(&self, package_identifier: &str, secret: Secret) -> Result<LockedApp> {
        let (app, ()) = self.update(package_identifier, |app| {
            self.policy.enable_totp(app, secret.clone());
            Ok(())
        })?;
        info!(package = %app.package_identifier, "code unlock enabled");
        Ok(app)
    }

    pub fn disable_totp(&self, package_identifier: &str) -> Result<LockedApp> {
        let (app, ()) = self.update(package_identifier, |app| {
            self.policy.disable_totp(app);
            Ok(())
        })?;
        info!(package = %app.package_identifier, "code unlock disabled");
        Ok(app)
    }

    /// Unknown packages are never blocked.
    pub fn is_blocked(&self, package_identifier: &str, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .find_app(package_identifier)?
            .is_some_and(|app| self.policy.is_blocked(&app, now)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, UnlockError};
    use crate::override_key::derive_override_key;
    use crate::store::MemoryStore;
    use crate::totp::current_code;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().unwrap()
    }

    fn registry() -> (Arc<MemoryStore>, AppRegistry) {
        let store = Arc::new(MemoryStore::new());
        let registry = AppRegistry::new(store.clone(), UnlockPolicy::default());
        (store, registry)
    }

    #[test]
    fn sync_keeps_state_and_sorts() {
        let (store, registry) = registry();
        registry
            .sync_installed(&[
                InstalledApp::new("org.example.mail", "mail"),
                InstalledApp::new("org.example.game", "Game"),
                InstalledApp::new("org.example.zoo", "Zoo"),
            ])
            .unwrap();
        registry.lock("org.example.game").unwrap();

        let visible = registry
            .sync_installed(&[
                InstalledApp::new("org.example.zoo", "Zoo"),
                InstalledApp::new("org.example.game", "Game 2"),
                InstalledApp::new("org.example.new", "Atlas"),
            ])
            .unwrap();
        let names: Vec<_> = visible.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, ["Atlas", "Game 2", "Zoo"]);
        assert!(visible[1].is_locked);
        assert!(visible[1].secret.is_some());

        // uninstalled mail keeps its record
        assert_eq!(store.load_apps().unwrap().len(), 4);
    }

    #[test]
    fn search_matches_name_or_package() {
        let apps = vec![
            LockedApp::new("org.example.game", "Space Game"),
            LockedApp::new("org.example.mail", "Mail"),
        ];
        assert_eq!(search(&apps, "GAME").len(), 1);
        assert_eq!(search(&apps, "example.MAIL")[0].display_name, "Mail");
        assert_eq!(search(&apps, "  ").len(), 2);
        assert!(search(&apps, "chat").is_empty());
    }

    #[test]
    fn lock_then_unlock_with_code() {
        let (_store, registry) = registry();
        registry.register("org.example.game", "Game").unwrap();
        let (app, provisioned) = registry.lock("org.example.game").unwrap();
        let secret = provisioned.unwrap();
        assert!(app.is_locked && app.is_totp_enabled);

        let now = at(1_700_000_000);
        assert!(registry.is_blocked("org.example.game", now).unwrap());
        let err = registry.unlock("org.example.game", "12345", now).unwrap_err();
        assert!(matches!(err, Error::Unlock(UnlockError::InvalidFormat)));

        let code = current_code(&secret, now);
        let (app, outcome) = registry.unlock("org.example.game", &code, now).unwrap();
        assert_eq!(outcome, UnlockOutcome::Verified { drift: 0 });
        assert!(app.is_locked);
        assert!(!registry.is_blocked("org.example.game", now).unwrap());
        assert!(registry
            .is_blocked("org.example.game", now + Duration::seconds(301))
            .unwrap());
    }

    #[test]
    fn release_and_override() {
        let (store, registry) = registry();
        registry.register("org.example.game", "Game").unwrap();
        registry.register("org.example.mail", "Mail").unwrap();
        let secret = Secret::parse("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
        registry.enable_totp("org.example.game", secret).unwrap();
        let (app, _) = registry.release("org.example.game", "287082", at(59)).unwrap();
        assert!(!app.is_locked);

        let device = Secret::parse("JBSWY3DPEHPK3PXP").unwrap();
        store.set_device_secret_if_absent(&device).unwrap();
        registry.lock("org.example.mail").unwrap();
        let app = registry
            .override_unlock("org.example.mail", &derive_override_key(&device))
            .unwrap();
        assert!(!app.is_locked);
    }

    #[test]
    fn failed_unlock_leaves_store_untouched() {
        let (store, registry) = registry();
        registry.register("org.example.game", "Game").unwrap();
        registry.lock("org.example.game").unwrap();
        let before = store.load_apps().unwrap();
        assert!(registry
            .unlock("org.example.game", "000000", at(1_700_000_000))
            .is_err());
        assert_eq!(store.load_apps().unwrap(), before);
    }

    #[test]
    fn unknown_package() {
        let (_store, registry) = registry();
        assert!(!registry.is_blocked("org.example.none", at(0)).unwrap());
        assert!(matches!(
            registry.lock("org.example.none").unwrap_err(),
            Error::Store(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn disable_totp_clears_secret() {
        let (_store, registry) = registry();
        registry.register("org.example.game", "Game").unwrap();
        registry.lock("org.example.game").unwrap();
        let app = registry.disable_totp("org.example.game").unwrap();
        assert!(app.is_locked);
        assert!(!app.is_totp_enabled);
        assert!(app.secret.is_none());
        assert_eq!(registry.get("org.example.game").unwrap(), app);
    }
}
