//! End-to-end lock flows against the file store.
//!
//! Tests cover:
//!  1. First run provisions the device secret once
//!  2. Lock → partner code → temporary unlock → window expiry
//!  3. Permanent release and override key
//!  4. Partner registry refuses the device's own secret
//!  5. Launch gate over persisted records
//!  6. HMAC-SHA1 primitive against the RFC 4226 reference digest

use std::sync::Arc;

use applock_core::apps::{AppRegistry, InstalledApp};
use applock_core::device::{initialize_device_secret, DeviceSecretStatus};
use applock_core::gate::{GateDecision, LaunchGate};
use applock_core::partners::PartnerRegistry;
use applock_core::policy::{UnlockOutcome, UnlockPolicy};
use applock_core::settings::LockSettings;
use applock_core::store::{FileStore, LockStore};
use applock_core::totp::{current_code, derive_code, time_step};
use applock_core::{derive_override_key, Error, PartnerError, Secret, UnlockError};
use chrono::{DateTime, Duration, TimeZone, Utc};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use tempfile::tempdir;

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap()
}

fn open(dir: &std::path::Path) -> Arc<dyn LockStore> {
    Arc::new(FileStore::open(dir).unwrap())
}

// ─── 1: device secret ───────────────────────────────────────────────────────

#[test]
fn device_secret_survives_restarts() {
    let dir = tempdir().unwrap();
    let first = initialize_device_secret(open(dir.path()).as_ref()).unwrap();
    assert!(matches!(first, DeviceSecretStatus::Generated(_)));

    let second = initialize_device_secret(open(dir.path()).as_ref()).unwrap();
    assert_eq!(second, DeviceSecretStatus::Existing(first.secret().clone()));
}

// ─── 2: temporary unlock ────────────────────────────────────────────────────

#[test]
fn partner_code_opens_temporary_window() {
    let dir = tempdir().unwrap();
    let registry = AppRegistry::new(open(dir.path()), UnlockPolicy::default());
    registry
        .sync_installed(&[InstalledApp::new("org.example.game", "Game")])
        .unwrap();
    let (_, provisioned) = registry.lock("org.example.game").unwrap();
    let secret = provisioned.expect("lock provisions a secret");

    // the partner side only knows the secret text
    let partner_copy = Secret::parse(&secret.as_str().to_lowercase()).unwrap();
    let start = at(1_700_000_000);
    let code = current_code(&partner_copy, start);

    let reopened = AppRegistry::new(open(dir.path()), UnlockPolicy::default());
    assert!(reopened.is_blocked("org.example.game", start).unwrap());
    let (app, outcome) = reopened
        .unlock("org.example.game", &code, start + Duration::seconds(20))
        .unwrap();
    assert!(matches!(outcome, UnlockOutcome::Verified { .. }));
    assert!(app.is_locked);
    assert!(!reopened
        .is_blocked("org.example.game", start + Duration::seconds(200))
        .unwrap());
    assert!(reopened
        .is_blocked("org.example.game", start + Duration::seconds(321))
        .unwrap());
}

#[test]
fn stale_code_is_rejected() {
    let dir = tempdir().unwrap();
    let registry = AppRegistry::new(open(dir.path()), UnlockPolicy::default());
    registry.register("org.example.game", "Game").unwrap();
    let secret = Secret::parse("JBSWY3DPEHPK3PXP").unwrap();
    registry.enable_totp("org.example.game", secret.clone()).unwrap();

    let now = at(1_234_567_890);
    let stale = derive_code(&secret, time_step(now) - 2);
    let err = registry.unlock("org.example.game", &stale, now).unwrap_err();
    assert!(matches!(err, Error::Unlock(UnlockError::InvalidCode)));
    assert!(registry.get("org.example.game").unwrap().last_unlock_timestamp.is_none());
}

// ─── 3: permanent release ───────────────────────────────────────────────────

#[test]
fn release_and_override_clear_lock() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let registry = AppRegistry::new(store.clone(), UnlockPolicy::default());
    registry.register("org.example.game", "Game").unwrap();
    registry.register("org.example.mail", "Mail").unwrap();

    let secret = Secret::parse("GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ").unwrap();
    registry.enable_totp("org.example.game", secret).unwrap();
    let (app, _) = registry.release("org.example.game", "081804", at(1_111_111_109)).unwrap();
    assert!(!app.is_locked);

    let (_, mail_secret) = registry.lock("org.example.mail").unwrap();
    let key = derive_override_key(&mail_secret.unwrap());
    let err = registry.override_unlock("org.example.mail", "WRONGKEY").unwrap_err();
    assert!(matches!(err, Error::Unlock(UnlockError::InvalidCode)));
    let app = registry.override_unlock("org.example.mail", &key.to_lowercase()).unwrap();
    assert!(!app.is_locked);
}

// ─── 4: partners ────────────────────────────────────────────────────────────

#[test]
fn partner_registry_round_trip() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let device = initialize_device_secret(store.as_ref()).unwrap();
    let partners = PartnerRegistry::new(store.clone(), &LockSettings::default());

    let err = partners.add("Me", device.secret().as_str()).unwrap_err();
    assert!(matches!(err, Error::Partner(PartnerError::OwnDeviceSecret)));

    partners.add("Alex", "jbsw y3dp ehpk 3pxp").unwrap();
    let reloaded = PartnerRegistry::new(open(dir.path()), &LockSettings::default());
    let alex = reloaded.get("alex").unwrap();
    assert_eq!(current_code(&alex.secret, at(59)), "996554");
}

// ─── 5: launch gate ─────────────────────────────────────────────────────────

#[test]
fn gate_follows_persisted_state() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    let settings = LockSettings::default();
    let registry = AppRegistry::new(store.clone(), UnlockPolicy::from_settings(&settings));
    registry.register("org.example.game", "Game").unwrap();
    registry.register("com.applock", "Locker").unwrap();
    registry.lock("com.applock").unwrap();

    let mut gate = LaunchGate::new(&settings);
    let now = at(1_700_000_000);
    let apps = store.load_apps().unwrap();
    assert_eq!(gate.check("org.example.game", &apps, now), GateDecision::Allow);
    assert_eq!(gate.check("com.applock", &apps, now), GateDecision::Ignore);

    registry.lock("org.example.game").unwrap();
    let apps = store.load_apps().unwrap();
    assert_eq!(gate.check("org.example.game", &apps, now), GateDecision::Block);
    assert_eq!(
        gate.check("org.example.game", &apps, now + Duration::milliseconds(300)),
        GateDecision::Debounced
    );
}

// ─── 6: primitive ───────────────────────────────────────────────────────────

#[test]
fn hmac_sha1_reference_digest() {
    let mut mac = Hmac::<Sha1>::new_from_slice(b"12345678901234567890").unwrap();
    mac.update(&0u64.to_be_bytes());
    assert_eq!(
        hex::encode(mac.finalize().into_bytes()),
        "cc93cf18508d94934c64b65d8ba7667fb7cde4b0"
    );
}
