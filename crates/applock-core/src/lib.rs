//! applock-core — accountability-partner app locking
//!
//! A locked application is released only with a six-digit TOTP code that a
//! trusted partner generates from a shared secret. This crate holds the whole
//! decision kernel; anything that draws windows or watches the foreground app
//! calls into it.
//!
//! # Module layout
//! - `secret`        — Base32 shared secrets and the secret generator
//! - `totp`          — RFC 4226 / RFC 6238 code derivation and skew-tolerant verify
//! - `override_key`  — the derived "forever unlock" credential
//! - `records`       — `LockedApp` / `PartnerEntry` persisted shapes
//! - `store`         — persistence contract plus memory and file backends
//! - `device`        — write-once device secret provisioning
//! - `policy`        — block / unlock / lock decisions
//! - `apps`          — installed-app registry on top of the store
//! - `partners`      — validated partner secret registry
//! - `gate`          — foreground launch decision with relaunch debounce
//! - `settings`      — on-disk tunables
//! - `paths`         — data directory layout
//! - `error`         — error kinds

pub mod apps;
pub mod device;
pub mod error;
pub mod gate;
pub mod override_key;
pub mod partners;
pub mod paths;
pub mod policy;
pub mod records;
pub mod secret;
pub mod settings;
pub mod store;
pub mod totp;

pub use apps::{AppRegistry, InstalledApp};
pub use device::{initialize_device_secret, DeviceSecretStatus};
pub use error::{DecodeError, Error, PartnerError, Result, StoreError, UnlockError};
pub use gate::{GateDecision, LaunchGate};
pub use override_key::derive_override_key;
pub use partners::PartnerRegistry;
pub use policy::{UnlockOutcome, UnlockPolicy, UnlockResult};
pub use records::{LockedApp, PartnerEntry};
pub use secret::{generate_secret, Secret};
pub use settings::LockSettings;
pub use store::{FileStore, LockStore, MemoryStore};
pub use totp::{current_code, remaining_seconds, verify};
