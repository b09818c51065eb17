//! The device's own secret: generated on first run, never replaced.

use tracing::{debug, info};

use crate::error::StoreError;
use crate::secret::{generate_secret, Secret};
use crate::store::LockStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSecretStatus {
    /// This call created the secret.
    Generated(Secret),
    /// A secret was already present (possibly written by a concurrent call).
    Existing(Secret),
}

impl DeviceSecretStatus {
    pub fn secret(&self) -> &Secret {
        match self {
            DeviceSecretStatus::Generated(secret) | DeviceSecretStatus::Existing(secret) => secret,
        }
    }
}

/// First-run provisioning. Safe to call on every start.
pub fn initialize_device_secret(store: &dyn LockStore) -> Result<DeviceSecretStatus, StoreError> {
    if let Some(existing) = store.device_secret()? {
        debug!("device secret already exists");
        return Ok(DeviceSecretStatus::Existing(existing));
    }
    let candidate = generate_secret();
    if store.set_device_secret_if_absent(&candidate)? {
        info!("device secret generated and stored");
        return Ok(DeviceSecretStatus::Generated(candidate));
    }
    // lost the race to another initializer; theirs stands
    store
        .device_secret()?
        .map(DeviceSecretStatus::Existing)
        .ok_or_else(|| StoreError::NotFound("device secret".to_string()))
}

/// Install a known secret as the device secret, e.g. when moving devices.
pub fn import_device_secret(store: &dyn LockStore, secret: &Secret) -> Result<(), StoreError> {
    if store.set_device_secret_if_absent(secret)? {
        info!("device secret imported");
        Ok(())
    } else {
        Err(StoreError::AlreadySet)
    }
}
