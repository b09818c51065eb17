//! Partners whose codes this device can display.
//!
//! Adding a partner is validated in a fixed order so the first problem with
//! the input is the one reported.

use std::sync::Arc;

use tracing::info;

use crate::error::{PartnerError, Result};
use crate::override_key::derive_override_key;
use crate::records::PartnerEntry;
use crate::secret::Secret;
use crate::settings::LockSettings;
use crate::store::LockStore;

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, ' ' | '.' | '\'' | '-')
}

/// Checks a new partner against the existing list and the device secret.
pub fn validate_partner(
    label: &str,
    secret: &str,
    existing: &[PartnerEntry],
    device_secret: Option<&Secret>,
    min_secret_len: usize,
) -> std::result::Result<PartnerEntry, PartnerError> {
    let label = label.trim();
    if label.is_empty() {
        return Err(PartnerError::EmptyLabel);
    }
    let secret = secret.trim();
    if secret.is_empty() {
        return Err(PartnerError::EmptySecret);
    }
    if !label.chars().all(is_label_char) {
        return Err(PartnerError::InvalidLabel);
    }
    let secret = Secret::parse(secret)?;
    let len = secret.len();
    if len < min_secret_len {
        return Err(PartnerError::SecretTooShort {
            len,
            min: min_secret_len,
        });
    }
    if device_secret == Some(&secret) {
        return Err(PartnerError::OwnDeviceSecret);
    }
    if existing.iter().any(|p| p.has_label(label)) {
        return Err(PartnerError::DuplicateLabel(label.to_string()));
    }
    if existing.iter().any(|p| p.secret == secret) {
        return Err(PartnerError::DuplicateSecret);
    }
    Ok(PartnerEntry {
        label: label.to_string(),
        secret,
    })
}

pub struct PartnerRegistry {
    store: Arc<dyn LockStore>,
    min_secret_len: usize,
}

impl PartnerRegistry {
    pub fn new(store: Arc<dyn LockStore>, settings: &LockSettings) -> Self {
        Self {
            store,
            min_secret_len: settings.min_partner_secret_len,
        }
    }

    pub fn list(&self) -> Result<Vec<PartnerEntry>> {
        Ok(self.store.load_partners()?)
    }

    pub fn get(&self, label: &str) -> Result<PartnerEntry> {
        self.list()?
            .into_iter()
            .find(|p| p.has_label(label))
            .ok_or_else(|| PartnerError::NotFound(label.trim().to_string()).into())
    }

    pub fn add(&self, label: &str, secret: &str) -> Result<()> {
        let device_secret = self.store.device_secret()?;
        self.store.modify_partners(&mut |partners| {
            let entry = validate_partner(
                label,
                secret,
                partners,
                device_secret.as_ref(),
                self.min_secret_len,
            )?;
            info!(label = %entry.label, "partner added");
            partners.push(entry);
            Ok(())
        })
    }

    pub fn remove_by_label(&self, label: &str) -> Result<PartnerEntry> {
        let mut removed = None;
        self.store.modify_partners(&mut |partners| {
            let index = partners
                .iter()
                .position(|p| p.has_label(label))
                .ok_or_else(|| PartnerError::NotFound(label.trim().to_string()))?;
            removed = Some(partners.remove(index));
            Ok(())
        })?;
        let removed = removed.ok_or_else(|| PartnerError::NotFound(label.trim().to_string()))?;
        info!(label = %removed.label, "partner removed");
        Ok(removed)
    }

    /// Removes by position in [`PartnerRegistry::list`] order.
    pub fn remove_at(&self, index: usize) -> Result<PartnerEntry> {
        let mut removed = None;
        self.store.modify_partners(&mut |partners| {
            if index >= partners.len() {
                return Err(PartnerError::IndexOutOfRange {
                    index,
                    len: partners.len(),
                }
                .into());
            }
            removed = Some(partners.remove(index));
            Ok(())
        })?;
        let removed = removed.ok_or(PartnerError::IndexOutOfRange { index, len: 0 })?;
        info!(label = %removed.label, "partner removed");
        Ok(removed)
    }

    /// The key this partner can hand over to lift one of their locks for good.
    pub fn override_key(&self, label: &str) -> Result<String> {
        Ok(derive_override_key(&self.get(label)?.secret))
    }
}
