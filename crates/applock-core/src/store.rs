//! Persistence contract for lock records.
//!
//! Stores hand out whole lists keyed by stable identifiers and serialise
//! read-modify-write cycles themselves, so concurrent unlocks against the same
//! record resolve last-writer-wins. The device secret is write-once.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::StoreError;
use crate::records::{LockedApp, PartnerEntry};
use crate::secret::Secret;

pub const APPS_FILE: &str = "apps.json";
pub const PARTNERS_FILE: &str = "partners.json";
pub const DEVICE_SECRET_FILE: &str = "device_secret";

pub type AppsEdit<'a> = &'a mut dyn FnMut(&mut Vec<LockedApp>) -> crate::Result<()>;
pub type PartnersEdit<'a> = &'a mut dyn FnMut(&mut Vec<PartnerEntry>) -> crate::Result<()>;

pub trait LockStore: Send + Sync {
    fn load_apps(&self) -> Result<Vec<LockedApp>, StoreError>;
    fn save_apps(&self, apps: &[LockedApp]) -> Result<(), StoreError>;
    /// Load, edit and save the app list as one step. Nothing is written when
    /// `edit` fails.
    fn modify_apps(&self, edit: AppsEdit<'_>) -> crate::Result<()>;

    fn load_partners(&self) -> Result<Vec<PartnerEntry>, StoreError>;
    fn save_partners(&self, partners: &[PartnerEntry]) -> Result<(), StoreError>;
    fn modify_partners(&self, edit: PartnersEdit<'_>) -> crate::Result<()>;

    fn device_secret(&self) -> Result<Option<Secret>, StoreError>;
    /// Stores `secret` only if none is stored yet; `Ok(false)` otherwise.
    fn set_device_secret_if_absent(&self, secret: &Secret) -> Result<bool, StoreError>;

    fn find_app(&self, package_identifier: &str) -> Result<Option<LockedApp>, StoreError> {
        Ok(self
            .load_apps()?
            .into_iter()
            .find(|app| app.package_identifier == package_identifier))
    }

    /// Supersede the record with the same package identifier, or append it.
    fn upsert_app(&self, app: &LockedApp) -> crate::Result<()> {
        self.modify_apps(&mut |apps| {
            upsert(apps, app);
            Ok(())
        })
    }
}

pub(crate) fn upsert(apps: &mut Vec<LockedApp>, app: &LockedApp) {
    match apps
        .iter_mut()
        .find(|existing| existing.package_identifier == app.package_identifier)
    {
        Some(existing) => *existing = app.clone(),
        None => apps.push(app.clone()),
    }
}

// ── In-memory store ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryState {
    apps: Vec<LockedApp>,
    partners: Vec<PartnerEntry>,
    device_secret: Option<Secret>,
}

/// Process-local store for tests and embedders that persist elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockStore for MemoryStore {
    fn load_apps(&self) -> Result<Vec<LockedApp>, StoreError> {
        Ok(self.inner.lock().apps.clone())
    }

    fn save_apps(&self, apps: &[LockedApp]) -> Result<(), StoreError> {
        self.inner.lock().apps = apps.to_vec();
        Ok(())
    }

    fn modify_apps(&self, edit: AppsEdit<'_>) -> crate::Result<()> {
        let mut state = self.inner.lock();
        let mut apps = state.apps.clone();
        edit(&mut apps)?;
        state.apps = apps;
        Ok(())
    }

    fn load_partners(&self) -> Result<Vec<PartnerEntry>, StoreError> {
        Ok(self.inner.lock().partners.clone())
    }

    fn save_partners(&self, partners: &[PartnerEntry]) -> Result<(), StoreError> {
        self.inner.lock().partners = partners.to_vec();
        Ok(())
    }

    fn modify_partners(&self, edit: PartnersEdit<'_>) -> crate::Result<()> {
        let mut state = self.inner.lock();
        let mut partners = state.partners.clone();
        edit(&mut partners)?;
        state.partners = partners;
        Ok(())
    }

    fn device_secret(&self) -> Result<Option<Secret>, StoreError> {
        Ok(self.inner.lock().device_secret.clone())
    }

    fn set_device_secret_if_absent(&self, secret: &Secret) -> Result<bool, StoreError> {
        let mut state = self.inner.lock();
        if state.device_secret.is_some() {
            return Ok(false);
        }
        state.device_secret = Some(secret.clone());
        Ok(true)
    }
}

// ── File store ────────────────────────────────────────────────────────────────

/// JSON files in one directory: `apps.json`, `partners.json` and a plain-text
/// `device_secret`. Lists are replaced through a temp file and rename; the
/// device secret is created with a no-clobber link, which holds across
/// processes.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        debug!(dir = %dir.display(), "file store opened");
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_list<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, StoreError> {
        let bytes = match fs::read(self.dir.join(name)) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(vec![]);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn write_list<T: Serialize>(&self, name: &str, items: &[T]) -> Result<(), StoreError> {
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        serde_json::to_writer_pretty(&mut tmp, items)?;
        tmp.flush()?;
        tmp.persist(self.dir.join(name)).map_err(|e| e.error)?;
        Ok(())
    }
}

impl LockStore for FileStore {
    fn load_apps(&self) -> Result<Vec<LockedApp>, StoreError> {
        self.read_list(APPS_FILE)
    }

    fn save_apps(&self, apps: &[LockedApp]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.write_list(APPS_FILE, apps)
    }

    fn modify_apps(&self, edit: AppsEdit<'_>) -> crate::Result<()> {
        let _guard = self.write_lock.lock();
        let mut apps = self.read_list(APPS_FILE)?;
        edit(&mut apps)?;
        self.write_list(APPS_FILE, &apps)?;
        Ok(())
    }

    fn load_partners(&self) -> Result<Vec<PartnerEntry>, StoreError> {
        self.read_list(PARTNERS_FILE)
    }

    fn save_partners(&self, partners: &[PartnerEntry]) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        self.write_list(PARTNERS_FILE, partners)
    }

    fn modify_partners(&self, edit: PartnersEdit<'_>) -> crate::Result<()> {
        let _guard = self.write_lock.lock();
        let mut partners = self.read_list(PARTNERS_FILE)?;
        edit(&mut partners)?;
        self.write_list(PARTNERS_FILE, &partners)?;
        Ok(())
    }

    fn device_secret(&self) -> Result<Option<Secret>, StoreError> {
        match fs::read_to_string(self.dir.join(DEVICE_SECRET_FILE)) {
            Ok(text) if text.trim().is_empty() => Ok(None),
            Ok(text) => Ok(Some(Secret::from_stored(text.trim()))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set_device_secret_if_absent(&self, secret: &Secret) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock();
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(secret.canonical().as_bytes())?;
        tmp.as_file().sync_all()?;
        match tmp.persist_noclobber(self.dir.join(DEVICE_SECRET_FILE)) {
            Ok(_) => Ok(true),
            Err(err) if err.error.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(err) => Err(err.error.into()),
        }
    }
}
