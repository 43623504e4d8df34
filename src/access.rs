use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use crate::{error::StatusError, store::KeyValueStore};

const BOOKMARK_KEY: &str = "bookmark";
pub const PREFERENCES_FILE_NAME: &str = "com.apple.TimeMachine.plist";

/// A location that must be explicitly opened before it is read and released
/// afterwards.
pub trait ScopedResource {
    /// Begins access, returning `false` when access is not granted.
    fn start_accessing(&self) -> bool;

    /// Ends access started by [`ScopedResource::start_accessing`].
    fn stop_accessing(&self);

    /// Reads the whole resource. Only valid between start and stop.
    fn contents(&self) -> io::Result<Vec<u8>>;
}

/// Holds access to a [`ScopedResource`] and releases it when dropped.
pub struct AccessGuard<'a, R: ScopedResource + ?Sized> {
    resource: &'a R,
}

impl<'a, R: ScopedResource + ?Sized> AccessGuard<'a, R> {
    pub fn acquire(resource: &'a R) -> Result<Self, StatusError> {
        if !resource.start_accessing() {
            return Err(StatusError::AccessDenied);
        }

        Ok(Self { resource })
    }

    pub fn contents(&self) -> Result<Vec<u8>, StatusError> {
        self.resource.contents().map_err(StatusError::Unreadable)
    }
}

impl<R: ScopedResource + ?Sized> Drop for AccessGuard<'_, R> {
    fn drop(&mut self) {
        self.resource.stop_accessing();
    }
}

/// A persisted, revocable permission to read one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub path: PathBuf,
    pub granted_at: DateTime<Utc>,
}

impl Grant {
    /// Stores the absolute path, so agents running from another working
    /// directory resolve the same file.
    pub fn create(path: &Path) -> Result<Self> {
        let path = &path
            .canonicalize()
            .with_context(|| format!("Cannot access `{}`", path.display()))?;
        let metadata = fs::metadata(path)
            .with_context(|| format!("Cannot access `{}`", path.display()))?;
        if !metadata.is_file() {
            anyhow::bail!("`{}` is not a file", path.display());
        }
        File::open(path).with_context(|| {
            format!(
                "`{}` is not readable, grant your terminal Full Disk Access first",
                path.display()
            )
        })?;

        if path.file_name().and_then(|name| name.to_str()) != Some(PREFERENCES_FILE_NAME) {
            log::warn!(
                "`{}` is not named {}, it may not be a Time Machine configuration",
                path.display(),
                PREFERENCES_FILE_NAME
            );
        }

        Ok(Self {
            path: path.to_path_buf(),
            granted_at: Utc::now(),
        })
    }

    pub fn load(store: &impl KeyValueStore) -> Result<Option<Self>> {
        let Some(data) = store.data(BOOKMARK_KEY)? else {
            return Ok(None);
        };

        let grant = serde_json::from_slice(&data).context("Stored grant is corrupt")?;
        Ok(Some(grant))
    }

    pub fn save(&self, store: &impl KeyValueStore) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        store
            .set_data(BOOKMARK_KEY, &data)
            .context("Failed to persist grant")?;

        Ok(())
    }

    /// Removes the stored grant. Returns whether one existed.
    pub fn revoke(store: &impl KeyValueStore) -> Result<bool> {
        let existed = store.data(BOOKMARK_KEY)?.is_some();
        store.remove(BOOKMARK_KEY).context("Failed to remove grant")?;

        Ok(existed)
    }
}

/// The file a [`Grant`] points at.
pub struct FileGrantResource<'a> {
    grant: &'a Grant,
}

impl<'a> FileGrantResource<'a> {
    pub fn new(grant: &'a Grant) -> Self {
        Self { grant }
    }
}

impl ScopedResource for FileGrantResource<'_> {
    fn start_accessing(&self) -> bool {
        match File::open(&self.grant.path) {
            Ok(_) => {
                log::debug!("Access to `{}` started", self.grant.path.display());
                true
            }
            Err(e) => {
                log::warn!("Grant for `{}` unusable: {}", self.grant.path.display(), e);
                false
            }
        }
    }

    fn stop_accessing(&self) {
        log::debug!("Access to `{}` released", self.grant.path.display());
    }

    fn contents(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.grant.path)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::tests::MemoryStore;
    use std::cell::Cell;

    /// In-memory resource counting how often access is started and released.
    pub(crate) struct FakeResource {
        pub allow: bool,
        pub bytes: Option<Vec<u8>>,
        pub started: Cell<u32>,
        pub stopped: Cell<u32>,
    }

    impl FakeResource {
        pub fn with_bytes(bytes: &[u8]) -> Self {
            Self {
                allow: true,
                bytes: Some(bytes.to_vec()),
                started: Cell::new(0),
                stopped: Cell::new(0),
            }
        }
    }

    impl ScopedResource for FakeResource {
        fn start_accessing(&self) -> bool {
            self.started.set(self.started.get() + 1);
            self.allow
        }

        fn stop_accessing(&self) {
            self.stopped.set(self.stopped.get() + 1);
        }

        fn contents(&self) -> io::Result<Vec<u8>> {
            self.bytes
                .clone()
                .ok_or_else(|| io::Error::new(io::ErrorKind::PermissionDenied, "unreadable"))
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        let resource = FakeResource::with_bytes(b"data");
        {
            let guard = AccessGuard::acquire(&resource).unwrap();
            assert_eq!(guard.contents().unwrap(), b"data");
            assert_eq!(resource.stopped.get(), 0);
        }
        assert_eq!(resource.started.get(), 1);
        assert_eq!(resource.stopped.get(), 1);
    }

    #[test]
    fn denied_access_is_not_released() {
        let mut resource = FakeResource::with_bytes(b"data");
        resource.allow = false;

        let result = AccessGuard::acquire(&resource);
        assert!(matches!(result, Err(StatusError::AccessDenied)));
        assert_eq!(resource.stopped.get(), 0);
    }

    #[test]
    fn grant_round_trips_through_store() {
        let store = MemoryStore::default();
        assert!(Grant::load(&store).unwrap().is_none());

        let grant = Grant {
            path: PathBuf::from("/Library/Preferences/com.apple.TimeMachine.plist"),
            granted_at: Utc::now(),
        };
        grant.save(&store).unwrap();
        assert_eq!(Grant::load(&store).unwrap(), Some(grant));

        assert!(Grant::revoke(&store).unwrap());
        assert!(Grant::load(&store).unwrap().is_none());
        assert!(!Grant::revoke(&store).unwrap());
    }

    #[test]
    fn grant_requires_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Grant::create(&dir.path().join(PREFERENCES_FILE_NAME)).is_err());
        assert!(Grant::create(dir.path()).is_err());
    }

    #[test]
    fn grant_stores_absolute_path() {
        let file = tempfile::Builder::new()
            .suffix(".plist")
            .tempfile_in(".")
            .unwrap();
        let relative = Path::new(file.path().file_name().unwrap());
        assert!(relative.is_relative());

        let grant = Grant::create(relative).unwrap();
        assert!(grant.path.is_absolute());
        assert_eq!(grant.path, file.path().canonicalize().unwrap());
    }

    #[test]
    fn file_resource_reads_granted_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(PREFERENCES_FILE_NAME);
        fs::write(&path, b"contents").unwrap();

        let grant = Grant::create(&path).unwrap();
        let resource = FileGrantResource::new(&grant);
        assert!(resource.start_accessing());
        assert_eq!(resource.contents().unwrap(), b"contents");
        resource.stop_accessing();

        fs::remove_file(&path).unwrap();
        assert!(!resource.start_accessing());
    }
}
