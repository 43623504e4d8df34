use chrono::Utc;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use uuid::Uuid;

use crate::{error::StatusError, preferences::Preferences};

const PREFERENCES_KEY: &str = "preferences";
const TIMELINES_DIR: &str = "timelines";

/// Named byte slots shared by every process of the application.
pub trait KeyValueStore {
    /// Returns `None` when nothing is stored under `key`.
    fn data(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the whole value stored under `key`.
    fn set_data(&self, key: &str, data: &[u8]) -> io::Result<()>;

    /// Removing a missing key is not an error.
    fn remove(&self, key: &str) -> io::Result<()>;
}

/// Asks display surfaces of a given kind to re-render.
pub trait RefreshSignal {
    fn reload_timelines(&self, kind: &str);
}

/// A directory holding one file per key.
pub struct ContainerStore {
    dir: PathBuf,
}

impl ContainerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

impl KeyValueStore for ContainerStore {
    fn data(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.slot_path(key)) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn set_data(&self, key: &str, data: &[u8]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;

        // written next to the slot and renamed over it, readers never see a partial value
        let tmp_path = self.dir.join(format!(".{}.{}.tmp", key, Uuid::new_v4()));
        fs::write(&tmp_path, data)?;
        if let Err(e) = fs::rename(&tmp_path, self.slot_path(key)) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e);
        }

        Ok(())
    }

    fn remove(&self, key: &str) -> io::Result<()> {
        match fs::remove_file(self.slot_path(key)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Marks a display surface kind as stale by touching
/// `<container>/timelines/<kind>`. Display processes watch that file.
pub struct TimelineReloader {
    dir: PathBuf,
}

impl TimelineReloader {
    pub fn new(container_dir: &Path) -> Self {
        Self {
            dir: container_dir.join(TIMELINES_DIR),
        }
    }

    fn touch(&self, kind: &str) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.dir.join(kind), Utc::now().to_rfc3339())
    }
}

impl RefreshSignal for TimelineReloader {
    fn reload_timelines(&self, kind: &str) {
        match self.touch(kind) {
            Ok(()) => log::debug!("Requested reload of `{}` timelines", kind),
            Err(e) => log::warn!("Failed requesting reload of `{}` timelines: {}", kind, e),
        }
    }
}

/// Moves [`Preferences`] between the syncing side and the display side.
pub struct PreferencesStore<S, R> {
    slots: S,
    refresh: R,
    widget_kind: String,
}

impl<S: KeyValueStore, R: RefreshSignal> PreferencesStore<S, R> {
    pub fn new(slots: S, refresh: R, widget_kind: impl Into<String>) -> Self {
        Self {
            slots,
            refresh,
            widget_kind: widget_kind.into(),
        }
    }

    pub fn slots(&self) -> &S {
        &self.slots
    }

    /// Overwrites the shared slot and asks display surfaces to refresh.
    pub fn store(&self, preferences: &Preferences) -> bool {
        match self.try_store(preferences) {
            Ok(()) => {
                log::info!("Preferences stored");
                true
            }
            Err(e) => {
                log::error!("Failed storing preferences: {}", e);
                false
            }
        }
    }

    fn try_store(&self, preferences: &Preferences) -> Result<(), StatusError> {
        let data = serde_json::to_vec(preferences).map_err(StatusError::Serialization)?;
        self.slots
            .set_data(PREFERENCES_KEY, &data)
            .map_err(StatusError::SlotWrite)?;
        self.refresh.reload_timelines(&self.widget_kind);

        Ok(())
    }

    /// Returns the stored preferences. An empty slot and an unreadable one
    /// both yield `None` and differ only in what gets logged.
    pub fn load(&self) -> Option<Preferences> {
        match self.try_load() {
            Ok(Some(preferences)) => {
                log::info!("Preferences loaded");
                Some(preferences)
            }
            Ok(None) => {
                log::info!("Preferences not available");
                None
            }
            Err(e) => {
                log::error!("Failed loading preferences: {}", e);
                None
            }
        }
    }

    fn try_load(&self) -> Result<Option<Preferences>, StatusError> {
        let Some(data) = self
            .slots
            .data(PREFERENCES_KEY)
            .map_err(StatusError::SlotRead)?
        else {
            return Ok(None);
        };

        serde_json::from_slice(&data)
            .map(Some)
            .map_err(StatusError::SlotCorrupt)
    }

    pub fn clear(&self) {
        match self.slots.remove(PREFERENCES_KEY) {
            Ok(()) => log::info!("Preferences cleared"),
            Err(e) => log::error!("Failed clearing preferences: {}", e),
        }
        self.refresh.reload_timelines(&self.widget_kind);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::preferences::Destination;
    use chrono::{TimeDelta, TimeZone as _};
    use std::{cell::RefCell, collections::HashMap};

    #[derive(Default)]
    pub(crate) struct MemoryStore {
        slots: RefCell<HashMap<String, Vec<u8>>>,
    }

    impl KeyValueStore for MemoryStore {
        fn data(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
            Ok(self.slots.borrow().get(key).cloned())
        }

        fn set_data(&self, key: &str, data: &[u8]) -> io::Result<()> {
            self.slots.borrow_mut().insert(key.to_string(), data.to_vec());
            Ok(())
        }

        fn remove(&self, key: &str) -> io::Result<()> {
            self.slots.borrow_mut().remove(key);
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingSignal {
        kinds: RefCell<Vec<String>>,
    }

    impl RefreshSignal for &RecordingSignal {
        fn reload_timelines(&self, kind: &str) {
            self.kinds.borrow_mut().push(kind.to_string());
        }
    }

    fn sample() -> Preferences {
        let taken = Utc.with_ymd_and_hms(2023, 11, 21, 8, 15, 42).unwrap();
        let first = Destination {
            id: "A".to_string(),
            is_encrypted: true,
            is_network: false,
            bytes_available: 1_311_960_657_920,
            bytes_used: 454_036_393_984,
            volume_name: "Time Machine".to_string(),
            snapshots: vec![taken, taken - TimeDelta::milliseconds(1_500), taken],
        };
        let second = Destination {
            id: "B".to_string(),
            is_encrypted: false,
            is_network: true,
            bytes_available: 0,
            bytes_used: 0,
            volume_name: String::new(),
            snapshots: vec![],
        };

        Preferences::new(vec![first, second], Some("A".to_string()))
    }

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn data(&self, _key: &str) -> io::Result<Option<Vec<u8>>> {
            Err(io::Error::other("container unreadable"))
        }

        fn set_data(&self, _key: &str, _data: &[u8]) -> io::Result<()> {
            Err(io::Error::other("container read-only"))
        }

        fn remove(&self, _key: &str) -> io::Result<()> {
            Err(io::Error::other("container read-only"))
        }
    }

    #[test]
    fn load_returns_what_was_stored() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(MemoryStore::default(), &signal, "Widget");
        let preferences = sample();

        assert!(store.store(&preferences));
        assert_eq!(store.load(), Some(preferences));
        assert_eq!(*signal.kinds.borrow(), ["Widget"]);
    }

    #[test]
    fn store_overwrites_previous_value() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(MemoryStore::default(), &signal, "Widget");

        assert!(store.store(&sample()));
        let replacement = Preferences::new(vec![], None);
        assert!(store.store(&replacement));
        assert_eq!(store.load(), Some(replacement));
    }

    #[test]
    fn empty_slot_loads_nothing() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(MemoryStore::default(), &signal, "Widget");
        assert!(store.load().is_none());
        assert!(signal.kinds.borrow().is_empty());
    }

    #[test]
    fn clear_empties_slot_and_signals() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(MemoryStore::default(), &signal, "Widget");

        assert!(store.store(&sample()));
        store.clear();
        assert!(store.load().is_none());
        assert_eq!(*signal.kinds.borrow(), ["Widget", "Widget"]);
    }

    #[test]
    fn corrupt_slot_loads_nothing() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(MemoryStore::default(), &signal, "Widget");
        store
            .slots()
            .set_data(PREFERENCES_KEY, b"{\"destinations\": 42}")
            .unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn failed_write_reports_false_without_signalling() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(FailingStore, &signal, "Widget");

        assert!(!store.store(&sample()));
        assert!(signal.kinds.borrow().is_empty());
    }

    #[test]
    fn failed_read_loads_nothing() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(FailingStore, &signal, "Widget");
        assert!(store.load().is_none());
    }

    #[test]
    fn failed_clear_still_signals() {
        let signal = RecordingSignal::default();
        let store = PreferencesStore::new(FailingStore, &signal, "Widget");
        store.clear();
        assert_eq!(*signal.kinds.borrow(), ["Widget"]);
    }

    #[test]
    fn container_store_persists_across_instances() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("container");
        let signal = RecordingSignal::default();
        let writer = PreferencesStore::new(ContainerStore::new(&dir), &signal, "Widget");
        assert!(writer.store(&sample()));

        let reader = PreferencesStore::new(ContainerStore::new(&dir), &signal, "Widget");
        assert_eq!(reader.load(), Some(sample()));

        reader.clear();
        assert!(writer.load().is_none());
        // no temp files left behind
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
    }

    #[test]
    fn container_store_tolerates_missing_keys() {
        let temp = tempfile::tempdir().unwrap();
        let store = ContainerStore::new(temp.path().join("container"));
        assert!(store.data("nothing").unwrap().is_none());
        assert!(store.remove("nothing").is_ok());
    }

    #[test]
    fn timeline_reloader_touches_kind_marker() {
        let dir = tempfile::tempdir().unwrap();
        let reloader = TimelineReloader::new(dir.path());
        reloader.reload_timelines("BackupStatusWidget");

        let marker = fs::read_to_string(dir.path().join(TIMELINES_DIR).join("BackupStatusWidget"))
            .unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(&marker).is_ok());
    }
}
