//! Persistence gateway for the day-plan engine.
//!
//! Three records live in a small key/value store: the active plan, the saved
//! timetable and the history map. Each one is loaded and saved on its own, and
//! a record that no longer parses is treated as if it had never been written.

pub mod file;

pub use file::FileStore;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Key of the active day plan record
pub const ACTIVE_PLAN_KEY: &str = "active_plan";
/// Key of the last parsed timetable
pub const TIMETABLE_KEY: &str = "timetable";
/// Key of the date -> history entry map
pub const HISTORY_KEY: &str = "history";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed for '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw blob storage. Writes must be durable before `save` returns.
pub trait KeyValueStore: Send + Sync {
    /// Read a blob; `Ok(None)` when the key was never written
    fn load(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write (or replace) a blob
    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError>;

    /// Drop a blob if present
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// In-process store, used by tests and headless hosts
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.blobs().get(key).cloned())
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        self.blobs().insert(key.to_string(), blob.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.blobs().remove(key);
        Ok(())
    }
}

/// Typed access over a [`KeyValueStore`]. Cheap to clone; clones share the backend.
#[derive(Clone)]
pub struct Gateway {
    backend: Arc<dyn KeyValueStore>,
}

impl Gateway {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Load and decode a record for a read-modify-write.
    ///
    /// A malformed record comes back as `Ok(None)`. A failed read is an error,
    /// so the caller never writes over data it could not see.
    pub fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(blob) = self.backend.load(key)? else {
            debug!(key, "no stored record");
            return Ok(None);
        };
        match serde_json::from_str(&blob) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key, error = %e, "dropping malformed stored record");
                Ok(None)
            }
        }
    }

    /// Load and decode a record for display.
    ///
    /// Missing, unreadable and malformed records all come back as `None`.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.try_load(key).unwrap_or_else(|e| {
            warn!(key, error = %e, "failed to read stored record, treating as absent");
            None
        })
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let blob = serde_json::to_string_pretty(value).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;
        self.backend.save(key, &blob)?;
        debug!(key, bytes = blob.len(), "saved record");
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.backend.remove(key)
    }

    /// Write a blob verbatim. Lets tests and tools plant arbitrary content.
    pub fn save_raw(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        self.backend.save(key, blob)
    }
}

/// Backend whose reads or writes of chosen keys fail until healed.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct FailingStore {
    inner: MemoryStore,
    broken_reads: Mutex<std::collections::HashSet<String>>,
    broken_writes: Mutex<std::collections::HashSet<String>>,
}

#[cfg(test)]
impl FailingStore {
    pub(crate) fn break_reads(&self, key: &str) {
        self.broken_reads.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn break_writes(&self, key: &str) {
        self.broken_writes.lock().unwrap().insert(key.to_string());
    }

    pub(crate) fn heal(&self) {
        self.broken_reads.lock().unwrap().clear();
        self.broken_writes.lock().unwrap().clear();
    }

    fn check(set: &Mutex<std::collections::HashSet<String>>, key: &str) -> Result<(), StoreError> {
        if set.lock().unwrap().contains(key) {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
impl KeyValueStore for FailingStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        Self::check(&self.broken_reads, key)?;
        self.inner.load(key)
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        Self::check(&self.broken_writes, key)?;
        self.inner.save(key, blob)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        Self::check(&self.broken_writes, key)?;
        self.inner.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_missing_key_is_none() {
        let gateway = Gateway::in_memory();
        assert_eq!(gateway.load::<Record>("nothing"), None);
    }

    #[test]
    fn test_save_then_load() {
        let gateway = Gateway::in_memory();
        let record = Record {
            name: "plan".into(),
            count: 3,
        };
        gateway.save("r", &record).unwrap();
        assert_eq!(gateway.load::<Record>("r"), Some(record));
    }

    #[test]
    fn test_malformed_blob_is_absent() {
        let gateway = Gateway::in_memory();
        gateway.save_raw("r", "{not json").unwrap();
        assert_eq!(gateway.load::<Record>("r"), None);

        gateway.save_raw("r", r#"{"name": 5}"#).unwrap();
        assert_eq!(gateway.load::<Record>("r"), None);
    }

    #[test]
    fn test_corrupt_record_does_not_affect_others() {
        let gateway = Gateway::in_memory();
        gateway.save_raw("a", "garbage").unwrap();
        gateway
            .save(
                "b",
                &Record {
                    name: "ok".into(),
                    count: 1,
                },
            )
            .unwrap();
        assert_eq!(gateway.load::<Record>("a"), None);
        assert_eq!(gateway.load::<Record>("b").map(|r| r.count), Some(1));
    }

    #[test]
    fn test_try_load_separates_read_errors_from_bad_data() {
        let store = Arc::new(FailingStore::default());
        let gateway = Gateway::new(store.clone());
        gateway.save("r", &3u32).unwrap();
        gateway.save_raw("bad", "{not json").unwrap();

        store.break_reads("r");
        assert!(matches!(
            gateway.try_load::<u32>("r"),
            Err(StoreError::Io { .. })
        ));
        assert_eq!(gateway.load::<u32>("r"), None);
        assert!(matches!(gateway.try_load::<u32>("bad"), Ok(None)));
        assert!(matches!(gateway.try_load::<u32>("never"), Ok(None)));

        store.heal();
        assert_eq!(gateway.try_load::<u32>("r").unwrap(), Some(3));
    }

    #[test]
    fn test_remove() {
        let gateway = Gateway::in_memory();
        gateway.save_raw("r", "1").unwrap();
        gateway.remove("r").unwrap();
        assert_eq!(gateway.load::<u32>("r"), None);
    }
}
