//! File-backed key/value store.
//!
//! Each key is one JSON file under the data directory (`~/.zzwarak/data`).

use crate::store::{KeyValueStore, StoreError};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub struct FileStore {
    /// Directory holding one `<key>.json` per record
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Io {
            key: dir.to_string_lossy().into_owned(),
            source,
        })?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Sanitize the key to prevent path traversal
        let safe_key = key.replace(['/', '\\'], "_").replace("..", "_");
        self.dir.join(format!("{}.json", safe_key))
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        key: key.to_string(),
        source,
    }
}

impl KeyValueStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    fn save(&self, key: &str, blob: &str) -> Result<(), StoreError> {
        // Readers only ever see a complete record.
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, blob).map_err(io_err(key))?;
        fs::rename(&tmp, &path).map_err(io_err(key))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }
}
