//! JSON file storage for the local tier.
//!
//! Each collection lives in its own file under the data directory:
//!
//! ```text
//! data/
//! ├── schools.json
//! ├── accounts.json
//! ├── students.json
//! ├── fees.json
//! ├── installments.json
//! ├── messages.json
//! └── settings_{school_id}.json
//! ```
//!
//! Writes are atomic (temp file + rename). Every collection key has its
//! own mutex; `LocalStore` holds that lock across each read-modify-write
//! so two threads cannot tear one collection.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::errors::StoreError;

pub struct JsonConnection {
    base_directory: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl JsonConnection {
    /// Open (creating if needed) a data directory.
    pub fn new<P: AsRef<Path>>(base_directory: P) -> Result<Self, StoreError> {
        let base_directory = base_directory.as_ref().to_path_buf();
        if !base_directory.exists() {
            fs::create_dir_all(&base_directory)?;
            info!("Created data directory: {:?}", base_directory);
        }
        Ok(Self {
            base_directory,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    fn collection_path(&self, key: &str) -> PathBuf {
        self.base_directory.join(format!("{key}.json"))
    }

    /// Mutex guarding the named collection. Callers hold it across a
    /// read-modify-write to keep the rewrite atomic from their view.
    pub fn collection_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Read a collection, degrading to the default value when the file is
    /// missing or unreadable. A corrupt file is logged and treated as
    /// empty rather than failing the caller's read.
    pub fn read<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let path = self.collection_path(key);
        if !path.exists() {
            return T::default();
        }
        match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Error parsing collection {key}: {e}");
                    T::default()
                }
            },
            Err(e) => {
                warn!("Error reading collection {key}: {e}");
                T::default()
            }
        }
    }

    /// Read a collection that may be absent, without defaulting.
    pub fn read_optional<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.collection_path(key);
        if !path.exists() {
            return None;
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) => {
                warn!("Error reading collection {key}: {e}");
                return None;
            }
        };
        match serde_json::from_str(&content) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Error parsing collection {key}: {e}");
                None
            }
        }
    }

    /// Atomically replace a collection file.
    pub fn write<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let path = self.collection_path(key);
        let content = serde_json::to_string_pretty(value)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        fs::rename(&temp_path, &path)?;
        debug!("Wrote collection {key}");
        Ok(())
    }

    /// Remove a collection file. Missing files are a no-op.
    pub fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.collection_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
            debug!("Removed collection {key}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (JsonConnection, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let conn = JsonConnection::new(temp_dir.path()).unwrap();
        (conn, temp_dir)
    }

    #[test]
    fn missing_collection_reads_as_empty() {
        let (conn, _dir) = setup();
        let values: Vec<String> = conn.read("students");
        assert!(values.is_empty());
        assert!(conn.read_optional::<Vec<String>>("students").is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let (conn, _dir) = setup();
        conn.write("students", &vec!["a".to_string(), "b".to_string()])
            .unwrap();
        let values: Vec<String> = conn.read("students");
        assert_eq!(values, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn corrupt_file_degrades_to_default() {
        let (conn, dir) = setup();
        std::fs::write(dir.path().join("fees.json"), "{not json").unwrap();
        let values: Vec<String> = conn.read("fees");
        assert!(values.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let (conn, _dir) = setup();
        conn.write("messages", &vec!["m".to_string()]).unwrap();
        conn.remove("messages").unwrap();
        conn.remove("messages").unwrap();
        let values: Vec<String> = conn.read("messages");
        assert!(values.is_empty());
    }

    #[test]
    fn collection_locks_are_per_key() {
        let (conn, _dir) = setup();
        let a = conn.collection_lock("students");
        let b = conn.collection_lock("fees");
        let _guard = a.lock().unwrap();
        // A different collection's lock stays available.
        assert!(b.try_lock().is_ok());
    }
}
