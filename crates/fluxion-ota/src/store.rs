// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of FluxION.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Durable key-value storage

use crate::error::StorageError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum StoredValue {
    U8(u8),
    U32(u32),
    Str(String),
}

/// Each `set` is committed before it returns
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError>;
    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError>;
}

/// All keys in one JSON file, rewritten atomically on every `set`
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let entries = if path.exists() {
            let content = fs::read_to_string(path)?;
            serde_json::from_str(&content)
                .map_err(|e| StorageError::Corrupt(format!("{}: {e}", path.display())))?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            entries: Mutex::new(entries),
        })
    }

    fn save(&self, entries: &BTreeMap<String, StoredValue>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.path.with_extension("tmp");
        let content = serde_json::to_string_pretty(entries)
            .map_err(|e| StorageError::Corrupt(e.to_string()))?;

        // Atomic write; the data is on disk before the rename makes it visible
        let mut file = File::create(&temp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        let mut next = entries.clone();
        next.insert(key.to_owned(), value);
        self.save(&next)?;
        *entries = next;
        Ok(())
    }
}

/// Volatile store for tests and diskless runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<StoredValue>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: StoredValue) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_owned(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_diag.json");

        {
            let store = FileStore::open(&path).unwrap();
            store.set("boot_count", StoredValue::U32(7)).unwrap();
            store
                .set("installed_ver", StoredValue::Str("1.2.3".to_owned()))
                .unwrap();
        }

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("boot_count").unwrap(), Some(StoredValue::U32(7)));
        assert_eq!(
            store.get("installed_ver").unwrap(),
            Some(StoredValue::Str("1.2.3".to_owned()))
        );
        assert_eq!(store.get("missing").unwrap(), None);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_file_store_overwrites_value() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(&dir.path().join("kv.json")).unwrap();

        store.set("last_status", StoredValue::U8(1)).unwrap();
        store.set("last_status", StoredValue::U8(3)).unwrap();
        assert_eq!(store.get("last_status").unwrap(), Some(StoredValue::U8(3)));
    }

    #[test]
    fn test_stale_temp_file_from_interrupted_write() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ota_diag.json");
        {
            let store = FileStore::open(&path).unwrap();
            store.set("boot_count", StoredValue::U32(3)).unwrap();
        }
        // Power lost mid-write: an empty temp file next to the committed one
        File::create(path.with_extension("tmp")).unwrap();

        let store = FileStore::open(&path).unwrap();
        assert_eq!(store.get("boot_count").unwrap(), Some(StoredValue::U32(3)));

        store.set("boot_count", StoredValue::U32(4)).unwrap();
        assert!(!path.with_extension("tmp").exists());
        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get("boot_count").unwrap(), Some(StoredValue::U32(4)));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("kv.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            FileStore::open(&path),
            Err(StorageError::Corrupt(_))
        ));
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);
        store.set("k", StoredValue::U8(1)).unwrap();
        assert_eq!(store.get("k").unwrap(), Some(StoredValue::U8(1)));
    }
}
