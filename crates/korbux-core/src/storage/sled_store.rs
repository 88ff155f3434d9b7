//! Sled-backed durable store. All engine keys live in one tree.

use super::StorageAdapter;
use crate::error::StorageError;
use sled::Db;
use std::path::Path;

const TREE_NAME: &str = "korbux_records";

pub struct SledStorage {
    db: Db,
    tree: sled::Tree,
}

impl SledStorage {
    /// Opens or creates the store at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self { db, tree })
    }

    /// Number of entries in the store.
    pub fn count(&self) -> usize {
        self.tree.len()
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }
}

impl StorageAdapter for SledStorage {
    fn name(&self) -> &str {
        "sled"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let v = self.tree.get(key.as_bytes())?;
        Ok(v.map(|iv| iv.to_vec()))
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let prev = self.tree.insert(key.as_bytes(), value)?;
        tracing::trace!(
            target: "korbux::storage",
            key,
            bytes = value.len(),
            action = if prev.is_some() { "UPDATE" } else { "INSERT" },
            "sled write"
        );
        Ok(())
    }

    /// Sled applies a single-key insert atomically; flushing makes it survive a crash.
    fn atomic_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.set(key, value)?;
        self.tree.flush()?;
        Ok(())
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let keys: Vec<String> = self
            .tree
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .filter_map(|k| String::from_utf8(k.to_vec()).ok())
            .collect();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let s = SledStorage::open_path(dir.path()).unwrap();
            s.atomic_set("resp:1", b"{}").unwrap();
            s.set("korbux:audit:a_2026-01:e1", b"{}").unwrap();
            s.flush().unwrap();
        }
        let s = SledStorage::open_path(dir.path()).unwrap();
        assert_eq!(s.get("resp:1").unwrap().as_deref(), Some(&b"{}"[..]));
        assert_eq!(s.list_keys("korbux:audit:").unwrap().len(), 1);
        assert_eq!(s.count(), 2);
    }
}
