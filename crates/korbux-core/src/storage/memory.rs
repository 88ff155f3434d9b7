use super::StorageAdapter;
use crate::error::StorageError;
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Ephemeral store for tests and short-lived sessions.
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> StorageError {
    StorageError::Backend("memory store lock poisoned".to_string())
}

impl StorageAdapter for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let map = self.entries.read().map_err(|_| poisoned())?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let mut map = self.entries.write().map_err(|_| poisoned())?;
        map.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn atomic_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.set(key, value)
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let map = self.entries.read().map_err(|_| poisoned())?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
