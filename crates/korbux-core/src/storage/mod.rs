//! Key/value persistence contract and its backends.
//!
//! | Backend         | Durable | `atomic_set`                   | `list_keys` |
//! |-----------------|---------|--------------------------------|-------------|
//! | `MemoryStorage` | no      | single locked insert           | yes         |
//! | `SledStorage`   | yes     | insert + flush                 | yes         |
//! | `FileStorage`   | yes     | temp file + fsync + rename     | yes         |

mod file;
mod memory;
mod sled_store;

pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use sled_store::SledStorage;

use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub trait StorageAdapter: Send + Sync {
    /// Backend name for logs and health reports.
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Once this returns `Ok`, a crash never exposes a partially written value for `key`.
    /// Backends without such a guarantee inherit the plain `set`.
    fn atomic_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.set(key, value)
    }

    fn supports_atomic(&self) -> bool {
        false
    }

    /// All keys starting with `prefix` at call time, in no particular order.
    fn list_keys(&self, _prefix: &str) -> Result<Vec<String>, StorageError> {
        Err(StorageError::Unsupported {
            backend: self.name().to_string(),
            capability: "list_keys",
        })
    }
}

/// JSON helpers over any [`StorageAdapter`].
pub trait StorageExt: StorageAdapter {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    fn atomic_set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        self.atomic_set(key, &serde_json::to_vec(value)?)
    }

    /// Atomic write, falling back to a plain write if the atomic path fails.
    fn best_effort_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        match self.atomic_set(key, value) {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::debug!(
                    target: "korbux::storage",
                    backend = self.name(),
                    key,
                    error = %e,
                    "atomic write failed, retrying with plain write"
                );
                self.set(key, value)
            }
        }
    }
}

impl<S: StorageAdapter + ?Sized> StorageExt for S {}

#[cfg(test)]
mod tests {
    use super::*;

    struct GetSetOnly(MemoryStorage);

    impl StorageAdapter for GetSetOnly {
        fn name(&self) -> &str {
            "get-set-only"
        }
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.0.get(key)
        }
        fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            self.0.set(key, value)
        }
    }

    #[test]
    fn test_optional_capabilities_default() {
        let s = GetSetOnly(MemoryStorage::new());
        assert!(!s.supports_atomic());
        s.atomic_set("k", b"v").unwrap();
        assert_eq!(s.get("k").unwrap().as_deref(), Some(&b"v"[..]));
        assert!(matches!(
            s.list_keys(""),
            Err(StorageError::Unsupported { capability: "list_keys", .. })
        ));
    }

    #[test]
    fn test_json_helpers() {
        let s = MemoryStorage::new();
        s.set_json("n", &serde_json::json!({"a": 1})).unwrap();
        let v: serde_json::Value = s.get_json("n").unwrap().unwrap();
        assert_eq!(v["a"], 1);
        assert!(s.get_json::<serde_json::Value>("missing").unwrap().is_none());
    }
}
