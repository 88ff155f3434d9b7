//! One file per key under a directory. Atomic writes go through a temp file and rename.

use super::StorageAdapter;
use crate::error::StorageError;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const TEMP_SUFFIX: &str = ".tmp";

pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let root = path.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }
}

/// Anything outside `[A-Za-z0-9_-]` becomes `%XX`, so encoded names never contain `.`.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-') {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

/// Makes a completed rename durable. Directories cannot be opened for sync on Windows.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

impl StorageAdapter for FileStorage {
    fn name(&self) -> &str {
        "file"
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn atomic_set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let final_path = self.path_for(key);
        let temp_path = self.root.join(format!(
            "{}.{}{}",
            encode_key(key),
            uuid::Uuid::new_v4().simple(),
            TEMP_SUFFIX
        ));

        let write = || -> std::io::Result<()> {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(value)?;
            file.sync_all()?;
            fs::rename(&temp_path, &final_path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }
        sync_dir(&self.root)?;
        Ok(())
    }

    fn supports_atomic(&self) -> bool {
        true
    }

    fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            if let Some(key) = decode_key(name) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        Ok(keys)
    }
}
