//! Key-value substrate the backends persist into.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{StoreError, StoreResult};

/// Single-key atomic get/set. No cross-key transactions.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()>;
    fn remove(&self, key: &str) -> StoreResult<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    fn lock(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| StoreError::Substrate("memory store lock poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.lock()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// One file per key under a directory; writes go through a temp file + rename.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn open(root: &Path) -> StoreResult<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            StoreError::Substrate(format!(
                "failed to create store directory {}: {e}",
                root.to_string_lossy()
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(encode_key(key))
    }
}

/// Keep `[A-Za-z0-9._-]`, percent-encode every other byte.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

impl KeyValueStore for DirStore {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match std::fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Substrate(format!("failed to read {key}: {e}"))),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> StoreResult<()> {
        let dst = self.path_for(key);
        let tmp = self.root.join(format!("{}.writing", encode_key(key)));
        std::fs::write(&tmp, value)
            .map_err(|e| StoreError::Substrate(format!("failed to write {key}: {e}")))?;
        std::fs::rename(&tmp, &dst)
            .map_err(|e| StoreError::Substrate(format!("failed to move {key} into place: {e}")))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Substrate(format!("failed to remove {key}: {e}"))),
        }
    }
}
