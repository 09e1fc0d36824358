use tracing::debug;

use crate::error::StoreResult;
use crate::kv::KeyValueStore;

pub const DEFAULT_TENANT: &str = "default";

pub const KEY_SETTINGS: &str = "settings";
pub const KEY_STUDENTS: &str = "students";
pub const KEY_ATTENDANCE: &str = "attendance";
pub const KEY_PERMISSIONS: &str = "permissions";
pub const KEY_SQLITE_BLOB: &str = "sqlite_blob";
pub const KEY_SQLITE_QUEUE: &str = "sqlite_queue";

/// Maps logical keys into one tenant's slice of the substrate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantKeys {
    tenant: String,
}

impl TenantKeys {
    pub fn new(tenant: &str) -> Self {
        let t = tenant.trim();
        Self {
            tenant: if t.is_empty() {
                DEFAULT_TENANT.to_string()
            } else {
                t.to_string()
            },
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn physical(&self, logical: &str) -> String {
        format!("{}:{}", self.tenant, logical)
    }

    /// Namespaced value, or the pre-namespace key written by older kiosks.
    pub fn read(&self, store: &dyn KeyValueStore, logical: &str) -> StoreResult<Option<Vec<u8>>> {
        if let Some(v) = store.get(&self.physical(logical))? {
            return Ok(Some(v));
        }
        let legacy = store.get(logical)?;
        if legacy.is_some() {
            debug!(tenant = %self.tenant, key = logical, "read fell back to legacy key");
        }
        Ok(legacy)
    }

    pub fn write(&self, store: &dyn KeyValueStore, logical: &str, value: &[u8]) -> StoreResult<()> {
        store.set(&self.physical(logical), value)
    }

    pub fn remove(&self, store: &dyn KeyValueStore, logical: &str) -> StoreResult<()> {
        store.remove(&self.physical(logical))
    }

    /// Drops the pre-namespace key once its contents have been adopted.
    pub fn remove_legacy(&self, store: &dyn KeyValueStore, logical: &str) -> StoreResult<()> {
        if store.get(logical)?.is_some() {
            debug!(tenant = %self.tenant, key = logical, "removing adopted legacy key");
            store.remove(logical)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[test]
    fn namespaced_key_shadows_legacy_key() {
        let store = MemoryStore::default();
        let keys = TenantKeys::new("school-a");
        store.set("students", b"legacy").expect("set legacy");
        assert_eq!(
            keys.read(&store, KEY_STUDENTS).expect("read"),
            Some(b"legacy".to_vec())
        );
        keys.write(&store, KEY_STUDENTS, b"current").expect("write");
        assert_eq!(
            keys.read(&store, KEY_STUDENTS).expect("read"),
            Some(b"current".to_vec())
        );
        assert_eq!(TenantKeys::new("  ").physical("x"), "default:x");
    }
}
