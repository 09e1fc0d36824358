use std::path::PathBuf;
use std::sync::Arc;

use kioskstore::{
    open_backend, BackendType, DirStore, KeyValueStore, MemoryStore, StorageBackend, StoreResult,
};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct OpenStore {
    /// `None` when the substrate is in memory.
    pub data_dir: Option<PathBuf>,
    pub substrate: Arc<dyn KeyValueStore>,
    pub backend: Box<dyn StorageBackend>,
}

pub struct AppState {
    pub store: Option<OpenStore>,
}

impl OpenStore {
    pub fn open(
        data_dir: Option<PathBuf>,
        tenant: &str,
        kind: BackendType,
    ) -> StoreResult<OpenStore> {
        let substrate: Arc<dyn KeyValueStore> = match &data_dir {
            Some(dir) => Arc::new(DirStore::open(dir)?),
            None => Arc::new(MemoryStore::default()),
        };
        let backend = open_backend(substrate.clone(), tenant, kind);
        Ok(OpenStore {
            data_dir,
            substrate,
            backend,
        })
    }
}
