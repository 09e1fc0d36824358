//! Per-tenant persistence for the attendance kiosk.
//!
//! Two interchangeable backends implement [`StorageBackend`]: a flat
//! key-value backend and an embedded SQLite backend persisted as one blob.
//! Both speak the same [`Snapshot`] document for backup and migration.

pub mod backend;
pub mod backup;
pub mod config;
pub mod db;
pub mod error;
pub mod kv;
pub mod kv_backend;
pub mod legacy;
pub mod model;
pub mod queue;
pub mod settings;
pub mod snapshot;
pub mod sql_backend;
pub mod tenant;

pub use backend::{open_backend, BackendType, StorageBackend};
pub use error::{EngineFault, StoreError, StoreResult};
pub use kv::{DirStore, KeyValueStore, MemoryStore};
pub use kv_backend::KvBackend;
pub use model::{PermissionEntry, Student};
pub use settings::Settings;
pub use snapshot::Snapshot;
pub use sql_backend::SqlBackend;
