use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::kv_backend::KvBackend;
use crate::model::{parse_day, AttendanceMap, PermissionEntry, PermissionMap, Student};
use crate::settings::Settings;
use crate::snapshot::Snapshot;
use crate::sql_backend::SqlBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    Kv,
    Sql,
}

impl BackendType {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kv" | "keyvalue" | "key-value" | "localstorage" => Some(Self::Kv),
            "sql" | "sqlite" | "sqljs" => Some(Self::Sql),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kv => "kv",
            Self::Sql => "sql",
        }
    }
}

/// Operation set every backend exposes to the kiosk and admin layers.
///
/// Reads self-heal: corrupt stored data comes back as normalized defaults.
/// Writes validate their required fields and return `StoreError::Validation`
/// before touching storage.
pub trait StorageBackend: Send {
    fn backend_type(&self) -> BackendType;
    fn tenant(&self) -> &str;

    fn get_students(&mut self) -> StoreResult<Vec<Student>>;
    /// Bulk replace of the whole roster.
    fn set_students(&mut self, students: &[Student]) -> StoreResult<()>;

    fn get_settings(&mut self) -> StoreResult<Settings>;
    /// Merge `patch` over the stored record; returns the normalized result.
    fn set_settings(&mut self, patch: &Value) -> StoreResult<Settings>;

    fn get_attendance_day(&mut self, day: &str) -> StoreResult<BTreeMap<String, String>>;
    fn set_attendance(&mut self, day: &str, student_id: &str, time: &str) -> StoreResult<()>;
    fn delete_attendance(&mut self, day: &str, student_id: &str) -> StoreResult<()>;
    fn get_attendance_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<AttendanceMap>;

    fn get_permissions_day(&mut self, day: &str) -> StoreResult<Vec<PermissionEntry>>;
    fn add_permission(&mut self, entry: &Value) -> StoreResult<PermissionEntry>;
    fn get_permissions_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<PermissionMap>;

    fn export_snapshot(&mut self) -> StoreResult<Snapshot>;
    /// Replace the entire dataset with `doc`.
    fn import_snapshot(&mut self, doc: &Value) -> StoreResult<()>;

    /// Raw database access, only offered by the SQL backend.
    fn as_sql(&mut self) -> Option<&mut SqlBackend> {
        None
    }
}

/// Validate optional range bounds into canonical day strings.
pub fn range_bounds(
    start: Option<&str>,
    end: Option<&str>,
) -> StoreResult<(Option<String>, Option<String>)> {
    let one = |v: Option<&str>, label: &str| -> StoreResult<Option<String>> {
        match v.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(None),
            Some(s) => parse_day(s)
                .map(Some)
                .ok_or_else(|| StoreError::validation(format!("{label} must be YYYY-MM-DD: {s}"))),
        }
    };
    Ok((one(start, "startDay")?, one(end, "endDay")?))
}

/// Construct the backend of the requested kind over `store`.
pub fn open_backend(
    store: Arc<dyn KeyValueStore>,
    tenant: &str,
    kind: BackendType,
) -> Box<dyn StorageBackend> {
    match kind {
        BackendType::Kv => Box::new(KvBackend::new(store, tenant)),
        BackendType::Sql => Box::new(SqlBackend::new(store, tenant)),
    }
}
