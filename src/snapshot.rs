//! Backend-agnostic snapshot document.
//!
//! The same document is produced by both backends and accepted by both, which
//! is what makes backups portable and lets a tenant switch backends.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::backend::{BackendType, StorageBackend};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    attendance_from_value, now_timestamp, permissions_from_value, students_from_value,
    AttendanceMap, PermissionMap, Student,
};
use crate::settings::{self, Settings};

pub const SNAPSHOT_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u64,
    pub generated_at: String,
    pub backend_type: BackendType,
    pub students: Vec<Student>,
    pub settings: Settings,
    pub attendance: AttendanceMap,
    pub permissions: PermissionMap,
}

impl Snapshot {
    pub fn new(
        backend_type: BackendType,
        students: Vec<Student>,
        settings: Settings,
        attendance: AttendanceMap,
        permissions: PermissionMap,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            generated_at: now_timestamp(),
            backend_type,
            students,
            settings,
            attendance,
            permissions,
        }
    }

    /// Parse and normalize a document. Malformed rows are dropped one by one;
    /// only a non-object document or a foreign version fails the whole import.
    pub fn from_value(doc: &Value) -> StoreResult<Self> {
        let o = doc
            .as_object()
            .ok_or_else(|| StoreError::validation("snapshot must be a JSON object"))?;

        let version = match o.get("version") {
            None | Some(Value::Null) => SNAPSHOT_VERSION,
            Some(v) => v.as_u64().ok_or_else(|| {
                StoreError::validation(format!("snapshot version must be an integer: {v}"))
            })?,
        };
        if version != SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                expected: SNAPSHOT_VERSION,
            });
        }

        let backend_type = o
            .get("backendType")
            .and_then(|v| v.as_str())
            .and_then(BackendType::parse)
            .unwrap_or(BackendType::Kv);
        let generated_at = o
            .get("generatedAt")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(now_timestamp);

        let null = Value::Null;
        Ok(Self {
            version,
            generated_at,
            backend_type,
            students: students_from_value(o.get("students").unwrap_or(&null)),
            settings: settings::normalize(o.get("settings").unwrap_or(&null)),
            attendance: attendance_from_value(o.get("attendance").unwrap_or(&null)),
            permissions: permissions_from_value(o.get("permissions").unwrap_or(&null)),
        })
    }

    pub fn to_value(&self) -> StoreResult<Value> {
        serde_json::to_value(self)
            .map_err(|e| StoreError::Substrate(format!("failed to encode snapshot: {e}")))
    }

    /// True when both documents carry the same dataset, ignoring envelope fields.
    pub fn same_data(&self, other: &Snapshot) -> bool {
        self.students == other.students
            && self.settings == other.settings
            && self.attendance == other.attendance
            && self.permissions == other.permissions
    }
}

/// Copy the full dataset of `src` into `dst`, replacing whatever `dst` held.
pub fn transfer(src: &mut dyn StorageBackend, dst: &mut dyn StorageBackend) -> StoreResult<Snapshot> {
    let snapshot = src.export_snapshot()?;
    dst.import_snapshot(&snapshot.to_value()?)?;
    info!(
        tenant = src.tenant(),
        from = src.backend_type().as_str(),
        to = dst.backend_type().as_str(),
        students = snapshot.students.len(),
        "transferred dataset between backends"
    );
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejects_foreign_versions() {
        let err = Snapshot::from_value(&json!({ "version": 2 })).expect_err("version 2");
        assert!(matches!(err, StoreError::UnsupportedVersion { found: 2, .. }));
    }

    #[test]
    fn drops_malformed_rows_independently() {
        let snap = Snapshot::from_value(&json!({
            "version": 1,
            "students": [{ "id": "S1", "name": "A" }, { "name": "nameless" }, 7],
            "settings": "garbage",
            "attendance": { "2024-01-01": { "S1": "07:00:00", "S2": "late" }, "bad-day": { "S1": "08:00:00" } },
            "permissions": { "x": [{ "studentId": "S1", "createdAt": "2024-01-01T08:00:00Z" }, { "studentId": "" }] }
        }))
        .expect("parse");
        assert_eq!(snap.students.len(), 1);
        assert_eq!(snap.settings, Settings::default());
        assert_eq!(snap.attendance.len(), 1);
        assert_eq!(snap.attendance["2024-01-01"].len(), 1);
        assert_eq!(snap.permissions["2024-01-01"].len(), 1);
    }
}
