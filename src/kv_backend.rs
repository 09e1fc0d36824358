use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::backend::{range_bounds, BackendType, StorageBackend};
use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::model::{
    attendance_from_value, in_range, permission_for_write, permissions_from_value,
    require_day, require_student_id, require_time, sort_permissions, students_for_write,
    students_from_value, AttendanceMap, PermissionEntry, PermissionMap, Student,
};
use crate::settings::{self, Settings};
use crate::snapshot::Snapshot;
use crate::tenant::{TenantKeys, KEY_ATTENDANCE, KEY_PERMISSIONS, KEY_SETTINGS, KEY_STUDENTS};

/// Four JSON documents per tenant, last write wins.
pub struct KvBackend {
    store: Arc<dyn KeyValueStore>,
    keys: TenantKeys,
}

impl KvBackend {
    pub fn new(store: Arc<dyn KeyValueStore>, tenant: &str) -> Self {
        Self {
            store,
            keys: TenantKeys::new(tenant),
        }
    }

    fn read_json(&self, logical: &str) -> StoreResult<Value> {
        let Some(bytes) = self.keys.read(self.store.as_ref(), logical)? else {
            return Ok(Value::Null);
        };
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(v) => Ok(v),
            Err(e) => {
                warn!(
                    tenant = self.keys.tenant(),
                    key = logical,
                    error = %e,
                    "stored JSON is corrupt; using defaults"
                );
                Ok(Value::Null)
            }
        }
    }

    fn write_json<T: serde::Serialize>(&self, logical: &str, value: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Substrate(format!("failed to encode {logical}: {e}")))?;
        self.keys.write(self.store.as_ref(), logical, &bytes)?;
        debug!(tenant = self.keys.tenant(), key = logical, bytes = bytes.len(), "kv write");
        Ok(())
    }

    fn load_attendance(&self) -> StoreResult<AttendanceMap> {
        Ok(attendance_from_value(&self.read_json(KEY_ATTENDANCE)?))
    }

    fn load_permissions(&self) -> StoreResult<PermissionMap> {
        Ok(permissions_from_value(&self.read_json(KEY_PERMISSIONS)?))
    }
}

impl StorageBackend for KvBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Kv
    }

    fn tenant(&self) -> &str {
        self.keys.tenant()
    }

    fn get_students(&mut self) -> StoreResult<Vec<Student>> {
        Ok(students_from_value(&self.read_json(KEY_STUDENTS)?))
    }

    fn set_students(&mut self, students: &[Student]) -> StoreResult<()> {
        let rows = students_for_write(students)?;
        self.write_json(KEY_STUDENTS, &rows)
    }

    fn get_settings(&mut self) -> StoreResult<Settings> {
        Ok(settings::normalize(&self.read_json(KEY_SETTINGS)?))
    }

    fn set_settings(&mut self, patch: &Value) -> StoreResult<Settings> {
        if !patch.is_object() {
            return Err(StoreError::validation("settings patch must be an object"));
        }
        let next = self.get_settings()?.merged(patch);
        self.write_json(KEY_SETTINGS, &next)?;
        Ok(next)
    }

    fn get_attendance_day(&mut self, day: &str) -> StoreResult<BTreeMap<String, String>> {
        let day = require_day(day)?;
        Ok(self.load_attendance()?.remove(&day).unwrap_or_default())
    }

    fn set_attendance(&mut self, day: &str, student_id: &str, time: &str) -> StoreResult<()> {
        let day = require_day(day)?;
        let student_id = require_student_id(student_id)?;
        let time = require_time(time)?;
        let mut all = self.load_attendance()?;
        all.entry(day).or_default().insert(student_id, time);
        self.write_json(KEY_ATTENDANCE, &all)
    }

    fn delete_attendance(&mut self, day: &str, student_id: &str) -> StoreResult<()> {
        let day = require_day(day)?;
        let student_id = require_student_id(student_id)?;
        let mut all = self.load_attendance()?;
        let Some(rows) = all.get_mut(&day) else {
            return Ok(());
        };
        if rows.remove(&student_id).is_none() {
            return Ok(());
        }
        if rows.is_empty() {
            all.remove(&day);
        }
        self.write_json(KEY_ATTENDANCE, &all)
    }

    fn get_attendance_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<AttendanceMap> {
        let (start, end) = range_bounds(start, end)?;
        let mut all = self.load_attendance()?;
        all.retain(|day, _| in_range(day, start.as_deref(), end.as_deref()));
        Ok(all)
    }

    fn get_permissions_day(&mut self, day: &str) -> StoreResult<Vec<PermissionEntry>> {
        let day = require_day(day)?;
        Ok(self.load_permissions()?.remove(&day).unwrap_or_default())
    }

    fn add_permission(&mut self, entry: &Value) -> StoreResult<PermissionEntry> {
        let entry = permission_for_write(entry)?;
        let mut all = self.load_permissions()?;
        let bucket = all.entry(entry.day()).or_default();
        bucket.push(entry.clone());
        sort_permissions(bucket);
        self.write_json(KEY_PERMISSIONS, &all)?;
        Ok(entry)
    }

    fn get_permissions_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<PermissionMap> {
        let (start, end) = range_bounds(start, end)?;
        let mut all = self.load_permissions()?;
        all.retain(|day, _| in_range(day, start.as_deref(), end.as_deref()));
        Ok(all)
    }

    fn export_snapshot(&mut self) -> StoreResult<Snapshot> {
        Ok(Snapshot::new(
            BackendType::Kv,
            self.get_students()?,
            self.get_settings()?,
            self.load_attendance()?,
            self.load_permissions()?,
        ))
    }

    fn import_snapshot(&mut self, doc: &Value) -> StoreResult<()> {
        // Normalize everything before the first write.
        let snap = Snapshot::from_value(doc)?;
        self.write_json(KEY_STUDENTS, &snap.students)?;
        self.write_json(KEY_SETTINGS, &snap.settings)?;
        self.write_json(KEY_ATTENDANCE, &snap.attendance)?;
        self.write_json(KEY_PERMISSIONS, &snap.permissions)?;
        info!(
            tenant = self.keys.tenant(),
            students = snap.students.len(),
            days = snap.attendance.len(),
            "imported snapshot into kv backend"
        );
        Ok(())
    }
}
