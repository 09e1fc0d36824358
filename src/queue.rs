//! Durable queue of SQL writes that failed and must be replayed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::model::{PermissionEntry, Student};
use crate::snapshot::Snapshot;
use crate::tenant::{TenantKeys, KEY_SQLITE_QUEUE};

/// A mutating call captured as `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Operation {
    SetStudents(Vec<Student>),
    /// The caller's patch; merged over the stored record when applied.
    SetSettings(Value),
    #[serde(rename_all = "camelCase")]
    SetAttendance {
        day: String,
        student_id: String,
        time: String,
    },
    #[serde(rename_all = "camelCase")]
    DeleteAttendance { day: String, student_id: String },
    AddPermission(PermissionEntry),
    ImportSnapshot(Box<Snapshot>),
}

impl Operation {
    pub fn kind(&self) -> &'static str {
        match self {
            Operation::SetStudents(_) => "setStudents",
            Operation::SetSettings(_) => "setSettings",
            Operation::SetAttendance { .. } => "setAttendance",
            Operation::DeleteAttendance { .. } => "deleteAttendance",
            Operation::AddPermission(_) => "addPermission",
            Operation::ImportSnapshot(_) => "importSnapshot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: String,
    pub queued_at: String,
    pub error: String,
    #[serde(flatten)]
    pub op: Operation,
}

/// Per-tenant queue stored as one JSON array in the substrate.
pub struct OperationQueue {
    store: Arc<dyn KeyValueStore>,
    keys: TenantKeys,
}

impl OperationQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, keys: TenantKeys) -> Self {
        Self { store, keys }
    }

    /// Unreadable entries are dropped with a warning rather than blocking the rest.
    pub fn load(&self) -> StoreResult<Vec<QueuedOperation>> {
        let Some(bytes) = self.keys.read(self.store.as_ref(), KEY_SQLITE_QUEUE)? else {
            return Ok(Vec::new());
        };
        let raw: Vec<Value> = match serde_json::from_slice(&bytes) {
            Ok(v) => v,
            Err(e) => {
                warn!(tenant = self.keys.tenant(), error = %e, "operation queue is corrupt; ignoring it");
                return Ok(Vec::new());
            }
        };
        let mut out = Vec::with_capacity(raw.len());
        for v in raw {
            match serde_json::from_value::<QueuedOperation>(v) {
                Ok(q) => out.push(q),
                Err(e) => warn!(tenant = self.keys.tenant(), error = %e, "dropping unreadable queued operation"),
            }
        }
        Ok(out)
    }

    /// Any entries read from the legacy key are part of `ops` by now, so the
    /// legacy key goes too; otherwise an empty queue would read it back.
    pub fn save(&self, ops: &[QueuedOperation]) -> StoreResult<()> {
        if ops.is_empty() {
            self.keys.remove(self.store.as_ref(), KEY_SQLITE_QUEUE)?;
        } else {
            let bytes = serde_json::to_vec(ops)
                .map_err(|e| StoreError::Substrate(format!("failed to encode operation queue: {e}")))?;
            self.keys.write(self.store.as_ref(), KEY_SQLITE_QUEUE, &bytes)?;
        }
        self.keys.remove_legacy(self.store.as_ref(), KEY_SQLITE_QUEUE)
    }

    pub fn push(&self, op: Operation, error: &str) -> StoreResult<QueuedOperation> {
        let mut ops = self.load()?;
        let queued = QueuedOperation {
            id: uuid::Uuid::new_v4().to_string(),
            queued_at: crate::model::now_timestamp(),
            error: error.to_string(),
            op,
        };
        ops.push(queued.clone());
        self.save(&ops)?;
        Ok(queued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn descriptor_wire_shape_is_type_and_payload() {
        let op = Operation::SetAttendance {
            day: "2024-01-01".into(),
            student_id: "S1".into(),
            time: "07:05:00".into(),
        };
        let v = serde_json::to_value(&op).expect("encode");
        assert_eq!(
            v,
            json!({ "type": "setAttendance", "payload": { "day": "2024-01-01", "studentId": "S1", "time": "07:05:00" } })
        );
        let back: Operation = serde_json::from_value(v).expect("decode");
        assert_eq!(back, op);
    }
}
