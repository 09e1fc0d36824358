//! Embedded SQLite backend persisted as one blob in the key-value substrate.
//!
//! Every write runs in a transaction, then the whole database is serialized
//! and stored under the tenant's blob key. A write that fails on the engine
//! side is captured as an [`Operation`] and appended to the tenant's queue
//! before the error is returned; [`SqlBackend::replay_queue`] drains it.

use rusqlite::{params, Connection, Transaction};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::backend::{range_bounds, BackendType, StorageBackend};
use crate::db;
use crate::error::{EngineFault, StoreError, StoreResult};
use crate::kv::KeyValueStore;
use crate::legacy::{self, SchemaShape};
use crate::model::{
    parse_day, parse_time, permission_for_write, permission_from_value, require_day,
    require_student_id, require_time, students_for_write, students_from_value, AttendanceMap,
    PermissionEntry, PermissionMap, Student,
};
use crate::queue::{Operation, OperationQueue, QueuedOperation};
use crate::settings::{self, Settings};
use crate::snapshot::Snapshot;
use crate::tenant::{TenantKeys, KEY_SQLITE_BLOB};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub applied: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "schema")]
pub enum BinaryImport {
    Current,
    #[serde(rename_all = "camelCase")]
    Legacy {
        students: usize,
        attendance_days: usize,
        permissions: usize,
    },
}

pub struct SqlBackend {
    store: Arc<dyn KeyValueStore>,
    keys: TenantKeys,
    queue: OperationQueue,
    conn: Option<Connection>,
}

impl SqlBackend {
    /// Nothing is loaded until the first call touches the database.
    pub fn new(store: Arc<dyn KeyValueStore>, tenant: &str) -> Self {
        let keys = TenantKeys::new(tenant);
        Self {
            queue: OperationQueue::new(store.clone(), keys.clone()),
            store,
            keys,
            conn: None,
        }
    }

    fn load_connection(&self) -> Result<Connection, EngineFault> {
        let blob = self
            .keys
            .read(self.store.as_ref(), KEY_SQLITE_BLOB)
            .map_err(|e| EngineFault(format!("failed to read database blob: {e}")))?;
        match blob {
            Some(bytes) => {
                let conn = db::deserialize(&bytes)?;
                db::apply_schema(&conn)?;
                debug!(tenant = self.keys.tenant(), bytes = bytes.len(), "loaded database blob");
                Ok(conn)
            }
            None => {
                debug!(tenant = self.keys.tenant(), "no database blob; starting fresh");
                db::open_fresh()
            }
        }
    }

    fn connection(&mut self) -> Result<&mut Connection, EngineFault> {
        if self.conn.is_none() {
            self.conn = Some(self.load_connection()?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| EngineFault("database connection unavailable".into()))
    }

    fn persist(&mut self) -> Result<(), EngineFault> {
        let serialized = match self.conn.as_ref() {
            Some(conn) => db::serialize(conn),
            None => Err(EngineFault("database connection unavailable".into())),
        };
        let result = serialized.and_then(|bytes| {
            self.keys
                .write(self.store.as_ref(), KEY_SQLITE_BLOB, &bytes)
                .map_err(|e| EngineFault(format!("failed to persist database blob: {e}")))
        });
        if result.is_err() {
            // The committed state never reached the substrate; forget it.
            self.conn = None;
        }
        result
    }

    /// The transactional write path: commit then persist, or fail as a whole.
    fn run(&mut self, op: &Operation) -> Result<(), EngineFault> {
        let conn = self.connection()?;
        let tx = conn.transaction()?;
        apply_operation(&tx, op)?;
        tx.commit()?;
        self.persist()
    }

    fn write(&mut self, op: Operation) -> StoreResult<()> {
        match self.run(&op) {
            Ok(()) => Ok(()),
            Err(fault) => {
                warn!(
                    tenant = self.keys.tenant(),
                    op = op.kind(),
                    error = %fault,
                    "write failed; queued for replay"
                );
                if let Err(e) = self.queue.push(op, &fault.0) {
                    error!(tenant = self.keys.tenant(), error = %e, "failed to queue operation");
                    return Err(e);
                }
                Err(StoreError::EngineFault(fault))
            }
        }
    }

    /// Self-healing read: engine faults come back as `T::default()`.
    fn read<T: Default>(
        &mut self,
        what: &str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> T {
        let result = match self.connection() {
            Ok(conn) => f(&*conn).map_err(EngineFault::from),
            Err(e) => Err(e),
        };
        result.unwrap_or_else(|e| {
            warn!(tenant = self.keys.tenant(), read = what, error = %e, "read failed; using defaults");
            T::default()
        })
    }

    pub fn pending_operations(&self) -> StoreResult<Vec<QueuedOperation>> {
        self.queue.load()
    }

    /// Replay queued writes in FIFO order. Failures stay queued in order.
    pub fn replay_queue(&mut self) -> StoreResult<ReplayReport> {
        let pending = self.queue.load()?;
        if pending.is_empty() {
            return Ok(ReplayReport::default());
        }
        let mut applied = 0;
        let mut remaining: Vec<QueuedOperation> = Vec::new();
        for mut queued in pending {
            match self.run(&queued.op) {
                Ok(()) => applied += 1,
                Err(fault) => {
                    debug!(id = %queued.id, op = queued.op.kind(), error = %fault, "replay still failing");
                    queued.error = fault.0;
                    remaining.push(queued);
                }
            }
        }
        self.queue.save(&remaining)?;
        info!(
            tenant = self.keys.tenant(),
            applied,
            remaining = remaining.len(),
            "replayed operation queue"
        );
        Ok(ReplayReport {
            applied,
            remaining: remaining.len(),
        })
    }

    pub fn export_database_binary(&mut self) -> StoreResult<Vec<u8>> {
        let conn = self.connection()?;
        Ok(db::serialize(conn)?)
    }

    /// Replace the database with `bytes`, migrating legacy layouts first.
    /// Nothing in memory or in the substrate changes unless this returns `Ok`.
    pub fn import_database_binary(&mut self, bytes: &[u8]) -> StoreResult<BinaryImport> {
        if !db::has_signature(bytes) {
            return Err(StoreError::InvalidFormat(
                "bytes do not start with the sqlite format signature".into(),
            ));
        }
        let candidate =
            db::deserialize(bytes).map_err(|e| StoreError::InvalidFormat(e.to_string()))?;
        let shape = SchemaShape::detect(&candidate)
            .map_err(|e| StoreError::InvalidFormat(format!("failed to inspect schema: {e}")))?;

        let (conn, outcome) = match shape {
            SchemaShape::Current => {
                db::apply_schema(&candidate).map_err(|e| {
                    StoreError::InvalidFormat(format!("failed to upgrade schema: {e}"))
                })?;
                (candidate, BinaryImport::Current)
            }
            SchemaShape::Legacy(layout) => {
                let snap = legacy::extract(&candidate, &layout)?;
                drop(candidate);
                let mut fresh = db::open_fresh()
                    .map_err(|e| StoreError::Migration(format!("failed to create database: {e}")))?;
                import_into(&mut fresh, &snap)
                    .map_err(|e| StoreError::Migration(format!("failed to import derived data: {e}")))?;
                let outcome = BinaryImport::Legacy {
                    students: snap.students.len(),
                    attendance_days: snap.attendance.len(),
                    permissions: snap.permissions.values().map(Vec::len).sum(),
                };
                (fresh, outcome)
            }
        };

        let serialized = db::serialize(&conn)?;
        self.keys
            .write(self.store.as_ref(), KEY_SQLITE_BLOB, &serialized)?;
        self.conn = Some(conn);
        info!(tenant = self.keys.tenant(), outcome = ?outcome, "imported database binary");
        Ok(outcome)
    }

    fn query_attendance(
        conn: &Connection,
        start: Option<&str>,
        end: Option<&str>,
    ) -> rusqlite::Result<AttendanceMap> {
        let mut stmt = conn.prepare(
            "SELECT day, student_id, time FROM attendance
             WHERE (?1 IS NULL OR day >= ?1) AND (?2 IS NULL OR day <= ?2)
             ORDER BY day, student_id",
        )?;
        let rows = stmt
            .query_map(params![start, end], |r| {
                Ok((
                    r.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    r.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    r.get::<_, Option<String>>(2)?.unwrap_or_default(),
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = AttendanceMap::new();
        for (day, sid, time) in rows {
            let (Some(day), Some(time)) = (parse_day(&day), parse_time(&time)) else {
                continue;
            };
            if sid.is_empty() {
                continue;
            }
            out.entry(day).or_default().insert(sid, time);
        }
        Ok(out)
    }

    fn query_permissions(
        conn: &Connection,
        start: Option<&str>,
        end: Option<&str>,
    ) -> rusqlite::Result<PermissionMap> {
        let mut stmt = conn.prepare(
            "SELECT student_id, created_at, reason, note, status FROM permissions
             WHERE (?1 IS NULL OR date(created_at) >= ?1) AND (?2 IS NULL OR date(created_at) <= ?2)
             ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map(params![start, end], |r| {
                Ok(serde_json::json!({
                    "studentId": r.get::<_, Option<String>>(0)?,
                    "createdAt": r.get::<_, Option<String>>(1)?,
                    "reason": r.get::<_, Option<String>>(2)?,
                    "note": r.get::<_, Option<String>>(3)?,
                    "status": r.get::<_, Option<String>>(4)?,
                }))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        let mut out = PermissionMap::new();
        for row in rows {
            if let Some(entry) = permission_from_value(&row) {
                out.entry(entry.day()).or_default().push(entry);
            }
        }
        Ok(out)
    }
}

fn read_students(conn: &Connection) -> rusqlite::Result<Vec<Student>> {
    let mut stmt = conn.prepare("SELECT id, name, grade, class FROM students ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(serde_json::json!({
                "id": r.get::<_, Option<String>>(0)?,
                "name": r.get::<_, Option<String>>(1)?,
                "grade": r.get::<_, Option<String>>(2)?,
                "class": r.get::<_, Option<String>>(3)?,
            }))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(students_from_value(&Value::Array(rows)))
}

fn read_settings(conn: &Connection) -> rusqlite::Result<Settings> {
    let mut stmt = conn.prepare("SELECT key, value FROM settings")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut raw = Map::new();
    for (key, value) in rows {
        match serde_json::from_str::<Value>(&value) {
            Ok(v) => {
                raw.insert(key, v);
            }
            Err(e) => warn!(key = %key, error = %e, "skipping corrupt settings row"),
        }
    }
    Ok(settings::normalize(&Value::Object(raw)))
}

fn write_settings(tx: &Transaction<'_>, settings: &Settings) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM settings", [])?;
    let Value::Object(fields) = settings.to_value() else {
        return Ok(());
    };
    let mut stmt = tx.prepare("INSERT INTO settings(key, value) VALUES (?, ?)")?;
    for (key, value) in fields {
        stmt.execute(params![key, value.to_string()])?;
    }
    Ok(())
}

fn insert_students(tx: &Transaction<'_>, rows: &[Student]) -> rusqlite::Result<()> {
    tx.execute("DELETE FROM students", [])?;
    let mut stmt = tx.prepare("INSERT INTO students(id, name, grade, class) VALUES (?, ?, ?, ?)")?;
    for s in rows {
        stmt.execute(params![s.id, s.name, s.grade, s.class])?;
    }
    Ok(())
}

fn insert_permission(tx: &Transaction<'_>, e: &PermissionEntry) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO permissions(student_id, created_at, reason, note, status)
         VALUES (?, ?, ?, ?, ?)",
        params![e.student_id, e.created_at, e.reason, e.note, e.status],
    )?;
    Ok(())
}

fn replace_all(tx: &Transaction<'_>, snap: &Snapshot) -> rusqlite::Result<()> {
    insert_students(tx, &snap.students)?;
    write_settings(tx, &snap.settings)?;

    tx.execute("DELETE FROM attendance", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO attendance(day, student_id, time) VALUES (?, ?, ?)")?;
        for (day, rows) in &snap.attendance {
            for (sid, time) in rows {
                stmt.execute(params![day, sid, time])?;
            }
        }
    }

    tx.execute("DELETE FROM permissions", [])?;
    for rows in snap.permissions.values() {
        for e in rows {
            insert_permission(tx, e)?;
        }
    }
    Ok(())
}

fn import_into(conn: &mut Connection, snap: &Snapshot) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    replace_all(&tx, snap)?;
    tx.commit()
}

fn apply_operation(tx: &Transaction<'_>, op: &Operation) -> rusqlite::Result<()> {
    match op {
        Operation::SetStudents(rows) => insert_students(tx, rows),
        Operation::SetSettings(patch) => {
            let next = read_settings(tx)?.merged(patch);
            write_settings(tx, &next)
        }
        Operation::SetAttendance {
            day,
            student_id,
            time,
        } => {
            tx.execute(
                "INSERT INTO attendance(day, student_id, time) VALUES (?1, ?2, ?3)
                 ON CONFLICT(day, student_id) DO UPDATE SET time = excluded.time",
                params![day, student_id, time],
            )?;
            Ok(())
        }
        Operation::DeleteAttendance { day, student_id } => {
            tx.execute(
                "DELETE FROM attendance WHERE day = ? AND student_id = ?",
                params![day, student_id],
            )?;
            Ok(())
        }
        Operation::AddPermission(entry) => insert_permission(tx, entry),
        Operation::ImportSnapshot(snap) => replace_all(tx, snap),
    }
}

impl StorageBackend for SqlBackend {
    fn backend_type(&self) -> BackendType {
        BackendType::Sql
    }

    fn tenant(&self) -> &str {
        self.keys.tenant()
    }

    fn get_students(&mut self) -> StoreResult<Vec<Student>> {
        Ok(self.read("students", read_students))
    }

    fn set_students(&mut self, students: &[Student]) -> StoreResult<()> {
        let rows = students_for_write(students)?;
        self.write(Operation::SetStudents(rows))
    }

    fn get_settings(&mut self) -> StoreResult<Settings> {
        Ok(self.read("settings", read_settings))
    }

    fn set_settings(&mut self, patch: &Value) -> StoreResult<Settings> {
        if !patch.is_object() {
            return Err(StoreError::validation("settings patch must be an object"));
        }
        self.write(Operation::SetSettings(patch.clone()))?;
        self.get_settings()
    }

    fn get_attendance_day(&mut self, day: &str) -> StoreResult<BTreeMap<String, String>> {
        let day = require_day(day)?;
        let mut all = self.read("attendance", |c| {
            Self::query_attendance(c, Some(day.as_str()), Some(day.as_str()))
        });
        Ok(all.remove(&day).unwrap_or_default())
    }

    fn set_attendance(&mut self, day: &str, student_id: &str, time: &str) -> StoreResult<()> {
        let op = Operation::SetAttendance {
            day: require_day(day)?,
            student_id: require_student_id(student_id)?,
            time: require_time(time)?,
        };
        self.write(op)
    }

    fn delete_attendance(&mut self, day: &str, student_id: &str) -> StoreResult<()> {
        let op = Operation::DeleteAttendance {
            day: require_day(day)?,
            student_id: require_student_id(student_id)?,
        };
        self.write(op)
    }

    fn get_attendance_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<AttendanceMap> {
        let (start, end) = range_bounds(start, end)?;
        Ok(self.read("attendance", |c| {
            Self::query_attendance(c, start.as_deref(), end.as_deref())
        }))
    }

    fn get_permissions_day(&mut self, day: &str) -> StoreResult<Vec<PermissionEntry>> {
        let day = require_day(day)?;
        let mut all = self.read("permissions", |c| {
            Self::query_permissions(c, Some(day.as_str()), Some(day.as_str()))
        });
        Ok(all.remove(&day).unwrap_or_default())
    }

    fn add_permission(&mut self, entry: &Value) -> StoreResult<PermissionEntry> {
        // createdAt is fixed here so a replay inserts the identical entry.
        let entry = permission_for_write(entry)?;
        self.write(Operation::AddPermission(entry.clone()))?;
        Ok(entry)
    }

    fn get_permissions_range(
        &mut self,
        start: Option<&str>,
        end: Option<&str>,
    ) -> StoreResult<PermissionMap> {
        let (start, end) = range_bounds(start, end)?;
        Ok(self.read("permissions", |c| {
            Self::query_permissions(c, start.as_deref(), end.as_deref())
        }))
    }

    fn export_snapshot(&mut self) -> StoreResult<Snapshot> {
        let students = self.get_students()?;
        let settings = self.get_settings()?;
        let attendance = self.get_attendance_range(None, None)?;
        let permissions = self.get_permissions_range(None, None)?;
        Ok(Snapshot::new(
            BackendType::Sql,
            students,
            settings,
            attendance,
            permissions,
        ))
    }

    fn import_snapshot(&mut self, doc: &Value) -> StoreResult<()> {
        let snap = Snapshot::from_value(doc)?;
        let students = snap.students.len();
        self.write(Operation::ImportSnapshot(Box::new(snap)))?;
        info!(tenant = self.keys.tenant(), students, "imported snapshot into sql backend");
        Ok(())
    }

    fn as_sql(&mut self) -> Option<&mut SqlBackend> {
        Some(self)
    }
}

impl SqlBackend {
    /// Row counts of the live database, for health reporting.
    pub fn table_counts(&mut self) -> StoreResult<BTreeMap<&'static str, i64>> {
        let conn = self.connection()?;
        let mut out = BTreeMap::new();
        for table in ["students", "attendance", "settings", "permissions"] {
            let n: i64 = conn
                .query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0))
                .map_err(EngineFault::from)?;
            out.insert(table, n);
        }
        Ok(out)
    }
}
