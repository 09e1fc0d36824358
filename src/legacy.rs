//! Older kiosk database layouts met during binary import.
//!
//! Detection only looks at column names. The rules live in
//! [`LEGACY_RULES`]; extraction reads through a resolved [`LegacyLayout`] so a
//! new shape only needs a rule and, if it renames columns, a new candidate
//! name below.

use chrono::{DateTime, NaiveDateTime};
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::{info, warn};

use crate::backend::BackendType;
use crate::db::{table_columns, table_exists, CURRENT_COLUMNS};
use crate::error::{StoreError, StoreResult};
use crate::model::{
    parse_day, parse_time, permission_from_value, sort_permissions, AttendanceMap,
    PermissionMap, Student,
};
use crate::settings;
use crate::snapshot::Snapshot;

/// A column shape that marks one table as legacy.
pub struct ShapeRule {
    pub table: &'static str,
    /// Every one of these must exist.
    pub present: &'static [&'static str],
    /// None of these may exist.
    pub absent: &'static [&'static str],
}

impl ShapeRule {
    fn matches(&self, columns: &[String]) -> bool {
        self.present.iter().all(|c| columns.iter().any(|x| x == c))
            && !self.absent.iter().any(|c| columns.iter().any(|x| x == c))
    }
}

pub const LEGACY_RULES: &[ShapeRule] = &[
    ShapeRule {
        table: "students",
        present: &["national_id", "full_name"],
        absent: &["id", "name"],
    },
    ShapeRule {
        table: "settings",
        present: &["assembly_hour", "assembly_minute"],
        absent: &["key", "value"],
    },
    ShapeRule {
        table: "attendance",
        present: &["ts", "late_minutes"],
        absent: &["day", "time"],
    },
];

const STUDENT_ID_COLUMNS: &[&str] = &["national_id", "student_id", "id"];
const STUDENT_NAME_COLUMNS: &[&str] = &["full_name", "name"];
const STUDENT_GRADE_COLUMNS: &[&str] = &["grade", "grade_level"];
const STUDENT_CLASS_COLUMNS: &[&str] = &["class", "class_name", "section"];
const ASSEMBLY_HOUR_COLUMNS: &[&str] = &["assembly_hour"];
const ASSEMBLY_MINUTE_COLUMNS: &[&str] = &["assembly_minute"];
const GRACE_COLUMNS: &[&str] = &["grace_minutes", "late_after_minutes"];
const ATTENDANCE_STUDENT_COLUMNS: &[&str] = &["national_id", "student_id"];
const ATTENDANCE_TS_COLUMNS: &[&str] = &["ts"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudentsSource {
    Absent,
    Current,
    Legacy {
        id: String,
        name: Option<String>,
        grade: Option<String>,
        class: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingsSource {
    Absent,
    KeyValue,
    Assembly {
        hour: String,
        minute: String,
        grace: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttendanceSource {
    Absent,
    Current,
    Timestamped { student: String, ts: String },
}

/// Where each entity lives in a legacy database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyLayout {
    pub students: StudentsSource,
    pub settings: SettingsSource,
    pub attendance: AttendanceSource,
    pub permissions: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaShape {
    Current,
    Legacy(LegacyLayout),
}

fn pick(columns: &[String], candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find(|c| columns.iter().any(|x| x == *c))
        .map(|c| c.to_string())
}

fn columns_of(conn: &Connection, table: &str) -> rusqlite::Result<Option<Vec<String>>> {
    if !table_exists(conn, table)? {
        return Ok(None);
    }
    Ok(Some(table_columns(conn, table)?))
}

impl SchemaShape {
    pub fn detect(conn: &Connection) -> rusqlite::Result<SchemaShape> {
        let mut tables: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for (table, _) in CURRENT_COLUMNS {
            if let Some(cols) = columns_of(conn, table)? {
                tables.insert(*table, cols);
            }
        }

        let legacy = LEGACY_RULES.iter().any(|rule| {
            tables
                .get(rule.table)
                .map(|cols| rule.matches(cols))
                .unwrap_or(false)
        });
        if legacy {
            return Ok(SchemaShape::Legacy(resolve_layout(&tables)));
        }
        // Anything else is taken as current; missing columns are added on load.
        Ok(SchemaShape::Current)
    }
}

fn is_current(tables: &BTreeMap<&str, Vec<String>>, table: &str) -> bool {
    let Some(cols) = tables.get(table) else {
        return false;
    };
    CURRENT_COLUMNS
        .iter()
        .find(|(t, _)| *t == table)
        .map(|(_, req)| req.iter().all(|(c, _)| cols.iter().any(|x| x == c)))
        .unwrap_or(false)
}

fn resolve_layout(tables: &BTreeMap<&str, Vec<String>>) -> LegacyLayout {
    let students = match tables.get("students") {
        None => StudentsSource::Absent,
        Some(_) if is_current(tables, "students") => StudentsSource::Current,
        Some(cols) => match pick(cols, STUDENT_ID_COLUMNS) {
            Some(id) => StudentsSource::Legacy {
                id,
                name: pick(cols, STUDENT_NAME_COLUMNS),
                grade: pick(cols, STUDENT_GRADE_COLUMNS),
                class: pick(cols, STUDENT_CLASS_COLUMNS),
            },
            None => StudentsSource::Absent,
        },
    };

    let settings = match tables.get("settings") {
        None => SettingsSource::Absent,
        Some(_) if is_current(tables, "settings") => SettingsSource::KeyValue,
        Some(cols) => match (
            pick(cols, ASSEMBLY_HOUR_COLUMNS),
            pick(cols, ASSEMBLY_MINUTE_COLUMNS),
        ) {
            (Some(hour), Some(minute)) => SettingsSource::Assembly {
                hour,
                minute,
                grace: pick(cols, GRACE_COLUMNS),
            },
            _ => SettingsSource::Absent,
        },
    };

    let attendance = match tables.get("attendance") {
        None => AttendanceSource::Absent,
        Some(_) if is_current(tables, "attendance") => AttendanceSource::Current,
        Some(cols) => match (
            pick(cols, ATTENDANCE_STUDENT_COLUMNS),
            pick(cols, ATTENDANCE_TS_COLUMNS),
        ) {
            (Some(student), Some(ts)) => AttendanceSource::Timestamped { student, ts },
            _ => AttendanceSource::Absent,
        },
    };

    LegacyLayout {
        students,
        settings,
        attendance,
        permissions: is_current(tables, "permissions"),
    }
}

fn text_of(v: &SqlValue) -> String {
    match v {
        SqlValue::Null => String::new(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Real(f) => f.to_string(),
        SqlValue::Text(s) => s.trim().to_string(),
        SqlValue::Blob(b) => String::from_utf8_lossy(b).trim().to_string(),
    }
}

fn int_of(v: &SqlValue) -> Option<i64> {
    match v {
        SqlValue::Integer(n) => Some(*n),
        SqlValue::Real(f) if f.fract() == 0.0 => Some(*f as i64),
        SqlValue::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn migration(context: &str) -> impl Fn(rusqlite::Error) -> StoreError + '_ {
    move |e| StoreError::Migration(format!("{context}: {e}"))
}

/// Wall-clock `(day, time)` of a legacy attendance timestamp.
///
/// Text keeps the clock time as written, offsets included; integers are Unix
/// seconds (or milliseconds when too large for seconds) read as UTC.
pub fn parse_legacy_ts(v: &SqlValue) -> Result<Option<(String, String)>, String> {
    let naive: NaiveDateTime = match v {
        SqlValue::Null => return Ok(None),
        SqlValue::Integer(_) | SqlValue::Real(_) => {
            let raw = match v {
                SqlValue::Integer(n) => *n,
                SqlValue::Real(f) => *f as i64,
                _ => 0,
            };
            let secs = if raw.abs() >= 100_000_000_000 { raw / 1000 } else { raw };
            DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| format!("timestamp out of range: {raw}"))?
                .naive_utc()
        }
        SqlValue::Text(_) | SqlValue::Blob(_) => {
            let s = text_of(v);
            if s.is_empty() {
                return Ok(None);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
                dt.naive_local()
            } else {
                ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"]
                    .iter()
                    .find_map(|f| NaiveDateTime::parse_from_str(&s, f).ok())
                    .ok_or_else(|| format!("unrecognized timestamp: {s}"))?
            }
        }
    };
    Ok(Some((
        naive.format("%Y-%m-%d").to_string(),
        naive.format("%H:%M:%S").to_string(),
    )))
}

fn select_all(
    conn: &Connection,
    table: &str,
    columns: &[Option<&str>],
) -> StoreResult<Vec<Vec<SqlValue>>> {
    let projection: Vec<String> = columns
        .iter()
        .map(|c| match c {
            Some(name) => format!("\"{}\"", name),
            None => "NULL".to_string(),
        })
        .collect();
    let sql = format!(
        "SELECT {} FROM \"{}\" ORDER BY rowid",
        projection.join(", "),
        table
    );
    let ctx = format!("failed to read legacy {table}");
    let mut stmt = conn.prepare(&sql).map_err(migration(&ctx))?;
    let width = columns.len();
    let rows = stmt
        .query_map([], |r| {
            (0..width)
                .map(|i| r.get::<_, SqlValue>(i))
                .collect::<Result<Vec<_>, _>>()
        })
        .map_err(migration(&ctx))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(migration(&ctx))?;
    Ok(rows)
}

fn extract_students(conn: &Connection, source: &StudentsSource) -> StoreResult<Vec<Student>> {
    let (id, name, grade, class) = match source {
        StudentsSource::Absent => return Ok(Vec::new()),
        StudentsSource::Current => ("id", Some("name"), Some("grade"), Some("class")),
        StudentsSource::Legacy {
            id,
            name,
            grade,
            class,
        } => (
            id.as_str(),
            name.as_deref(),
            grade.as_deref(),
            class.as_deref(),
        ),
    };
    let rows = select_all(conn, "students", &[Some(id), name, grade, class])?;
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for row in rows {
        let sid = text_of(&row[0]);
        // First legacy id wins.
        if sid.is_empty() || !seen.insert(sid.clone()) {
            continue;
        }
        out.push(Student {
            id: sid,
            name: text_of(&row[1]),
            grade: text_of(&row[2]),
            class: text_of(&row[3]),
        });
    }
    Ok(out)
}

fn extract_settings(conn: &Connection, source: &SettingsSource) -> StoreResult<settings::Settings> {
    match source {
        SettingsSource::Absent => Ok(settings::Settings::default()),
        SettingsSource::KeyValue => {
            let rows = select_all(conn, "settings", &[Some("key"), Some("value")])?;
            let mut raw = Map::new();
            for row in rows {
                let key = text_of(&row[0]);
                if let Ok(v) = serde_json::from_str::<Value>(&text_of(&row[1])) {
                    raw.insert(key, v);
                }
            }
            Ok(settings::normalize(&Value::Object(raw)))
        }
        SettingsSource::Assembly {
            hour,
            minute,
            grace,
        } => {
            let rows = select_all(
                conn,
                "settings",
                &[Some(hour.as_str()), Some(minute.as_str()), grace.as_deref()],
            )?;
            let Some(row) = rows.first() else {
                return Ok(settings::Settings::default());
            };
            let h = int_of(&row[0]).filter(|h| (0..24).contains(h));
            let m = int_of(&row[1]).filter(|m| (0..60).contains(m));
            let (Some(h), Some(m)) = (h, m) else {
                return Err(StoreError::Migration(format!(
                    "legacy assembly time is invalid: {}:{}",
                    text_of(&row[0]),
                    text_of(&row[1])
                )));
            };
            let mut patch = json!({ "schoolStart": format!("{:02}:{:02}", h, m) });
            if let Some(g) = int_of(&row[2]) {
                patch["graceMinutes"] = Value::from(g);
            }
            Ok(settings::normalize(&patch))
        }
    }
}

fn extract_attendance(conn: &Connection, source: &AttendanceSource) -> StoreResult<AttendanceMap> {
    let mut out = AttendanceMap::new();
    match source {
        AttendanceSource::Absent => {}
        AttendanceSource::Current => {
            let rows = select_all(
                conn,
                "attendance",
                &[Some("day"), Some("student_id"), Some("time")],
            )?;
            for row in rows {
                let sid = text_of(&row[1]);
                let day = parse_day(&text_of(&row[0]));
                let time = parse_time(&text_of(&row[2]));
                let (Some(day), Some(time)) = (day, time) else {
                    continue;
                };
                if !sid.is_empty() {
                    out.entry(day).or_default().insert(sid, time);
                }
            }
        }
        AttendanceSource::Timestamped { student, ts } => {
            let rows = select_all(
                conn,
                "attendance",
                &[Some(student.as_str()), Some(ts.as_str())],
            )?;
            let mut skipped = 0usize;
            for row in rows {
                let sid = text_of(&row[0]);
                let parsed = parse_legacy_ts(&row[1]).map_err(StoreError::Migration)?;
                let (Some((day, time)), false) = (parsed, sid.is_empty()) else {
                    skipped += 1;
                    continue;
                };
                let slot = out.entry(day).or_default().entry(sid).or_default();
                // Latest time of the day wins; equal strings change nothing.
                if time > *slot {
                    *slot = time;
                }
            }
            if skipped > 0 {
                warn!(skipped, "legacy attendance rows without student or timestamp were skipped");
            }
        }
    }
    Ok(out)
}

fn extract_permissions(conn: &Connection, present: bool) -> StoreResult<PermissionMap> {
    let mut out = PermissionMap::new();
    if !present {
        return Ok(out);
    }
    let rows = select_all(
        conn,
        "permissions",
        &[
            Some("student_id"),
            Some("created_at"),
            Some("reason"),
            Some("note"),
            Some("status"),
        ],
    )?;
    for row in rows {
        let candidate = json!({
            "studentId": text_of(&row[0]),
            "createdAt": text_of(&row[1]),
            "reason": text_of(&row[2]),
            "note": text_of(&row[3]),
            "status": text_of(&row[4]),
        });
        if let Some(entry) = permission_from_value(&candidate) {
            out.entry(entry.day()).or_default().push(entry);
        }
    }
    for rows in out.values_mut() {
        sort_permissions(rows);
    }
    Ok(out)
}

/// Read every entity out of a legacy database into a current-format snapshot.
pub fn extract(conn: &Connection, layout: &LegacyLayout) -> StoreResult<Snapshot> {
    let students = extract_students(conn, &layout.students)?;
    let settings = extract_settings(conn, &layout.settings)?;
    let attendance = extract_attendance(conn, &layout.attendance)?;
    let permissions = extract_permissions(conn, layout.permissions)?;
    info!(
        students = students.len(),
        attendance_days = attendance.len(),
        "extracted legacy database"
    );
    Ok(Snapshot::new(
        BackendType::Sql,
        students,
        settings,
        attendance,
        permissions,
    ))
}
