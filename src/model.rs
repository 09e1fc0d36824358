use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};

/// day -> studentId -> "HH:MM:SS"
pub type AttendanceMap = BTreeMap<String, BTreeMap<String, String>>;
/// day -> entries ordered by `createdAt`
pub type PermissionMap = BTreeMap<String, Vec<PermissionEntry>>;

pub const DEFAULT_PERMISSION_STATUS: &str = "pending";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub grade: String,
    pub class: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionEntry {
    pub student_id: String,
    pub created_at: String,
    pub reason: String,
    pub note: String,
    pub status: String,
}

impl PermissionEntry {
    /// UTC calendar day the entry is bucketed under.
    pub fn day(&self) -> String {
        self.created_at.chars().take(10).collect()
    }
}

fn str_of(v: Option<&Value>) -> String {
    match v {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

/// Lenient per-row normalizer; `None` means the row is dropped.
pub fn student_from_value(v: &Value) -> Option<Student> {
    let o = v.as_object()?;
    let id = str_of(o.get("id"));
    if id.is_empty() {
        return None;
    }
    Some(Student {
        id,
        name: str_of(o.get("name")),
        grade: str_of(o.get("grade")),
        class: str_of(o.get("class")),
    })
}

/// Collapse duplicate ids: first position is kept, last data wins.
pub fn dedupe_students(rows: Vec<Student>) -> Vec<Student> {
    let mut out: Vec<Student> = Vec::with_capacity(rows.len());
    let mut index: BTreeMap<String, usize> = BTreeMap::new();
    for s in rows {
        match index.get(&s.id) {
            Some(&i) => out[i] = s,
            None => {
                index.insert(s.id.clone(), out.len());
                out.push(s);
            }
        }
    }
    out
}

/// Strict variant used by `set_students`: any row without an id rejects the write.
pub fn students_for_write(rows: &[Student]) -> StoreResult<Vec<Student>> {
    let mut cleaned = Vec::with_capacity(rows.len());
    for (i, s) in rows.iter().enumerate() {
        let id = s.id.trim();
        if id.is_empty() {
            return Err(StoreError::validation(format!("students[{i}].id is required")));
        }
        cleaned.push(Student {
            id: id.to_string(),
            name: s.name.trim().to_string(),
            grade: s.grade.trim().to_string(),
            class: s.class.trim().to_string(),
        });
    }
    Ok(dedupe_students(cleaned))
}

pub fn students_from_value(v: &Value) -> Vec<Student> {
    let rows = v
        .as_array()
        .map(|arr| arr.iter().filter_map(student_from_value).collect())
        .unwrap_or_default();
    dedupe_students(rows)
}

pub fn parse_day(s: &str) -> Option<String> {
    let t = s.trim();
    NaiveDate::parse_from_str(t, "%Y-%m-%d")
        .ok()
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// `HH:MM:SS`, or `HH:MM` which gets `:00` appended.
pub fn parse_time(s: &str) -> Option<String> {
    let t = s.trim();
    NaiveTime::parse_from_str(t, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(t, "%H:%M"))
        .ok()
        .map(|tm| tm.format("%H:%M:%S").to_string())
}

pub fn require_day(day: &str) -> StoreResult<String> {
    if day.trim().is_empty() {
        return Err(StoreError::validation("day is required"));
    }
    parse_day(day).ok_or_else(|| StoreError::validation(format!("day must be YYYY-MM-DD: {day}")))
}

pub fn require_student_id(student_id: &str) -> StoreResult<String> {
    let id = student_id.trim();
    if id.is_empty() {
        return Err(StoreError::validation("studentId is required"));
    }
    Ok(id.to_string())
}

pub fn require_time(time: &str) -> StoreResult<String> {
    parse_time(time).ok_or_else(|| StoreError::validation(format!("time must be HH:MM:SS: {time}")))
}

pub fn attendance_day_from_value(v: &Value) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(o) = v.as_object() else {
        return out;
    };
    for (sid, t) in o {
        let sid = sid.trim();
        if sid.is_empty() {
            continue;
        }
        if let Some(time) = t.as_str().and_then(parse_time) {
            out.insert(sid.to_string(), time);
        }
    }
    out
}

pub fn attendance_from_value(v: &Value) -> AttendanceMap {
    let mut out = AttendanceMap::new();
    let Some(o) = v.as_object() else {
        return out;
    };
    for (day, rows) in o {
        let Some(day) = parse_day(day) else { continue };
        let rows = attendance_day_from_value(rows);
        if !rows.is_empty() {
            out.entry(day).or_default().extend(rows);
        }
    }
    out
}

pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Any RFC 3339 instant (or a bare date) to UTC with millisecond precision.
pub fn normalize_timestamp(s: &str) -> Option<String> {
    let t = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(t) {
        return Some(
            dt.with_timezone(&Utc)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        );
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(t, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true));
    }
    NaiveDate::parse_from_str(t, "%Y-%m-%d").ok().and_then(|d| {
        d.and_hms_opt(0, 0, 0)
            .map(|n| n.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
    })
}

pub fn permission_from_value(v: &Value) -> Option<PermissionEntry> {
    let o = v.as_object()?;
    let student_id = str_of(o.get("studentId"));
    if student_id.is_empty() {
        return None;
    }
    let created_at = normalize_timestamp(&str_of(o.get("createdAt")))?;
    let mut status = str_of(o.get("status"));
    if status.is_empty() {
        status = DEFAULT_PERMISSION_STATUS.to_string();
    }
    Some(PermissionEntry {
        student_id,
        created_at,
        reason: str_of(o.get("reason")),
        note: str_of(o.get("note")),
        status,
    })
}

/// Normalize an entry for `add_permission`; a missing `createdAt` becomes now.
pub fn permission_for_write(raw: &Value) -> StoreResult<PermissionEntry> {
    let o = raw
        .as_object()
        .ok_or_else(|| StoreError::validation("permission must be an object"))?;
    let student_id = require_student_id(&str_of(o.get("studentId")))?;
    let created_raw = str_of(o.get("createdAt"));
    let created_at = if created_raw.is_empty() {
        now_timestamp()
    } else {
        normalize_timestamp(&created_raw).ok_or_else(|| {
            StoreError::validation(format!("createdAt must be an ISO datetime: {created_raw}"))
        })?
    };
    let mut entry = permission_from_value(&serde_json::json!({
        "studentId": student_id,
        "createdAt": created_at,
        "reason": o.get("reason").cloned().unwrap_or(Value::Null),
        "note": o.get("note").cloned().unwrap_or(Value::Null),
        "status": o.get("status").cloned().unwrap_or(Value::Null),
    }))
    .ok_or_else(|| StoreError::validation("permission entry is malformed"))?;
    entry.student_id = student_id;
    Ok(entry)
}

pub fn sort_permissions(rows: &mut [PermissionEntry]) {
    // Stable: same-instant entries keep insertion order.
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
}

/// Re-buckets every entry by its own `createdAt`, ignoring the source key.
pub fn permissions_from_value(v: &Value) -> PermissionMap {
    let mut out = PermissionMap::new();
    let Some(o) = v.as_object() else {
        return out;
    };
    for rows in o.values() {
        let Some(arr) = rows.as_array() else { continue };
        for row in arr {
            if let Some(entry) = permission_from_value(row) {
                out.entry(entry.day()).or_default().push(entry);
            }
        }
    }
    for rows in out.values_mut() {
        sort_permissions(rows);
    }
    out
}

pub fn in_range(day: &str, start: Option<&str>, end: Option<&str>) -> bool {
    start.map(|s| day >= s).unwrap_or(true) && end.map(|e| day <= e).unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn duplicate_students_keep_first_position_and_last_data() {
        let rows = students_from_value(&json!([
            { "id": "S1", "name": "A" },
            { "id": "S2", "name": "B" },
            { "id": "S1", "name": "C" },
            { "name": "no id" }
        ]));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, "S1");
        assert_eq!(rows[0].name, "C");
    }

    #[test]
    fn timestamps_normalize_to_utc_millis() {
        assert_eq!(
            normalize_timestamp("2024-03-01T10:00:00+02:00").as_deref(),
            Some("2024-03-01T08:00:00.000Z")
        );
        assert_eq!(parse_time("7:05").as_deref(), Some("07:05:00"));
        assert!(parse_day("2024-02-30").is_none());
    }
}
