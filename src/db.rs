use rusqlite::backup::Progress;
use rusqlite::{Connection, DatabaseName};
use tracing::debug;

use crate::error::EngineFault;

/// First 16 bytes of every SQLite database file.
pub const SQLITE_SIGNATURE: &[u8; 16] = b"SQLite format 3\0";

pub fn has_signature(bytes: &[u8]) -> bool {
    bytes.len() >= SQLITE_SIGNATURE.len() && &bytes[..SQLITE_SIGNATURE.len()] == SQLITE_SIGNATURE
}

pub fn open_fresh() -> Result<Connection, EngineFault> {
    let conn = Connection::open_in_memory()?;
    apply_schema(&conn)?;
    Ok(conn)
}

/// Columns every current-schema table carries, with the declaration used to
/// add one that an imported database lacks.
pub const CURRENT_COLUMNS: &[(&str, &[(&str, &str)])] = &[
    (
        "students",
        &[
            ("id", "TEXT"),
            ("name", "TEXT NOT NULL DEFAULT ''"),
            ("grade", "TEXT NOT NULL DEFAULT ''"),
            ("class", "TEXT NOT NULL DEFAULT ''"),
        ],
    ),
    (
        "attendance",
        &[
            ("day", "TEXT NOT NULL DEFAULT ''"),
            ("student_id", "TEXT NOT NULL DEFAULT ''"),
            ("time", "TEXT NOT NULL DEFAULT ''"),
        ],
    ),
    (
        "settings",
        &[("key", "TEXT"), ("value", "TEXT NOT NULL DEFAULT 'null'")],
    ),
    (
        "permissions",
        &[
            ("id", "INTEGER"),
            ("student_id", "TEXT NOT NULL DEFAULT ''"),
            ("created_at", "TEXT NOT NULL DEFAULT ''"),
            ("reason", "TEXT NOT NULL DEFAULT ''"),
            ("note", "TEXT NOT NULL DEFAULT ''"),
            ("status", "TEXT NOT NULL DEFAULT 'pending'"),
        ],
    ),
];

pub fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL DEFAULT '',
            grade TEXT NOT NULL DEFAULT '',
            class TEXT NOT NULL DEFAULT ''
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            day TEXT NOT NULL,
            student_id TEXT NOT NULL,
            time TEXT NOT NULL,
            PRIMARY KEY(day, student_id)
        )",
        [],
    )?;

    // One row per normalized settings field, value JSON encoded.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS permissions(
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            student_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            reason TEXT NOT NULL DEFAULT '',
            note TEXT NOT NULL DEFAULT '',
            status TEXT NOT NULL DEFAULT 'pending'
        )",
        [],
    )?;

    // Imported databases may predate some columns.
    ensure_current_columns(conn)?;
    ensure_attendance_unique(conn)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permissions_day ON permissions(date(created_at))",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_permissions_student ON permissions(student_id)",
        [],
    )?;
    Ok(())
}

fn ensure_current_columns(conn: &Connection) -> rusqlite::Result<()> {
    for (table, columns) in CURRENT_COLUMNS {
        for (column, decl) in *columns {
            if table_has_column(conn, table, column)? {
                continue;
            }
            conn.execute(
                &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, decl),
                [],
            )?;
            debug!(table = *table, column = *column, "added missing column");
        }
    }
    Ok(())
}

/// The attendance upsert needs `(day, student_id)` to be unique.
fn ensure_attendance_unique(conn: &Connection) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare("PRAGMA index_list(attendance)")?;
    let unique_indexes = stmt
        .query_map([], |r| Ok((r.get::<_, String>(1)?, r.get::<_, i64>(2)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    for (name, unique) in unique_indexes {
        if unique == 0 {
            continue;
        }
        let mut info = conn.prepare(&format!("PRAGMA index_info(\"{}\")", name))?;
        let mut cols: Vec<String> = info
            .query_map([], |r| r.get::<_, Option<String>>(2))?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .flatten()
            .collect();
        cols.sort();
        if cols == ["day", "student_id"] {
            return Ok(());
        }
    }
    // Later rows win, as they would have under the upsert.
    conn.execute(
        "DELETE FROM attendance WHERE rowid NOT IN
            (SELECT max(rowid) FROM attendance GROUP BY day, student_id)",
        [],
    )?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_day_student ON attendance(day, student_id)",
        [],
    )?;
    Ok(())
}

/// Copy the whole main database out as bytes, in memory.
pub fn serialize(conn: &Connection) -> Result<Vec<u8>, EngineFault> {
    let data = conn.serialize(DatabaseName::Main)?;
    let bytes = data.to_vec();
    debug!(bytes = bytes.len(), "serialized database");
    Ok(bytes)
}

/// Load serialized bytes into a new in-memory connection.
///
/// Staged through a temp file and the backup API; this only runs when a blob
/// is loaded or imported, never on the write path.
pub fn deserialize(bytes: &[u8]) -> Result<Connection, EngineFault> {
    if !has_signature(bytes) {
        return Err(EngineFault("blob is missing the sqlite signature".into()));
    }
    let dir = tempfile::tempdir()
        .map_err(|e| EngineFault(format!("failed to create staging dir: {e}")))?;
    let path = dir.path().join("blob.sqlite3");
    std::fs::write(&path, bytes)
        .map_err(|e| EngineFault(format!("failed to stage database bytes: {e}")))?;

    let mut conn = Connection::open_in_memory()?;
    conn.restore(DatabaseName::Main, &path, None::<fn(Progress)>)?;
    // Forces a read of the schema so truncated pages fail here.
    conn.query_row("SELECT count(*) FROM sqlite_master", [], |r| r.get::<_, i64>(0))?;
    Ok(conn)
}

pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    Ok(table_columns(conn, table)?.iter().any(|c| c == column))
}

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    let n: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        [table],
        |r| r.get(0),
    )?;
    Ok(n > 0)
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        out.push(name.to_ascii_lowercase());
    }
    Ok(out)
}
