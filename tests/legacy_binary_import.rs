use kioskstore::sql_backend::BinaryImport;
use kioskstore::{KeyValueStore, MemoryStore, SqlBackend, StorageBackend, StoreError};
use rusqlite::{params, Connection};
use std::sync::Arc;

fn sqlite_bytes(setup: &str, fill: impl FnOnce(&Connection)) -> Vec<u8> {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("legacy.sqlite3");
    {
        let conn = Connection::open(&path).expect("open legacy db");
        conn.execute_batch(setup).expect("create legacy schema");
        fill(&conn);
    }
    std::fs::read(&path).expect("read legacy db")
}

fn legacy_fixture() -> Vec<u8> {
    sqlite_bytes(
        "CREATE TABLE students(national_id TEXT, full_name TEXT, grade TEXT, section TEXT);
         CREATE TABLE settings(assembly_hour INTEGER, assembly_minute INTEGER, grace_minutes INTEGER);
         CREATE TABLE attendance(national_id TEXT, ts, late_minutes INTEGER);",
        |conn| {
            for (id, name) in [("111", "Ali"), ("222", "Sara"), ("111", "Ali Duplicate")] {
                conn.execute(
                    "INSERT INTO students VALUES (?, ?, '5', 'B')",
                    params![id, name],
                )
                .expect("insert student");
            }
            conn.execute("INSERT INTO settings VALUES (7, 15, 20)", [])
                .expect("insert settings");
            conn.execute(
                "INSERT INTO attendance VALUES ('111', '2024-01-01T07:40:00', 10)",
                [],
            )
            .expect("insert attendance");
            conn.execute(
                "INSERT INTO attendance VALUES ('111', '2024-01-01 07:05:00', 0)",
                [],
            )
            .expect("insert attendance");
            conn.execute(
                "INSERT INTO attendance VALUES ('222', ?, 0)",
                params![1_704_092_700_i64],
            )
            .expect("insert attendance");
            conn.execute("INSERT INTO attendance VALUES ('', '2024-01-02 08:00:00', 0)", [])
                .expect("insert attendance");
        },
    )
}

fn backend() -> (SqlBackend, Arc<dyn KeyValueStore>) {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    (SqlBackend::new(store.clone(), "school"), store)
}

#[test]
fn legacy_students_are_mapped_and_deduplicated() {
    let (mut backend, _store) = backend();
    let outcome = backend
        .import_database_binary(&legacy_fixture())
        .expect("import legacy");
    assert_eq!(
        outcome,
        BinaryImport::Legacy {
            students: 2,
            attendance_days: 1,
            permissions: 0,
        }
    );

    let roster = backend.get_students().expect("students");
    let ids: Vec<&str> = roster.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["111", "222"]);
    assert_eq!(roster[0].name, "Ali");
    assert_eq!(roster[0].class, "B");
}

#[test]
fn legacy_assembly_time_becomes_school_start() {
    let (mut backend, _store) = backend();
    backend
        .import_database_binary(&legacy_fixture())
        .expect("import legacy");
    let settings = backend.get_settings().expect("settings");
    assert_eq!(settings.school_start, "07:15");
    assert_eq!(settings.grace_minutes, 20);
}

#[test]
fn legacy_attendance_keeps_latest_time_per_day() {
    let (mut backend, _store) = backend();
    backend
        .import_database_binary(&legacy_fixture())
        .expect("import legacy");
    let day = backend.get_attendance_day("2024-01-01").expect("day");
    assert_eq!(day.get("111").map(String::as_str), Some("07:40:00"));
    assert_eq!(day.get("222").map(String::as_str), Some("07:05:00"));
    assert!(backend
        .get_attendance_day("2024-01-02")
        .expect("day")
        .is_empty());
}

#[test]
fn imported_database_is_persisted_as_the_blob() {
    let (mut backend, store) = backend();
    backend
        .import_database_binary(&legacy_fixture())
        .expect("import legacy");
    let mut reopened = SqlBackend::new(store, "school");
    assert_eq!(reopened.get_students().expect("students").len(), 2);
}

#[test]
fn bytes_without_signature_are_rejected_and_blob_is_untouched() {
    let (mut backend, store) = backend();
    backend
        .set_attendance("2024-02-01", "S1", "07:00:00")
        .expect("seed");
    let before = store.get("school:sqlite_blob").expect("get");
    assert!(before.is_some());

    let err = backend
        .import_database_binary(b"PK\x03\x04 definitely not sqlite")
        .expect_err("bad bytes");
    assert!(matches!(err, StoreError::InvalidFormat(_)));

    assert_eq!(store.get("school:sqlite_blob").expect("get"), before);
    assert_eq!(
        backend.get_attendance_day("2024-02-01").expect("day").len(),
        1
    );
}

#[test]
fn current_format_export_imports_back_unchanged() {
    let (mut src, _) = backend();
    src.set_attendance("2024-02-01", "S1", "07:00:00").expect("seed");
    let bytes = src.export_database_binary().expect("export");

    let (mut dst, _) = backend();
    assert_eq!(
        dst.import_database_binary(&bytes).expect("import"),
        BinaryImport::Current
    );
    assert_eq!(
        dst.get_attendance_day("2024-02-01").expect("day"),
        src.get_attendance_day("2024-02-01").expect("day")
    );
}

#[test]
fn invalid_assembly_time_fails_migration() {
    let bytes = sqlite_bytes(
        "CREATE TABLE settings(assembly_hour INTEGER, assembly_minute INTEGER);",
        |conn| {
            conn.execute("INSERT INTO settings VALUES (31, 0)", [])
                .expect("insert");
        },
    );
    let (mut backend, store) = backend();
    let err = backend.import_database_binary(&bytes).expect_err("bad hour");
    assert!(matches!(err, StoreError::Migration(_)));
    assert!(store.get("school:sqlite_blob").expect("get").is_none());
}

#[test]
fn failed_migration_leaves_existing_data_untouched() {
    let (mut backend, store) = backend();
    backend
        .set_students(&[kioskstore::Student {
            id: "S1".into(),
            name: "Huda".into(),
            grade: "6".into(),
            class: "A".into(),
        }])
        .expect("seed roster");
    backend
        .set_attendance("2024-03-01", "S1", "07:30:00")
        .expect("seed attendance");
    let blob_before = store.get("school:sqlite_blob").expect("get").expect("blob");

    let bytes = sqlite_bytes(
        "CREATE TABLE students(national_id TEXT, full_name TEXT);
         CREATE TABLE settings(assembly_hour INTEGER, assembly_minute INTEGER);",
        |conn| {
            conn.execute("INSERT INTO students VALUES ('999', 'Ghost')", [])
                .expect("insert student");
            conn.execute("INSERT INTO settings VALUES (7, 75)", [])
                .expect("insert settings");
        },
    );
    let err = backend.import_database_binary(&bytes).expect_err("bad minute");
    assert!(matches!(err, StoreError::Migration(_)));

    let blob_after = store.get("school:sqlite_blob").expect("get").expect("blob");
    assert_eq!(blob_after, blob_before);
    let roster = backend.get_students().expect("students");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].name, "Huda");
    let day = backend.get_attendance_day("2024-03-01").expect("attendance");
    assert_eq!(day.get("S1").map(String::as_str), Some("07:30:00"));
    assert!(backend.pending_operations().expect("queue").is_empty());
}

#[test]
fn current_tables_missing_columns_are_upgraded_on_import() {
    let bytes = sqlite_bytes(
        "CREATE TABLE students(id TEXT, name TEXT);
         CREATE TABLE attendance(day TEXT, student_id TEXT, time TEXT);",
        |conn| {
            conn.execute("INSERT INTO students VALUES ('S1', 'Noor')", [])
                .expect("insert student");
            conn.execute(
                "INSERT INTO attendance VALUES ('2024-02-01', 'S1', '07:10:00')",
                [],
            )
            .expect("insert attendance");
        },
    );
    let (mut backend, store) = backend();
    assert_eq!(
        backend.import_database_binary(&bytes).expect("import"),
        BinaryImport::Current
    );

    let roster = backend.get_students().expect("students");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].name, "Noor");
    assert_eq!(roster[0].grade, "");

    // The upgraded table takes writes, including the attendance upsert.
    backend
        .set_attendance("2024-02-01", "S1", "07:30:00")
        .expect("overwrite");
    let day = backend.get_attendance_day("2024-02-01").expect("day");
    assert_eq!(day.len(), 1);
    assert_eq!(day.get("S1").map(String::as_str), Some("07:30:00"));

    let mut reopened = SqlBackend::new(store, "school");
    assert_eq!(reopened.get_students().expect("students").len(), 1);
}
