use kioskstore::backup::{export_bundle, import_bundle, BUNDLE_FORMAT_V1};
use kioskstore::{open_backend, BackendType, MemoryStore, StorageBackend, StoreError, Student};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn seeded(kind: BackendType) -> Box<dyn StorageBackend> {
    let mut backend = open_backend(std::sync::Arc::new(MemoryStore::default()), "north", kind);
    backend
        .set_students(&[Student {
            id: "S1".into(),
            name: "Lina".into(),
            grade: "2".into(),
            class: "C".into(),
        }])
        .expect("students");
    backend
        .set_attendance("2024-09-01", "S1", "07:12:00")
        .expect("attendance");
    backend
}

fn entry_names(path: &Path) -> Vec<String> {
    let f = File::open(path).expect("open bundle");
    let archive = zip::ZipArchive::new(f).expect("open zip archive");
    archive.file_names().map(|s| s.to_string()).collect()
}

/// Copy a bundle, passing one entry through `edit` and keeping the manifest.
fn rewrite_entry(src: &Path, dst: &Path, name: &str, edit: impl Fn(Vec<u8>) -> Vec<u8>) {
    let mut archive = zip::ZipArchive::new(File::open(src).expect("open")).expect("zip");
    let mut writer = zip::ZipWriter::new(File::create(dst).expect("create"));
    let opts = zip::write::FileOptions::default();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).expect("entry");
        let entry_name = entry.name().to_string();
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).expect("read entry");
        if entry_name == name {
            bytes = edit(bytes);
        }
        writer.start_file(entry_name, opts).expect("start");
        writer.write_all(&bytes).expect("write");
    }
    writer.finish().expect("finish");
}

#[test]
fn zip_export_and_import_roundtrip() {
    let out_dir = temp_dir("kiosk-backup-out");
    let bundle_path = out_dir.join("north.kioskbackup.zip");

    let mut src = seeded(BackendType::Sql);
    let export = export_bundle(src.as_mut(), &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 3);

    let names = entry_names(&bundle_path);
    assert!(names.iter().any(|n| n == "manifest.json"));
    assert!(names.iter().any(|n| n == "db/kiosk.sqlite3"));

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    assert!(manifest.contains(BUNDLE_FORMAT_V1));
    assert!(manifest.contains("\"tenant\": \"north\""));

    let mut dst = open_backend(
        std::sync::Arc::new(MemoryStore::default()),
        "north",
        BackendType::Kv,
    );
    let import = import_bundle(&bundle_path, dst.as_mut()).expect("import bundle");
    assert_eq!(import.bundle_format_detected, BUNDLE_FORMAT_V1);
    assert_eq!(import.students, 1);
    assert_eq!(
        dst.get_attendance_day("2024-09-01")
            .expect("day")
            .get("S1")
            .map(String::as_str),
        Some("07:12:00")
    );

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn kv_bundles_carry_no_database_entry() {
    let out_dir = temp_dir("kiosk-backup-kv");
    let bundle_path = out_dir.join("kv.zip");
    let mut src = seeded(BackendType::Kv);
    let export = export_bundle(src.as_mut(), &bundle_path).expect("export bundle");
    assert_eq!(export.entry_count, 2);
    assert!(!entry_names(&bundle_path)
        .iter()
        .any(|n| n == "db/kiosk.sqlite3"));
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_snapshot_is_rejected() {
    let out_dir = temp_dir("kiosk-backup-tamper");
    let good = out_dir.join("good.zip");
    let bad = out_dir.join("bad.zip");
    let mut src = seeded(BackendType::Kv);
    export_bundle(src.as_mut(), &good).expect("export bundle");

    rewrite_entry(&good, &bad, "snapshot.json", |bytes| {
        String::from_utf8(bytes)
            .expect("utf8 snapshot")
            .replace("Lina", "Mallory")
            .into_bytes()
    });

    let mut dst = seeded(BackendType::Kv);
    let err = import_bundle(&bad, dst.as_mut()).expect_err("tampered bundle");
    assert!(matches!(err, StoreError::InvalidFormat(_)));
    assert_eq!(dst.get_students().expect("students")[0].name, "Lina");

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn tampered_database_entry_is_rejected() {
    let out_dir = temp_dir("kiosk-backup-tamper-db");
    let good = out_dir.join("good.zip");
    let bad = out_dir.join("bad.zip");
    let mut src = seeded(BackendType::Sql);
    export_bundle(src.as_mut(), &good).expect("export bundle");
    rewrite_entry(&good, &bad, "db/kiosk.sqlite3", |_| b"tampered".to_vec());

    for kind in [BackendType::Sql, BackendType::Kv] {
        let mut dst = seeded(kind);
        dst.set_attendance("2024-09-02", "S1", "07:50:00")
            .expect("extra attendance");
        let err = import_bundle(&bad, dst.as_mut()).expect_err("tampered database");
        assert!(matches!(err, StoreError::InvalidFormat(_)));
        assert_eq!(
            dst.get_attendance_day("2024-09-02")
                .expect("day")
                .get("S1")
                .map(String::as_str),
            Some("07:50:00")
        );
    }

    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn sql_bundle_restores_the_database_into_a_sql_backend() {
    let out_dir = temp_dir("kiosk-backup-sql");
    let bundle_path = out_dir.join("sql.zip");
    let mut src = seeded(BackendType::Sql);
    src.add_permission(&serde_json::json!({
        "studentId": "S1",
        "reason": "clinic",
        "createdAt": "2024-09-01T10:00:00Z",
    }))
    .expect("permission");
    export_bundle(src.as_mut(), &bundle_path).expect("export bundle");

    let store = std::sync::Arc::new(MemoryStore::default());
    let mut dst = open_backend(store, "north", BackendType::Sql);
    dst.set_attendance("2024-09-05", "S9", "08:00:00")
        .expect("stale attendance");
    let import = import_bundle(&bundle_path, dst.as_mut()).expect("import bundle");
    assert_eq!(import.students, 1);

    assert!(dst.get_attendance_day("2024-09-05").expect("day").is_empty());
    assert_eq!(dst.get_students().expect("students")[0].name, "Lina");
    let perms = dst.get_permissions_day("2024-09-01").expect("permissions");
    assert_eq!(perms.len(), 1);
    assert_eq!(perms[0].reason, "clinic");
    assert_eq!(
        src.export_snapshot().expect("src").students,
        dst.export_snapshot().expect("dst").students
    );

    let _ = std::fs::remove_dir_all(out_dir);
}
