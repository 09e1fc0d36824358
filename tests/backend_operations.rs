use kioskstore::{
    open_backend, BackendType, KeyValueStore, MemoryStore, Settings, StorageBackend, StoreError,
    Student,
};
use serde_json::json;
use std::sync::Arc;

fn student(id: &str, name: &str) -> Student {
    Student {
        id: id.into(),
        name: name.into(),
        grade: "5".into(),
        class: "A".into(),
    }
}

fn both_backends() -> Vec<Box<dyn StorageBackend>> {
    [BackendType::Kv, BackendType::Sql]
        .into_iter()
        .map(|kind| open_backend(Arc::new(MemoryStore::default()), "school-1", kind))
        .collect()
}

#[test]
fn attendance_overwrite_keeps_one_record_with_later_time() {
    for mut backend in both_backends() {
        backend
            .set_attendance("2024-03-04", "S1", "07:10:00")
            .expect("first mark");
        backend
            .set_attendance("2024-03-04", "S1", "07:55")
            .expect("second mark");
        let day = backend.get_attendance_day("2024-03-04").expect("read day");
        assert_eq!(day.len(), 1, "{:?}", backend.backend_type());
        assert_eq!(day.get("S1").map(String::as_str), Some("07:55:00"));
    }
}

#[test]
fn attendance_delete_and_range() {
    for mut backend in both_backends() {
        backend.set_attendance("2024-03-01", "S1", "07:00:00").expect("mark");
        backend.set_attendance("2024-03-02", "S2", "07:01:00").expect("mark");
        backend.set_attendance("2024-03-03", "S3", "07:02:00").expect("mark");
        backend.delete_attendance("2024-03-02", "S2").expect("delete");
        // Deleting what is not there is fine.
        backend.delete_attendance("2024-03-02", "S2").expect("delete again");

        let range = backend
            .get_attendance_range(Some("2024-03-02"), None)
            .expect("range");
        assert_eq!(range.keys().collect::<Vec<_>>(), vec!["2024-03-03"]);

        let all = backend.get_attendance_range(None, None).expect("all");
        assert_eq!(all.len(), 2);
    }
}

#[test]
fn malformed_attendance_writes_are_rejected() {
    for mut backend in both_backends() {
        let err = backend
            .set_attendance("03/04/2024", "S1", "07:00:00")
            .expect_err("bad day");
        assert!(matches!(err, StoreError::Validation(_)));
        let err = backend
            .set_attendance("2024-03-04", "  ", "07:00:00")
            .expect_err("blank id");
        assert!(matches!(err, StoreError::Validation(_)));
        let err = backend
            .get_attendance_range(Some("yesterday"), None)
            .expect_err("bad bound");
        assert!(matches!(err, StoreError::Validation(_)));
    }
}

#[test]
fn two_permissions_on_one_day_come_back_in_created_order() {
    for mut backend in both_backends() {
        backend
            .add_permission(&json!({
                "studentId": "S1",
                "createdAt": "2024-03-04T10:30:00Z",
                "reason": "dentist",
            }))
            .expect("later entry");
        let first = backend
            .add_permission(&json!({
                "studentId": "S2",
                "createdAt": "2024-03-04T08:00:00.000Z",
                "reason": "family",
            }))
            .expect("earlier entry");
        assert_eq!(first.status, "pending");

        let day = backend.get_permissions_day("2024-03-04").expect("day");
        let ids: Vec<&str> = day.iter().map(|p| p.student_id.as_str()).collect();
        assert_eq!(ids, vec!["S2", "S1"], "{:?}", backend.backend_type());

        let range = backend
            .get_permissions_range(Some("2024-03-05"), None)
            .expect("range");
        assert!(range.is_empty());
    }
}

#[test]
fn permission_without_created_at_is_stamped_now() {
    for mut backend in both_backends() {
        let saved = backend
            .add_permission(&json!({ "studentId": "S9" }))
            .expect("add");
        assert!(saved.created_at.ends_with('Z'));
        let day = backend.get_permissions_day(&saved.day()).expect("day");
        assert_eq!(day.len(), 1);

        let err = backend
            .add_permission(&json!({ "reason": "no student" }))
            .expect_err("missing student");
        assert!(matches!(err, StoreError::Validation(_)));
    }
}

#[test]
fn students_are_replaced_in_bulk_and_deduplicated() {
    for mut backend in both_backends() {
        backend
            .set_students(&[student("S1", "A"), student("S2", "B")])
            .expect("first roster");
        backend
            .set_students(&[student("S3", "C"), student("S3", "C2")])
            .expect("second roster");
        let roster = backend.get_students().expect("read");
        assert_eq!(roster, vec![student("S3", "C2")]);

        let err = backend
            .set_students(&[student("", "nameless")])
            .expect_err("empty id");
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(backend.get_students().expect("unchanged").len(), 1);
    }
}

#[test]
fn settings_patch_is_merged_and_normalized() {
    for mut backend in both_backends() {
        let saved = backend
            .set_settings(&json!({ "schoolName": "North", "graceMinutes": 500 }))
            .expect("first patch");
        assert_eq!(saved.grace_minutes, 120);
        let saved = backend
            .set_settings(&json!({ "theme": "dark" }))
            .expect("second patch");
        assert_eq!(saved.school_name, "North");
        assert_eq!(saved.theme, "dark");
        assert_eq!(backend.get_settings().expect("read"), saved);
    }
}

#[test]
fn tenants_over_one_substrate_do_not_see_each_other() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    let mut a = open_backend(store.clone(), "a", BackendType::Kv);
    let mut b = open_backend(store.clone(), "b", BackendType::Kv);
    a.set_students(&[student("S1", "A")]).expect("write a");
    assert!(b.get_students().expect("read b").is_empty());
    assert!(store.get("a:students").expect("get").is_some());
}

#[test]
fn kv_reads_fall_back_to_unnamespaced_legacy_keys() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    store
        .set("students", br#"[{"id":"OLD1","name":"Legacy"}]"#)
        .expect("seed legacy key");
    let mut backend = open_backend(store.clone(), "default", BackendType::Kv);
    let roster = backend.get_students().expect("read");
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].id, "OLD1");
}

#[test]
fn corrupt_kv_values_read_as_defaults() {
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
    store.set("t:settings", b"{not json").expect("seed");
    store.set("t:attendance", b"[1,2,3]").expect("seed");
    let mut backend = open_backend(store, "t", BackendType::Kv);
    assert_eq!(backend.get_settings().expect("settings"), Settings::default());
    assert!(backend
        .get_attendance_range(None, None)
        .expect("attendance")
        .is_empty());
}
