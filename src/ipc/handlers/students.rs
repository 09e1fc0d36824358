use crate::ipc::error::{err, store_err};
use crate::ipc::helpers::{open_store, to_result};
use crate::ipc::types::{AppState, Request};
use kioskstore::Student;
use serde_json::json;

fn field(row: &serde_json::Value, key: &str) -> String {
    match row.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn handle_students_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    match store.backend.get_students() {
        Ok(students) => to_result(req, &json!({ "students": students })),
        Err(e) => store_err(&req.id, &e),
    }
}

fn handle_students_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(rows) = req.params.get("students").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing students", None);
    };
    // Rows without an id are passed through so the backend rejects the write.
    let students: Vec<Student> = rows
        .iter()
        .map(|row| Student {
            id: field(row, "id"),
            name: field(row, "name"),
            grade: field(row, "grade"),
            class: field(row, "class"),
        })
        .collect();

    let store = match open_store(state, req) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    if let Err(e) = store.backend.set_students(&students) {
        return store_err(&req.id, &e);
    }
    match store.backend.get_students() {
        Ok(saved) => to_result(req, &json!({ "count": saved.len() })),
        Err(e) => store_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.get" => Some(handle_students_get(state, req)),
        "students.set" => Some(handle_students_set(state, req)),
        _ => None,
    }
}
